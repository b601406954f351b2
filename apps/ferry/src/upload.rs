//! `ferry upload <FILE>`

use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use ferry_uploader::{
    HttpTransport, UploadEvent, UploadOrchestrator, UploadOutcome, UploadProgress,
};

use crate::config::UploadSection;

pub async fn run(section: &UploadSection, file: &Path) -> anyhow::Result<()> {
    let transport = HttpTransport::new(&section.server_url)?;
    let mut orchestrator = UploadOrchestrator::new(transport, section.to_upload_config());
    let mut events = orchestrator
        .take_events()
        .context("event receiver already taken")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    tracing::info!(file = %file.display(), server = %section.server_url, "starting upload");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let result = {
        let upload = orchestrator.upload(file);
        tokio::pin!(upload);
        loop {
            tokio::select! {
                res = &mut upload => break res,
                _ = tokio::signal::ctrl_c() => {
                    if let Err(e) = orchestrator.pause() {
                        tracing::warn!("cannot pause: {e}");
                    }
                }
                _ = ticker.tick() => print_progress(&orchestrator.progress()),
            }
        }
    };

    // Dropping the orchestrator closes the event channel.
    drop(orchestrator);
    let _ = printer.await;

    match result? {
        UploadOutcome::Deduplicated => println!("already on server, nothing to send"),
        UploadOutcome::Uploaded { size } => println!("uploaded {}", format_bytes(size)),
        UploadOutcome::Paused => println!("paused; run the same command again to resume"),
    }
    Ok(())
}

fn print_event(event: &UploadEvent) {
    match event {
        UploadEvent::Fingerprinted { identity, size } => {
            println!("{identity} ({})", format_bytes(*size));
        }
        UploadEvent::ChunkRetry {
            chunk,
            attempt,
            error,
        } => println!("retrying {chunk} (attempt {attempt}): {error}"),
        UploadEvent::Failed { error } => println!("upload failed: {error}"),
        UploadEvent::StateChanged(status) => tracing::debug!(%status, "state changed"),
        UploadEvent::ChunkProgress { chunk, percent } => {
            tracing::trace!(chunk = %chunk, percent, "chunk progress")
        }
        UploadEvent::Deduplicated { .. } | UploadEvent::Completed { .. } => {}
    }
}

fn print_progress(progress: &UploadProgress) {
    if progress.bytes_total == 0 {
        return;
    }
    let eta = progress
        .eta
        .map(|d| format!(", {}s left", d.as_secs()))
        .unwrap_or_default();
    println!(
        "{:>3}% {}/{} at {}/s{eta}",
        progress.percent(),
        format_bytes(progress.bytes_done),
        format_bytes(progress.bytes_total),
        format_bytes(progress.bytes_per_second as u64),
    );
}

/// Human-readable byte count (binary units).
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
