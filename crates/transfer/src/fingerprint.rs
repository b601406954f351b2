use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::TransferError;
use crate::types::ArtifactIdentity;

const READ_BUFFER_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Computes the artifact identity of a file: its digest plus its extension.
///
/// Blocking; run it through [`FingerprintWorker`] from async code.
pub fn artifact_identity(path: &Path) -> Result<ArtifactIdentity, TransferError> {
    let digest = calculate_file_checksum(path)?;
    let extension = path.extension().and_then(|e| e.to_str());
    Ok(ArtifactIdentity::new(&digest, extension))
}

// ---------------------------------------------------------------------------
// Background worker
// ---------------------------------------------------------------------------

struct FingerprintRequest {
    path: PathBuf,
    reply: oneshot::Sender<Result<ArtifactIdentity, TransferError>>,
}

/// Owned background task that hashes files off the caller's task.
///
/// Requests are served one at a time; each gets exactly one reply.
/// Hashing runs on the blocking pool and is not interruptible once
/// started.
pub struct FingerprintWorker {
    tx: mpsc::Sender<FingerprintRequest>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Cloneable request side of a [`FingerprintWorker`].
#[derive(Clone)]
pub struct FingerprintHandle {
    tx: mpsc::Sender<FingerprintRequest>,
}

impl FingerprintWorker {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<FingerprintRequest>(1);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let req = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    req = rx.recv() => match req {
                        Some(r) => r,
                        None => break,
                    },
                };

                debug!(path = %req.path.display(), "fingerprinting file");
                let path = req.path;
                let result = tokio::task::spawn_blocking(move || artifact_identity(&path))
                    .await
                    .unwrap_or_else(|e| Err(TransferError::Io(std::io::Error::other(e))));

                if let Ok(identity) = &result {
                    info!(artifact = %identity, "fingerprint computed");
                }
                // The requester may have gone away; nothing to do then.
                let _ = req.reply.send(result);
            }
            debug!("fingerprint worker stopped");
        });

        Self {
            tx,
            cancel,
            task: Some(task),
        }
    }

    /// Returns a handle for submitting requests.
    pub fn handle(&self) -> FingerprintHandle {
        FingerprintHandle {
            tx: self.tx.clone(),
        }
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// A computation already running finishes first; queued requests are
    /// answered with [`TransferError::WorkerClosed`] by dropping their reply.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FingerprintWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl FingerprintHandle {
    /// Computes the artifact identity of `path` on the worker.
    pub async fn fingerprint(&self, path: PathBuf) -> Result<ArtifactIdentity, TransferError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FingerprintRequest { path, reply })
            .await
            .map_err(|_| TransferError::WorkerClosed)?;
        rx.await.map_err(|_| TransferError::WorkerClosed)?
    }
}
