//! `ferry serve`

use std::sync::Arc;

use ferry_server::UploadServer;

use crate::config::ServerSection;

pub async fn run(section: &ServerSection) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %section.bind,
        "starting Ferry server"
    );

    let server = UploadServer::new(section.to_server_config())?;

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            stopper.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
