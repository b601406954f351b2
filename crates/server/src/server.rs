//! Upload server lifecycle.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use ferry_protocol::constants::DEFAULT_PORT;
use ferry_store::{ChunkStore, StoreLayout};

use crate::ServerError;
use crate::handler::router;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind: SocketAddr,
    /// Directory of merged artifacts.
    pub public_dir: PathBuf,
    /// Directory of in-progress working sets.
    pub temp_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            public_dir: PathBuf::from("public"),
            temp_dir: PathBuf::from("temp"),
        }
    }
}

/// HTTP server exposing a [`ChunkStore`].
pub struct UploadServer {
    bind: SocketAddr,
    store: Arc<ChunkStore>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UploadServer {
    /// Opens the store and prepares the server. Nothing is bound until [`run`](Self::run).
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        let store = ChunkStore::open(StoreLayout::new(config.public_dir, config.temp_dir))?;
        Ok(Arc::new(Self {
            bind: config.bind,
            store: Arc::new(store),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        }))
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Stops accepting connections; in-flight requests are allowed to finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.bind).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("upload server listening on {local_addr}");

        let cancel = self.cancel.clone();
        axum::serve(listener, router(Arc::clone(&self.store)))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        tracing::info!("server shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_protocol::{CheckFileResponse, CodeResponse};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn start() -> (TempDir, Arc<UploadServer>, String, tokio::task::JoinHandle<()>) {
        let dir = TempDir::new().unwrap();
        let server = UploadServer::new(ServerConfig {
            bind: ([127, 0, 0, 1], 0).into(),
            public_dir: dir.path().join("public"),
            temp_dir: dir.path().join("temp"),
        })
        .unwrap();

        let s = Arc::clone(&server);
        let task = tokio::spawn(async move {
            s.run().await.unwrap();
        });

        let addr = loop {
            if let Some(addr) = server.local_addr().await {
                break addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        (dir, server, format!("http://{addr}"), task)
    }

    #[tokio::test]
    async fn upload_then_merge_over_http() {
        let (dir, server, base, task) = start().await;
        let client = reqwest::Client::new();

        let check: CheckFileResponse = client
            .get(format!("{base}/api/checkFileIsExist/abc.bin"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!check.exist);
        assert!(check.uploaded_chunks.is_empty());

        for (i, part) in [&b"hello "[..], &b"wor"[..]].iter().enumerate() {
            let resp = client
                .post(format!(
                    "{base}/api/upload/abc.bin?chunkFilename=abc.bin-{i}&start=0"
                ))
                .body(part.to_vec())
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
        }

        // Resume the second chunk from its persisted cursor.
        let check: CheckFileResponse = client
            .get(format!("{base}/api/checkFileIsExist/abc.bin"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(check.persisted("abc.bin-1"), 3);
        client
            .post(format!(
                "{base}/api/upload/abc.bin?chunkFilename=abc.bin-1&start=3"
            ))
            .body(&b"ld"[..])
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap();

        let merged: CodeResponse = client
            .get(format!("{base}/api/merge/abc.bin?chunkSize=6&fileSize=11"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(merged.is_ok());
        assert_eq!(
            std::fs::read(dir.path().join("public/abc.bin")).unwrap(),
            b"hello world"
        );

        let check: CheckFileResponse = client
            .get(format!("{base}/api/checkFileIsExist/abc.bin"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(check.exist);

        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn wrong_cursor_is_a_conflict() {
        let (_dir, server, base, task) = start().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/upload/x.bin?chunkFilename=x.bin-0&start=5"))
            .body(&b"data"[..])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
        let body: CodeResponse = resp.json().await.unwrap();
        assert!(!body.is_ok());
        assert!(body.message.is_some());

        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_bad_names_and_missing_sessions() {
        let (_dir, server, base, task) = start().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/upload/x.bin?chunkFilename=other-0&start=0"))
            .body(&b"data"[..])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .get(format!("{base}/api/merge/none.bin?chunkSize=4"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = client
            .get(format!("{base}/api/checkFileIsExist/.staging"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn incomplete_set_is_unprocessable() {
        let (_dir, server, base, task) = start().await;
        let client = reqwest::Client::new();

        client
            .post(format!("{base}/api/upload/g.bin?chunkFilename=g.bin-1&start=0"))
            .body(&b"tail"[..])
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap();

        let resp = client
            .get(format!("{base}/api/merge/g.bin?chunkSize=4"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);

        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn browser_origins_are_allowed() {
        let (_dir, server, base, task) = start().await;
        let client = reqwest::Client::new();

        let preflight = client
            .request(
                reqwest::Method::OPTIONS,
                format!("{base}/api/upload/c.bin?chunkFilename=c.bin-0&start=0"),
            )
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .send()
            .await
            .unwrap();
        assert_eq!(preflight.status(), 204);
        assert_eq!(preflight.headers()["access-control-allow-origin"], "*");

        let check = client
            .get(format!("{base}/api/checkFileIsExist/c.bin"))
            .header("origin", "http://localhost:5173")
            .send()
            .await
            .unwrap();
        assert_eq!(check.status(), 200);
        assert_eq!(check.headers()["access-control-allow-origin"], "*");

        server.shutdown();
        task.await.unwrap();
    }
}
