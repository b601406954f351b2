//! reqwest implementation of [`UploadTransport`].

use futures_util::TryStreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::debug;

use ferry_protocol::constants::{CHECK_ROUTE, MERGE_ROUTE, UPLOAD_ROUTE, route_path};
use ferry_protocol::{CheckFileResponse, CodeResponse, MergeQuery, UploadChunkQuery};
use ferry_transfer::open_chunk_range;

use crate::error::UploadError;
use crate::transport::{BoxFuture, ChunkUpload, UploadTransport};

/// HTTP client for an upload server.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a client for the server at `base_url` (e.g. `http://host:18080`).
    pub fn new(base_url: &str) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, route: &str, artifact: &str) -> String {
        let encoded = utf8_percent_encode(artifact, NON_ALPHANUMERIC).to_string();
        format!("{}{}", self.base_url, route_path(route, &encoded))
    }

    /// Turns a non-2xx response into [`UploadError::Api`] and parses the body.
    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, UploadError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UploadError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_chunk(&self, request: ChunkUpload<'_>) -> Result<(), UploadError> {
        let chunk = request.chunk;
        let reader = open_chunk_range(request.source, chunk, request.start).await?;

        // The body stream must be 'static, so it reports through a watch
        // channel instead of calling the borrowed callback directly.
        let (sent_tx, mut sent_rx) = watch::channel(0u64);
        let mut sent = 0u64;
        let stream = ReaderStream::new(reader).inspect_ok(move |bytes| {
            sent += bytes.len() as u64;
            sent_tx.send_replace(sent);
        });

        let query = UploadChunkQuery {
            chunk_filename: chunk.name.clone(),
            start: request.start,
            chunk_total: Some(chunk.len()),
        };
        let send = self
            .http
            .post(self.url(UPLOAD_ROUTE, request.artifact))
            .query(&query)
            .body(reqwest::Body::wrap_stream(stream))
            .send();
        tokio::pin!(send);

        let mut reporting = true;
        let resp = loop {
            tokio::select! {
                biased;
                _ = request.cancel.cancelled() => {
                    debug!(chunk = %chunk.name, "chunk request cancelled");
                    return Err(UploadError::Cancelled);
                }
                changed = sent_rx.changed(), if reporting => match changed {
                    Ok(()) => (request.progress)(*sent_rx.borrow_and_update()),
                    Err(_) => reporting = false,
                },
                resp = &mut send => break resp?,
            }
        };

        let body: CodeResponse = Self::read_json(resp).await?;
        if !body.is_ok() {
            return Err(UploadError::Api {
                status: 200,
                body: body.message.unwrap_or_default(),
            });
        }
        (request.progress)(chunk.len() - request.start);
        Ok(())
    }
}

impl UploadTransport for HttpTransport {
    fn check<'a>(&'a self, artifact: &'a str) -> BoxFuture<'a, Result<CheckFileResponse, UploadError>> {
        Box::pin(async move {
            let resp = self.http.get(self.url(CHECK_ROUTE, artifact)).send().await?;
            Self::read_json(resp).await
        })
    }

    fn upload_chunk<'a>(&'a self, request: ChunkUpload<'a>) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(self.send_chunk(request))
    }

    fn merge<'a>(
        &'a self,
        artifact: &'a str,
        chunk_size: u64,
        file_size: u64,
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            let query = MergeQuery {
                chunk_size,
                file_size: Some(file_size),
            };
            let resp = self
                .http
                .get(self.url(MERGE_ROUTE, artifact))
                .query(&query)
                .send()
                .await?;
            let body: CodeResponse = match Self::read_json(resp).await {
                Ok(body) => body,
                Err(UploadError::Api { status, body }) => {
                    return Err(UploadError::Merge(format!("{status}: {body}")));
                }
                Err(e) => return Err(e),
            };
            if !body.is_ok() {
                return Err(UploadError::Merge(body.message.unwrap_or_default()));
            }
            Ok(())
        })
    }
}
