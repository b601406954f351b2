//! Transport seam between the orchestrator and the server.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use ferry_protocol::CheckFileResponse;
use ferry_transfer::ChunkSpec;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One chunk transfer request.
pub struct ChunkUpload<'a> {
    pub artifact: &'a str,
    /// Local file the chunk's bytes are read from.
    pub source: &'a Path,
    pub chunk: &'a ChunkSpec,
    /// Resume cursor; bytes before it are already on the server.
    pub start: u64,
    /// Called with the cumulative bytes sent by this request.
    pub progress: &'a (dyn Fn(u64) + Send + Sync),
    /// Cancelling aborts the request with [`UploadError::Cancelled`].
    pub cancel: &'a CancellationToken,
}

/// Abstract connection to an upload server.
///
/// Implemented over HTTP by [`crate::HttpTransport`]; tests use mocks.
pub trait UploadTransport: Send + Sync {
    /// Existence / resume query for `artifact`.
    fn check<'a>(&'a self, artifact: &'a str) -> BoxFuture<'a, Result<CheckFileResponse, UploadError>>;

    /// Sends the bytes of `request.chunk` from `request.start` to its end.
    fn upload_chunk<'a>(&'a self, request: ChunkUpload<'a>) -> BoxFuture<'a, Result<(), UploadError>>;

    /// Asks the server to assemble `artifact` from its chunks.
    fn merge<'a>(
        &'a self,
        artifact: &'a str,
        chunk_size: u64,
        file_size: u64,
    ) -> BoxFuture<'a, Result<(), UploadError>>;
}
