//! HTTP server for chunked, resumable uploads.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /api/checkFileIsExist/{filename}` | dedup hit or resume cursors |
//! | `POST /api/upload/{filename}?chunkFilename&start[&chunkTotal]` | append raw chunk bytes |
//! | `GET /api/merge/{filename}?chunkSize[&fileSize]` | assemble and publish |

mod handler;
mod server;

pub use handler::{ApiError, router};
pub use server::{ServerConfig, UploadServer};

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] ferry_store::StoreError),
}
