//! Upload error types.

use std::path::PathBuf;

use ferry_protocol::UploadStatus;
use ferry_transfer::TransferError;

/// Errors that can occur while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("upload cancelled")]
    Cancelled,

    #[error("cannot {action} while {status}")]
    InvalidState {
        action: &'static str,
        status: UploadStatus,
    },

    #[error("file is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("{failed} chunk(s) failed, last error: {last_error}")]
    ChunksFailed { failed: usize, last_error: String },

    #[error("merge failed: {0}")]
    Merge(String),
}

impl UploadError {
    /// Returns `true` for errors caused by pausing rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
