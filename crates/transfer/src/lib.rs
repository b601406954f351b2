//! Client-side building blocks of a chunked upload: content fingerprint,
//! chunk plan, chunk readers and progress tracking.

mod chunked;
mod fingerprint;
mod progress;
mod types;
mod validation;

pub use chunked::{open_chunk_range, plan_chunks};
pub use fingerprint::{
    FingerprintHandle, FingerprintWorker, artifact_identity, calculate_file_checksum,
    checksum_bytes,
};
pub use progress::{ProgressTracker, SpeedCalculator, percent_of};
pub use types::{ArtifactIdentity, ChunkSpec};
pub use validation::{chunk_index, parse_chunk_name, validate_artifact_name};

pub use ferry_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid chunk plan: {0}")]
    InvalidPlan(String),

    #[error("fingerprint worker closed")]
    WorkerClosed,
}
