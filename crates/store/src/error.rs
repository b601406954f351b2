//! Error types for the chunk store.

/// Errors produced by the chunk store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("resume offset mismatch: chunk holds {expected} bytes, request starts at {got}")]
    OffsetMismatch { expected: u64, got: u64 },

    #[error("chunk exceeds its planned size of {limit} bytes")]
    ChunkOverflow { limit: u64 },

    #[error("chunk {0} already has a writer")]
    ChunkBusy(String),

    #[error("transfer aborted after {persisted} bytes")]
    Aborted { persisted: u64 },

    #[error("artifact already merged: {0}")]
    AlreadyMerged(String),

    #[error("artifact {0} is busy; retry the merge later")]
    SessionBusy(String),

    #[error("no upload session for {0}")]
    SessionNotFound(String),

    #[error("incomplete chunk set: {0}")]
    IncompleteChunkSet(String),
}

impl From<ferry_transfer::TransferError> for StoreError {
    fn from(e: ferry_transfer::TransferError) -> Self {
        match e {
            ferry_transfer::TransferError::Io(io) => Self::Io(io),
            other => Self::InvalidName(other.to_string()),
        }
    }
}
