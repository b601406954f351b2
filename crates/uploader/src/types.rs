//! Configuration, events and results of an upload.

use std::collections::BTreeMap;
use std::time::Duration;

use ferry_protocol::UploadStatus;
use ferry_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENCY};

use crate::retry::RetryPolicy;

/// Client-side upload settings.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Fixed chunk size in bytes.
    pub chunk_size: u64,
    /// Chunk transfers allowed in flight at once.
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Event emitted while an upload runs.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The lifecycle state changed.
    StateChanged(UploadStatus),
    /// The content fingerprint is known.
    Fingerprinted { identity: String, size: u64 },
    /// A chunk's progress moved to `percent`.
    ChunkProgress { chunk: String, percent: u8 },
    /// A chunk failed and will be retried.
    ChunkRetry {
        chunk: String,
        attempt: u32,
        error: String,
    },
    /// The server already had the artifact; nothing was transferred.
    Deduplicated { identity: String },
    /// The artifact was merged on the server.
    Completed { identity: String, size: u64 },
    /// The upload failed.
    Failed { error: String },
}

/// How a finished `upload`/`resume` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Dedup hit: the artifact already existed.
    Deduplicated,
    /// All chunks were sent and merged.
    Uploaded { size: u64 },
    /// Paused before completion; persisted bytes are kept for resume.
    Paused,
}

/// Point-in-time view of an upload.
#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub status: UploadStatus,
    pub identity: Option<String>,
    /// `chunk name -> percent` for the current attempt.
    pub chunks: BTreeMap<String, u8>,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
}

impl UploadProgress {
    /// Overall completion across all chunks (0-100).
    pub fn percent(&self) -> u8 {
        if self.bytes_total == 0 {
            return 0;
        }
        ferry_transfer::percent_of(self.bytes_done, self.bytes_total)
    }
}
