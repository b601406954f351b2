//! Client side of a chunked, resumable upload.
//!
//! [`UploadOrchestrator`] drives one file through the pipeline:
//!
//! 1. **Fingerprint**: SHA-256 of the content names the artifact
//! 2. **Check**: ask the server whether it already exists (dedup) or
//!    which chunks are partially persisted (resume cursors)
//! 3. **Transfer**: send the remaining bytes of each chunk, bounded
//!    concurrency, per-chunk retry with backoff
//! 4. **Merge**: ask the server to assemble the artifact
//!
//! The network is behind the [`UploadTransport`] trait; [`HttpTransport`]
//! is the reqwest implementation.

pub mod error;
pub mod http;
pub mod orchestrator;
pub mod retry;
pub mod transport;
pub mod types;

pub use error::UploadError;
pub use http::HttpTransport;
pub use orchestrator::UploadOrchestrator;
pub use retry::RetryPolicy;
pub use transport::{BoxFuture, ChunkUpload, UploadTransport};
pub use types::{UploadConfig, UploadEvent, UploadOutcome, UploadProgress};

pub use ferry_protocol::UploadStatus;
