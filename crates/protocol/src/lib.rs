//! Wire protocol types shared by the Ferry upload server and client.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{CheckFileResponse, CodeResponse, MergeQuery, UploadChunkQuery, UploadedChunk};
pub use types::UploadStatus;
