use serde::{Deserialize, Serialize};

use crate::constants::{CODE_ERROR, CODE_OK};

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// Query string of `POST /api/upload/:filename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkQuery {
    pub chunk_filename: String,
    /// Resume cursor: byte offset inside the chunk where this body starts.
    pub start: u64,
    /// Planned size of the chunk. The server refuses bytes past it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_total: Option<u64>,
}

/// Query string of `GET /api/merge/:filename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeQuery {
    pub chunk_size: u64,
    /// Original file size; enables the exact chunk-count check before merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

/// A chunk already persisted on the server and its resume cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedChunk {
    pub chunk_filename: String,
    pub size: u64,
}

/// Response of `GET /api/checkFileIsExist/:filename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFileResponse {
    pub code: i32,
    pub exist: bool,
    #[serde(default)]
    pub uploaded_chunks: Vec<UploadedChunk>,
}

impl CheckFileResponse {
    /// The artifact is already present; no transfer is needed.
    pub fn exists() -> Self {
        Self {
            code: CODE_OK,
            exist: true,
            uploaded_chunks: Vec::new(),
        }
    }

    /// The artifact is absent; `uploaded_chunks` lists resumable chunks.
    pub fn missing(uploaded_chunks: Vec<UploadedChunk>) -> Self {
        Self {
            code: CODE_OK,
            exist: false,
            uploaded_chunks,
        }
    }

    /// Returns the persisted size reported for `chunk_filename` (0 if absent).
    pub fn persisted(&self, chunk_filename: &str) -> u64 {
        self.uploaded_chunks
            .iter()
            .find(|c| c.chunk_filename == chunk_filename)
            .map(|c| c.size)
            .unwrap_or(0)
    }
}

/// Bare `{code}` body returned by upload and merge (plus a message on error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeResponse {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CodeResponse {
    pub fn ok() -> Self {
        Self {
            code: CODE_OK,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: CODE_ERROR,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}
