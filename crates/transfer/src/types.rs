use std::fmt;

/// Content-addressed name of an artifact: `<sha256 hex>.<ext>`.
///
/// Identical bytes always produce the identical identity, which is both
/// the dedup key and the storage key on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactIdentity(String);

impl ArtifactIdentity {
    /// Combines a hex digest with an optional file extension.
    pub fn new(digest: &str, extension: Option<&str>) -> Self {
        match extension {
            Some(ext) if !ext.is_empty() => Self(format!("{digest}.{ext}")),
            _ => Self(digest.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of chunk `index` of this artifact (`<identity>-<index>`).
    pub fn chunk_name(&self, index: u64) -> String {
        format!("{}-{index}", self.0)
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One planned byte range `[start, end)` of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpec {
    pub index: u64,
    pub start: u64,
    pub end: u64,
    /// `<identity>-<index>`, stable across attempts.
    pub name: String,
}

impl ChunkSpec {
    /// Planned size of this chunk in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}
