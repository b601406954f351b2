use std::io::SeekFrom;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;
use crate::types::{ArtifactIdentity, ChunkSpec};

// ---------------------------------------------------------------------------
// Chunk planning
// ---------------------------------------------------------------------------

/// Partitions `[0, file_size)` into `ceil(file_size / chunk_size)` ordered,
/// gap-free chunks. Only the final chunk may be shorter than `chunk_size`.
pub fn plan_chunks(
    identity: &ArtifactIdentity,
    file_size: u64,
    chunk_size: u64,
) -> Result<Vec<ChunkSpec>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidPlan("chunk size must be positive".into()));
    }
    if file_size == 0 {
        return Err(TransferError::InvalidPlan("file is empty".into()));
    }

    let count = file_size.div_ceil(chunk_size);
    let chunks = (0..count)
        .map(|index| {
            let start = index * chunk_size;
            ChunkSpec {
                index,
                start,
                end: (start + chunk_size).min(file_size),
                name: identity.chunk_name(index),
            }
        })
        .collect();
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// Chunk reading
// ---------------------------------------------------------------------------

/// Opens `path` positioned at `spec.start + resume_from`, limited to the
/// remainder of the chunk.
///
/// `resume_from` is the server's resume cursor for this chunk; the bytes
/// before it are never read again.
pub async fn open_chunk_range(
    path: &Path,
    spec: &ChunkSpec,
    resume_from: u64,
) -> Result<tokio::io::Take<tokio::fs::File>, TransferError> {
    if resume_from > spec.len() {
        return Err(TransferError::InvalidPlan(format!(
            "resume offset {resume_from} beyond chunk {} of {} bytes",
            spec.name,
            spec.len()
        )));
    }

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(spec.start + resume_from)).await?;
    Ok(file.take(spec.len() - resume_from))
}
