use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use futures_util::future::try_join_all;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::{ChunkStore, StoreError};

/// Result of a successful merge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Chunks were assembled into a new artifact of `size` bytes.
    Merged { size: u64 },
    /// The artifact already existed; the working set was discarded.
    AlreadyPresent,
}

struct ChunkFile {
    index: u64,
    path: PathBuf,
    len: u64,
}

impl ChunkStore {
    /// Assembles the working set of `artifact` into the final artifact.
    ///
    /// Every chunk is copied concurrently to `index * chunk_size` of a
    /// staging file, which is renamed into the public directory once all
    /// copies finished. The working set is then deleted. The chunk set is
    /// verified first (indices, sizes, optional file size); on failure nothing is
    /// touched so the upload can resume. If receives keep the artifact busy
    /// past the store's merge wait, the merge fails with
    /// [`StoreError::SessionBusy`] and can be retried.
    pub async fn merge(
        &self,
        artifact: &str,
        chunk_size: u64,
        file_size: Option<u64>,
    ) -> Result<MergeOutcome, StoreError> {
        ferry_transfer::validate_artifact_name(artifact)?;
        if chunk_size == 0 {
            return Err(StoreError::InvalidRequest("chunk size must be positive".into()));
        }

        let Some(exclusive) = self.locks.exclusive_within(artifact, self.merge_wait).await else {
            self.locks.release(artifact);
            warn!(artifact, "merge gave up waiting for in-flight receives");
            return Err(StoreError::SessionBusy(artifact.to_string()));
        };
        let result = self.merge_locked(artifact, chunk_size, file_size).await;
        drop(exclusive);
        self.locks.release(artifact);
        result
    }

    async fn merge_locked(
        &self,
        artifact: &str,
        chunk_size: u64,
        file_size: Option<u64>,
    ) -> Result<MergeOutcome, StoreError> {
        let session_dir = self.layout.session_dir(artifact);
        let target = self.layout.artifact_path(artifact);

        if tokio::fs::try_exists(&target).await? {
            remove_session(&session_dir).await?;
            info!(artifact, "artifact already present, working set discarded");
            return Ok(MergeOutcome::AlreadyPresent);
        }

        let chunks = list_chunks(artifact, &session_dir).await?;
        let sizes: Vec<(u64, u64)> = chunks.iter().map(|c| (c.index, c.len)).collect();
        let total = verify_chunk_set(&sizes, chunk_size, file_size)?;

        let staging = self.layout.staging_path(artifact);
        if let Err(e) = assemble(&staging, &chunks, chunk_size, total).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        remove_session(&session_dir).await?;

        info!(artifact, chunks = chunks.len(), size = total, "artifact merged");
        Ok(MergeOutcome::Merged { size: total })
    }
}

async fn list_chunks(artifact: &str, session_dir: &Path) -> Result<Vec<ChunkFile>, StoreError> {
    let mut entries = match tokio::fs::read_dir(session_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::SessionNotFound(artifact.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut chunks = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(index) = ferry_transfer::parse_chunk_name(artifact, &name) else {
            warn!(artifact, entry = %name, "ignoring foreign file in working set");
            continue;
        };
        chunks.push(ChunkFile {
            index,
            path: entry.path(),
            len: entry.metadata().await?.len(),
        });
    }
    chunks.sort_by_key(|c| c.index);
    Ok(chunks)
}

/// Checks that `(index, len)` pairs, sorted by index, form a complete chunk set.
///
/// Indices must be exactly `0..n`; every chunk but the last must hold
/// `chunk_size` bytes and the last `1..=chunk_size`. With `file_size`,
/// `n` and the total must match it too. Returns the total size.
pub(crate) fn verify_chunk_set(
    chunks: &[(u64, u64)],
    chunk_size: u64,
    file_size: Option<u64>,
) -> Result<u64, StoreError> {
    let Some(&(last_index, last_len)) = chunks.last() else {
        return Err(StoreError::IncompleteChunkSet("no chunks".into()));
    };

    for (position, &(index, len)) in chunks.iter().enumerate() {
        if index != position as u64 {
            return Err(StoreError::IncompleteChunkSet(format!(
                "chunk {position} missing"
            )));
        }
        if index != last_index && len != chunk_size {
            return Err(StoreError::IncompleteChunkSet(format!(
                "chunk {index} holds {len} of {chunk_size} bytes"
            )));
        }
    }
    if last_len == 0 || last_len > chunk_size {
        return Err(StoreError::IncompleteChunkSet(format!(
            "final chunk {last_index} holds {last_len} bytes"
        )));
    }

    let total = last_index * chunk_size + last_len;
    if let Some(expected) = file_size {
        let expected_count = expected.div_ceil(chunk_size);
        if chunks.len() as u64 != expected_count || total != expected {
            return Err(StoreError::IncompleteChunkSet(format!(
                "have {} chunks / {total} bytes, expected {expected_count} chunks / {expected} bytes",
                chunks.len()
            )));
        }
    }
    Ok(total)
}

async fn assemble(
    staging: &Path,
    chunks: &[ChunkFile],
    chunk_size: u64,
    total: u64,
) -> Result<(), StoreError> {
    // The temp root may have been cleaned since the store was opened.
    if let Some(parent) = staging.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let out = tokio::fs::File::create(staging).await?;
    out.set_len(total).await?;
    drop(out);

    // Disjoint byte ranges: each copy gets its own handle, no coordination needed.
    try_join_all(chunks.iter().map(|chunk| async move {
        let mut src = tokio::fs::File::open(&chunk.path).await?;
        let mut dst = tokio::fs::OpenOptions::new().write(true).open(staging).await?;
        dst.seek(SeekFrom::Start(chunk.index * chunk_size)).await?;
        let copied = tokio::io::copy(&mut src, &mut dst).await?;
        dst.flush().await?;
        debug!(chunk = chunk.index, bytes = copied, "chunk copied");
        Ok::<_, std::io::Error>(())
    }))
    .await?;

    tokio::fs::File::open(staging).await?.sync_all().await?;
    Ok(())
}

async fn remove_session(session_dir: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_dir_all(session_dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CheckOutcome;
    use crate::test_support::{put_chunk, store};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn split(store: &ChunkStore, artifact: &str, data: &[u8], chunk_size: usize) {
        for (i, part) in data.chunks(chunk_size).enumerate() {
            put_chunk(store, artifact, i as u64, part);
        }
    }

    #[tokio::test]
    async fn merge_reproduces_source() {
        let (_dir, store) = store();
        let data = pattern(2500);
        split(&store, "h.bin", &data, 1000);

        let outcome = store.merge("h.bin", 1000, Some(2500)).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { size: 2500 });

        let merged = std::fs::read(store.layout().artifact_path("h.bin")).unwrap();
        assert_eq!(merged, data);
        assert!(!store.layout().session_dir("h.bin").exists());
        assert_eq!(store.check("h.bin").await.unwrap(), CheckOutcome::Exists);
    }

    #[tokio::test]
    async fn merge_sorts_numerically() {
        // More than ten chunks: lexical order would put 10 before 2.
        let (_dir, store) = store();
        let data = pattern(12 * 7 + 3);
        split(&store, "h.bin", &data, 7);

        store.merge("h.bin", 7, None).await.unwrap();
        let merged = std::fs::read(store.layout().artifact_path("h.bin")).unwrap();
        assert_eq!(merged, data);
    }

    #[tokio::test]
    async fn merge_recreates_missing_staging_dir() {
        let (_dir, store) = store();
        std::fs::remove_dir_all(store.layout().temp_dir()).unwrap();

        let persisted = store.receive("h.bin", "h.bin-0", 0, Some(4), &b"abcd"[..]).await.unwrap();
        assert_eq!(persisted, 4);

        let outcome = store.merge("h.bin", 4, Some(4)).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { size: 4 });
        let merged = std::fs::read(store.layout().artifact_path("h.bin")).unwrap();
        assert_eq!(merged, b"abcd");
    }

    #[tokio::test]
    async fn merge_behind_stuck_receive_gives_up() {
        let (_dir, store) = store();
        let store = store.with_merge_wait(std::time::Duration::from_millis(30));
        put_chunk(&store, "h.bin", 0, &pattern(10));

        let stuck = store.locks.shared("h.bin").await;
        let err = store.merge("h.bin", 10, Some(10)).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionBusy(_)));

        // Checks are not held back once the merge gave up.
        let outcome = store.check("h.bin").await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Missing(_)));
        drop(stuck);

        store.merge("h.bin", 10, Some(10)).await.unwrap();
    }

    #[tokio::test]
    async fn missing_chunk_fails_and_keeps_working_set() {
        let (_dir, store) = store();
        put_chunk(&store, "h.bin", 0, &pattern(10));
        put_chunk(&store, "h.bin", 2, &pattern(5));

        let result = store.merge("h.bin", 10, None).await;
        assert!(matches!(result, Err(StoreError::IncompleteChunkSet(_))));
        assert!(!store.layout().artifact_path("h.bin").exists());
        assert!(store.layout().chunk_path("h.bin", "h.bin-0").exists());
    }

    #[tokio::test]
    async fn undersized_chunk_fails() {
        let (_dir, store) = store();
        put_chunk(&store, "h.bin", 0, &pattern(4));
        put_chunk(&store, "h.bin", 1, &pattern(10));

        let result = store.merge("h.bin", 10, None).await;
        assert!(matches!(result, Err(StoreError::IncompleteChunkSet(_))));
    }

    #[tokio::test]
    async fn trailing_chunks_missing_detected_with_file_size() {
        let (_dir, store) = store();
        put_chunk(&store, "h.bin", 0, &pattern(10));

        // Without the file size a lone full chunk looks complete.
        let result = store.merge("h.bin", 10, Some(25)).await;
        assert!(matches!(result, Err(StoreError::IncompleteChunkSet(_))));
    }

    #[tokio::test]
    async fn no_session_is_not_found() {
        let (_dir, store) = store();
        let result = store.merge("h.bin", 10, None).await;
        assert!(matches!(result, Err(StoreError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn existing_artifact_discards_working_set() {
        let (_dir, store) = store();
        std::fs::write(store.layout().artifact_path("h.bin"), b"done").unwrap();
        put_chunk(&store, "h.bin", 0, b"stale");

        let outcome = store.merge("h.bin", 10, None).await.unwrap();
        assert_eq!(outcome, MergeOutcome::AlreadyPresent);
        assert!(!store.layout().session_dir("h.bin").exists());
        assert_eq!(
            std::fs::read(store.layout().artifact_path("h.bin")).unwrap(),
            b"done"
        );
    }

    #[tokio::test]
    async fn staging_is_cleaned_up() {
        let (_dir, store) = store();
        split(&store, "h.bin", &pattern(30), 10);
        store.merge("h.bin", 10, Some(30)).await.unwrap();

        let staging = store.layout().temp_dir().join(".staging");
        assert_eq!(std::fs::read_dir(staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn zero_chunk_size_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.merge("h.bin", 0, None).await,
            Err(StoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn verify_accepts_exact_set() {
        assert_eq!(
            verify_chunk_set(&[(0, 10), (1, 10), (2, 5)], 10, Some(25)).unwrap(),
            25
        );
        assert_eq!(verify_chunk_set(&[(0, 10)], 10, Some(10)).unwrap(), 10);
    }

    #[test]
    fn verify_rejects_gaps_and_sizes() {
        assert!(verify_chunk_set(&[], 10, None).is_err());
        assert!(verify_chunk_set(&[(1, 10)], 10, None).is_err());
        assert!(verify_chunk_set(&[(0, 10), (1, 11)], 10, None).is_err());
        assert!(verify_chunk_set(&[(0, 10), (1, 0)], 10, None).is_err());
        assert!(verify_chunk_set(&[(0, 9), (1, 5)], 10, None).is_err());
        assert!(verify_chunk_set(&[(0, 10), (1, 5)], 10, Some(16)).is_err());
    }
}
