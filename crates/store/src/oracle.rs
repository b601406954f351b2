use std::io::ErrorKind;

use tracing::{debug, warn};

use crate::{ChunkStore, StoreError};

/// A chunk persisted in a working set and its resume cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub chunk_name: String,
    pub bytes_persisted: u64,
}

/// Answer of the existence / resume oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The merged artifact is present; nothing needs to be sent.
    Exists,
    /// Not merged yet. Lists the chunks already (partially) persisted, by index.
    Missing(Vec<ChunkRecord>),
}

impl ChunkStore {
    /// Reports whether `artifact` exists, or which chunks can be resumed.
    ///
    /// A missing working set is a fresh upload, not an error.
    pub async fn check(&self, artifact: &str) -> Result<CheckOutcome, StoreError> {
        ferry_transfer::validate_artifact_name(artifact)?;

        // Wait out a merge in progress so its result is observed whole.
        let shared = self.locks.shared(artifact).await;
        let result = self.scan_session(artifact).await;
        drop(shared);
        self.locks.release(artifact);
        result
    }

    async fn scan_session(&self, artifact: &str) -> Result<CheckOutcome, StoreError> {
        if tokio::fs::try_exists(self.layout.artifact_path(artifact)).await? {
            debug!(artifact, "dedup hit");
            return Ok(CheckOutcome::Exists);
        }

        let session_dir = self.layout.session_dir(artifact);
        let mut entries = match tokio::fs::read_dir(&session_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(CheckOutcome::Missing(Vec::new()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(index) = ferry_transfer::parse_chunk_name(artifact, &name) else {
                warn!(artifact, entry = %name, "ignoring foreign file in working set");
                continue;
            };
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            records.push((
                index,
                ChunkRecord {
                    chunk_name: name,
                    bytes_persisted: metadata.len(),
                },
            ));
        }
        records.sort_by_key(|(index, _)| *index);

        debug!(artifact, chunks = records.len(), "resume state reported");
        Ok(CheckOutcome::Missing(
            records.into_iter().map(|(_, r)| r).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{put_chunk, store};

    #[tokio::test]
    async fn fresh_upload_has_no_records() {
        let (_dir, store) = store();
        assert_eq!(
            store.check("h.bin").await.unwrap(),
            CheckOutcome::Missing(vec![])
        );
    }

    #[tokio::test]
    async fn tolerates_missing_temp_root() {
        let (dir, store) = store();
        std::fs::remove_dir_all(dir.path().join("temp")).unwrap();
        assert_eq!(
            store.check("h.bin").await.unwrap(),
            CheckOutcome::Missing(vec![])
        );
    }

    #[tokio::test]
    async fn reports_persisted_sizes_in_index_order() {
        let (_dir, store) = store();
        put_chunk(&store, "h.bin", 10, b"abc");
        put_chunk(&store, "h.bin", 2, b"abcdef");
        put_chunk(&store, "h.bin", 0, b"");

        let CheckOutcome::Missing(records) = store.check("h.bin").await.unwrap() else {
            panic!("expected missing");
        };
        let got: Vec<(&str, u64)> = records
            .iter()
            .map(|r| (r.chunk_name.as_str(), r.bytes_persisted))
            .collect();
        assert_eq!(got, vec![("h.bin-0", 0), ("h.bin-2", 6), ("h.bin-10", 3)]);
    }

    #[tokio::test]
    async fn ignores_foreign_files() {
        let (_dir, store) = store();
        put_chunk(&store, "h.bin", 0, b"ab");
        std::fs::write(store.layout().session_dir("h.bin").join("notes.txt"), b"x").unwrap();

        let CheckOutcome::Missing(records) = store.check("h.bin").await.unwrap() else {
            panic!("expected missing");
        };
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn existing_artifact_is_dedup_hit() {
        let (_dir, store) = store();
        std::fs::write(store.layout().artifact_path("h.bin"), b"done").unwrap();
        assert_eq!(store.check("h.bin").await.unwrap(), CheckOutcome::Exists);
    }

    #[tokio::test]
    async fn rejects_traversal_names() {
        let (_dir, store) = store();
        assert!(matches!(
            store.check("../etc").await,
            Err(StoreError::InvalidName(_))
        ));
    }
}
