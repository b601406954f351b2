use std::io::SeekFrom;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::{ChunkStore, StoreError};

/// Read buffer for incoming chunk bodies (256 KiB).
const RECEIVE_BUFFER_SIZE: usize = 256 * 1024;

impl ChunkStore {
    /// Appends `body` to chunk `chunk_name` of `artifact`, starting at `start`.
    ///
    /// `start` must equal the bytes already persisted for the chunk, so a
    /// resumed write never overlaps earlier bytes. With `limit` set, bytes
    /// beyond the chunk's planned size are refused.
    ///
    /// If `body` fails mid-stream (client abort) the bytes received so far
    /// stay on disk and [`StoreError::Aborted`] is returned. Returns the
    /// chunk's total persisted size.
    pub async fn receive<R>(
        &self,
        artifact: &str,
        chunk_name: &str,
        start: u64,
        limit: Option<u64>,
        body: R,
    ) -> Result<u64, StoreError>
    where
        R: AsyncRead + Unpin,
    {
        ferry_transfer::parse_chunk_name(artifact, chunk_name)?;

        if let Some(limit) = limit
            && start > limit
        {
            return Err(StoreError::ChunkOverflow { limit });
        }

        let shared = self.locks.shared(artifact).await;
        let result = self
            .receive_locked(artifact, chunk_name, start, limit, body)
            .await;
        drop(shared);
        self.locks.release(artifact);
        result
    }

    async fn receive_locked<R>(
        &self,
        artifact: &str,
        chunk_name: &str,
        start: u64,
        limit: Option<u64>,
        mut body: R,
    ) -> Result<u64, StoreError>
    where
        R: AsyncRead + Unpin,
    {
        if tokio::fs::try_exists(self.layout.artifact_path(artifact)).await? {
            return Err(StoreError::AlreadyMerged(artifact.to_string()));
        }

        let _claim = self.locks.claim_chunk(chunk_name)?;

        tokio::fs::create_dir_all(self.layout.session_dir(artifact)).await?;
        let path = self.layout.chunk_path(artifact, chunk_name);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        let persisted = file.metadata().await?.len();
        if persisted != start {
            return Err(StoreError::OffsetMismatch {
                expected: persisted,
                got: start,
            });
        }
        file.seek(SeekFrom::Start(start)).await?;

        debug!(artifact, chunk = %chunk_name, start, "receiving chunk");

        let mut written = start;
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        loop {
            let n = match body.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    file.flush().await?;
                    file.sync_data().await?;
                    warn!(
                        artifact,
                        chunk = %chunk_name,
                        persisted = written,
                        error = %e,
                        "chunk transfer aborted"
                    );
                    return Err(StoreError::Aborted { persisted: written });
                }
            };

            let allowed = match limit {
                Some(limit) => ((limit - written) as usize).min(n),
                None => n,
            };
            file.write_all(&buf[..allowed]).await?;
            written += allowed as u64;

            if allowed < n {
                file.flush().await?;
                file.sync_data().await?;
                let limit = limit.unwrap_or(written);
                warn!(artifact, chunk = %chunk_name, limit, "chunk body exceeds planned size");
                return Err(StoreError::ChunkOverflow { limit });
            }
        }

        file.flush().await?;
        file.sync_data().await?;

        info!(
            artifact,
            chunk = %chunk_name,
            received = written - start,
            persisted = written,
            "chunk received"
        );
        Ok(written)
    }
}
