//! Per-artifact coordination.
//!
//! Chunk receives hold the artifact lock shared; merge holds it exclusively.
//! At most one writer per chunk name is admitted at a time.
//!
//! The lock is writer-preferring: a queued merge holds back later receives
//! and checks, so merge only queues for a bounded time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::StoreError;

#[derive(Default)]
pub(crate) struct SessionLocks {
    artifacts: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    writers: Mutex<HashSet<String>>,
}

/// Registration of the single in-flight writer of a chunk; released on drop.
pub(crate) struct ChunkClaim<'a> {
    locks: &'a SessionLocks,
    chunk_name: String,
}

impl SessionLocks {
    fn artifact(&self, artifact: &str) -> Arc<RwLock<()>> {
        let mut map = self.artifacts.lock().unwrap();
        Arc::clone(map.entry(artifact.to_string()).or_default())
    }

    pub(crate) async fn shared(&self, artifact: &str) -> OwnedRwLockReadGuard<()> {
        self.artifact(artifact).read_owned().await
    }

    pub(crate) async fn exclusive(&self, artifact: &str) -> OwnedRwLockWriteGuard<()> {
        self.artifact(artifact).write_owned().await
    }

    /// Like [`Self::exclusive`], but gives up after `wait`.
    pub(crate) async fn exclusive_within(
        &self,
        artifact: &str,
        wait: Duration,
    ) -> Option<OwnedRwLockWriteGuard<()>> {
        tokio::time::timeout(wait, self.exclusive(artifact)).await.ok()
    }

    /// Forgets the artifact's lock once nobody else holds or awaits it.
    pub(crate) fn release(&self, artifact: &str) {
        let mut map = self.artifacts.lock().unwrap();
        if map.get(artifact).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(artifact);
        }
    }

    pub(crate) fn claim_chunk(&self, chunk_name: &str) -> Result<ChunkClaim<'_>, StoreError> {
        let mut writers = self.writers.lock().unwrap();
        if !writers.insert(chunk_name.to_string()) {
            return Err(StoreError::ChunkBusy(chunk_name.to_string()));
        }
        Ok(ChunkClaim {
            locks: self,
            chunk_name: chunk_name.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn tracked_artifacts(&self) -> usize {
        self.artifacts.lock().unwrap().len()
    }
}

impl Drop for ChunkClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut writers) = self.locks.writers.lock() {
            writers.remove(&self.chunk_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_claim_on_same_chunk_is_rejected() {
        let locks = SessionLocks::default();
        let claim = locks.claim_chunk("a-0").unwrap();
        assert!(matches!(locks.claim_chunk("a-0"), Err(StoreError::ChunkBusy(_))));
        assert!(locks.claim_chunk("a-1").is_ok());

        drop(claim);
        assert!(locks.claim_chunk("a-0").is_ok());
    }

    #[tokio::test]
    async fn exclusive_waits_for_shared() {
        let locks = Arc::new(SessionLocks::default());
        let reader = locks.shared("a").await;

        let l = Arc::clone(&locks);
        let writer = tokio::spawn(async move {
            let _guard = l.exclusive("a").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        drop(reader);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_exclusive_unblocks_later_readers() {
        let locks = Arc::new(SessionLocks::default());
        let reader = locks.shared("a").await;

        let l = Arc::clone(&locks);
        let writer =
            tokio::spawn(async move { l.exclusive_within("a", Duration::from_millis(50)).await.is_some() });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A queued writer holds back new readers until it gives up.
        let l = Arc::clone(&locks);
        let late = tokio::spawn(async move {
            let _guard = l.shared("a").await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!late.is_finished());

        assert!(!writer.await.unwrap());
        tokio::time::timeout(Duration::from_secs(1), late).await.unwrap().unwrap();
        drop(reader);
    }

    #[tokio::test]
    async fn distinct_artifacts_do_not_block() {
        let locks = SessionLocks::default();
        let _a = locks.exclusive("a").await;
        let _b = locks.exclusive("b").await;
    }

    #[tokio::test]
    async fn release_drops_idle_entries_only() {
        let locks = SessionLocks::default();
        let guard = locks.shared("a").await;
        locks.release("a");
        assert_eq!(locks.tracked_artifacts(), 1);

        drop(guard);
        locks.release("a");
        assert_eq!(locks.tracked_artifacts(), 0);
    }
}
