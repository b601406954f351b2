//! Server-side chunk store.
//!
//! Layout on disk:
//!
//! ```text
//! <public_dir>/<artifact>             merged artifacts, keyed by identity
//! <temp_dir>/<artifact>/<artifact>-N  one working set (upload session) per artifact
//! <temp_dir>/.staging/                merge output before publication
//! ```
//!
//! A chunk file's length is its resume cursor. Merge publishes the final
//! artifact with a rename, so readers never observe a partial merge.

mod error;
mod layout;
mod locks;
mod merge;
mod oracle;
mod receiver;

pub use error::StoreError;
pub use layout::StoreLayout;
pub use merge::MergeOutcome;
pub use oracle::{CheckOutcome, ChunkRecord};

use std::time::Duration;

use locks::SessionLocks;

/// How long a merge waits for in-flight receives of its artifact.
pub const DEFAULT_MERGE_WAIT: Duration = Duration::from_secs(30);

/// Resumable chunk store rooted at a [`StoreLayout`].
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct ChunkStore {
    layout: StoreLayout,
    locks: SessionLocks,
    merge_wait: Duration,
}

impl ChunkStore {
    /// Creates the store, making sure both directories exist.
    pub fn open(layout: StoreLayout) -> Result<Self, StoreError> {
        layout.ensure_dirs()?;
        tracing::info!(
            public = %layout.public_dir().display(),
            temp = %layout.temp_dir().display(),
            "chunk store opened"
        );
        Ok(Self {
            layout,
            locks: SessionLocks::default(),
            merge_wait: DEFAULT_MERGE_WAIT,
        })
    }

    /// Bounds how long a merge queues behind receives before giving up
    /// with [`StoreError::SessionBusy`].
    pub fn with_merge_wait(mut self, wait: Duration) -> Self {
        self.merge_wait = wait;
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }
}
