use std::path::{Path, PathBuf};

const STAGING_DIR: &str = ".staging";

/// Directory layout of the store.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    public_dir: PathBuf,
    temp_dir: PathBuf,
}

impl StoreLayout {
    pub fn new(public_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            public_dir: public_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Directory of merged, publicly readable artifacts.
    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }

    /// Root of all working sets.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Final location of a merged artifact.
    pub fn artifact_path(&self, artifact: &str) -> PathBuf {
        self.public_dir.join(artifact)
    }

    /// Working-set directory of an artifact's upload session.
    pub fn session_dir(&self, artifact: &str) -> PathBuf {
        self.temp_dir.join(artifact)
    }

    pub fn chunk_path(&self, artifact: &str, chunk_name: &str) -> PathBuf {
        self.session_dir(artifact).join(chunk_name)
    }

    /// Unique scratch file for one merge run.
    pub fn staging_path(&self, artifact: &str) -> PathBuf {
        self.temp_dir
            .join(STAGING_DIR)
            .join(format!("{artifact}.{}", uuid::Uuid::new_v4()))
    }

    pub(crate) fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.public_dir)?;
        std::fs::create_dir_all(self.temp_dir.join(STAGING_DIR))?;
        Ok(())
    }
}
