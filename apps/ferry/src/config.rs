//! CLI configuration.
//!
//! Stored as TOML at `<config dir>/ferry/ferry.toml`
//! (`~/.config/ferry/ferry.toml` on Linux) unless `--config` is given.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use ferry_protocol::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_PORT,
};
use ferry_server::ServerConfig;
use ferry_uploader::{RetryPolicy, UploadConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub upload: UploadSection,
}

/// `[server]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Merged artifacts.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    /// In-progress upload sessions.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

/// `[upload]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSection {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_bind() -> SocketAddr {
    ([0, 0, 0, 0], DEFAULT_PORT).into()
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("./public")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_server_url() -> String {
    format!("http://localhost:{DEFAULT_PORT}")
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_initial_delay_ms() -> u64 {
    250
}

fn default_retry_max_delay_ms() -> u64 {
    15_000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_dir: default_public_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chunk_size: default_chunk_size(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl ServerSection {
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            public_dir: self.public_dir.clone(),
            temp_dir: self.temp_dir.clone(),
        }
    }
}

impl UploadSection {
    pub fn to_upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            max_concurrency: self.max_concurrency,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                ..RetryPolicy::default()
            },
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the default location), writing
    /// the defaults there if the file does not exist yet.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Writes the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    let base = dirs::config_dir().context("could not determine config directory")?;
    Ok(base.join("ferry").join("ferry.toml"))
}
