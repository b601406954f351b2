mod config;
mod serve;
mod upload;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::Config;

/// Ferry - chunked, resumable file uploads
#[derive(Parser)]
#[command(name = "ferry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the config file (default: <config dir>/ferry/ferry.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload server
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Directory for merged artifacts
        #[arg(long)]
        public_dir: Option<PathBuf>,

        /// Directory for in-progress uploads
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },

    /// Upload a file; Ctrl-C pauses, running again resumes
    Upload {
        /// File to upload
        file: PathBuf,

        /// Server base URL
        #[arg(long)]
        server: Option<String>,

        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Chunk transfers in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            bind,
            public_dir,
            temp_dir,
        } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(dir) = public_dir {
                config.server.public_dir = dir;
            }
            if let Some(dir) = temp_dir {
                config.server.temp_dir = dir;
            }
            serve::run(&config.server).await
        }
        Commands::Upload {
            file,
            server,
            chunk_size,
            concurrency,
        } => {
            if let Some(url) = server {
                config.upload.server_url = url;
            }
            if let Some(size) = chunk_size {
                config.upload.chunk_size = size;
            }
            if let Some(n) = concurrency {
                config.upload.max_concurrency = n;
            }
            upload::run(&config.upload, &file).await
        }
    }
}
