use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "imgloader",
    version,
    about = "Fetch images through a memory, disk and network cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Disk cache budget in bytes.
    #[arg(long, value_name = "BYTES")]
    pub disk_cache_size: Option<u64>,

    /// Run with the memory tier only.
    #[arg(long)]
    pub no_disk_cache: bool,

    /// Concurrent background loads.
    #[arg(long, value_name = "N")]
    pub worker_threads: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load one or more images and report their decoded size and source.
    Fetch {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Requested width bound; 0 disables downsampling.
        #[arg(long, default_value_t = 0)]
        width: u32,

        /// Requested height bound; 0 disables downsampling.
        #[arg(long, default_value_t = 0)]
        height: u32,
    },
    /// Print disk cache usage.
    Stats,
    /// Delete every cached image.
    Clear,
}
