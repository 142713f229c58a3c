//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::infrastructure::image::{DEFAULT_CAPACITY_KIB, DEFAULT_MAX_CACHE_SIZE, default_pool_size};

pub(crate) const APP_NAME: &str = "imgloader";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "imgloader";

/// Subdirectory of the platform cache dir holding the disk tier.
pub const CACHE_SUBDIR: &str = "bitmap";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Settings for one [`ImageLoader`](crate::infrastructure::image::ImageLoader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLoaderConfig {
    /// Disk tier directory. Defaults to the platform cache dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Disk tier budget in bytes.
    #[serde(default = "default_disk_cache_size")]
    pub disk_cache_size: u64,

    /// Whether to try enabling the disk tier at all.
    #[serde(default = "default_true")]
    pub disk_cache_enabled: bool,

    /// Memory tier budget in KiB of decoded pixels.
    #[serde(default = "default_memory_cache_kib")]
    pub memory_cache_kib: usize,

    /// Concurrent background loads. Defaults to twice the CPU count plus one.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_disk_cache_size() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

fn default_memory_cache_kib() -> usize {
    DEFAULT_CAPACITY_KIB
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            disk_cache_size: default_disk_cache_size(),
            disk_cache_enabled: true,
            memory_cache_kib: default_memory_cache_kib(),
            worker_threads: None,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl ImageLoaderConfig {
    /// Parses a loader configuration from TOML; missing fields take defaults.
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML for this shape.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Platform cache location for the disk tier.
    #[must_use]
    pub fn default_cache_dir() -> PathBuf {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
            || std::env::temp_dir().join(APP_NAME).join(CACHE_SUBDIR),
            |dirs| dirs.cache_dir().join(CACHE_SUBDIR),
        )
    }

    /// Returns the configured cache dir, or the platform default.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(Self::default_cache_dir)
    }

    /// Returns the worker pool size to use.
    #[must_use]
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads
            .filter(|n| *n > 0)
            .unwrap_or_else(default_pool_size)
    }

    /// HTTP request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration of the command-line tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Loader settings.
    #[serde(default)]
    pub loader: ImageLoaderConfig,
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.loader.cache_dir = Some(cache_dir.clone());
        }
        if let Some(size) = args.disk_cache_size {
            self.loader.disk_cache_size = size;
        }
        if args.no_disk_cache {
            self.loader.disk_cache_enabled = false;
        }
        if let Some(workers) = args.worker_threads {
            self.loader.worker_threads = Some(workers);
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("imgloader.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_parse_partial_loader_config() {
        let toml_content = r#"
            disk_cache_size = 1048576
            worker_threads = 4
        "#;

        let config =
            ImageLoaderConfig::from_toml_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.disk_cache_size, 1_048_576);
        assert_eq!(config.effective_worker_threads(), 4);
        assert!(config.disk_cache_enabled);
        assert_eq!(config.memory_cache_kib, 64 * 1024);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_config() {
        let config = ImageLoaderConfig::default();

        assert_eq!(config.disk_cache_size, 50 * 1024 * 1024);
        assert!(config.cache_dir.is_none());
        assert!(config.effective_cache_dir().ends_with(CACHE_SUBDIR));
        assert_eq!(config.effective_worker_threads(), default_pool_size());
    }

    #[test]
    fn test_zero_workers_falls_back_to_default() {
        let config = ImageLoaderConfig {
            worker_threads: Some(0),
            ..ImageLoaderConfig::default()
        };
        assert_eq!(config.effective_worker_threads(), default_pool_size());
    }

    #[test]
    fn test_app_config_nests_loader_table() {
        let config: AppConfig = toml::from_str(
            r#"
            log_level = "debug"

            [loader]
            disk_cache_enabled = false
            user_agent = "custom/1.0"
        "#,
        )
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(!config.loader.disk_cache_enabled);
        assert_eq!(config.loader.user_agent, "custom/1.0");
    }

    #[test]
    fn test_log_level_builds_env_filter() {
        for level in [LogLevel::Trace, LogLevel::Info, LogLevel::Error] {
            assert!(tracing_subscriber::EnvFilter::try_new(level.to_string()).is_ok());
        }
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = AppConfig::default();
        let args = CliArgs::parse_from([
            "imgloader",
            "--cache-dir",
            "/tmp/imgs",
            "--disk-cache-size",
            "1024",
            "--no-disk-cache",
            "--log-level",
            "trace",
            "stats",
        ]);

        config.merge_with_args(&args);

        assert_eq!(config.loader.cache_dir, Some(PathBuf::from("/tmp/imgs")));
        assert_eq!(config.loader.disk_cache_size, 1024);
        assert!(!config.loader.disk_cache_enabled);
        assert_eq!(config.log_level, LogLevel::Trace);
    }
}
