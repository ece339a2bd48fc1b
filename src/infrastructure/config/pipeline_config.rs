//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "pixpipe";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
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

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
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

/// Memory cache limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Maximum number of decoded images kept.
    #[serde(default = "default_memory_entries")]
    pub max_entries: usize,

    /// Maximum pixel bytes kept; zero disables the byte budget.
    #[serde(default = "default_memory_bytes")]
    pub max_bytes: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_memory_entries(),
            max_bytes: default_memory_bytes(),
        }
    }
}

/// Disk cache location and ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Enable the disk cache for URL sources.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory. Defaults to the platform cache dir.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Byte ceiling; reaching it evicts least recently used entries.
    /// Zero means unlimited.
    #[serde(default = "default_disk_limit")]
    pub max_bytes: u64,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            max_bytes: default_disk_limit(),
        }
    }
}

/// Network fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connect timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Maximum redirects to follow.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl NetworkConfig {
    /// Connect timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Read timeout as a duration.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            max_redirects: default_max_redirects(),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Log file path.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Maximum requests fetching or decoding at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Directory holding bundled resources, one file per numeric id.
    #[serde(default)]
    pub resources_dir: Option<PathBuf>,

    /// Directory holding packaged assets.
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,

    /// Memory cache configuration.
    #[serde(default)]
    pub memory_cache: MemoryCacheConfig,

    /// Disk cache configuration.
    #[serde(default)]
    pub disk_cache: DiskCacheConfig,

    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,
}

impl PipelineConfig {
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
            .map(|dirs| dirs.data_dir().join("pixpipe.log"))
    }

    /// Returns the platform cache directory for downloaded images.
    #[must_use]
    pub fn default_cache_dir() -> PathBuf {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
            || std::env::temp_dir().join(APP_NAME).join("cache").join("images"),
            |dirs| dirs.cache_dir().join("images"),
        )
    }

    /// Returns effective cache directory.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.disk_cache
            .directory
            .clone()
            .unwrap_or_else(Self::default_cache_dir)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            log_level: LogLevel::Info,
            max_workers: default_max_workers(),
            resources_dir: None,
            assets_dir: None,
            memory_cache: MemoryCacheConfig::default(),
            disk_cache: DiskCacheConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_memory_entries() -> usize {
    50
}

fn default_memory_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_disk_limit() -> u64 {
    200 * 1024 * 1024
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_workers() -> usize {
    4
}
