use super::pipeline_config::{NetworkConfig, PipelineConfig};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const CONFIG_FILE_NAME: &str = "pixpipe.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Locates and loads [`PipelineConfig`] files.
///
/// Relative directories in a loaded file are taken relative to the file
/// itself, so a config shipped next to its resources stays valid wherever
/// the process is started from.
pub struct ConfigStorage {
    config_dir: PathBuf,
}

impl ConfigStorage {
    /// Create a new `ConfigStorage` in the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration directory cannot be determined.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir =
            PipelineConfig::default_config_dir().ok_or(ConfigError::ConfigDirNotFound)?;
        Ok(Self { config_dir })
    }

    /// Creates a new `ConfigStorage` with a specific directory (useful for testing).
    #[must_use]
    pub fn with_dir(path: PathBuf) -> Self {
        Self { config_dir: path }
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Loads the pipeline configuration, writing defaults if the file is missing.
    ///
    /// A malformed file is left untouched and defaults are returned. Values
    /// the pipeline cannot run with are replaced by their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or the default cannot be written.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
        let config_path = path_override.map_or_else(|| self.config_path(), Path::to_path_buf);

        if !config_path.exists() {
            info!(path = %config_path.display(), "Config file not found, creating default");
            let default_config = PipelineConfig::default();
            write_config(&config_path, &default_config)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&config_path)?;
        let mut config = match toml::from_str::<PipelineConfig>(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %config_path.display(), error = %e, "Failed to parse config file, using defaults");
                return Ok(PipelineConfig::default());
            }
        };

        if let Some(base) = config_path.parent() {
            anchor_paths(&mut config, base);
        }
        repair_timeouts(&mut config.network);
        Ok(config)
    }
}

/// Resolves relative directories against `base`.
fn anchor_paths(config: &mut PipelineConfig, base: &Path) {
    for path in [
        &mut config.resources_dir,
        &mut config.assets_dir,
        &mut config.disk_cache.directory,
        &mut config.log_path,
    ]
    .into_iter()
    .flatten()
    {
        if path.is_relative() {
            *path = base.join(&*path);
        }
    }
}

/// A zero timeout would fail every request immediately.
fn repair_timeouts(network: &mut NetworkConfig) {
    let defaults = NetworkConfig::default();
    if network.connect_timeout_ms == 0 {
        warn!("connect_timeout_ms is 0, using {}", defaults.connect_timeout_ms);
        network.connect_timeout_ms = defaults.connect_timeout_ms;
    }
    if network.read_timeout_ms == 0 {
        warn!("read_timeout_ms is 0, using {}", defaults.read_timeout_ms);
        network.read_timeout_ms = defaults.read_timeout_ms;
    }
}

fn write_config(path: &Path, config: &PipelineConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("Invalid path"))?;
    fs::create_dir_all(parent)?;
    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_creates_default_if_missing() {
        let dir = tempdir().unwrap();
        let storage = ConfigStorage::with_dir(dir.path().join("pixpipe"));

        let config = storage.load_config(None).unwrap();
        assert_eq!(config.max_workers, 4);
        assert!(storage.config_path().exists());

        let written = fs::read_to_string(storage.config_path()).unwrap();
        let reparsed: PipelineConfig = toml::from_str(&written).unwrap();
        assert_eq!(reparsed.max_workers, 4);
    }

    #[test]
    fn test_load_config_handles_malformed_file() {
        let dir = tempdir().unwrap();
        let storage = ConfigStorage::with_dir(dir.path().to_path_buf());
        fs::write(storage.config_path(), "max_workers = [").unwrap();

        let config = storage.load_config(None).unwrap();
        assert_eq!(config.max_workers, 4);
        let content = fs::read_to_string(storage.config_path()).unwrap();
        assert_eq!(content, "max_workers = [");
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let dir = tempdir().unwrap();
        let config_file = dir.path().join("app").join("images.toml");
        fs::create_dir_all(config_file.parent().unwrap()).unwrap();
        fs::write(
            &config_file,
            r#"
                resources_dir = "res"
                assets_dir = "/opt/app/assets"
                log_path = "logs/pix.log"

                [disk_cache]
                directory = "../cache"
            "#,
        )
        .unwrap();

        let storage = ConfigStorage::with_dir(dir.path().to_path_buf());
        let config = storage.load_config(Some(&config_file)).unwrap();

        let base = dir.path().join("app");
        assert_eq!(config.resources_dir, Some(base.join("res")));
        assert_eq!(config.assets_dir, Some(PathBuf::from("/opt/app/assets")));
        assert_eq!(config.log_path, Some(base.join("logs/pix.log")));
        assert_eq!(config.disk_cache.directory, Some(base.join("../cache")));
    }

    #[test]
    fn test_zero_timeouts_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let storage = ConfigStorage::with_dir(dir.path().to_path_buf());
        fs::write(
            storage.config_path(),
            "[network]\nconnect_timeout_ms = 0\nread_timeout_ms = 250\n",
        )
        .unwrap();

        let config = storage.load_config(None).unwrap();
        assert_eq!(config.network.connect_timeout_ms, 3000);
        assert_eq!(config.network.read_timeout_ms, 250);
    }
}
