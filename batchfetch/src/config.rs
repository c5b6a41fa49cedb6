//! Configuration for the downloader.
//!
//! [`DownloaderConfig`] is the in-memory builder handed to
//! [`Downloader::new`](crate::download::Downloader::new). [`ConfigFile`] is its
//! persistent form, an INI file under the user's config directory:
//!
//! ```ini
//! [downloader]
//! connection_timeout = 5
//! max_open_files = auto
//!
//! [engine]
//! transfer_timeout = 300
//! max_connections = 8
//!
//! [logging]
//! level = info
//! directory = /var/log/batchfetch
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::logging::LoggingConfig;

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Default total timeout for one transfer in seconds.
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 300;

/// Default number of concurrent connections inside a batch group.
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Descriptors kept free for the process when sizing batch groups.
const OPEN_FILE_RESERVE: u64 = 64;

/// Upper bound for the batch group size.
const MAX_GROUP_SIZE: u64 = 256;

/// Group size used where the descriptor limit cannot be queried.
const FALLBACK_MAX_OPEN_FILES: usize = 16;

/// Errors from loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid INI.
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A key holds a value of the wrong form.
    #[error("invalid value '{value}' for {section}.{key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// Number of files one batch group may keep open at once.
///
/// Derived from the soft `RLIMIT_NOFILE` minus a reserve for the rest of the
/// process, clamped to `1..=256`.
pub fn platform_max_open_files() -> usize {
    #[cfg(unix)]
    {
        match rlimit::getrlimit(rlimit::Resource::NOFILE) {
            Ok((soft, _hard)) => {
                let usable = soft.saturating_sub(OPEN_FILE_RESERVE).clamp(1, MAX_GROUP_SIZE);
                usable as usize
            }
            Err(e) => {
                tracing::debug!(error = %e, "Could not query open file limit");
                FALLBACK_MAX_OPEN_FILES
            }
        }
    }

    #[cfg(not(unix))]
    {
        FALLBACK_MAX_OPEN_FILES
    }
}

/// Settings for a [`Downloader`](crate::download::Downloader) and its engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderConfig {
    /// Connection establishment timeout passed with every request.
    pub connection_timeout: Duration,
    /// Total timeout for one transfer.
    pub transfer_timeout: Duration,
    /// Concurrent connections inside a batch group.
    pub max_connections: usize,
    /// Maximum units per batch group.
    pub max_open_files: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            transfer_timeout: Duration::from_secs(DEFAULT_TRANSFER_TIMEOUT_SECS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_open_files: platform_max_open_files(),
        }
    }
}

impl DownloaderConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the total transfer timeout.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the number of concurrent connections (at least 1).
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Set the maximum units per batch group (at least 1).
    pub fn with_max_open_files(mut self, max: usize) -> Self {
        self.max_open_files = max.max(1);
        self
    }
}

/// `[downloader]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderSettings {
    /// Connection timeout in seconds.
    pub connection_timeout: u64,
    /// Group size override; `None` means the platform limit.
    pub max_open_files: Option<usize>,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Transfer timeout in seconds.
    pub transfer_timeout: u64,
    /// Concurrent connections per group.
    pub max_connections: usize,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `batchfetch=debug`.
    pub level: String,
    /// Directory for the log file; stderr only when unset.
    pub directory: Option<PathBuf>,
}

/// Persistent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub downloader: DownloaderSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            downloader: DownloaderSettings {
                connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECS,
                max_open_files: None,
            },
            engine: EngineSettings {
                transfer_timeout: DEFAULT_TRANSFER_TIMEOUT_SECS,
                max_connections: DEFAULT_MAX_CONNECTIONS,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                directory: None,
            },
        }
    }
}

/// Location of the config file: `<config dir>/batchfetch/config.ini`.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchfetch")
        .join("config.ini")
}

impl ConfigFile {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from `path`. Keys that are absent keep their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(err) => ConfigError::Io(err),
            ini::Error::Parse(err) => ConfigError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(timeout) = parse_value(ini, "downloader", "connection_timeout")? {
            config.downloader.connection_timeout = timeout;
        }
        if let Some(raw) = get_str(ini, "downloader", "max_open_files") {
            config.downloader.max_open_files = if raw.eq_ignore_ascii_case("auto") {
                None
            } else {
                Some(parse_str(raw, "downloader", "max_open_files")?)
            };
        }

        if let Some(timeout) = parse_value(ini, "engine", "transfer_timeout")? {
            config.engine.transfer_timeout = timeout;
        }
        if let Some(max) = parse_value(ini, "engine", "max_connections")? {
            config.engine.max_connections = max;
        }

        if let Some(level) = get_str(ini, "logging", "level") {
            config.logging.level = level.to_string();
        }
        if let Some(dir) = get_str(ini, "logging", "directory") {
            if !dir.is_empty() {
                config.logging.directory = Some(PathBuf::from(dir));
            }
        }

        Ok(config)
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let max_open_files = self
            .downloader
            .max_open_files
            .map(|n| n.to_string())
            .unwrap_or_else(|| "auto".to_string());

        let mut ini = Ini::new();
        ini.with_section(Some("downloader"))
            .set("connection_timeout", self.downloader.connection_timeout.to_string())
            .set("max_open_files", max_open_files);
        ini.with_section(Some("engine"))
            .set("transfer_timeout", self.engine.transfer_timeout.to_string())
            .set("max_connections", self.engine.max_connections.to_string());
        ini.with_section(Some("logging"))
            .set("level", self.logging.level.clone());
        if let Some(dir) = &self.logging.directory {
            ini.with_section(Some("logging"))
                .set("directory", dir.to_string_lossy().to_string());
        }

        ini.write_to_file(path)?;
        Ok(())
    }

    /// Build the downloader settings this file describes.
    pub fn to_downloader_config(&self) -> DownloaderConfig {
        let config = DownloaderConfig::new()
            .with_connection_timeout(Duration::from_secs(self.downloader.connection_timeout))
            .with_transfer_timeout(Duration::from_secs(self.engine.transfer_timeout))
            .with_max_connections(self.engine.max_connections);

        match self.downloader.max_open_files {
            Some(max) => config.with_max_open_files(max),
            None => config,
        }
    }

    /// Build the logging settings this file describes.
    pub fn to_logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.logging.level.clone(),
            directory: self.logging.directory.clone(),
            ..LoggingConfig::default()
        }
    }
}

fn get_str<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.section(Some(section))
        .and_then(|props| props.get(key))
        .map(str::trim)
}

fn parse_str<T: FromStr>(raw: &str, section: &str, key: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_value<T: FromStr>(ini: &Ini, section: &str, key: &str) -> Result<Option<T>, ConfigError> {
    get_str(ini, section, key)
        .map(|raw| parse_str(raw, section, key))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DownloaderConfig::default();
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.transfer_timeout, Duration::from_secs(300));
        assert_eq!(config.max_connections, 8);
        assert!(config.max_open_files >= 1);
    }

    #[test]
    fn test_builder_pattern() {
        let config = DownloaderConfig::new()
            .with_connection_timeout(Duration::from_secs(10))
            .with_transfer_timeout(Duration::from_secs(60))
            .with_max_connections(0)
            .with_max_open_files(0);

        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.transfer_timeout, Duration::from_secs(60));
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.max_open_files, 1);
    }

    #[test]
    fn test_platform_max_open_files_in_range() {
        let max = platform_max_open_files();
        assert!((1..=256).contains(&max));
    }

    #[test]
    fn test_config_file_path() {
        let path = config_file_path();
        assert!(path.ends_with("batchfetch/config.ini"));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.downloader.connection_timeout = 12;
        config.downloader.max_open_files = Some(4);
        config.engine.max_connections = 2;
        config.logging.level = "debug".to_string();
        config.logging.directory = Some(temp.path().join("logs"));
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        let downloader = loaded.to_downloader_config();
        assert_eq!(downloader.connection_timeout, Duration::from_secs(12));
        assert_eq!(downloader.max_open_files, 4);
        assert_eq!(downloader.max_connections, 2);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[engine]\nmax_connections = 3\n").unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.engine.max_connections, 3);
        assert_eq!(config.engine.transfer_timeout, DEFAULT_TRANSFER_TIMEOUT_SECS);
        assert_eq!(config.downloader.max_open_files, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_auto_max_open_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[downloader]\nmax_open_files = auto\n").unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.downloader.max_open_files, None);
        assert_eq!(
            config.to_downloader_config().max_open_files,
            platform_max_open_files()
        );
    }

    #[test]
    fn test_invalid_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[downloader]\nconnection_timeout = soon\n").unwrap();

        match ConfigFile::load_from(&path) {
            Err(ConfigError::InvalidValue { section, key, value }) => {
                assert_eq!(section, "downloader");
                assert_eq!(key, "connection_timeout");
                assert_eq!(value, "soon");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_logging_config_from_file() {
        let mut config = ConfigFile::default();
        config.logging.level = "warn".to_string();
        let logging = config.to_logging_config();
        assert_eq!(logging.level, "warn");
        assert!(logging.directory.is_none());
    }
}
