//! CLI error type.

use std::fmt;
use std::io;
use std::path::PathBuf;

use batchfetch::config::ConfigError;
use batchfetch::DownloaderError;

use crate::manifest::ManifestError;

/// Errors surfaced by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded, saved, or resolved.
    Config(String),

    /// Logging could not be initialized.
    Logging(String),

    /// The manifest file could not be read.
    ManifestRead { path: PathBuf, source: io::Error },

    /// The manifest file is malformed.
    Manifest(ManifestError),

    /// The downloader rejected the request.
    Downloader(DownloaderError),

    /// Ctrl-C arrived before the downloads finished.
    Interrupted,

    /// Some units failed.
    Failed { failed: usize, total: usize },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Logging(msg) => write!(f, "Failed to initialize logging: {}", msg),
            Self::ManifestRead { path, source } => {
                write!(f, "Failed to read manifest {}: {}", path.display(), source)
            }
            Self::Manifest(e) => write!(f, "Invalid manifest: {}", e),
            Self::Downloader(e) => write!(f, "{}", e),
            Self::Interrupted => write!(f, "Interrupted"),
            Self::Failed { failed, total } => {
                write!(f, "{} of {} downloads failed", failed, total)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ManifestRead { source, .. } => Some(source),
            Self::Downloader(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<DownloaderError> for CliError {
    fn from(e: DownloaderError) -> Self {
        Self::Downloader(e)
    }
}

impl From<ManifestError> for CliError {
    fn from(e: ManifestError) -> Self {
        Self::Manifest(e)
    }
}
