//! Per-transfer progress record.
//!
//! A tracker is created right before its transfer starts and is owned by the
//! sink of that transfer. Notifications carry clones of it, never references.

use std::path::PathBuf;

/// Progress of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTracker {
    /// Caller correlation id.
    pub correlation_id: String,
    /// Source URL.
    pub url: String,
    /// Destination directory; empty for buffer destinations.
    pub directory: PathBuf,
    /// Destination file name; empty for buffer destinations.
    pub name: String,
    /// Bytes received so far, counting bytes already on disk when resuming.
    pub downloaded: u64,
    /// Expected size in bytes; 0 while unknown.
    pub total: u64,
}

impl ProgressTracker {
    /// Create a tracker for a file destination.
    pub fn new(
        correlation_id: impl Into<String>,
        url: impl Into<String>,
        directory: PathBuf,
        name: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            url: url.into(),
            directory,
            name: name.into(),
            downloaded: 0,
            total: 0,
        }
    }

    /// Create a tracker for a memory destination.
    pub fn for_buffer(correlation_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(correlation_id, url, PathBuf::new(), "")
    }

    /// Path the finished file is renamed to.
    pub fn final_path(&self) -> PathBuf {
        self.directory.join(&self.name)
    }

    /// Whether every announced byte arrived.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.downloaded == self.total
    }

    /// Get the progress as a percentage; 0 while the total is unknown.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.downloaded as f64 / self.total as f64) * 100.0
        }
    }
}
