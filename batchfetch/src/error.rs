//! Error types for the downloader.
//!
//! Two families live here:
//!
//! - [`DownloadError`] describes why a single unit failed. It never escapes as
//!   a `Result` from the public download operations; it is wrapped in an
//!   [`ErrorReport`] and delivered through the error handler on the owning
//!   thread.
//! - [`DownloaderError`] describes misuse of the API (a second batch while one
//!   is running, duplicate correlation ids, ...). Those are returned directly
//!   from the call that caused them.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

/// Result type for downloader API calls.
pub type DownloaderResult<T> = Result<T, DownloaderError>;

/// Error category reported to the error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The storage path has no separable file name.
    InvalidUrl,
    /// The temporary file could not be opened.
    CreateFileFailed,
    /// The transfer engine failed a single transfer.
    TransferEngineSingleError,
    /// The transfer engine failed while multiplexing a batch group.
    TransferEngineMultiError,
    /// A batch member ended with fewer bytes than announced, or an unknown total.
    NetworkIncomplete,
    /// The completed temporary file could not be moved to its final name.
    RenameFailed,
    /// The downloaded content did not match the expected checksum.
    ChecksumMismatch,
}

impl ErrorCode {
    /// Get a short, stable name for the code.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid-url",
            Self::CreateFileFailed => "create-file",
            Self::TransferEngineSingleError => "engine",
            Self::TransferEngineMultiError => "engine-multi",
            Self::NetworkIncomplete => "network",
            Self::RenameFailed => "rename",
            Self::ChecksumMismatch => "checksum",
        }
    }
}

/// Reason a single download unit failed.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// The storage path has no separable file name.
    #[error("invalid url or filename not exist: {url}")]
    InvalidUrl { url: String },

    /// The temporary file could not be created or opened.
    #[error("can not create file {}: errno {errno}", path.display())]
    CreateFileFailed { path: PathBuf, errno: i32 },

    /// The engine reported a per-transfer failure.
    #[error("unable to download {url}: {source}")]
    Transfer {
        url: String,
        #[source]
        source: EngineError,
    },

    /// The engine reported a failure while multiplexing a group.
    #[error("batch transfer failed: {source}")]
    Multiplex {
        #[source]
        source: EngineError,
    },

    /// A batch member stopped short of its announced size.
    #[error("unable to download {url}: received {downloaded} of {total} bytes")]
    NetworkIncomplete {
        url: String,
        downloaded: u64,
        total: u64,
    },

    /// Moving the finished temporary file into place failed.
    #[error("failed to rename {} to {}: errno {errno}", from.display(), to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        errno: i32,
    },

    /// SHA-256 of the downloaded content differs from the expected value.
    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
}

impl DownloadError {
    /// Build a `CreateFileFailed` from an I/O error.
    pub fn create_file(path: PathBuf, err: &io::Error) -> Self {
        Self::CreateFileFailed {
            path,
            errno: err.raw_os_error().unwrap_or(0),
        }
    }

    /// Build a `RenameFailed` from an I/O error.
    pub fn rename(from: PathBuf, to: PathBuf, err: &io::Error) -> Self {
        Self::RenameFailed {
            from,
            to,
            errno: err.raw_os_error().unwrap_or(0),
        }
    }

    /// Get the error category.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::CreateFileFailed { .. } => ErrorCode::CreateFileFailed,
            Self::Transfer { .. } => ErrorCode::TransferEngineSingleError,
            Self::Multiplex { .. } => ErrorCode::TransferEngineMultiError,
            Self::NetworkIncomplete { .. } => ErrorCode::NetworkIncomplete,
            Self::RenameFailed { .. } => ErrorCode::RenameFailed,
            Self::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
        }
    }
}

/// A unit failure as seen by the error handler.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// What went wrong.
    pub error: DownloadError,
    /// Correlation id of the unit (or batch) the failure belongs to.
    pub correlation_id: String,
}

impl ErrorReport {
    /// Create a new report.
    pub fn new(error: DownloadError, correlation_id: impl Into<String>) -> Self {
        Self {
            error,
            correlation_id: correlation_id.into(),
        }
    }

    /// Error category.
    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// Native engine code for a per-transfer failure, 0 otherwise.
    pub fn native_code(&self) -> i32 {
        match &self.error {
            DownloadError::Transfer { source, .. } => source.code,
            _ => 0,
        }
    }

    /// Native engine code for a multiplexing failure, 0 otherwise.
    pub fn native_multi_code(&self) -> i32 {
        match &self.error {
            DownloadError::Multiplex { source } => source.code,
            _ => 0,
        }
    }
}

/// Misuse of the downloader API.
#[derive(Debug, Error)]
pub enum DownloaderError {
    /// A batch is already running on this downloader.
    #[error("batch '{running}' is still in flight")]
    BatchInFlight { running: String },

    /// Two units of one batch share a correlation id.
    #[error("duplicate correlation id in batch: {0}")]
    DuplicateCorrelationId(String),

    /// Batch units must be written to files.
    #[error("unit {0} targets a memory buffer; batches only support file destinations")]
    BufferInBatch(String),

    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}
