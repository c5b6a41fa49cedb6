//! The downloader front end.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::batch::BatchControl;
use super::buffer::SharedBuffer;
use super::dispatch::{ProgressMode, TransferContext};
use super::handlers::{ErrorCallback, HandlerRegistry, Notifier, ProgressCallback, SuccessCallback};
use super::staging;
use super::tracker::ProgressTracker;
use super::unit::{Destination, DownloadUnit, DownloadUnits};
use crate::config::DownloaderConfig;
use crate::engine::{EngineCode, EngineError, HttpEngine, TransferEngine, TransferRequest};
use crate::error::{DownloadError, DownloaderError, DownloaderResult, ErrorReport};
use crate::executor::OwningThread;
use crate::fs::{FileSystem, LocalFileSystem};

/// Concurrent file downloader.
///
/// Owns one [`TransferEngine`]. Every callback runs on the owning thread
/// given at construction. Async operations run on detached worker threads
/// that keep the downloader alive until they finish.
pub struct Downloader {
    pub(super) engine: Box<dyn TransferEngine>,
    pub(super) fs: Arc<dyn FileSystem>,
    pub(super) notifier: Notifier,
    pub(super) batch: Arc<BatchControl>,
    pub(super) max_open_files: usize,
    handlers: Arc<HandlerRegistry>,
    connection_timeout: AtomicU64,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("connection_timeout", &self.connection_timeout())
            .field("max_open_files", &self.max_open_files)
            .field("batch_in_flight", &self.batch.is_in_flight())
            .finish()
    }
}

impl Downloader {
    /// Create a downloader.
    ///
    /// # Arguments
    ///
    /// * `engine` - Transfer backend, owned exclusively by this downloader
    /// * `fs` - Filesystem used for temporary and final files
    /// * `owner` - Thread that runs all callbacks
    /// * `config` - Timeouts and batch group size
    pub fn new(
        engine: Box<dyn TransferEngine>,
        fs: Arc<dyn FileSystem>,
        owner: Arc<dyn OwningThread>,
        config: &DownloaderConfig,
    ) -> Arc<Self> {
        let handlers = Arc::new(HandlerRegistry::default());
        let notifier = Notifier::new(owner, &handlers);
        engine.set_connect_timeout(config.connection_timeout);

        Arc::new(Self {
            engine,
            fs,
            notifier,
            batch: Arc::new(BatchControl::default()),
            max_open_files: config.max_open_files.max(1),
            handlers,
            connection_timeout: AtomicU64::new(config.connection_timeout.as_secs()),
        })
    }

    /// Create a downloader with an [`HttpEngine`] on the local filesystem.
    pub fn http(owner: Arc<dyn OwningThread>, config: &DownloaderConfig) -> Arc<Self> {
        let engine = HttpEngine::with_settings(config.transfer_timeout, config.max_connections);
        Self::new(Box::new(engine), Arc::new(LocalFileSystem::new()), owner, config)
    }

    /// Set the error callback.
    pub fn set_error_handler(&self, callback: impl Fn(&ErrorReport) + Send + Sync + 'static) {
        let callback: ErrorCallback = Arc::new(callback);
        self.handlers.set_error(callback);
    }

    /// Set the progress callback: `(total, downloaded, url, correlation_id)`.
    pub fn set_progress_handler(&self, callback: impl Fn(u64, u64, &str, &str) + Send + Sync + 'static) {
        let callback: ProgressCallback = Arc::new(callback);
        self.handlers.set_progress(callback);
    }

    /// Set the success callback: `(url, final_path, correlation_id)`.
    pub fn set_success_handler(&self, callback: impl Fn(&str, &str, &str) + Send + Sync + 'static) {
        let callback: SuccessCallback = Arc::new(callback);
        self.handlers.set_success(callback);
    }

    /// Connection timeout in seconds.
    pub fn connection_timeout(&self) -> u64 {
        self.connection_timeout.load(Ordering::SeqCst)
    }

    /// Set the connection timeout in seconds, used by subsequent requests.
    pub fn set_connection_timeout(&self, secs: u64) {
        self.connection_timeout.store(secs, Ordering::SeqCst);
        self.engine.set_connect_timeout(Duration::from_secs(secs));
    }

    /// Maximum units per batch group.
    pub fn max_open_files(&self) -> usize {
        self.max_open_files
    }

    /// Whether a batch is currently running.
    pub fn is_batch_in_flight(&self) -> bool {
        self.batch.is_in_flight()
    }

    pub(super) fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout())
    }

    /// Download `url` to `storage_path` on a worker thread.
    pub fn download_async(
        self: &Arc<Self>,
        url: &str,
        storage_path: impl AsRef<Path>,
        correlation_id: &str,
    ) -> DownloaderResult<()> {
        let unit = DownloadUnit::to_file(url, storage_path.as_ref(), correlation_id);
        self.spawn_worker(move |downloader| downloader.run_single(&unit))
    }

    /// Download `url` to `storage_path` on the calling thread.
    pub fn download_sync(&self, url: &str, storage_path: impl AsRef<Path>, correlation_id: &str) {
        let unit = DownloadUnit::to_file(url, storage_path.as_ref(), correlation_id);
        self.run_single(&unit);
    }

    /// Download `url` into `buffer` on a worker thread.
    pub fn download_to_buffer_async(
        self: &Arc<Self>,
        url: &str,
        buffer: SharedBuffer,
        correlation_id: &str,
    ) -> DownloaderResult<()> {
        let unit = DownloadUnit::to_buffer(url, buffer, correlation_id);
        self.spawn_worker(move |downloader| downloader.run_single(&unit))
    }

    /// Download `url` into `buffer` on the calling thread.
    pub fn download_to_buffer_sync(&self, url: &str, buffer: SharedBuffer, correlation_id: &str) {
        let unit = DownloadUnit::to_buffer(url, buffer, correlation_id);
        self.run_single(&unit);
    }

    /// Download a batch on a worker thread.
    ///
    /// The batch is marked in flight before this returns, so a second batch
    /// requested right after fails with [`DownloaderError::BatchInFlight`].
    pub fn batch_download_async(self: &Arc<Self>, units: DownloadUnits, batch_id: &str) -> DownloaderResult<()> {
        let scope = self.batch.begin(batch_id)?;
        self.spawn_worker(move |downloader| downloader.run_batch(&units, scope))
    }

    /// Download a batch on the calling thread.
    pub fn batch_download_sync(&self, units: &DownloadUnits, batch_id: &str) -> DownloaderResult<()> {
        let scope = self.batch.begin(batch_id)?;
        self.run_batch(units, scope);
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>, work: impl FnOnce(&Downloader) + Send + 'static) -> DownloaderResult<()> {
        let downloader = Arc::clone(self);
        thread::Builder::new()
            .name("batchfetch-worker".to_string())
            .spawn(move || work(&downloader))
            .map(drop)
            .map_err(|e| {
                error!(error = %e, "Failed to spawn download worker");
                DownloaderError::Spawn(e)
            })
    }

    /// Run one unit and deliver its outcome.
    fn run_single(&self, unit: &DownloadUnit) {
        let id = unit.correlation_id.as_str();
        debug!(correlation_id = %id, url = %unit.source_url, "Download started");

        let outcome = match &unit.destination {
            Destination::File(path) => self.transfer_to_file(unit, path),
            Destination::Buffer(buffer) => self.transfer_to_buffer(unit, buffer).map(|()| PathBuf::new()),
        };

        match outcome {
            Ok(path) => {
                info!(correlation_id = %id, url = %unit.source_url, "Download succeeded");
                self.notifier
                    .success(&unit.source_url, &path.to_string_lossy(), id);
            }
            Err(e) => {
                warn!(correlation_id = %id, url = %unit.source_url, "Download failed: {}", e);
                self.notifier.error(e, id);
            }
        }
    }

    /// Single transfers cannot be resumed, so a failure removes the
    /// temporary file.
    fn transfer_to_file(&self, unit: &DownloadUnit, storage_path: &Path) -> Result<PathBuf, DownloadError> {
        let (directory, name) = staging::split_storage_path(&unit.source_url, storage_path)?;
        let tracker = ProgressTracker::new(&unit.correlation_id, &unit.source_url, directory, name);
        let temp = staging::temp_path(&tracker.final_path());
        let staged = staging::open_temp(self.fs.as_ref(), &tracker, false)?;

        let mut context = TransferContext::for_file(
            tracker,
            staged.file,
            ProgressMode::Single,
            self.notifier.clone(),
        );
        let result = self.perform(unit, &mut context);
        let (tracker, flushed) = context.finish();

        let result = result.and_then(|()| {
            flushed.map_err(|e| DownloadError::Transfer {
                url: unit.source_url.clone(),
                source: EngineError::new(
                    EngineCode::Write,
                    format!("failed to flush temporary file: {}", e),
                ),
            })
        });
        if let Err(e) = result {
            staging::discard(self.fs.as_ref(), &temp);
            return Err(e);
        }

        staging::commit(self.fs.as_ref(), &tracker, unit.expected_sha256.as_deref())
    }

    fn transfer_to_buffer(&self, unit: &DownloadUnit, buffer: &SharedBuffer) -> Result<(), DownloadError> {
        let tracker = ProgressTracker::for_buffer(&unit.correlation_id, &unit.source_url);
        let mut context = TransferContext::for_buffer(tracker, buffer.clone(), self.notifier.clone());
        self.perform(unit, &mut context)
    }

    fn perform(&self, unit: &DownloadUnit, context: &mut TransferContext) -> Result<(), DownloadError> {
        self.engine.init(&unit.source_url);
        let request = TransferRequest::new(&unit.source_url, &unit.correlation_id, self.connect_timeout());

        self.engine
            .perform_download(&request, context)
            .map_err(|source| DownloadError::Transfer {
                url: unit.source_url.clone(),
                source,
            })
    }
}
