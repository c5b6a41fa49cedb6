//! Batch orchestration.
//!
//! A batch is split into consecutive groups of at most `max_open_files`
//! units. Groups run strictly one after another; each group is one
//! multiplexed engine call.
//!
//! # Architecture
//!
//! ```text
//! run_batch
//!   ├── engine.init(first url) + supports_resume()      once per batch
//!   ├── for each group:
//!   │     ├── prepare:  split path, open .temp (append when resuming)
//!   │     ├── perform:  engine.perform_batch_download(group)
//!   │     └── account:  flush, then NetworkIncomplete or verify + rename
//!   ├── BatchScope dropped                              state back to Idle
//!   └── on_success("", "", batch_id)
//! ```

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::dispatch::{ProgressMode, TransferContext};
use super::downloader::Downloader;
use super::staging;
use super::tracker::ProgressTracker;
use super::unit::{Destination, DownloadUnit, DownloadUnits};
use crate::engine::{BatchTransfer, EngineCode, EngineError, TransferRequest};
use crate::error::{DownloadError, DownloaderError, DownloaderResult};

/// Split `len` units into consecutive ranges of at most `limit`.
pub(crate) fn plan_groups(len: usize, limit: usize) -> Vec<Range<usize>> {
    let limit = limit.max(1);
    (0..len)
        .step_by(limit)
        .map(|start| start..(start + limit).min(len))
        .collect()
}

#[derive(Debug, Default)]
enum BatchState {
    #[default]
    Idle,
    InFlight {
        batch_id: String,
    },
}

/// Batch state machine and the batch-scoped resume flag.
#[derive(Debug, Default)]
pub(crate) struct BatchControl {
    state: Mutex<BatchState>,
    resume_supported: AtomicBool,
}

impl BatchControl {
    /// Move Idle → InFlight.
    pub fn begin(self: &Arc<Self>, batch_id: &str) -> DownloaderResult<BatchScope> {
        let mut state = self.state.lock();
        if let BatchState::InFlight { batch_id: running } = &*state {
            return Err(DownloaderError::BatchInFlight {
                running: running.clone(),
            });
        }
        *state = BatchState::InFlight {
            batch_id: batch_id.to_string(),
        };
        Ok(BatchScope {
            control: Arc::clone(self),
            batch_id: batch_id.to_string(),
        })
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(*self.state.lock(), BatchState::InFlight { .. })
    }

    pub fn resume_supported(&self) -> bool {
        self.resume_supported.load(Ordering::SeqCst)
    }

    fn set_resume_supported(&self, supported: bool) {
        self.resume_supported.store(supported, Ordering::SeqCst);
    }
}

/// A running batch. Dropping it returns the state to Idle and clears the
/// resume flag, also when the batch routine unwinds.
#[derive(Debug)]
pub(crate) struct BatchScope {
    control: Arc<BatchControl>,
    batch_id: String,
}

impl BatchScope {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        self.control.set_resume_supported(false);
        *self.control.state.lock() = BatchState::Idle;
        debug!(batch_id = %self.batch_id, "Batch state reset");
    }
}

/// A unit whose temporary file is open and ready for the engine.
struct Prepared<'u> {
    unit: &'u DownloadUnit,
    request: TransferRequest,
    context: TransferContext,
}

impl Downloader {
    /// Run a whole batch on the calling thread.
    pub(super) fn run_batch(&self, units: &DownloadUnits, scope: BatchScope) {
        let batch_id = scope.batch_id().to_string();
        info!(batch_id = %batch_id, units = units.len(), "Batch started");

        if let Some(first) = units.first() {
            self.engine.init(&first.source_url);
            let supported = self.engine.supports_resume();
            debug!(batch_id = %batch_id, url = %first.source_url, supported, "Resume support probed");
            scope.control.set_resume_supported(supported);
        }

        let groups = plan_groups(units.len(), self.max_open_files);
        let group_count = groups.len();
        for (group, range) in groups.into_iter().enumerate() {
            self.run_group(group, group_count, &units.as_slice()[range]);
        }

        drop(scope);
        info!(batch_id = %batch_id, "Batch complete");
        self.notifier.success("", "", &batch_id);
    }

    fn run_group(&self, group: usize, group_count: usize, units: &[DownloadUnit]) {
        let resume_supported = self.batch.resume_supported();

        let mut prepared = Vec::with_capacity(units.len());
        for unit in units {
            match self.prepare(unit, resume_supported) {
                Ok(p) => prepared.push(p),
                Err(e) => {
                    warn!(correlation_id = %unit.correlation_id, "Failed to prepare unit: {}", e);
                    self.notifier.error(e, &unit.correlation_id);
                }
            }
        }

        if prepared.is_empty() {
            return;
        }

        info!(
            group = group + 1,
            groups = group_count,
            transfers = prepared.len(),
            "Starting batch group"
        );

        {
            let transfers: Vec<BatchTransfer<'_>> = prepared
                .iter_mut()
                .map(|p| BatchTransfer {
                    request: p.request.clone(),
                    sink: &mut p.context,
                })
                .collect();

            let notifier = &self.notifier;
            self.engine
                .perform_batch_download(transfers, &|err: EngineError, id: &str| {
                    warn!(correlation_id = %id, code = err.code, "Multiplexed transfer failed: {}", err.message);
                    notifier.error(DownloadError::Multiplex { source: err }, id);
                });
        }

        for p in prepared {
            self.account(p);
        }
    }

    fn prepare<'u>(
        &self,
        unit: &'u DownloadUnit,
        resume_supported: bool,
    ) -> Result<Prepared<'u>, DownloadError> {
        let Destination::File(storage_path) = &unit.destination else {
            return Err(DownloadError::InvalidUrl {
                url: unit.source_url.clone(),
            });
        };

        let (directory, name) = staging::split_storage_path(&unit.source_url, storage_path)?;
        let tracker = ProgressTracker::new(&unit.correlation_id, &unit.source_url, directory, name);
        let staged = staging::open_temp(
            self.fs.as_ref(),
            &tracker,
            unit.resume_requested && resume_supported,
        )?;

        let request = TransferRequest::new(
            &unit.source_url,
            &unit.correlation_id,
            self.connect_timeout(),
        )
        .resuming_from(staged.resume_from);
        let context = TransferContext::for_file(
            tracker,
            staged.file,
            ProgressMode::Batch,
            self.notifier.clone(),
        );

        Ok(Prepared {
            unit,
            request,
            context,
        })
    }

    /// Settle one unit after its group returned. The temporary file of an
    /// incomplete unit is kept for a later resume.
    fn account(&self, prepared: Prepared<'_>) {
        let Prepared { unit, context, .. } = prepared;
        let id = unit.correlation_id.as_str();
        let (tracker, flushed) = context.finish();

        if let Err(e) = flushed {
            let error = DownloadError::Transfer {
                url: unit.source_url.clone(),
                source: EngineError::new(
                    EngineCode::Write,
                    format!("failed to flush temporary file: {}", e),
                ),
            };
            warn!(correlation_id = %id, "{}", error);
            self.notifier.error(error, id);
            return;
        }

        if tracker.total == 0 || tracker.downloaded < tracker.total {
            let error = DownloadError::NetworkIncomplete {
                url: unit.source_url.clone(),
                downloaded: tracker.downloaded,
                total: tracker.total,
            };
            warn!(correlation_id = %id, "{}", error);
            self.notifier.error(error, id);
            return;
        }

        match staging::commit(self.fs.as_ref(), &tracker, unit.expected_sha256.as_deref()) {
            Ok(path) => debug!(correlation_id = %id, path = %path.display(), "Unit stored"),
            Err(e) => {
                warn!(correlation_id = %id, "{}", e);
                self.notifier.error(e, id);
            }
        }
    }
}
