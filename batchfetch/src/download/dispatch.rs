//! Per-transfer sink: routes engine callbacks to the destination and to
//! progress notifications.
//!
//! # Architecture
//!
//! ```text
//! engine thread                          owning thread
//! ─────────────                          ─────────────
//! sink.write(bytes) ──► File (buffered) | SharedBuffer
//! sink.progress(t, n) ─► tracker update
//!                          │
//!                          └─► Notifier ──(inline or queued)──► on_progress
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};

use tracing::{debug, trace};

use super::buffer::SharedBuffer;
use super::handlers::Notifier;
use super::tracker::ProgressTracker;
use crate::engine::TransferSink;

/// How progress callbacks are classified.
///
/// Both modes deliver the same progress notification for every change. In
/// batch mode the one reaching the known total is the only per-file
/// completion signal (there is no per-file success), so it is logged as the
/// end of the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressMode {
    /// Completion is reported through the success handler.
    Single,
    /// Completion is the progress notification at 100%.
    Batch,
}

enum Writer {
    File(BufWriter<File>),
    Buffer(SharedBuffer),
}

/// Sink owned by exactly one transfer.
pub(crate) struct TransferContext {
    tracker: ProgressTracker,
    writer: Writer,
    mode: ProgressMode,
    notifier: Notifier,
}

impl TransferContext {
    /// Sink writing into an opened temporary file.
    pub fn for_file(
        tracker: ProgressTracker,
        file: File,
        mode: ProgressMode,
        notifier: Notifier,
    ) -> Self {
        Self {
            tracker,
            writer: Writer::File(BufWriter::new(file)),
            mode,
            notifier,
        }
    }

    /// Sink writing into a memory buffer.
    pub fn for_buffer(tracker: ProgressTracker, buffer: SharedBuffer, notifier: Notifier) -> Self {
        Self {
            tracker,
            writer: Writer::Buffer(buffer),
            mode: ProgressMode::Single,
            notifier,
        }
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Flush and close the destination, returning the tracker.
    pub fn finish(self) -> (ProgressTracker, io::Result<()>) {
        let result = match self.writer {
            Writer::File(writer) => writer.into_inner().map(drop).map_err(|e| e.into_error()),
            Writer::Buffer(_) => Ok(()),
        };
        (self.tracker, result)
    }
}

impl TransferSink for TransferContext {
    fn write(&mut self, data: &[u8]) -> usize {
        match &mut self.writer {
            Writer::File(writer) => match writer.write_all(data) {
                Ok(()) => data.len(),
                Err(e) => {
                    debug!(
                        correlation_id = %self.tracker.correlation_id,
                        error = %e,
                        "Write to temporary file failed"
                    );
                    0
                }
            },
            Writer::Buffer(buffer) => {
                let written = buffer.write(data);
                if written == 0 && !data.is_empty() {
                    debug!(
                        correlation_id = %self.tracker.correlation_id,
                        capacity = buffer.capacity(),
                        incoming = data.len(),
                        "Buffer capacity exceeded"
                    );
                }
                written
            }
        }
    }

    fn progress(&mut self, total: u64, downloaded: u64) {
        let learned_total = total > 0 && self.tracker.total == 0;
        if learned_total {
            self.tracker.total = total;
        }
        if downloaded == self.tracker.downloaded && !learned_total {
            return;
        }
        self.tracker.downloaded = downloaded;

        if self.mode == ProgressMode::Batch && self.tracker.is_complete() {
            debug!(
                correlation_id = %self.tracker.correlation_id,
                bytes = downloaded,
                "Transfer finished"
            );
        } else {
            trace!(
                correlation_id = %self.tracker.correlation_id,
                downloaded,
                total = self.tracker.total,
                "Transfer progress"
            );
        }
        self.notifier.progress(&self.tracker);
    }
}
