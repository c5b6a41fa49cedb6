//! Single and batch downloads.
//!
//! # Architecture
//!
//! ```text
//! caller ──► Downloader ──(worker thread for *_async)──► TransferEngine
//!                │                                            │
//!                │                              sink.write / sink.progress
//!                │                                            ▼
//!                │                                     TransferContext
//!                │                                  (file or SharedBuffer,
//!                │                                    ProgressTracker)
//!                ▼                                            │
//!          staging: name.temp ──► name                        ▼
//!                                                         Notifier ──► owning thread
//! ```
//!
//! File destinations are written to `<name>.temp` and renamed only after
//! the transfer completed (and its checksum matched, when one was given).
//! A failed single transfer deletes its temporary file; a failed batch member
//! keeps it so the next batch can resume.

mod batch;
mod buffer;
mod dispatch;
mod downloader;
mod handlers;
mod staging;
mod tracker;
mod unit;

pub use buffer::SharedBuffer;
pub use downloader::Downloader;
pub use handlers::{ErrorCallback, ProgressCallback, SuccessCallback};
pub use staging::{calculate_file_checksum, temp_path, TEMP_EXT};
pub use tracker::ProgressTracker;
pub use unit::{Destination, DownloadUnit, DownloadUnits};
