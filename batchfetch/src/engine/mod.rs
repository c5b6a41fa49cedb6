//! Transfer engine contract.
//!
//! The downloader never talks HTTP itself. It hands a [`TransferRequest`] and
//! a [`TransferSink`] to a [`TransferEngine`], which moves bytes from the
//! network into the sink and reports progress through it.
//!
//! # Architecture
//!
//! ```text
//! Downloader
//!     │
//!     ├── init(url) / supports_resume()        probe once per batch
//!     │
//!     ├── perform_download(request, sink)      one blocking transfer
//!     │
//!     └── perform_batch_download(transfers)    one multiplexed group
//!             │
//!             └── sink.write(bytes) / sink.progress(total, now)
//!                 called on the engine thread running that transfer
//! ```
//!
//! A sink that accepts fewer bytes than offered makes the engine abort that
//! transfer with [`EngineCode::Write`].

mod http;

pub use http::HttpEngine;

use std::time::Duration;

use thiserror::Error;

/// Native result codes reported by engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum EngineCode {
    /// Unclassified failure.
    Other = 1,
    /// Could not connect to the host.
    Connect = 7,
    /// The server answered with an error status.
    HttpStatus = 22,
    /// The sink accepted fewer bytes than were received.
    Write = 23,
    /// The request timed out.
    Timeout = 28,
    /// A range request was answered with the full body.
    RangeIgnored = 33,
    /// The resume offset lies beyond the end of the resource.
    BadResume = 36,
    /// Reading the response body failed or ended early.
    Recv = 56,
    /// A multiplexing worker died.
    WorkerPanic = 100,
}

impl EngineCode {
    /// Get the numeric value handed to error handlers.
    pub fn as_native(self) -> i32 {
        self as i32
    }
}

/// Failure reported by a transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct EngineError {
    /// Native engine code.
    pub code: i32,
    /// Engine description of the failure.
    pub message: String,
}

impl EngineError {
    /// Create a new engine error.
    pub fn new(code: EngineCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_native(),
            message: message.into(),
        }
    }
}

/// One transfer as handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Source URL.
    pub url: String,
    /// Caller correlation id, used for multiplexing error reports.
    pub correlation_id: String,
    /// Number of bytes already present at the destination.
    ///
    /// When non-zero the engine requests only the remaining range and reports
    /// progress counting these bytes as already downloaded.
    pub resume_from: u64,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
}

impl TransferRequest {
    /// Create a request that starts from the first byte.
    pub fn new(
        url: impl Into<String>,
        correlation_id: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            correlation_id: correlation_id.into(),
            resume_from: 0,
            connect_timeout,
        }
    }

    /// Continue from `offset` bytes.
    pub fn resuming_from(mut self, offset: u64) -> Self {
        self.resume_from = offset;
        self
    }
}

/// Receiver of one transfer's bytes and progress.
pub trait TransferSink: Send {
    /// Consume received bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Report progress. `total` is 0 while unknown.
    fn progress(&mut self, total: u64, downloaded: u64);
}

/// A request paired with the sink that receives its bytes.
pub struct BatchTransfer<'a> {
    /// What to fetch.
    pub request: TransferRequest,
    /// Where the bytes go.
    pub sink: &'a mut dyn TransferSink,
}

/// Network transfer backend used by the downloader.
///
/// Implementations must be usable from several threads at once: single
/// transfers may run concurrently with each other.
pub trait TransferEngine: Send + Sync {
    /// Prepare for transfers from `url`; resets the cached resume probe.
    fn init(&self, url: &str);

    /// Whether the URL given to [`init`](Self::init) accepts range requests.
    fn supports_resume(&self) -> bool;

    /// Connection timeout for requests that carry none of their own, such
    /// as the resume probe.
    fn set_connect_timeout(&self, _timeout: Duration) {}

    /// Perform one blocking transfer.
    fn perform_download(
        &self,
        request: &TransferRequest,
        sink: &mut dyn TransferSink,
    ) -> Result<(), EngineError>;

    /// Perform a group of transfers concurrently, returning when all finished.
    ///
    /// Per-transfer failures are observable only through the sinks (the
    /// transfer stops short of its total). Failures of the multiplexing itself
    /// are reported through `on_error` with the affected correlation id.
    fn perform_batch_download(
        &self,
        transfers: Vec<BatchTransfer<'_>>,
        on_error: &dyn Fn(EngineError, &str),
    );

    /// Message of the most recent failure.
    fn last_error(&self) -> String;
}
