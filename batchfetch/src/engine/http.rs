//! HTTP transfer engine built on `reqwest::blocking`.
//!
//! This module provides the network side of the downloader:
//! - Streaming GET transfers into a [`TransferSink`]
//! - Resume via HTTP Range requests
//! - A bounded pool of scoped worker threads for batch groups

use std::io::Read;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::{BatchTransfer, EngineCode, EngineError, TransferEngine, TransferRequest, TransferSink};

/// Default total timeout for one transfer in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Default number of concurrent connections per batch group.
const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Buffer size for reading the response body (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Connection timeout for the resume probe until one is configured.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct EngineState {
    /// URL given to the last `init`.
    url: Option<String>,
    /// Cached result of the resume probe for `url`.
    resume: Option<bool>,
    /// Connection timeout set through `set_connect_timeout`.
    connect_timeout: Option<Duration>,
    /// Client built for a given connection timeout.
    client: Option<(Duration, Client)>,
    /// Message of the most recent failure.
    last_error: String,
}

/// HTTP-based transfer engine.
///
/// Implements [`TransferEngine`] with support for:
/// - Range requests for resuming transfers
/// - Progress reporting per received chunk
/// - Concurrent transfers within a batch group
pub struct HttpEngine {
    pub(crate) timeout: Duration,
    pub(crate) max_connections: usize,
    state: Mutex<EngineState>,
}

impl std::fmt::Debug for HttpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEngine")
            .field("timeout", &self.timeout)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Default for HttpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpEngine {
    /// Create a new HTTP engine with default settings.
    pub fn new() -> Self {
        Self::with_settings(
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            DEFAULT_MAX_CONNECTIONS,
        )
    }

    /// Create a new HTTP engine with a custom transfer timeout and connection cap.
    pub fn with_settings(timeout: Duration, max_connections: usize) -> Self {
        Self {
            timeout,
            max_connections: max_connections.max(1),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Get (or build) the client for a connection timeout.
    fn client(&self, connect_timeout: Duration) -> Result<Client, EngineError> {
        let mut state = self.state.lock();
        if let Some((timeout, client)) = &state.client {
            if *timeout == connect_timeout {
                return Ok(client.clone());
            }
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(self.timeout)
            .build()
            .map_err(|e| EngineError::new(EngineCode::Other, format!("failed to create HTTP client: {}", e)))?;
        state.client = Some((connect_timeout, client.clone()));
        Ok(client)
    }

    fn record_error(&self, err: &EngineError) {
        self.state.lock().last_error = err.message.clone();
    }

    /// Probe range support with a HEAD request asking for the whole body as a range.
    fn probe_resume(&self, url: &str) -> bool {
        let timeout = self
            .state
            .lock()
            .connect_timeout
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let client = match self.client(timeout) {
            Ok(client) => client,
            Err(_) => return false,
        };

        match client.head(url).header(RANGE, "bytes=0-").send() {
            Ok(response) => {
                let accepts = response
                    .headers()
                    .get(ACCEPT_RANGES)
                    .map(|v| v.to_str().unwrap_or("") == "bytes")
                    .unwrap_or(false);
                response.status() == StatusCode::PARTIAL_CONTENT || accepts
            }
            Err(e) => {
                debug!(url, error = %e, "Resume probe failed");
                false
            }
        }
    }

    /// Stream one transfer into its sink.
    fn transfer(
        &self,
        client: &Client,
        request: &TransferRequest,
        sink: &mut dyn TransferSink,
    ) -> Result<(), EngineError> {
        let url = request.url.as_str();

        // Build request with optional Range header
        let mut builder = client.get(url);
        if request.resume_from > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", request.resume_from));
        }

        let mut response = builder.send().map_err(|e| classify(url, &e))?;

        let status = response.status();
        if request.resume_from > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
            if let Some(total) = content_range_total(response.headers()) {
                return finish_past_end(url, request.resume_from, total, sink);
            }
        }
        if !status.is_success() {
            return Err(EngineError::new(
                EngineCode::HttpStatus,
                format!("GET {} returned {}", url, status),
            ));
        }
        if request.resume_from > 0 && status != StatusCode::PARTIAL_CONTENT {
            return Err(EngineError::new(
                EngineCode::RangeIgnored,
                format!("server ignored range request for {}", url),
            ));
        }

        let start = request.resume_from;
        let total = response.content_length().map(|len| start + len).unwrap_or(0);
        sink.progress(total, start);

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut downloaded = start;

        loop {
            let bytes_read = response.read(&mut buffer).map_err(|e| {
                EngineError::new(EngineCode::Recv, format!("read error from {}: {}", url, e))
            })?;

            if bytes_read == 0 {
                break;
            }

            let accepted = sink.write(&buffer[..bytes_read]);
            if accepted != bytes_read {
                return Err(EngineError::new(
                    EngineCode::Write,
                    format!(
                        "failed writing received data: {} of {} bytes accepted",
                        accepted, bytes_read
                    ),
                ));
            }

            downloaded += bytes_read as u64;
            sink.progress(total, downloaded);
        }

        if total == 0 {
            // Length was unknown until the body ended.
            sink.progress(downloaded, downloaded);
        } else if downloaded < total {
            return Err(EngineError::new(
                EngineCode::Recv,
                format!(
                    "transfer closed with {} bytes remaining",
                    total - downloaded
                ),
            ));
        }

        Ok(())
    }
}

/// Resource size from a `Content-Range` header (`bytes */N` or `bytes a-b/N`).
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Settle a resume whose offset the server rejected with 416.
///
/// An offset equal to the resource size means the destination already
/// holds every byte.
fn finish_past_end(
    url: &str,
    resume_from: u64,
    total: u64,
    sink: &mut dyn TransferSink,
) -> Result<(), EngineError> {
    if resume_from == total {
        debug!(url, total, "Nothing left to fetch");
        sink.progress(total, total);
        return Ok(());
    }
    Err(EngineError::new(
        EngineCode::BadResume,
        format!(
            "cannot resume {} at byte {}: resource has {} bytes",
            url, resume_from, total
        ),
    ))
}

/// Map a reqwest error to a native code.
fn classify(url: &str, err: &reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::new(EngineCode::Timeout, format!("request to {} timed out", url))
    } else if err.is_connect() {
        EngineError::new(EngineCode::Connect, format!("could not connect to {}: {}", url, err))
    } else {
        EngineError::new(EngineCode::Other, format!("request to {} failed: {}", url, err))
    }
}

impl TransferEngine for HttpEngine {
    fn init(&self, url: &str) {
        let mut state = self.state.lock();
        state.url = Some(url.to_string());
        state.resume = None;
    }

    fn set_connect_timeout(&self, timeout: Duration) {
        self.state.lock().connect_timeout = Some(timeout);
    }

    fn supports_resume(&self) -> bool {
        let url = {
            let state = self.state.lock();
            if let Some(cached) = state.resume {
                return cached;
            }
            match &state.url {
                Some(url) => url.clone(),
                None => return false,
            }
        };

        let supported = self.probe_resume(&url);
        debug!(url = %url, supported, "Resume probe");
        self.state.lock().resume = Some(supported);
        supported
    }

    fn perform_download(
        &self,
        request: &TransferRequest,
        sink: &mut dyn TransferSink,
    ) -> Result<(), EngineError> {
        let result = self
            .client(request.connect_timeout)
            .and_then(|client| self.transfer(&client, request, sink));
        if let Err(ref e) = result {
            self.record_error(e);
        }
        result
    }

    fn perform_batch_download(
        &self,
        transfers: Vec<BatchTransfer<'_>>,
        on_error: &dyn Fn(EngineError, &str),
    ) {
        let Some(first) = transfers.first() else {
            return;
        };

        let client = match self.client(first.request.connect_timeout) {
            Ok(client) => client,
            Err(e) => {
                self.record_error(&e);
                for transfer in &transfers {
                    on_error(e.clone(), &transfer.request.correlation_id);
                }
                return;
            }
        };

        let workers = self.max_connections.min(transfers.len());
        let queue = Mutex::new(transfers.into_iter());
        let current: Vec<Mutex<Option<String>>> = (0..workers).map(|_| Mutex::new(None)).collect();

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);

            for (index, slot) in current.iter().enumerate() {
                let queue = &queue;
                let client = &client;
                let spawned = thread::Builder::new()
                    .name(format!("batchfetch-conn-{}", index))
                    .spawn_scoped(scope, move || loop {
                        let next = queue.lock().next();
                        let Some(transfer) = next else {
                            break;
                        };

                        *slot.lock() = Some(transfer.request.correlation_id.clone());
                        if let Err(e) = self.transfer(client, &transfer.request, transfer.sink) {
                            warn!(
                                correlation_id = %transfer.request.correlation_id,
                                url = %transfer.request.url,
                                code = e.code,
                                "Batch transfer failed: {}",
                                e.message
                            );
                            self.record_error(&e);
                        }
                        *slot.lock() = None;
                    });

                match spawned {
                    Ok(handle) => handles.push((index, handle)),
                    Err(e) => {
                        let err = EngineError::new(
                            EngineCode::Other,
                            format!("failed to spawn transfer worker: {}", e),
                        );
                        self.record_error(&err);
                        on_error(err, "");
                    }
                }
            }

            for (index, handle) in handles {
                if handle.join().is_err() {
                    let id = current[index].lock().take().unwrap_or_default();
                    let err = EngineError::new(EngineCode::WorkerPanic, "transfer worker panicked");
                    self.record_error(&err);
                    on_error(err, &id);
                }
            }
        });

        // Left over only when every worker died or none could be spawned.
        for transfer in queue.into_inner() {
            let err = EngineError::new(
                EngineCode::WorkerPanic,
                "transfer not attempted: no transfer worker left",
            );
            self.record_error(&err);
            on_error(err, &transfer.request.correlation_id);
        }
    }

    fn last_error(&self) -> String {
        self.state.lock().last_error.clone()
    }
}
