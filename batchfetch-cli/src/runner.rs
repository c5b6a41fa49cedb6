//! Shared setup for download commands.
//!
//! [`CliRunner`] loads the config file, starts logging, and installs the
//! Ctrl-C handler. [`Session`] owns the main loop that the downloader's
//! callbacks run on and collects their outcomes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batchfetch::logging::{init_logging, LoggingGuard};
use batchfetch::{ConfigFile, Downloader, DownloaderConfig, MainLoop};
use tracing::{debug, info, warn};

use crate::error::CliError;
use crate::GlobalArgs;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Command runner holding resolved configuration.
pub struct CliRunner {
    config: DownloaderConfig,
    shutdown: Arc<AtomicBool>,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Load configuration, apply command-line overrides, and start logging.
    pub fn new(args: &GlobalArgs) -> Result<Self, CliError> {
        let file = ConfigFile::load()?;

        let mut logging = file.to_logging_config();
        if args.verbose {
            logging = logging.with_level("debug");
        }
        let guard = init_logging(&logging).map_err(|e| CliError::Logging(e.to_string()))?;

        raise_open_file_limit();

        // Group size derives from the descriptor limit, so resolve it after raising.
        let mut config = file.to_downloader_config();
        if let Some(secs) = args.timeout {
            config = config.with_connection_timeout(Duration::from_secs(secs));
        }
        if let Some(max) = args.max_open_files {
            config = config.with_max_open_files(max);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        ctrlc::set_handler(move || {
            println!();
            println!("Received interrupt, stopping...");
            shutdown_clone.store(true, Ordering::SeqCst);
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

        Ok(Self {
            config,
            shutdown,
            _logging: guard,
        })
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            command,
            version = env!("CARGO_PKG_VERSION"),
            connection_timeout_secs = self.config.connection_timeout.as_secs(),
            max_open_files = self.config.max_open_files,
            max_connections = self.config.max_connections,
            "batchfetch starting"
        );
    }

    /// Create a downloader whose callbacks run on the calling thread.
    pub fn session(&self) -> Session {
        Session::new(&self.config, self.shutdown.clone())
    }
}

#[cfg(unix)]
fn raise_open_file_limit() {
    match rlimit::increase_nofile_limit(u64::MAX) {
        Ok(limit) => debug!(limit, "Raised open file limit"),
        Err(e) => warn!(error = %e, "Could not raise open file limit"),
    }
}

#[cfg(not(unix))]
fn raise_open_file_limit() {}

/// Outcomes collected from downloader callbacks.
#[derive(Debug, Default)]
pub struct Outcome {
    /// `(correlation_id, final_path)` of completed single downloads.
    pub succeeded: Vec<(String, String)>,
    /// `(correlation_id, message)` of failed units.
    pub failed: Vec<(String, String)>,
    /// Set when a batch-complete notification arrived.
    pub batch_complete: bool,
}

impl Outcome {
    /// Units that reported an outcome of their own.
    pub fn settled(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// One downloader bound to a main loop on the current thread.
pub struct Session {
    main_loop: MainLoop,
    downloader: Arc<Downloader>,
    outcome: Arc<Mutex<Outcome>>,
    shutdown: Arc<AtomicBool>,
}

impl Session {
    fn new(config: &DownloaderConfig, shutdown: Arc<AtomicBool>) -> Self {
        let main_loop = MainLoop::new();
        let downloader = Downloader::http(Arc::new(main_loop.handle()), config);
        let outcome = Arc::new(Mutex::new(Outcome::default()));

        let sink = outcome.clone();
        downloader.set_success_handler(move |url, path, id| {
            let mut outcome = lock(&sink);
            if url.is_empty() && path.is_empty() {
                outcome.batch_complete = true;
            } else {
                println!("  {} -> {}", id, path);
                outcome.succeeded.push((id.to_string(), path.to_string()));
            }
        });

        let sink = outcome.clone();
        downloader.set_error_handler(move |report| {
            println!("  {} failed: {} ({})", report.correlation_id, report.message(), report.code().name());
            lock(&sink).failed.push((report.correlation_id.clone(), report.message()));
        });

        // Last decile printed per unit.
        let printed: Mutex<HashMap<String, u64>> = Mutex::new(HashMap::new());
        downloader.set_progress_handler(move |total, downloaded, _url, id| {
            if total == 0 {
                return;
            }
            let decile = downloaded.saturating_mul(10) / total;
            let mut printed = printed.lock().unwrap_or_else(|e| e.into_inner());
            if printed.get(id).is_some_and(|&last| last >= decile) {
                return;
            }
            printed.insert(id.to_string(), decile);
            println!(
                "  {}: {:>3}% ({} / {})",
                id,
                decile * 10,
                format_size(downloaded),
                format_size(total)
            );
        });

        Self {
            main_loop,
            downloader,
            outcome,
            shutdown,
        }
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    /// Run callbacks until `done` holds or Ctrl-C arrives.
    pub fn wait(&mut self, done: impl Fn(&Outcome) -> bool) -> Result<Outcome, CliError> {
        loop {
            self.main_loop.run_for(POLL_INTERVAL);
            if done(&lock(&self.outcome)) {
                break;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(CliError::Interrupted);
            }
        }
        Ok(std::mem::take(&mut *lock(&self.outcome)))
    }
}

fn lock(outcome: &Mutex<Outcome>) -> std::sync::MutexGuard<'_, Outcome> {
    outcome.lock().unwrap_or_else(|e| e.into_inner())
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
