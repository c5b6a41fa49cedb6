//! User callbacks and their delivery onto the owning thread.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use super::tracker::ProgressTracker;
use crate::error::{DownloadError, ErrorReport};
use crate::executor::OwningThread;

/// Error callback.
pub type ErrorCallback = Arc<dyn Fn(&ErrorReport) + Send + Sync>;

/// Progress callback.
///
/// # Arguments
///
/// * `total` - Expected bytes; 0 while unknown
/// * `downloaded` - Bytes received so far
/// * `url` - Source URL
/// * `correlation_id` - Caller correlation id
pub type ProgressCallback = Arc<dyn Fn(u64, u64, &str, &str) + Send + Sync>;

/// Success callback.
///
/// # Arguments
///
/// * `url` - Source URL; empty for batch completion
/// * `path` - Final file path; empty for buffers and batch completion
/// * `correlation_id` - Unit correlation id, or the batch id
pub type SuccessCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// The three user callbacks of a downloader.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    error: RwLock<Option<ErrorCallback>>,
    progress: RwLock<Option<ProgressCallback>>,
    success: RwLock<Option<SuccessCallback>>,
}

impl HandlerRegistry {
    pub fn set_error(&self, callback: ErrorCallback) {
        *self.error.write() = Some(callback);
    }

    pub fn set_progress(&self, callback: ProgressCallback) {
        *self.progress.write() = Some(callback);
    }

    pub fn set_success(&self, callback: SuccessCallback) {
        *self.success.write() = Some(callback);
    }

    /// Run the matching callback. No lock is held while it runs.
    fn dispatch(&self, notification: &Notification) {
        match notification {
            Notification::Error(report) => {
                let callback = self.error.read().clone();
                if let Some(callback) = callback {
                    callback(report);
                }
            }
            Notification::Progress(tracker) => {
                let callback = self.progress.read().clone();
                if let Some(callback) = callback {
                    callback(
                        tracker.total,
                        tracker.downloaded,
                        &tracker.url,
                        &tracker.correlation_id,
                    );
                }
            }
            Notification::Success {
                url,
                path,
                correlation_id,
            } => {
                let callback = self.success.read().clone();
                if let Some(callback) = callback {
                    callback(url, path, correlation_id);
                }
            }
        }
    }
}

/// A user-visible event.
#[derive(Debug, Clone)]
pub(crate) enum Notification {
    Error(ErrorReport),
    /// Snapshot of a tracker at dispatch time.
    Progress(ProgressTracker),
    Success {
        url: String,
        path: String,
        correlation_id: String,
    },
}

/// Delivers notifications on the owning thread.
///
/// Holds the registry weakly: notifications still queued after the
/// downloader is dropped are skipped.
#[derive(Clone)]
pub(crate) struct Notifier {
    owner: Arc<dyn OwningThread>,
    handlers: Weak<HandlerRegistry>,
}

impl Notifier {
    pub fn new(owner: Arc<dyn OwningThread>, handlers: &Arc<HandlerRegistry>) -> Self {
        Self {
            owner,
            handlers: Arc::downgrade(handlers),
        }
    }

    /// Run inline when on the owning thread, otherwise enqueue.
    pub fn deliver(&self, notification: Notification) {
        if self.owner.is_owning_thread() {
            run(&self.handlers, &notification);
            return;
        }

        let handlers = self.handlers.clone();
        self.owner
            .run_on_owning_thread(Box::new(move || run(&handlers, &notification)));
    }

    pub fn error(&self, error: DownloadError, correlation_id: &str) {
        self.deliver(Notification::Error(ErrorReport::new(error, correlation_id)));
    }

    pub fn progress(&self, tracker: &ProgressTracker) {
        self.deliver(Notification::Progress(tracker.clone()));
    }

    pub fn success(&self, url: &str, path: &str, correlation_id: &str) {
        self.deliver(Notification::Success {
            url: url.to_string(),
            path: path.to_string(),
            correlation_id: correlation_id.to_string(),
        });
    }
}

fn run(handlers: &Weak<HandlerRegistry>, notification: &Notification) {
    match handlers.upgrade() {
        Some(handlers) => handlers.dispatch(notification),
        None => trace!(?notification, "Downloader dropped, skipping notification"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MainLoop;
    use parking_lot::Mutex;
    use std::thread;

    #[test]
    fn test_inline_on_owning_thread() {
        let main_loop = MainLoop::new();
        let registry = Arc::new(HandlerRegistry::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        registry.set_success(Arc::new(move |url, path, id| {
            sink.lock().push(format!("{}|{}|{}", url, path, id));
        }));

        let notifier = Notifier::new(Arc::new(main_loop.handle()), &registry);
        notifier.success("http://x/a", "/tmp/a", "a");

        // Delivered without pumping the loop.
        assert_eq!(*seen.lock(), vec!["http://x/a|/tmp/a|a".to_string()]);
    }

    #[test]
    fn test_marshaled_from_worker() {
        let mut main_loop = MainLoop::new();
        let owner = thread::current().id();
        let registry = Arc::new(HandlerRegistry::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        registry.set_progress(Arc::new(move |total, downloaded, _, id| {
            assert_eq!(thread::current().id(), owner);
            sink.lock().push((total, downloaded, id.to_string()));
        }));

        let notifier = Notifier::new(Arc::new(main_loop.handle()), &registry);
        thread::spawn(move || {
            let mut tracker = ProgressTracker::for_buffer("a", "http://x/a");
            tracker.total = 10;
            tracker.downloaded = 4;
            notifier.progress(&tracker);
        })
        .join()
        .unwrap();

        assert!(seen.lock().is_empty());
        main_loop.run_pending();
        assert_eq!(*seen.lock(), vec![(10, 4, "a".to_string())]);
    }

    #[test]
    fn test_skipped_after_registry_dropped() {
        let mut main_loop = MainLoop::new();
        let registry = Arc::new(HandlerRegistry::default());
        registry.set_error(Arc::new(|_| panic!("must not run")));

        let notifier = Notifier::new(Arc::new(main_loop.handle()), &registry);
        thread::spawn(move || {
            notifier.error(
                DownloadError::InvalidUrl {
                    url: "http://x/".to_string(),
                },
                "a",
            );
        })
        .join()
        .unwrap();

        drop(registry);
        assert_eq!(main_loop.run_pending(), 1);
    }
}
