//! Owning-thread execution context.
//!
//! Every user-visible notification of the downloader runs on one designated
//! thread. The downloader reaches that thread through the [`OwningThread`]
//! trait, injected at construction.
//!
//! [`MainLoop`] is a ready-made implementation: a FIFO task queue that is
//! pumped by the thread which created it.
//!
//! ```ignore
//! let mut main_loop = MainLoop::new();
//! let downloader = Downloader::new(engine, fs, Arc::new(main_loop.handle()), config);
//!
//! downloader.download_async(url, "/tmp/a.bin", "a");
//! main_loop.run_until(|| done.load(Ordering::SeqCst), Duration::from_secs(30));
//! ```

use std::marker::PhantomData;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// A closure scheduled onto the owning thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Access to the single thread that runs user-visible callbacks.
pub trait OwningThread: Send + Sync {
    /// Schedule `task` to run later on the owning thread.
    ///
    /// Tasks scheduled from one thread run in the order they were scheduled.
    fn run_on_owning_thread(&self, task: Task);

    /// Whether the calling thread is the owning thread.
    fn is_owning_thread(&self) -> bool;
}

/// Cloneable, thread-safe handle to a [`MainLoop`].
#[derive(Clone, Debug)]
pub struct MainLoopHandle {
    sender: Sender<Task>,
    owner: ThreadId,
}

impl OwningThread for MainLoopHandle {
    fn run_on_owning_thread(&self, task: Task) {
        // The loop was dropped; nobody is left to run the task.
        let _ = self.sender.send(task);
    }

    fn is_owning_thread(&self) -> bool {
        thread::current().id() == self.owner
    }
}

/// Task queue pumped by the thread that created it.
///
/// Not `Send`: the loop stays on its owning thread.
pub struct MainLoop {
    receiver: Receiver<Task>,
    handle: MainLoopHandle,
    _not_send: PhantomData<*const ()>,
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop {
    /// Create a loop owned by the current thread.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            receiver,
            handle: MainLoopHandle {
                sender,
                owner: thread::current().id(),
            },
            _not_send: PhantomData,
        }
    }

    /// Get a handle to schedule work onto this loop.
    pub fn handle(&self) -> MainLoopHandle {
        self.handle.clone()
    }

    /// Run every task queued right now. Returns the number of tasks run.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            count += 1;
        }
        count
    }

    /// Run tasks as they arrive for `duration`. Returns the number of tasks run.
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut count = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return count;
            }
            match self.receiver.recv_timeout(deadline - now) {
                Ok(task) => {
                    task();
                    count += 1;
                }
                Err(RecvTimeoutError::Timeout) => return count,
                Err(RecvTimeoutError::Disconnected) => return count,
            }
        }
    }

    /// Run tasks until `done` returns true or `timeout` elapses.
    ///
    /// Returns whether `done` became true.
    pub fn run_until(&mut self, mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = (deadline - now).min(Duration::from_millis(50));
            if let Ok(task) = self.receiver.recv_timeout(wait) {
                task();
            }
        }
    }
}
