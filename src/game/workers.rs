//! Background executor for work that must never block the tick
//!
//! Path searches, path deliveries, fire-solution recalculations and zone
//! change notifications are all handed to a `WorkerPool`. The threaded flavor
//! runs them on a dedicated rayon pool; the inline flavor runs them on the
//! caller's thread, which keeps single-threaded tests deterministic.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, warn};

/// Executor for asynchronous core work
pub struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Threaded pool with `threads` workers; 0 threads means inline execution
    pub fn new(threads: usize) -> Self {
        if threads == 0 {
            return Self::inline();
        }

        let built = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("arena-worker-{}", i))
            .panic_handler(|_| error!("Background worker panicked outside a task boundary"))
            .build();

        match built {
            Ok(pool) => Self {
                pool: Some(pool),
                in_flight: Arc::new(AtomicUsize::new(0)),
            },
            Err(e) => {
                warn!("Failed to build worker pool ({}), running tasks inline", e);
                Self::inline()
            }
        }
    }

    /// Run every task immediately on the calling thread
    pub fn inline() -> Self {
        Self {
            pool: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        self.pool.is_none()
    }

    /// Number of tasks queued or running
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Schedule a task. Panics inside the task are caught and logged with
    /// `label`; they never reach the caller.
    pub fn spawn<F>(&self, label: &'static str, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::AcqRel);

        let run = move || {
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!(task = label, "Background task panicked");
            }
            in_flight.fetch_sub(1, Ordering::AcqRel);
        };

        match &self.pool {
            Some(pool) => pool.spawn(run),
            None => run(),
        }
    }

    /// Poll until no task is in flight or `timeout` elapses.
    /// Returns true when the pool drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::inline()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
