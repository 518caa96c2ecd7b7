//! Managed thread pool.

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::trace;

use crate::{Error, Result};

/// The runtime's worker pool, backed by a `rayon` thread pool with named threads.
///
/// Work items may block (waiting on the host loop, sleeping, waiting on other tasks), so the
/// pool is sized generously rather than to the core count alone.
pub struct ManagedThreadPool {
    pool: ThreadPool,
    threads: usize,
}

impl ManagedThreadPool {
    /// Creates a pool
    ///
    /// ## Arguments
    /// * `threads` - Number of worker threads
    /// * `prefix`  - Thread name prefix; workers are named `<prefix>-<index>`
    ///
    /// # Errors
    /// Returns an error if the operating system refuses to spawn the workers.
    pub fn new(threads: usize, prefix: &str) -> Result<Self> {
        let prefix = prefix.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |index| format!("{}-{}", prefix, index))
            .build()
            .map_err(|e| Error::Error(format!("Failed to start managed thread pool - {}", e)))?;

        Ok(ManagedThreadPool { pool, threads })
    }

    /// Queues `work` and returns immediately
    pub fn spawn<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        trace!("queueing managed work item");
        self.pool.spawn(work);
    }

    /// True when called from one of this pool's workers
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        self.pool.current_thread_index().is_some()
    }

    /// Number of worker threads
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use super::*;

    #[test]
    fn test_spawn_runs_on_named_worker() {
        let pool = ManagedThreadPool::new(2, "test-worker").unwrap();
        assert_eq!(pool.threads(), 2);
        assert!(!pool.is_worker_thread());

        let (tx, rx) = mpsc::channel();
        pool.spawn(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        });

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("test-worker-"));
    }
}
