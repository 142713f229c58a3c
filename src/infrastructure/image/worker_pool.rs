//! Bounded pool that runs background image loads in submission order.
//!
//! The pool owns its worker threads, so a job never runs on a thread that
//! belongs to the caller's runtime or to the delivery loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, trace};

use crate::domain::errors::{CacheError, CacheResult};

type Job = BoxFuture<'static, ()>;

/// Default pool size: twice the available parallelism, plus one.
#[must_use]
pub fn default_size() -> usize {
    let parallelism = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    parallelism * 2 + 1
}

/// Name given to every pool thread.
pub const WORKER_THREAD_NAME: &str = "image-worker";

/// Runs submitted jobs with at most `size` in flight.
///
/// The queue is unbounded. Jobs start in FIFO order as permits free up.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    job_tx: mpsc::UnboundedSender<Job>,
    size: usize,
    counters: Arc<Counters>,
    _runtime: Arc<PoolRuntime>,
}

/// Shuts the pool runtime down without blocking, so the last handle may be
/// dropped from async code.
#[derive(Debug)]
struct PoolRuntime(Option<Runtime>);

impl Drop for PoolRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
            trace!("Image worker runtime stopped");
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Maximum concurrent jobs.
    pub size: usize,
    /// Jobs waiting for a permit.
    pub queued: usize,
    /// Jobs currently running.
    pub in_flight: usize,
}

struct InFlightGuard(Arc<Counters>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl WorkerPool {
    /// Starts `size` worker threads and the dispatch loop that feeds them.
    ///
    /// # Errors
    /// Returns error if the worker runtime cannot be started.
    pub fn new(size: usize) -> CacheResult<Self> {
        let size = size.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(size)
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|e| CacheError::configuration(format!("Failed to start worker pool: {e}")))?;

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let semaphore = Arc::new(Semaphore::new(size));

        runtime.spawn(Self::run_dispatch_loop(
            job_rx,
            semaphore,
            Arc::clone(&counters),
        ));
        debug!(size, "Started image worker pool");

        Ok(Self {
            job_tx,
            size,
            counters,
            _runtime: Arc::new(PoolRuntime(Some(runtime))),
        })
    }

    async fn run_dispatch_loop(
        mut job_rx: mpsc::UnboundedReceiver<Job>,
        semaphore: Arc<Semaphore>,
        counters: Arc<Counters>,
    ) {
        while let Some(job) = job_rx.recv().await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            counters.queued.fetch_sub(1, Ordering::Relaxed);
            counters.in_flight.fetch_add(1, Ordering::Relaxed);
            let guard = InFlightGuard(Arc::clone(&counters));

            tokio::spawn(async move {
                job.await;
                drop(guard);
                drop(permit);
            });
        }
        trace!("Image worker pool shut down");
    }

    /// Queues `job` for execution.
    ///
    /// # Errors
    /// Returns error if the dispatch loop has stopped.
    pub fn submit<F>(&self, job: F) -> CacheResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        self.job_tx.send(Box::pin(job)).map_err(|_| {
            self.counters.queued.fetch_sub(1, Ordering::Relaxed);
            CacheError::configuration("Worker pool is shut down")
        })
    }

    /// Maximum number of concurrent jobs.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns current occupancy.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            queued: self.counters.queued.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
        }
    }
}
