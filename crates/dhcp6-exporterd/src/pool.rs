//! Fixed-size worker pool driving one shared tokio runtime.
//!
//! `start` and `stop` are synchronous and block the calling thread until the
//! requested number of workers have reported running or exited. Work is
//! submitted as futures and always runs on a pool thread, never on the
//! submitter's.

use crate::error::{ExporterError, Result};
use futures::future::BoxFuture;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};

/// Default number of worker threads.
pub const DEFAULT_POOL_SIZE: usize = 4;

const START_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that can run detached futures.
pub trait Spawn: Send + Sync {
    /// Returns false if the future was not accepted.
    fn spawn_boxed(&self, fut: BoxFuture<'static, ()>) -> bool;
}

#[derive(Debug, Default)]
struct WorkerCounters {
    started: usize,
    stopped: usize,
}

impl WorkerCounters {
    fn alive(&self) -> usize {
        self.started.saturating_sub(self.stopped)
    }
}

#[derive(Default)]
struct Barrier {
    counters: Mutex<WorkerCounters>,
    changed: Condvar,
}

impl Barrier {
    fn record_start(&self) {
        self.counters.lock().started += 1;
        self.changed.notify_all();
    }

    fn record_stop(&self) {
        self.counters.lock().stopped += 1;
        self.changed.notify_all();
    }

    /// Waits until `pred` holds; returns false on timeout.
    fn wait_until<F>(&self, mut pred: F, timeout: Duration) -> bool
    where
        F: FnMut(&WorkerCounters) -> bool,
    {
        let mut guard = self.counters.lock();
        !self
            .changed
            .wait_while_for(&mut guard, |c| !pred(c), timeout)
            .timed_out()
    }
}

/// Worker pool lifecycle: Stopped -> Running -> Stopped.
///
/// Every start gets a fresh barrier, so threads of a runtime released in
/// the background never count against the next generation.
pub struct WorkerPool {
    size: usize,
    name: String,
    runtime: Mutex<Option<Runtime>>,
    barrier: Mutex<Arc<Barrier>>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            size: size.max(1),
            name: name.into(),
            runtime: Mutex::new(None),
            barrier: Mutex::new(Arc::new(Barrier::default())),
        }
    }

    /// A pool of `pool_size` workers, or a single worker when not
    /// multi-threaded.
    pub fn with_threading(name: impl Into<String>, multi_threaded: bool, pool_size: usize) -> Self {
        Self::new(name, if multi_threaded { pool_size } else { 1 })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Starts the workers and blocks until all of them are running.
    ///
    /// Starting a running pool is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.runtime.lock();
        if slot.is_some() {
            return Ok(());
        }

        let barrier = Arc::new(Barrier::default());
        *self.barrier.lock() = Arc::clone(&barrier);
        let on_start = Arc::clone(&barrier);
        let on_stop = Arc::clone(&barrier);

        let runtime = Builder::new_multi_thread()
            .worker_threads(self.size)
            .thread_name(format!("{}-worker", self.name))
            .enable_all()
            .on_thread_start(move || on_start.record_start())
            .on_thread_stop(move || on_stop.record_stop())
            .build()?;

        let size = self.size;
        if !barrier.wait_until(|c| c.alive() >= size, START_TIMEOUT) {
            warn!(pool = %self.name, size, "Timed out waiting for workers to start");
        }

        debug!(pool = %self.name, size, "Worker pool started");
        *slot = Some(runtime);
        Ok(())
    }

    /// Stops the runtime and blocks until every worker has exited.
    ///
    /// Called from inside an async context the runtime is released in the
    /// background instead, since blocking there would deadlock.
    pub fn stop(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        let barrier = self.barrier.lock().clone();

        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
            debug!(pool = %self.name, "Worker pool released in background");
            return;
        }

        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        if !barrier.wait_until(|c| c.alive() == 0, SHUTDOWN_TIMEOUT) {
            warn!(pool = %self.name, "Timed out waiting for workers to exit");
        }
        debug!(pool = %self.name, "Worker pool stopped");
    }

    /// Submits a future to run on the pool.
    pub fn spawn<F>(&self, fut: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.runtime.lock().as_ref() {
            Some(rt) => {
                rt.spawn(fut);
                Ok(())
            }
            None => Err(ExporterError::PoolStopped),
        }
    }
}

impl Spawn for WorkerPool {
    fn spawn_boxed(&self, fut: BoxFuture<'static, ()>) -> bool {
        self.spawn(fut).is_ok()
    }
}

impl Spawn for Handle {
    fn spawn_boxed(&self, fut: BoxFuture<'static, ()>) -> bool {
        self.spawn(fut);
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
