//! Container for background action tasks.
//!
//! Each non-blocking request runs on its own thread; the pool tracks the
//! `(handle, done-flag)` pairs so completed entries can be reaped and so
//! shutdown can await every task. Tasks are never terminated forcibly: each
//! one owns file handles and mutex state that must be released cleanly.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, warn};

/// Tracing target for worker pool operations.
const POOL_TARGET: &str = "droverd::pool";

/// Errors raised by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The pool's bookkeeping lock was poisoned by a panicking holder.
    #[error("worker pool lock is poisoned")]
    Poisoned,
}

struct Worker {
    handle: JoinHandle<()>,
    done: Arc<AtomicBool>,
}

/// Pool of running background tasks.
#[derive(Default)]
pub struct WorkerPool {
    label: String,
    workers: Mutex<Vec<Worker>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates an empty pool with a label used for thread names and logs.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the task on its own thread and records it together with its
    /// done-flag. Completed entries are swept opportunistically.
    ///
    /// The task must set `done` to `true` as its final act, after all of
    /// its durable side-effects have completed.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] when the thread cannot be created and
    /// [`PoolError::Poisoned`] when the pool lock is poisoned.
    pub fn add<F>(&self, task: F, done: Arc<AtomicBool>) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(self.label.clone())
            .spawn(task)
            .map_err(|source| PoolError::Spawn { source })?;

        let mut workers = self.workers.lock().map_err(|_| PoolError::Poisoned)?;
        reap_completed(&self.label, &mut workers);
        workers.push(Worker { handle, done });
        Ok(())
    }

    /// Returns the number of entries whose done-flag is still unset.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.workers
            .lock()
            .map(|workers| {
                workers
                    .iter()
                    .filter(|worker| !worker.done.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Awaits every task in the pool. Called on shutdown; tasks are never
    /// forcibly terminated.
    pub fn drain(&self) {
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => {
                warn!(target: POOL_TARGET, label = %self.label, "pool lock poisoned during drain");
                return;
            }
        };

        let count = workers.len();
        for worker in workers {
            if worker.handle.join().is_err() {
                warn!(target: POOL_TARGET, label = %self.label, "worker thread panicked");
            }
        }
        if count > 0 {
            debug!(target: POOL_TARGET, label = %self.label, count, "drained worker pool");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.drain();
    }
}

fn reap_completed(label: &str, workers: &mut Vec<Worker>) {
    let mut index = 0;
    while index < workers.len() {
        if workers[index].done.load(Ordering::SeqCst) {
            let worker = workers.swap_remove(index);
            if worker.handle.join().is_err() {
                warn!(target: POOL_TARGET, label = %label, "worker thread panicked");
            }
        } else {
            index += 1;
        }
    }
}
