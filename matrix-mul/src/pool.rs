//! Process-wide pool of compute workers.
//!
//! The pool hands out at most `size` workers at a time. Acquisition parks the
//! caller on a [`Notify`] until a worker is released or the pool grows; there
//! is no polling interval.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::ValidationError;
use crate::worker::{DotProduct, Kernel, Worker};

/// A fixed-size, resizable set of reusable workers.
///
/// Cloning a `WorkerPool` yields another handle to the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Notify,
    kernel: Arc<dyn Kernel>,
}

struct PoolState {
    /// Idle workers; none of them is executing a task.
    free: Vec<Arc<Worker>>,
    /// Configured size.
    target: usize,
    /// Workers currently held by a [`WorkerHandle`].
    in_flight: usize,
    next_id: usize,
}

impl WorkerPool {
    /// Creates a pool of `size` workers running the plain dot product.
    pub fn new(size: usize) -> Result<Self, ValidationError> {
        Self::with_kernel(size, Arc::new(DotProduct))
    }

    /// Creates a pool whose workers run `kernel`.
    pub fn with_kernel(size: usize, kernel: Arc<dyn Kernel>) -> Result<Self, ValidationError> {
        check_size(size)?;

        let free = (0..size)
            .map(|id| Arc::new(Worker::new(id, Arc::clone(&kernel))))
            .collect();

        Ok(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    free,
                    target: size,
                    in_flight: 0,
                    next_id: size,
                }),
                available: Notify::new(),
                kernel,
            }),
        })
    }

    /// Sets the configured size and returns the previous one.
    ///
    /// Workers already acquired keep running; a shrink takes effect as they
    /// are released. Zero is rejected: a pool of size zero would park every
    /// caller of [`acquire`](Self::acquire) forever.
    pub fn resize(&self, size: usize) -> Result<usize, ValidationError> {
        check_size(size)?;

        let previous = {
            let mut state = self.shared.lock();
            let previous = state.target;
            state.target = size;
            let keep = size.saturating_sub(state.in_flight);
            state.free.truncate(keep);
            previous
        };

        info!(previous, size, "Number of workers updated");
        if size > previous {
            self.shared.available.notify_waiters();
        }
        Ok(previous)
    }

    /// Waits until a worker is free, then takes it out of the free set.
    ///
    /// Never fails; only delays. Dropping the returned handle releases the
    /// worker.
    pub async fn acquire(&self) -> WorkerHandle {
        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(worker) = self.shared.try_take() {
                return WorkerHandle {
                    worker,
                    pool: Arc::clone(&self.shared),
                    retired: false,
                };
            }
            notified.await;
        }
    }

    /// Returns a worker to the pool. Equivalent to dropping the handle.
    pub fn release(&self, handle: WorkerHandle) {
        drop(handle);
    }

    /// Configured size.
    pub fn size(&self) -> usize {
        self.shared.lock().target
    }

    /// Workers currently acquired.
    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    /// How many more workers could be acquired right now without waiting.
    pub fn available(&self) -> usize {
        let state = self.shared.lock();
        state.target.saturating_sub(state.in_flight)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("WorkerPool")
            .field("size", &state.target)
            .field("in_flight", &state.in_flight)
            .field("idle", &state.free.len())
            .finish()
    }
}

fn check_size(size: usize) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError::InvalidWorkerCount(0));
    }
    Ok(())
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_take(&self) -> Option<Arc<Worker>> {
        let mut state = self.lock();
        if state.in_flight >= state.target {
            return None;
        }

        let worker = match state.free.pop() {
            Some(worker) => worker,
            None => {
                let id = state.next_id;
                state.next_id += 1;
                debug!(worker = id, "Spawning worker");
                Arc::new(Worker::new(id, Arc::clone(&self.kernel)))
            }
        };
        state.in_flight += 1;
        Some(worker)
    }

    fn put_back(&self, worker: Arc<Worker>) {
        {
            let mut state = self.lock();
            state.in_flight -= 1;
            if state.free.len() + state.in_flight < state.target {
                state.free.push(worker);
            } else {
                debug!(worker = worker.id(), "Retiring worker after shrink");
            }
        }
        self.available.notify_one();
    }

    fn forget(&self, worker: usize) {
        {
            let mut state = self.lock();
            state.in_flight -= 1;
        }
        debug!(worker, "Dropped claim on busy worker");
        self.available.notify_one();
    }
}

/// Exclusive claim on one worker. Dropping it releases the worker.
pub struct WorkerHandle {
    worker: Arc<Worker>,
    pool: Arc<PoolShared>,
    retired: bool,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.worker.id()
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn compute(&self, x: &[f64], y: &[f64]) -> Result<f64, crate::Error> {
        self.worker.compute(x, y)
    }

    /// Returns the worker to its pool and wakes one waiter.
    pub fn release(self) {
        drop(self);
    }

    /// Gives up the claim without putting the worker back in the free set.
    ///
    /// Used when the worker turned out to be busy: whoever is running it
    /// still holds a handle and will return it.
    pub fn retire(mut self) {
        self.retired = true;
    }

    /// A second claim on the same worker, as a faulty pool would hand out.
    #[cfg(test)]
    pub(crate) fn duplicate(&self) -> WorkerHandle {
        self.pool.lock().in_flight += 1;
        WorkerHandle {
            worker: Arc::clone(&self.worker),
            pool: Arc::clone(&self.pool),
            retired: false,
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.retired {
            self.pool.forget(self.worker.id());
        } else {
            self.pool.put_back(Arc::clone(&self.worker));
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WorkerHandle").field(&self.worker.id()).finish()
    }
}
