//! A single compute worker and the kernel it runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Error;

/// The per-cell computation a worker executes.
///
/// Implementations must be callable from many threads at once; the pool
/// guarantees only that one worker runs one call at a time.
pub trait Kernel: Send + Sync + 'static {
    fn dot(&self, x: &[f64], y: &[f64]) -> f64;
}

/// Plain dot product.
#[derive(Debug, Default, Clone, Copy)]
pub struct DotProduct;

impl Kernel for DotProduct {
    fn dot(&self, x: &[f64], y: &[f64]) -> f64 {
        x.iter().zip(y).map(|(a, b)| a * b).sum()
    }
}

/// A unit of compute that executes at most one task at a time.
pub struct Worker {
    id: usize,
    busy: AtomicBool,
    kernel: Arc<dyn Kernel>,
}

impl Worker {
    pub(crate) fn new(id: usize, kernel: Arc<dyn Kernel>) -> Self {
        Self {
            id,
            busy: AtomicBool::new(false),
            kernel,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Computes `x . y`.
    ///
    /// Returns [`Error::WorkerBusy`] if the worker is already executing a
    /// task, which means the pool handed the same worker out twice.
    pub fn compute(&self, x: &[f64], y: &[f64]) -> Result<f64, Error> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::WorkerBusy { worker: self.id });
        }
        let _busy = BusyGuard(&self.busy);

        if x.len() != y.len() {
            return Err(Error::LengthMismatch {
                left: x.len(),
                right: y.len(),
            });
        }
        Ok(self.kernel.dot(x, y))
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Clears the busy flag on every exit path, unwinding included.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
