//! Per-cell dispatch of a matrix product across the worker pool.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::barrier::CompletionBarrier;
use crate::matrix::{Matrix, product_shape};
use crate::pool::{WorkerHandle, WorkerPool};
use crate::result::ResultMatrix;
use crate::Error;

/// Multiplies matrices by issuing one dot-product task per output cell.
///
/// The dispatch loop only waits for a free worker; each cell then runs on
/// its own task, writes its value into the shared [`ResultMatrix`], releases
/// its worker and arrives at the request's [`CompletionBarrier`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: WorkerPool,
}

/// One output cell and the operands it needs. Owned by exactly one worker.
#[derive(Clone)]
struct CellTask {
    row: usize,
    col: usize,
    lhs: Arc<Matrix>,
    /// `B` transposed, so column `col` of `B` is a contiguous row.
    rhs_t: Arc<Matrix>,
}

impl CellTask {
    fn operands(&self) -> (&[f64], &[f64]) {
        (self.lhs.row(self.row), self.rhs_t.row(self.col))
    }
}

/// Per-request state shared by the cell tasks.
struct Request {
    output: ResultMatrix,
    barrier: CompletionBarrier,
    failure: Mutex<Option<Error>>,
}

impl Request {
    fn fail(&self, err: Error) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    fn take_failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Dispatcher {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Computes `a x b`.
    pub async fn run(&self, a: &Matrix, b: &Matrix) -> Result<Matrix, Error> {
        self.run_until_cancelled(a, b, &CancellationToken::new())
            .await
    }

    /// Computes `a x b`, stopping issuance when `cancel` fires.
    ///
    /// On cancellation the cells already issued are allowed to finish before
    /// [`Error::Cancelled`] is returned, so no worker is left acquired.
    pub async fn run_until_cancelled(
        &self,
        a: &Matrix,
        b: &Matrix,
        cancel: &CancellationToken,
    ) -> Result<Matrix, Error> {
        let (rows, cols) = product_shape(a, b)?;
        let total = rows * cols;
        if total == 0 {
            debug!(rows, cols, "Empty product, nothing to dispatch");
            return Ok(Matrix::zeros(rows, cols));
        }

        debug!(rows, cols, inner = a.cols(), "Dispatching cells");
        let lhs = Arc::new(a.clone());
        let rhs_t = Arc::new(b.transpose());
        let request = Arc::new(Request {
            output: ResultMatrix::new(rows, cols),
            barrier: CompletionBarrier::new(total),
            failure: Mutex::new(None),
        });

        let mut issued = 0;
        'cells: for row in 0..rows {
            for col in 0..cols {
                let handle = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'cells,
                    handle = self.pool.acquire() => handle,
                };

                let task = CellTask {
                    row,
                    col,
                    lhs: Arc::clone(&lhs),
                    rhs_t: Arc::clone(&rhs_t),
                };
                tokio::spawn(run_cell(
                    self.pool.clone(),
                    handle,
                    task,
                    Arc::clone(&request),
                ));
                issued += 1;
            }
        }

        if issued < total {
            request.barrier.arrive_many(total - issued);
        }
        request.barrier.wait().await;

        if issued < total {
            warn!(issued, total, "Multiply cancelled");
            return Err(Error::Cancelled { issued, total });
        }
        if let Some(err) = request.take_failure() {
            return Err(err);
        }

        debug!(rows, cols, "All cells complete");
        Ok(request.output.to_matrix())
    }
}

async fn run_cell(pool: WorkerPool, handle: WorkerHandle, task: CellTask, request: Arc<Request>) {
    let (row, col) = (task.row, task.col);

    let outcome = match execute(handle, task.clone(), Arc::clone(&request)).await {
        Err(Error::WorkerBusy { worker }) => {
            warn!(row, col, worker, "Acquired worker reported busy, retrying cell");
            let handle = pool.acquire().await;
            execute(handle, task, Arc::clone(&request)).await
        }
        other => other,
    };

    if let Err(err) = outcome {
        error!(row, col, error = %err, "Cell failed");
        request.fail(Error::CellFailed {
            row,
            col,
            source: Box::new(err),
        });
    }
    request.barrier.arrive();
}

/// Runs the cell on `handle`'s worker off the async executor, stores the
/// value and releases the worker.
async fn execute(handle: WorkerHandle, task: CellTask, request: Arc<Request>) -> Result<(), Error> {
    tokio::task::spawn_blocking(move || {
        let (x, y) = task.operands();
        match handle.compute(x, y) {
            Ok(value) => {
                let written = request.output.write(task.row, task.col, value);
                handle.release();
                written
            }
            Err(err @ Error::WorkerBusy { .. }) => {
                handle.retire();
                Err(err)
            }
            Err(err) => {
                handle.release();
                Err(err)
            }
        }
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use rand::Rng;

    use crate::error::ValidationError;
    use crate::worker::{DotProduct, Kernel};

    fn matrix(rows: Vec<Vec<f64>>) -> Matrix {
        Matrix::from_rows("test", rows).unwrap()
    }

    fn reference(a: &Matrix, b: &Matrix) -> Matrix {
        let mut out = vec![vec![0.0; b.cols()]; a.rows()];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                for k in 0..a.cols() {
                    *cell += a.get(i, k).unwrap() * b.get(k, j).unwrap();
                }
            }
        }
        Matrix::from_rows("reference", out).unwrap()
    }

    fn random_matrix(rng: &mut impl Rng, rows: usize, cols: usize) -> Matrix {
        let rows = (0..rows)
            .map(|_| (0..cols).map(|_| rng.gen_range(-9..=9) as f64).collect())
            .collect();
        matrix(rows)
    }

    /// Counts calls and tracks the peak number running at once.
    #[derive(Default)]
    struct Probe {
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl Probe {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    impl Kernel for Probe {
        fn dot(&self, x: &[f64], y: &[f64]) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            DotProduct.dot(x, y)
        }
    }

    fn dispatcher_with(size: usize, kernel: Arc<dyn Kernel>) -> Dispatcher {
        Dispatcher::new(WorkerPool::with_kernel(size, kernel).unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn multiplies_known_example() {
        let dispatcher = Dispatcher::new(WorkerPool::new(5).unwrap());
        let a = matrix(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let b = matrix(vec![vec![7.0, 8.0], vec![9.0, 10.0], vec![11.0, 12.0]]);

        let c = dispatcher.run(&a, &b).await.unwrap();
        assert_eq!(c.to_rows(), vec![vec![58.0, 64.0], vec![139.0, 154.0]]);
    }

    #[tokio::test]
    async fn incompatible_dimensions_issue_no_tasks() {
        let probe = Arc::new(Probe::default());
        let dispatcher = dispatcher_with(2, probe.clone());
        let a = matrix(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let b = matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let err = dispatcher.run(&a, &b).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DimensionMismatch { .. })
        ));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pool().in_flight(), 0);
    }

    #[tokio::test]
    async fn empty_operands_return_without_acquiring() {
        let dispatcher = Dispatcher::new(WorkerPool::new(1).unwrap());
        // Hold the only worker: any acquisition would hang the test.
        let _held = dispatcher.pool().acquire().await;

        let no_rows = matrix(vec![]);
        let b = matrix(vec![vec![1.0, 2.0]]);
        let c = dispatcher.run(&no_rows, &b).await.unwrap();
        assert_eq!(c.shape(), (0, 2));

        let a = matrix(vec![vec![1.0], vec![2.0]]);
        let no_cols = matrix(vec![vec![]]);
        let c = dispatcher.run(&a, &no_cols).await.unwrap();
        assert_eq!(c.shape(), (2, 0));
        assert!(c.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_cell_computed_exactly_once() {
        let mut rng = rand::thread_rng();
        for _ in 0..5 {
            let (n, k, m) = (rng.gen_range(1..8), rng.gen_range(1..8), rng.gen_range(1..8));
            let a = random_matrix(&mut rng, n, k);
            let b = random_matrix(&mut rng, k, m);

            let probe = Arc::new(Probe::default());
            let dispatcher = dispatcher_with(3, probe.clone());
            let c = dispatcher.run(&a, &b).await.unwrap();

            assert_eq!(c, reference(&a, &b));
            assert_eq!(probe.calls.load(Ordering::SeqCst), n * m);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_pool_size() {
        let probe = Arc::new(Probe::slow(Duration::from_millis(2)));
        let dispatcher = dispatcher_with(3, probe.clone());
        let mut rng = rand::thread_rng();
        let a = random_matrix(&mut rng, 6, 4);
        let b = random_matrix(&mut rng, 4, 6);

        let c = dispatcher.run(&a, &b).await.unwrap();
        assert_eq!(c, reference(&a, &b));
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn repeated_requests_are_identical_and_leak_nothing() {
        let dispatcher = Dispatcher::new(WorkerPool::new(4).unwrap());
        let baseline = dispatcher.pool().available();
        let mut rng = rand::thread_rng();
        let a = random_matrix(&mut rng, 5, 3);
        let b = random_matrix(&mut rng, 3, 4);

        let first = dispatcher.run(&a, &b).await.unwrap();
        assert_eq!(dispatcher.pool().available(), baseline);
        let second = dispatcher.run(&a, &b).await.unwrap();
        assert_eq!(dispatcher.pool().available(), baseline);
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resize_during_multiply_applies_to_later_cells() {
        let probe = Arc::new(Probe::slow(Duration::from_millis(5)));
        let dispatcher = dispatcher_with(1, probe.clone());
        let mut rng = rand::thread_rng();
        let a = random_matrix(&mut rng, 4, 3);
        let b = random_matrix(&mut rng, 3, 4);

        let running = {
            let dispatcher = dispatcher.clone();
            let (a, b) = (a.clone(), b.clone());
            tokio::spawn(async move { dispatcher.run(&a, &b).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dispatcher.pool().resize(4).unwrap(), 1);

        let c = running.await.unwrap().unwrap();
        assert_eq!(c, reference(&a, &b));
        assert!(probe.peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(dispatcher.pool().available(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancellation_drains_in_flight_cells() {
        let probe = Arc::new(Probe::slow(Duration::from_millis(5)));
        let dispatcher = dispatcher_with(1, probe.clone());
        let mut rng = rand::thread_rng();
        let a = random_matrix(&mut rng, 8, 2);
        let b = random_matrix(&mut rng, 2, 8);

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(15)).await;
                cancel.cancel();
            });
        }

        let (issued, total) = match dispatcher.run_until_cancelled(&a, &b, &cancel).await {
            Err(Error::Cancelled { issued, total }) => (issued, total),
            other => panic!("expected cancellation, got {other:?}"),
        };
        assert_eq!(total, 64);
        assert!(issued < total);
        assert_eq!(probe.calls.load(Ordering::SeqCst), issued);
        assert_eq!(dispatcher.pool().in_flight(), 0);
    }

    struct PanicOn(f64);

    impl Kernel for PanicOn {
        fn dot(&self, x: &[f64], y: &[f64]) -> f64 {
            if x.contains(&self.0) {
                panic!("poisoned operand");
            }
            DotProduct.dot(x, y)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_request_leaves_pool_usable() {
        let dispatcher = dispatcher_with(2, Arc::new(PanicOn(13.0)));
        let bad = matrix(vec![vec![1.0, 13.0], vec![2.0, 3.0]]);
        let b = matrix(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        match dispatcher.run(&bad, &b).await {
            Err(Error::CellFailed { row, source, .. }) => {
                assert_eq!(row, 0);
                assert!(matches!(*source, Error::TaskPanicked(_)));
            }
            other => panic!("expected a failed cell, got {other:?}"),
        }
        assert_eq!(dispatcher.pool().available(), 2);

        let good = matrix(vec![vec![1.0, 2.0], vec![2.0, 3.0]]);
        let c = dispatcher.run(&good, &b).await.unwrap();
        assert_eq!(c, good);
    }

    /// Blocks inside its first call until released.
    struct GateOnce {
        first: AtomicBool,
        entered: Barrier,
        leave: Barrier,
    }

    impl Kernel for GateOnce {
        fn dot(&self, x: &[f64], y: &[f64]) -> f64 {
            if self.first.swap(false, Ordering::SeqCst) {
                self.entered.wait();
                self.leave.wait();
            }
            DotProduct.dot(x, y)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn busy_worker_cell_is_retried_on_another_worker() {
        let kernel = Arc::new(GateOnce {
            first: AtomicBool::new(true),
            entered: Barrier::new(2),
            leave: Barrier::new(2),
        });
        let pool = WorkerPool::with_kernel(2, kernel.clone()).unwrap();

        let held = pool.acquire().await;
        let duplicate = held.duplicate();
        let busy_id = held.id();
        let running = thread::spawn(move || held.compute(&[2.0], &[3.0]));
        kernel.entered.wait();

        let request = Arc::new(Request {
            output: ResultMatrix::new(1, 1),
            barrier: CompletionBarrier::new(1),
            failure: Mutex::new(None),
        });
        let task = CellTask {
            row: 0,
            col: 0,
            lhs: Arc::new(matrix(vec![vec![4.0, 5.0]])),
            rhs_t: Arc::new(matrix(vec![vec![1.0, 2.0]])),
        };
        run_cell(pool.clone(), duplicate, task, Arc::clone(&request)).await;

        assert!(request.barrier.is_released());
        assert!(request.take_failure().is_none());
        assert_eq!(request.output.to_matrix().get(0, 0), Some(14.0));

        kernel.leave.wait();
        assert_eq!(running.join().unwrap().unwrap(), 6.0);
        assert_eq!(pool.available(), 2);

        // The busy worker went back to the free set only once.
        let a = pool.acquire().await;
        let b = pool.acquire().await;
        assert_ne!(a.id(), b.id());
        assert!(a.id() == busy_id || b.id() == busy_id);
    }
}
