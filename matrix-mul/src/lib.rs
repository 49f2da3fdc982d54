//! Matrix multiplication on a pool of compute workers.
//!
//! `matrix-mul` computes C = A × B by splitting the output into cells and
//! running one dot-product task per cell on a shared, resizable
//! [`WorkerPool`]. The [`Dispatcher`] only waits for free workers; cells run
//! concurrently, each writing its value once into a per-request result grid
//! and arriving at a completion barrier that releases the caller when the
//! last cell is in.
//!
//! # Concurrency
//!
//! - At most `size` cells run at once, where `size` is the pool's configured
//!   size at the moment each cell acquires its worker.
//! - Worker handoff and result writes use two independent locks.
//! - A worker that reports busy is treated as a pool defect: the cell is
//!   retried once on another worker and the failure is logged.
//!
//! # Example
//!
//! ```no_run
//! use matrix_mul::{Dispatcher, Matrix, WorkerPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new(WorkerPool::new(5)?);
//!
//!     let a = Matrix::from_rows("A", vec![vec![1.0, 2.0], vec![3.0, 4.0]])?;
//!     let b = Matrix::from_rows("B", vec![vec![5.0, 6.0], vec![7.0, 8.0]])?;
//!
//!     let c = dispatcher.run(&a, &b).await?;
//!     assert_eq!(c.to_rows(), vec![vec![19.0, 22.0], vec![43.0, 50.0]]);
//!
//!     Ok(())
//! }
//! ```

mod barrier;
mod dispatcher;
mod error;
mod matrix;
mod pool;
mod result;
mod worker;

pub use barrier::CompletionBarrier;
pub use dispatcher::Dispatcher;
pub use error::{Error, ValidationError};
pub use matrix::{Matrix, product_shape};
pub use pool::{WorkerHandle, WorkerPool};
pub use result::ResultMatrix;
pub use worker::{DotProduct, Kernel, Worker};
