//! Error types for matrix-mul operations.

use thiserror::Error;

/// Rejections raised before any cell is dispatched.
///
/// A request that fails validation leaves the pool and every result buffer
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("matrix {operand} is not rectangular: row {row} has {found} values, expected {expected}")]
    RaggedRow {
        operand: &'static str,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("matrix dimension mismatch: A is {a_rows}x{a_cols}, B is {b_rows}x{b_cols}")]
    DimensionMismatch {
        a_rows: usize,
        a_cols: usize,
        b_rows: usize,
        b_cols: usize,
    },

    #[error("worker count must be a positive integer, got {0}")]
    InvalidWorkerCount(i64),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("worker {worker} is already executing a task")]
    WorkerBusy { worker: usize },

    #[error("operand length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("cell ({row}, {col}) failed: {source}")]
    CellFailed {
        row: usize,
        col: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("cell ({row}, {col}) was written twice")]
    CellRewritten { row: usize, col: usize },

    #[error("worker task panicked: {0}")]
    TaskPanicked(String),

    #[error("request cancelled after issuing {issued} of {total} cells")]
    Cancelled { issued: usize, total: usize },
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskPanicked(err.to_string())
    }
}
