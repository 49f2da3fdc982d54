//! Shared output grid written once per cell.

use std::sync::{Mutex, PoisonError};

use crate::Error;
use crate::matrix::Matrix;

/// The `rows x cols` output of one multiply request.
///
/// Every cell accepts exactly one write; the grid has its own lock, separate
/// from the worker pool's.
#[derive(Debug)]
pub struct ResultMatrix {
    rows: usize,
    cols: usize,
    grid: Mutex<Grid>,
}

#[derive(Debug)]
struct Grid {
    values: Vec<f64>,
    written: Vec<bool>,
    filled: usize,
}

impl ResultMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            grid: Mutex::new(Grid {
                values: vec![0.0; rows * cols],
                written: vec![false; rows * cols],
                filled: 0,
            }),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Stores `value` at `(row, col)`.
    ///
    /// # Panics
    ///
    /// Panics if the cell is out of bounds.
    pub fn write(&self, row: usize, col: usize, value: f64) -> Result<(), Error> {
        assert!(row < self.rows && col < self.cols, "cell ({row}, {col}) out of bounds");
        let idx = row * self.cols + col;

        let mut grid = self.grid.lock().unwrap_or_else(PoisonError::into_inner);
        if grid.written[idx] {
            return Err(Error::CellRewritten { row, col });
        }
        grid.written[idx] = true;
        grid.values[idx] = value;
        grid.filled += 1;
        Ok(())
    }

    /// Number of cells written so far.
    pub fn filled(&self) -> usize {
        self.grid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .filled
    }

    /// Copies the grid out as a [`Matrix`]. Unwritten cells read as zero.
    pub fn to_matrix(&self) -> Matrix {
        let grid = self.grid.lock().unwrap_or_else(PoisonError::into_inner);
        Matrix::from_parts(self.rows, self.cols, grid.values.clone())
    }
}
