//! Shared read-only numeric buffers.
//!
//! Stimulus arrays, cached model tables, and nuisance regressors are built
//! once by the orchestrating thread and then observed by every worker in the
//! pool. Wrapping the storage in `Arc<[f64]>` makes a clone a pointer copy:
//! all clones observe the identical underlying memory, and no write path
//! exists after construction.

use std::sync::Arc;

use crate::error::{Error, Result};

/// An immutable 1-D array cheaply shareable across workers.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedBuffer {
    data: Arc<[f64]>,
}

impl SharedBuffer {
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<f64>> for SharedBuffer {
    fn from(values: Vec<f64>) -> Self {
        Self { data: values.into() }
    }
}

impl std::ops::Deref for SharedBuffer {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.data
    }
}

/// An immutable row-major 2-D array cheaply shareable across workers.
///
/// Used for the stimulus (pixels x timepoints) and for cached model tables
/// (entries x samples / entries x parameters).
#[derive(Clone, Debug, PartialEq)]
pub struct SharedMatrix {
    data: Arc<[f64]>,
    rows: usize,
    cols: usize,
}

impl SharedMatrix {
    pub fn new(values: Vec<f64>, rows: usize, cols: usize) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(Error::Data(format!(
                "Matrix storage length {} does not match {rows}x{cols}.",
                values.len()
            )));
        }
        Ok(Self { data: values.into(), rows, cols })
    }

    /// Build from a list of equal-length rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != n_cols) {
            return Err(Error::Data("Matrix rows have unequal lengths.".to_string()));
        }
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for row in rows {
            data.extend_from_slice(row);
        }
        Self::new(data, rows.len(), n_cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let off = i * self.cols;
        &self.data[off..off + self.cols]
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_storage() {
        let buf = SharedBuffer::from(vec![1.0, 2.0, 3.0]);
        let other = buf.clone();
        assert!(std::ptr::eq(buf.as_slice().as_ptr(), other.as_slice().as_ptr()));
    }

    #[test]
    fn matrix_rejects_bad_shape() {
        assert!(SharedMatrix::new(vec![1.0, 2.0, 3.0], 2, 2).is_err());
    }

    #[test]
    fn matrix_row_access() {
        let m = SharedMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.get(0, 1), 2.0);
    }

    #[test]
    fn matrix_from_rows_rejects_ragged_input() {
        let err = SharedMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]);
        assert!(err.is_err());
    }
}
