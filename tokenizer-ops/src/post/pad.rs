use displaydoc::Display;
use num_traits::Num;
use thiserror::Error;

use crate::tensor::RaggedTensor;

/// The potential errors of dense packing.
#[derive(Debug, Display, Error)]
pub enum PadError {
    /// Target row width {0} is negative
    TargetDim(i32),
    /// Produced {produced} elements for a {rows} x {cols} output
    Internal {
        produced: usize,
        rows: usize,
        cols: usize,
    },
}

/// A dense row-major matrix with a validity mask.
///
/// `mask` is `true` over copied elements and `false` over padding.
#[cfg_attr(test, derive(Debug))]
pub struct DenseMatrix<T> {
    pub(crate) data: Vec<T>,
    pub(crate) mask: Vec<bool>,
    pub(crate) rows: usize,
    pub(crate) cols: usize,
}

impl<T> DenseMatrix<T> {
    /// The elements, row-major.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// The validity mask, row-major.
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// The row count.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The row width.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns row `i` of the elements.
    ///
    /// # Panics
    /// Panics if `i` is out of bounds.
    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

/// Packs a ragged tensor into a dense matrix of fixed row width.
///
/// Short rows are padded with the default value, long rows silently
/// truncated; the mask marks the copied region of every row.
pub struct RaggedToDense<T> {
    target_dim: i32,
    default: T,
}

impl<T> RaggedToDense<T>
where
    T: Num + Copy,
{
    /// Creates the packer with the given row width and padding value.
    pub fn new(target_dim: i32, default: T) -> Self {
        Self {
            target_dim,
            default,
        }
    }

    /// Packs the batch.
    ///
    /// # Errors
    /// Fails on a negative target width or a post-condition size mismatch.
    pub fn evaluate(&self, input: &RaggedTensor<T>) -> Result<DenseMatrix<T>, PadError> {
        if self.target_dim < 0 {
            return Err(PadError::TargetDim(self.target_dim));
        }
        let cols = self.target_dim as usize;
        let rows = input.rows();

        let mut data = Vec::with_capacity(rows * cols);
        let mut mask = Vec::with_capacity(rows * cols);
        for row in input.iter() {
            let copied = row.len().min(cols);
            data.extend_from_slice(&row[..copied]);
            data.resize(data.len() + cols - copied, self.default);
            mask.resize(mask.len() + copied, true);
            mask.resize(mask.len() + cols - copied, false);
        }

        if data.len() != rows * cols || mask.len() != rows * cols {
            return Err(PadError::Internal {
                produced: data.len(),
                rows,
                cols,
            });
        }
        Ok(DenseMatrix {
            data,
            mask,
            rows,
            cols,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_and_mask() {
        let ragged =
            RaggedTensor::new(vec![0, 3], vec![3, 5], vec![7, 8, 9, 10, 11]).unwrap();
        let dense = RaggedToDense::new(4, 0).evaluate(&ragged).unwrap();
        assert_eq!(dense.rows(), 2);
        assert_eq!(dense.cols(), 4);
        assert_eq!(dense.row(0), [7, 8, 9, 0]);
        assert_eq!(dense.row(1), [10, 11, 0, 0]);
        assert_eq!(
            dense.mask(),
            [true, true, true, false, true, true, false, false],
        );
    }

    #[test]
    fn test_truncation_is_silent() {
        let ragged = RaggedTensor::from_rows(vec![vec![1, 2, 3, 4, 5]]);
        let dense = RaggedToDense::new(3, 0).evaluate(&ragged).unwrap();
        assert_eq!(dense.row(0), [1, 2, 3]);
        assert_eq!(dense.mask(), [true, true, true]);
    }

    #[test]
    fn test_zero_width() {
        let ragged = RaggedTensor::from_rows(vec![vec![1], vec![]]);
        let dense = RaggedToDense::new(0, 0).evaluate(&ragged).unwrap();
        assert_eq!(dense.rows(), 2);
        assert_eq!(dense.cols(), 0);
        assert!(dense.data().is_empty());
    }

    #[test]
    fn test_negative_width() {
        let ragged = RaggedTensor::from_rows(vec![vec![1]]);
        assert!(matches!(
            RaggedToDense::new(-1, 0).evaluate(&ragged),
            Err(PadError::TargetDim(-1)),
        ));
    }
}
