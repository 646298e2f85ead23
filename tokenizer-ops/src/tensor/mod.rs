//! Decomposed string and ragged tensor representations.
//!
//! Strings are stored as parallel `(begins, ends)` index arrays over one
//! shared byte buffer, ragged collections as half-open row ranges over a
//! flat element buffer. The byte buffer may contain gaps between adjacent
//! strings; no operator relies on their absence.

pub mod ragged;
pub mod string;

use displaydoc::Display;
use thiserror::Error;

pub use self::{
    ragged::{RaggedStringTensor, RaggedTensor},
    string::StringTensor,
};

/// The potential errors of the tensor representations.
#[derive(Debug, Display, Error)]
pub enum TensorError {
    /// String range #{index} ({begin}..{end}) is decreasing or exceeds the byte buffer ({len} bytes)
    StringRange {
        index: usize,
        begin: i32,
        end: i32,
        len: usize,
    },
    /// Row range #{index} ({begin}..{end}) is decreasing or exceeds the element count ({len})
    RowRange {
        index: usize,
        begin: i32,
        end: i32,
        len: usize,
    },
    /// Parallel index arrays differ in length ({begins} begins vs {ends} ends)
    ParallelLength { begins: usize, ends: usize },
    /// Collection exceeds the addressable i32 range
    LengthOverflow,
}

pub(crate) fn check_ranges(
    begins: &[i32],
    ends: &[i32],
    len: usize,
    row: bool,
) -> Result<(), TensorError> {
    if begins.len() != ends.len() {
        return Err(TensorError::ParallelLength {
            begins: begins.len(),
            ends: ends.len(),
        });
    }
    for (index, (&begin, &end)) in begins.iter().zip(ends).enumerate() {
        if begin < 0 || end < begin || end as usize > len {
            return Err(if row {
                TensorError::RowRange {
                    index,
                    begin,
                    end,
                    len,
                }
            } else {
                TensorError::StringRange {
                    index,
                    begin,
                    end,
                    len,
                }
            });
        }
    }
    Ok(())
}
