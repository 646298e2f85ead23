use std::ops::Range;

use crate::tensor::{check_ranges, string::StringTensor, TensorError};

/// A ragged tensor: rows of variable length over a flat element buffer.
///
/// Row `j` covers `elems[rag_begins[j]..rag_ends[j]]`. Rows may overlap or
/// leave gaps in the buffer; only the ranges matter.
#[derive(Clone)]
#[cfg_attr(test, derive(Debug))]
pub struct RaggedTensor<T> {
    pub(crate) rag_begins: Vec<i32>,
    pub(crate) rag_ends: Vec<i32>,
    pub(crate) elems: Vec<T>,
}

impl<T> RaggedTensor<T> {
    /// Creates a ragged tensor from its parts.
    ///
    /// # Errors
    /// Fails if the row ranges are inconsistent with the element buffer.
    pub fn new(rag_begins: Vec<i32>, rag_ends: Vec<i32>, elems: Vec<T>) -> Result<Self, TensorError> {
        check_ranges(&rag_begins, &rag_ends, elems.len(), true)?;
        Ok(Self {
            rag_begins,
            rag_ends,
            elems,
        })
    }

    /// Creates a ragged tensor from materialized rows, laid out gap-free.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoIterator<Item = T>,
    {
        let mut rag_begins = Vec::new();
        let mut rag_ends = Vec::new();
        let mut elems = Vec::new();
        for row in rows {
            rag_begins.push(elems.len() as i32);
            elems.extend(row);
            rag_ends.push(elems.len() as i32);
        }
        Self {
            rag_begins,
            rag_ends,
            elems,
        }
    }

    /// Returns the number of rows.
    pub fn rows(&self) -> usize {
        self.rag_begins.len()
    }

    /// Returns the elements of row `j`.
    ///
    /// # Panics
    /// Panics if `j` is out of bounds.
    pub fn row(&self, j: usize) -> &[T] {
        &self.elems[self.rag_begins[j] as usize..self.rag_ends[j] as usize]
    }

    /// Iterates over the rows as element slices.
    pub fn iter(&self) -> impl Iterator<Item = &[T]> {
        self.rag_begins
            .iter()
            .zip(&self.rag_ends)
            .map(move |(&begin, &end)| &self.elems[begin as usize..end as usize])
    }

    /// The row begin indices.
    pub fn rag_begins(&self) -> &[i32] {
        &self.rag_begins
    }

    /// The row end indices.
    pub fn rag_ends(&self) -> &[i32] {
        &self.rag_ends
    }

    /// The flat element buffer.
    pub fn elems(&self) -> &[T] {
        &self.elems
    }
}

/// A batch of string lists: ragged row ranges over a [`StringTensor`].
///
/// Row `j` holds the strings `rag_begins[j]..rag_ends[j]` of the underlying
/// flat string collection.
#[derive(Clone)]
#[cfg_attr(test, derive(Debug))]
pub struct RaggedStringTensor {
    pub(crate) rag_begins: Vec<i32>,
    pub(crate) rag_ends: Vec<i32>,
    pub(crate) strings: StringTensor,
}

impl RaggedStringTensor {
    /// Creates a ragged string tensor from its parts.
    ///
    /// # Errors
    /// Fails if the row ranges are inconsistent with the string count.
    pub fn new(
        rag_begins: Vec<i32>,
        rag_ends: Vec<i32>,
        strings: StringTensor,
    ) -> Result<Self, TensorError> {
        check_ranges(&rag_begins, &rag_ends, strings.len(), true)?;
        Ok(Self {
            rag_begins,
            rag_ends,
            strings,
        })
    }

    /// Returns the number of rows.
    pub fn rows(&self) -> usize {
        self.rag_begins.len()
    }

    /// Returns the flat string indices covered by row `j`.
    ///
    /// # Panics
    /// Panics if `j` is out of bounds.
    pub fn row_range(&self, j: usize) -> Range<usize> {
        self.rag_begins[j] as usize..self.rag_ends[j] as usize
    }

    /// Iterates over the byte slices of the strings in row `j`.
    pub fn row(&self, j: usize) -> impl Iterator<Item = &[u8]> {
        self.row_range(j).map(move |word| self.strings.bytes(word))
    }

    /// The row begin indices.
    pub fn rag_begins(&self) -> &[i32] {
        &self.rag_begins
    }

    /// The row end indices.
    pub fn rag_ends(&self) -> &[i32] {
        &self.rag_ends
    }

    /// The underlying flat string collection.
    pub fn strings(&self) -> &StringTensor {
        &self.strings
    }
}

/// Promotes a flat string batch to a ragged one with one string per row.
impl From<StringTensor> for RaggedStringTensor {
    fn from(strings: StringTensor) -> Self {
        let rag_begins = (0..strings.len() as i32).collect();
        let rag_ends = (1..=strings.len() as i32).collect();
        Self {
            rag_begins,
            rag_ends,
            strings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows() {
        let ragged = RaggedTensor::from_rows(vec![vec![7, 8, 9], vec![], vec![10]]);
        assert_eq!(ragged.rows(), 3);
        assert_eq!(ragged.row(0), [7, 8, 9]);
        assert_eq!(ragged.row(1), [] as [i32; 0]);
        assert_eq!(ragged.row(2), [10]);
        assert_eq!(ragged.elems(), [7, 8, 9, 10]);
    }

    #[test]
    fn test_rejects_bad_rows() {
        assert!(RaggedTensor::new(vec![0], vec![3], vec![1, 2]).is_err());
        assert!(RaggedTensor::new(vec![2], vec![1], vec![1, 2]).is_err());
    }

    #[test]
    fn test_promotion() {
        let strings = StringTensor::from_strings(["a", "bc", "d"]).unwrap();
        let ragged = RaggedStringTensor::from(strings);
        assert_eq!(ragged.rows(), 3);
        assert_eq!(ragged.rag_begins(), [0, 1, 2]);
        assert_eq!(ragged.rag_ends(), [1, 2, 3]);
        assert_eq!(ragged.row(1).collect::<Vec<_>>(), [b"bc"]);
    }
}
