use displaydoc::Display;
use num_traits::Num;
use thiserror::Error;

use crate::tensor::RaggedTensor;

/// The potential errors of segment combination.
#[derive(Debug, Display, Error)]
pub enum CombineError {
    /// No segments to combine
    Empty,
    /// {segments} segments but {ids} segment ids
    IdCount { segments: usize, ids: usize },
    /// Segment #{index} has {rows} rows, expected 1 or {expected}
    RowMismatch {
        index: usize,
        rows: usize,
        expected: usize,
    },
}

/// Concatenates several ragged tensors row by row and tags every element
/// with the id of the segment it came from.
///
/// Segments of one row broadcast against the common row count. The two
/// outputs share an identical row structure.
pub struct CombineSegments;

impl CombineSegments {
    /// Combines the segments.
    ///
    /// # Errors
    /// Fails when the row counts cannot broadcast or the segment id count
    /// does not match.
    pub fn evaluate<T>(
        &self,
        segments: &[&RaggedTensor<T>],
        segment_ids: &[i32],
    ) -> Result<(RaggedTensor<T>, RaggedTensor<i32>), CombineError>
    where
        T: Num + Copy,
    {
        if segments.is_empty() {
            return Err(CombineError::Empty);
        }
        if segments.len() != segment_ids.len() {
            return Err(CombineError::IdCount {
                segments: segments.len(),
                ids: segment_ids.len(),
            });
        }

        let rows = segments
            .iter()
            .map(|segment| segment.rows())
            .max()
            .expect("at least one segment");
        for (index, segment) in segments.iter().enumerate() {
            if segment.rows() != rows && segment.rows() != 1 {
                return Err(CombineError::RowMismatch {
                    index,
                    rows: segment.rows(),
                    expected: rows,
                });
            }
        }

        let mut rag_begins = Vec::with_capacity(rows);
        let mut rag_ends = Vec::with_capacity(rows);
        let mut elems = Vec::new();
        let mut ids = Vec::new();
        for row in 0..rows {
            rag_begins.push(elems.len() as i32);
            for (segment, &id) in segments.iter().zip(segment_ids) {
                let row = if segment.rows() == 1 { 0 } else { row };
                let slice = segment.row(row);
                elems.extend_from_slice(slice);
                ids.resize(ids.len() + slice.len(), id);
            }
            rag_ends.push(elems.len() as i32);
        }

        let combined = RaggedTensor {
            rag_begins: rag_begins.clone(),
            rag_ends: rag_ends.clone(),
            elems,
        };
        let tags = RaggedTensor {
            rag_begins,
            rag_ends,
            elems: ids,
        };
        Ok((combined, tags))
    }
}
