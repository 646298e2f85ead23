//! Conversion between the packed wire format and the decomposed
//! representation.
//!
//! The packed layout is `[N: i32][offsets[0..=N]: i32][bytes]`, all
//! little-endian, where string `i` spans `offsets[i]..offsets[i + 1]` of
//! the byte payload. It appears only at graph boundaries; inside the
//! pipeline strings travel decomposed.

use displaydoc::Display;
use thiserror::Error;

use crate::tensor::{StringTensor, TensorError};

/// The potential errors of the packed string format.
#[derive(Debug, Display, Error)]
pub enum PackedError {
    /// Packed buffer of {len} bytes is too short for the batch size header
    TruncatedHeader { len: usize },
    /// Negative batch size {batch}
    NegativeBatch { batch: i32 },
    /// Packed buffer of {len} bytes cannot hold {batch} + 1 offsets
    TruncatedOffsets { len: usize, batch: i32 },
    /// Offset #{index} ({offset}) is negative or decreasing
    DecreasingOffset { index: usize, offset: i32 },
    /// Final offset {offset} exceeds the {payload} byte payload
    PayloadOverrun { offset: i32, payload: usize },
    /// Inconsistent decomposed representation: {0}
    Tensor(#[from] TensorError),
}

/// Reads a packed string buffer into a decomposed string tensor.
///
/// The payload bytes are copied once into the tensor's shared buffer.
///
/// # Errors
/// Fails with a [`PackedError`] describing the first malformed field.
pub fn unpack_strings(packed: &[u8]) -> Result<StringTensor, PackedError> {
    let read_i32 = |at: usize| {
        i32::from_le_bytes(packed[at..at + 4].try_into().expect("4 byte slice"))
    };

    if packed.len() < 4 {
        return Err(PackedError::TruncatedHeader { len: packed.len() });
    }
    let batch = read_i32(0);
    if batch < 0 {
        return Err(PackedError::NegativeBatch { batch });
    }
    let header = 4 + 4 * (batch as usize + 1);
    if packed.len() < header {
        return Err(PackedError::TruncatedOffsets {
            len: packed.len(),
            batch,
        });
    }

    let payload = &packed[header..];
    let mut offsets = Vec::with_capacity(batch as usize + 1);
    let mut previous = 0;
    for index in 0..=batch as usize {
        let offset = read_i32(4 + 4 * index);
        if offset < previous {
            return Err(PackedError::DecreasingOffset { index, offset });
        }
        previous = offset;
        offsets.push(offset);
    }
    if offsets[batch as usize] as usize > payload.len() {
        return Err(PackedError::PayloadOverrun {
            offset: offsets[batch as usize],
            payload: payload.len(),
        });
    }

    let begins = offsets[..batch as usize].to_vec();
    let ends = offsets[1..].to_vec();
    StringTensor::new(begins, ends, payload.to_vec()).map_err(Into::into)
}

/// Writes a decomposed string tensor into the packed wire format.
///
/// Only the end offsets are emitted (preceded by a leading zero), so the
/// byte payload must tile the buffer gap-free. Tensors with gaps are
/// re-laid out canonically first, at the cost of one copy.
pub fn pack_strings(strings: &StringTensor) -> Vec<u8> {
    if strings.is_canonical() {
        emit_packed(strings.ends(), strings.chars())
    } else {
        log::warn!(
            "packing a string tensor with gaps: re-laying out {} bytes",
            strings.chars().len(),
        );
        let mut ends = Vec::with_capacity(strings.len());
        let mut chars = Vec::with_capacity(strings.chars().len());
        for bytes in strings.iter() {
            chars.extend_from_slice(bytes);
            ends.push(chars.len() as i32);
        }
        emit_packed(&ends, &chars)
    }
}

fn emit_packed(ends: &[i32], chars: &[u8]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(4 * (ends.len() + 2) + chars.len());
    packed.extend_from_slice(&(ends.len() as i32).to_le_bytes());
    packed.extend_from_slice(&0_i32.to_le_bytes());
    for &end in ends {
        packed.extend_from_slice(&end.to_le_bytes());
    }
    packed.extend_from_slice(chars);
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(strings: &[&str]) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(strings.len() as i32).to_le_bytes());
        let mut offset = 0_i32;
        buffer.extend_from_slice(&offset.to_le_bytes());
        for string in strings {
            offset += string.len() as i32;
            buffer.extend_from_slice(&offset.to_le_bytes());
        }
        for string in strings {
            buffer.extend_from_slice(string.as_bytes());
        }
        buffer
    }

    #[test]
    fn test_unpack() {
        let tensor = unpack_strings(&packed(&["Hello", "", "world!"])).unwrap();
        assert_eq!(tensor.len(), 3);
        assert_eq!(tensor.bytes(0), b"Hello");
        assert_eq!(tensor.bytes(1), b"");
        assert_eq!(tensor.bytes(2), b"world!");
    }

    #[test]
    fn test_unpack_empty_batch() {
        let tensor = unpack_strings(&packed(&[])).unwrap();
        assert!(tensor.is_empty());
    }

    #[test]
    fn test_unpack_rejects_malformed() {
        assert!(matches!(
            unpack_strings(&[1_u8, 0]),
            Err(PackedError::TruncatedHeader { .. }),
        ));
        assert!(matches!(
            unpack_strings(&(-1_i32).to_le_bytes()),
            Err(PackedError::NegativeBatch { .. }),
        ));
        // Batch size claims more offsets than the buffer holds.
        let mut short = 2_i32.to_le_bytes().to_vec();
        short.extend_from_slice(&0_i32.to_le_bytes());
        assert!(matches!(
            unpack_strings(&short),
            Err(PackedError::TruncatedOffsets { .. }),
        ));
        // Final offset points past the payload.
        let mut overrun = packed(&["ab"]);
        let len = overrun.len();
        overrun.truncate(len - 1);
        assert!(matches!(
            unpack_strings(&overrun),
            Err(PackedError::PayloadOverrun { .. }),
        ));
    }

    #[test]
    fn test_pack_unpack_identity() {
        let buffer = packed(&["pack", "", "me"]);
        let roundtrip = pack_strings(&unpack_strings(&buffer).unwrap());
        assert_eq!(roundtrip, buffer);
    }

    #[test]
    fn test_pack_relayouts_gaps() {
        let gapped =
            StringTensor::new(vec![0, 4], vec![3, 6], b"abcXde".to_vec()).unwrap();
        let packed = pack_strings(&gapped);
        let tensor = unpack_strings(&packed).unwrap();
        assert_eq!(tensor.bytes(0), b"abc");
        assert_eq!(tensor.bytes(1), b"de");
    }
}
