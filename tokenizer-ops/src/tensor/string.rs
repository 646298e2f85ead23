use std::{str, sync::Arc};

use crate::tensor::{check_ranges, TensorError};

/// A batch of strings in decomposed representation.
///
/// `begins[i]..ends[i]` is the byte range of string `i` within the shared
/// `chars` buffer. The buffer is immutable and reference counted so that
/// downstream operators can alias it without copying.
#[derive(Clone)]
#[cfg_attr(test, derive(Debug))]
pub struct StringTensor {
    pub(crate) begins: Vec<i32>,
    pub(crate) ends: Vec<i32>,
    pub(crate) chars: Arc<[u8]>,
}

impl StringTensor {
    /// Creates a string tensor from its parts.
    ///
    /// # Errors
    /// Fails if the index arrays differ in length or any range is
    /// decreasing or out of bounds.
    pub fn new(
        begins: Vec<i32>,
        ends: Vec<i32>,
        chars: impl Into<Arc<[u8]>>,
    ) -> Result<Self, TensorError> {
        let chars = chars.into();
        check_ranges(&begins, &ends, chars.len(), false)?;
        Ok(Self {
            begins,
            ends,
            chars,
        })
    }

    /// Creates a string tensor by concatenating the given strings gap-free.
    ///
    /// # Errors
    /// Fails if the total byte length exceeds the addressable i32 range.
    pub fn from_strings<I, S>(strings: I) -> Result<Self, TensorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut begins = Vec::new();
        let mut ends = Vec::new();
        let mut chars = Vec::new();
        for string in strings {
            let string = string.as_ref();
            begins.push(i32::try_from(chars.len()).map_err(|_| TensorError::LengthOverflow)?);
            chars.extend_from_slice(string.as_bytes());
            ends.push(i32::try_from(chars.len()).map_err(|_| TensorError::LengthOverflow)?);
        }
        Ok(Self {
            begins,
            ends,
            chars: chars.into(),
        })
    }

    /// Returns the number of strings.
    pub fn len(&self) -> usize {
        self.begins.len()
    }

    /// Whether the batch holds no strings.
    pub fn is_empty(&self) -> bool {
        self.begins.is_empty()
    }

    /// Returns the bytes of string `i`.
    ///
    /// # Panics
    /// Panics if `i` is out of bounds.
    pub fn bytes(&self, i: usize) -> &[u8] {
        &self.chars[self.begins[i] as usize..self.ends[i] as usize]
    }

    /// Returns string `i` as UTF-8 text.
    pub fn text(&self, i: usize) -> Result<&str, str::Utf8Error> {
        str::from_utf8(self.bytes(i))
    }

    /// Iterates over the byte slices of all strings.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.begins
            .iter()
            .zip(&self.ends)
            .map(move |(&begin, &end)| &self.chars[begin as usize..end as usize])
    }

    /// The begin offsets.
    pub fn begins(&self) -> &[i32] {
        &self.begins
    }

    /// The end offsets.
    pub fn ends(&self) -> &[i32] {
        &self.ends
    }

    /// The shared byte buffer.
    pub fn chars(&self) -> &[u8] {
        &self.chars
    }

    /// Clones a handle to the shared byte buffer without copying it.
    pub fn share_chars(&self) -> Arc<[u8]> {
        Arc::clone(&self.chars)
    }

    /// Whether the strings tile the byte buffer without gaps, starting at
    /// offset zero.
    pub(crate) fn is_canonical(&self) -> bool {
        let mut offset = 0;
        for (&begin, &end) in self.begins.iter().zip(&self.ends) {
            if begin != offset {
                return false;
            }
            offset = end;
        }
        offset as usize == self.chars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_strings() {
        let tensor = StringTensor::from_strings(["Hey", "", "friend"]).unwrap();
        assert_eq!(tensor.len(), 3);
        assert_eq!(tensor.bytes(0), b"Hey");
        assert_eq!(tensor.bytes(1), b"");
        assert_eq!(tensor.text(2).unwrap(), "friend");
        assert!(tensor.is_canonical());
    }

    #[test]
    fn test_gaps_are_allowed() {
        let tensor = StringTensor::new(vec![0, 4], vec![3, 6], b"abc_de".to_vec()).unwrap();
        assert_eq!(tensor.bytes(0), b"abc");
        assert_eq!(tensor.bytes(1), b"de");
        assert!(!tensor.is_canonical());
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert!(StringTensor::new(vec![0], vec![4], b"abc".to_vec()).is_err());
        assert!(StringTensor::new(vec![2], vec![1], b"abc".to_vec()).is_err());
        assert!(StringTensor::new(vec![-1], vec![1], b"abc".to_vec()).is_err());
        assert!(StringTensor::new(vec![0, 0], vec![1], b"abc".to_vec()).is_err());
    }
}
