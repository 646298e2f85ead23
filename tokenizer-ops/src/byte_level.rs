//! Byte to printable-character remapping.
//!
//! Byte-level vocabularies avoid unprintable symbols by mapping every raw
//! byte to a printable Unicode character: printable ASCII and the upper
//! Latin-1 letters map to themselves, every remaining byte value to a
//! character from U+0100 upwards, in byte order. Each byte therefore
//! becomes one or two UTF-8 bytes, and the mapping is a bijection.

use std::{collections::HashMap, sync::OnceLock};

use crate::tensor::{RaggedStringTensor, StringTensor};

const fn maps_to_itself(byte: u8) -> bool {
    matches!(byte, 33..=126 | 161..=172 | 174..=255)
}

/// The process-wide 256-entry byte-to-character table.
pub fn bytes_to_chars_map() -> &'static [char; 256] {
    static MAP: OnceLock<[char; 256]> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut map = ['\0'; 256];
        let mut shifted = 0;
        for byte in 0..=255_u8 {
            map[byte as usize] = if maps_to_itself(byte) {
                char::from(byte)
            } else {
                let c = char::from_u32(0x100 + shifted).expect("below surrogates");
                shifted += 1;
                c
            };
        }
        map
    })
}

/// The inverse character-to-byte table.
pub fn chars_to_bytes_map() -> &'static HashMap<char, u8> {
    static MAP: OnceLock<HashMap<char, u8>> = OnceLock::new();
    MAP.get_or_init(|| {
        bytes_to_chars_map()
            .iter()
            .enumerate()
            .map(|(byte, &c)| (c, byte as u8))
            .collect()
    })
}

/// Remaps every byte of every substring through the byte-to-character
/// table.
///
/// Row structure passes through unchanged; the string offsets are
/// recomputed against a fresh byte buffer of at most twice the input
/// length.
pub struct BytesToChars;

impl BytesToChars {
    /// Remaps the batch.
    pub fn evaluate(&self, input: &RaggedStringTensor) -> RaggedStringTensor {
        let map = bytes_to_chars_map();
        let strings = input.strings();
        let mut begins = Vec::with_capacity(strings.len());
        let mut ends = Vec::with_capacity(strings.len());
        let mut chars = Vec::with_capacity(strings.chars().len() * 2);

        let mut buf = [0_u8; 4];
        for word in strings.iter() {
            begins.push(chars.len() as i32);
            for &byte in word {
                chars.extend_from_slice(map[byte as usize].encode_utf8(&mut buf).as_bytes());
            }
            ends.push(chars.len() as i32);
        }

        RaggedStringTensor {
            rag_begins: input.rag_begins.clone(),
            rag_ends: input.rag_ends.clone(),
            strings: StringTensor {
                begins,
                ends,
                chars: chars.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_is_a_bijection() {
        let map = bytes_to_chars_map();
        let inverse = chars_to_bytes_map();
        assert_eq!(inverse.len(), 256);
        for byte in 0..=255_u8 {
            assert_eq!(inverse[&map[byte as usize]], byte);
        }
    }

    #[test]
    fn test_known_entries() {
        let map = bytes_to_chars_map();
        assert_eq!(map[b'A' as usize], 'A');
        assert_eq!(map[b'!' as usize], '!');
        assert_eq!(map[0x20], '\u{120}');
        assert_eq!(map[0x00], '\u{100}');
        assert_eq!(map[0x7F], '\u{121}');
        assert_eq!(map[0xAD], '\u{143}');
        assert_eq!(map[0xA1], '\u{A1}');
        assert_eq!(map[0xFF], '\u{FF}');
    }

    #[test]
    fn test_remap() {
        let strings = StringTensor::new(vec![0, 2], vec![2, 3], vec![0x20, 0x41, 0xFF]).unwrap();
        let output = BytesToChars.evaluate(&RaggedStringTensor::from(strings));
        // Space becomes the two byte printable glyph, 'A' stays itself.
        assert_eq!(output.strings().bytes(0), [0xC4, 0xA0, 0x41]);
        assert_eq!(output.strings().bytes(1), [0xC3, 0xBF]);
        assert_eq!(output.rag_begins(), [0, 1]);
        assert_eq!(output.rag_ends(), [1, 2]);
    }

    #[test]
    fn test_remap_round_trip() {
        let original = "Hello, world!\n".as_bytes().to_vec();
        let strings = StringTensor::new(vec![0], vec![original.len() as i32], original.clone())
            .unwrap();
        let output = BytesToChars.evaluate(&RaggedStringTensor::from(strings));
        let inverse = chars_to_bytes_map();
        let recovered = output
            .strings()
            .text(0)
            .unwrap()
            .chars()
            .map(|c| inverse[&c])
            .collect::<Vec<_>>();
        assert_eq!(recovered, original);
    }
}
