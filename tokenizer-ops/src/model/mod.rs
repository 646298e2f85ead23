//! Subword encoders: WordPiece, BPE and SentencePiece.
//!
//! Vocabularies and merge tables arrive as decomposed string tensors (row
//! index = token id) and are parsed once at operator construction; the
//! encoders are pure reads afterwards.

pub mod bpe;
pub mod sentencepiece;
pub mod wordpiece;

use std::collections::HashMap;

use displaydoc::Display;
use thiserror::Error;

use crate::tensor::StringTensor;

/// Token string to id lookup.
pub(crate) type Vocab = HashMap<String, i32>;

/// The potential errors of vocabulary handling.
#[derive(Debug, Display, Error)]
pub enum VocabError {
    /// Token id {id} is outside the vocabulary of {size} entries
    OutOfRange { id: i32, size: usize },
    /// Vocabulary entry #{index} is not valid UTF-8
    InvalidUtf8 { index: usize },
    /// Token "{0}" is missing from the vocabulary
    MissingToken(String),
}

/// Builds the token to id map from a vocabulary tensor; row `i` holds the
/// token string for id `i`.
pub(crate) fn parse_vocab(tokens: &StringTensor) -> Result<Vocab, VocabError> {
    tokens
        .iter()
        .enumerate()
        .map(|(index, bytes)| {
            std::str::from_utf8(bytes)
                .map(|token| (token.to_string(), index as i32))
                .map_err(|_| VocabError::InvalidUtf8 { index })
        })
        .collect()
}

/// Resolves a possibly negative token id against the vocabulary size;
/// negative ids count from the end.
pub(crate) fn resolve_token_id(id: i32, size: usize) -> Result<i32, VocabError> {
    let resolved = if id < 0 { id + size as i32 } else { id };
    if resolved < 0 || resolved as usize >= size {
        Err(VocabError::OutOfRange { id, size })
    } else {
        Ok(resolved)
    }
}
