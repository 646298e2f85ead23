use std::collections::HashMap;

use displaydoc::Display;
use thiserror::Error;

use crate::{
    model::{parse_vocab, Vocab, VocabError},
    tensor::{RaggedStringTensor, RaggedTensor, StringTensor},
    SmallString,
};

/// The potential errors of the BPE encoder.
#[derive(Debug, Display, Error)]
pub enum BpeError {
    /// Merge rule #{index} is not of the form "left right"
    MalformedMerge { index: usize },
    /// Merge rule #{index} is not valid UTF-8
    InvalidUtf8 { index: usize },
    /// Invalid vocabulary: {0}
    Vocab(#[from] VocabError),
}

/// A merge-rank byte pair encoder over pre-split words.
///
/// Words decompose into known single-character pieces which are repeatedly
/// merged along the lowest-rank applicable rule. Ranks follow the row
/// order of the merges tensor, one `"left right"` rule per row.
pub struct BpeTokenizer {
    vocab: Vocab,
    merges: HashMap<(String, String), (u32, String)>,
    unk_token: String,
    unk_id: Option<i32>,
    fuse_unk: bool,
    suffix_indicator: SmallString,
    end_suffix: SmallString,
    byte_fallback: bool,
}

impl BpeTokenizer {
    /// Builds the encoder from vocabulary and merge tensors.
    ///
    /// `unk_token` may be empty to disable the unknown token, in which
    /// case unencodable pieces are dropped.
    ///
    /// # Errors
    /// Fails on malformed merge rules or when a configured unknown token
    /// is missing from the vocabulary.
    pub fn new(
        vocab: &StringTensor,
        merges: &StringTensor,
        unk_token: &str,
        fuse_unk: bool,
        suffix_indicator: &str,
        end_suffix: &str,
        byte_fallback: bool,
    ) -> Result<Self, BpeError> {
        let vocab = parse_vocab(vocab)?;
        let unk_id = if unk_token.is_empty() {
            None
        } else {
            Some(
                vocab
                    .get(unk_token)
                    .copied()
                    .ok_or_else(|| VocabError::MissingToken(unk_token.to_string()))?,
            )
        };

        let mut merge_table = HashMap::with_capacity(merges.len());
        for (index, rule) in merges.iter().enumerate() {
            let rule =
                std::str::from_utf8(rule).map_err(|_| BpeError::InvalidUtf8 { index })?;
            let (left, right) = rule
                .split_once(' ')
                .filter(|(left, right)| !left.is_empty() && !right.is_empty())
                .ok_or(BpeError::MalformedMerge { index })?;
            // The merged symbol drops the continuation marker the right
            // hand side carries inside a word.
            let merged = match right.strip_prefix(suffix_indicator) {
                Some(stripped) if !suffix_indicator.is_empty() => [left, stripped].concat(),
                _ => [left, right].concat(),
            };
            merge_table
                .entry((left.to_string(), right.to_string()))
                .or_insert((index as u32, merged));
        }

        Ok(Self {
            vocab,
            merges: merge_table,
            unk_token: unk_token.to_string(),
            unk_id,
            fuse_unk,
            suffix_indicator: suffix_indicator.into(),
            end_suffix: end_suffix.into(),
            byte_fallback,
        })
    }

    /// The unknown token, empty when disabled.
    pub fn unk_token(&self) -> &str {
        &self.unk_token
    }

    /// Whether consecutive unknowns collapse into one.
    pub fn fuse_unk(&self) -> bool {
        self.fuse_unk
    }

    /// The continuing subword prefix.
    pub fn suffix_indicator(&self) -> &str {
        self.suffix_indicator.as_str()
    }

    /// The word-final suffix.
    pub fn end_suffix(&self) -> &str {
        self.end_suffix.as_str()
    }

    /// Whether unknown pieces fall back to per-byte tokens.
    pub fn byte_fallback(&self) -> bool {
        self.byte_fallback
    }

    /// Encodes every word of every row; row `j` of the output holds the
    /// ids of all words in input row `j`, concatenated in order.
    pub fn evaluate(&self, words: &RaggedStringTensor) -> RaggedTensor<i32> {
        let mut rag_begins = Vec::with_capacity(words.rows());
        let mut rag_ends = Vec::with_capacity(words.rows());
        let mut elems = Vec::new();

        for row in 0..words.rows() {
            rag_begins.push(elems.len() as i32);
            for word in words.row(row) {
                self.encode_word(word, &mut elems);
            }
            rag_ends.push(elems.len() as i32);
        }

        RaggedTensor {
            rag_begins,
            rag_ends,
            elems,
        }
    }

    fn encode_word(&self, word: &[u8], ids: &mut Vec<i32>) {
        let Ok(text) = std::str::from_utf8(word) else {
            if let Some(unk_id) = self.unk_id {
                ids.push(unk_id);
            }
            return;
        };
        if text.is_empty() {
            return;
        }

        let mut pieces = self.initial_pieces(text);
        self.merge_pieces(&mut pieces);

        let mut last_was_unk = false;
        for piece in &pieces {
            if let Some(&id) = self.vocab.get(piece.as_str()) {
                ids.push(id);
                last_was_unk = false;
            } else if self.byte_fallback && self.push_byte_tokens(piece, ids) {
                last_was_unk = false;
            } else if let Some(unk_id) = self.unk_id {
                if !(self.fuse_unk && last_was_unk) {
                    ids.push(unk_id);
                }
                last_was_unk = true;
            }
        }
    }

    /// One piece per character, decorated with the suffix indicator on
    /// continuation characters and the end suffix on the final one.
    fn initial_pieces(&self, text: &str) -> Vec<String> {
        let count = text.chars().count();
        text.chars()
            .enumerate()
            .map(|(i, c)| {
                let mut piece = String::new();
                if i > 0 {
                    piece.push_str(&self.suffix_indicator);
                }
                piece.push(c);
                if i + 1 == count {
                    piece.push_str(&self.end_suffix);
                }
                piece
            })
            .collect()
    }

    /// Repeatedly applies the lowest-rank applicable rule; ties break
    /// towards the leftmost pair.
    fn merge_pieces(&self, pieces: &mut Vec<String>) {
        loop {
            let mut best: Option<(u32, usize)> = None;
            for i in 0..pieces.len().saturating_sub(1) {
                if let Some(&(rank, _)) = self
                    .merges
                    .get(&(pieces[i].clone(), pieces[i + 1].clone()))
                {
                    if best.map_or(true, |(best_rank, _)| rank < best_rank) {
                        best = Some((rank, i));
                    }
                }
            }
            let Some((_, at)) = best else {
                break;
            };
            let right = pieces.remove(at + 1);
            let merged = self.merges[&(pieces[at].clone(), right)].1.clone();
            pieces[at] = merged;
        }
    }

    /// Emits the `<0xXX>` byte tokens for the undecorated piece; all of
    /// them must be known for the fallback to apply.
    fn push_byte_tokens(&self, piece: &str, ids: &mut Vec<i32>) -> bool {
        let bare = piece
            .strip_prefix(self.suffix_indicator.as_str())
            .filter(|_| !self.suffix_indicator.is_empty())
            .unwrap_or(piece);
        let bare = bare
            .strip_suffix(self.end_suffix.as_str())
            .filter(|_| !self.end_suffix.is_empty())
            .unwrap_or(bare);

        let byte_ids = bare
            .bytes()
            .map(|byte| self.vocab.get(&format!("<0x{byte:02X}>")).copied())
            .collect::<Option<Vec<_>>>();
        match byte_ids {
            Some(byte_ids) => {
                ids.extend(byte_ids);
                true
            }
            None => false,
        }
    }
}
