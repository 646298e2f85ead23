use std::borrow::Cow;

use crate::{
    model::{parse_vocab, resolve_token_id, Vocab, VocabError},
    tensor::{RaggedStringTensor, RaggedTensor, StringTensor},
    SmallString,
};

/// A greedy longest-match subword encoder over pre-split words.
///
/// Within a word, pieces after the first are looked up with the suffix
/// indicator prepended. Words longer than `max_bytes_per_word` or without
/// a covering split collapse to the unknown token.
pub struct WordpieceTokenizer {
    vocab: Vocab,
    unk_id: i32,
    suffix_indicator: SmallString,
    max_bytes_per_word: usize,
}

impl WordpieceTokenizer {
    /// Builds the encoder from a vocabulary tensor.
    ///
    /// A negative `unk_token_id` counts from the vocabulary size.
    ///
    /// # Errors
    /// Fails if the vocabulary is not valid UTF-8 or the unknown id is out
    /// of range.
    pub fn new(
        vocab: &StringTensor,
        unk_token_id: i32,
        suffix_indicator: &str,
        max_bytes_per_word: usize,
    ) -> Result<Self, VocabError> {
        let unk_id = resolve_token_id(unk_token_id, vocab.len())?;
        Ok(Self {
            vocab: parse_vocab(vocab)?,
            unk_id,
            suffix_indicator: suffix_indicator.into(),
            max_bytes_per_word,
        })
    }

    /// The resolved unknown token id.
    pub fn unk_id(&self) -> i32 {
        self.unk_id
    }

    /// The continuing subword prefix.
    pub fn suffix_indicator(&self) -> &str {
        self.suffix_indicator.as_str()
    }

    /// The word length cutoff in bytes.
    pub fn max_bytes_per_word(&self) -> usize {
        self.max_bytes_per_word
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

    /// Encodes one word, degrading to the unknown token when the word is
    /// oversized, not valid UTF-8 or not coverable by the vocabulary.
    fn encode_word(&self, word: &[u8], ids: &mut Vec<i32>) {
        if word.is_empty() {
            return;
        }
        let text = match std::str::from_utf8(word) {
            Ok(text) if text.len() <= self.max_bytes_per_word => text,
            _ => {
                ids.push(self.unk_id);
                return;
            }
        };

        let len = text.len();
        let mut pieces = Vec::new();
        let mut start = 0;
        while start < len {
            let mut end = len;
            start = loop {
                if start >= end {
                    ids.push(self.unk_id);
                    return;
                }

                let piece = if start > 0 {
                    Cow::Owned([self.suffix_indicator.as_str(), &text[start..end]].concat())
                } else {
                    Cow::Borrowed(&text[start..end])
                };

                if let Some(&id) = self.vocab.get(piece.as_ref()) {
                    pieces.push(id);
                    break end;
                } else {
                    end -= text[start..end].chars().last().map_or(1, char::len_utf8);
                }
            };
        }
        ids.extend(pieces);
    }
}
