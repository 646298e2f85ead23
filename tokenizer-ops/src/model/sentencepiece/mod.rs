//! Whole-sentence unigram encoding against a serialized subword model.

mod proto;

use std::collections::HashMap;

use displaydoc::Display;
use rand::Rng;
use thiserror::Error;

use crate::{model::sentencepiece::proto::ModelProto, tensor::StringTensor};

/// Score handicap of the unknown token against the worst known piece.
const UNK_PENALTY: f32 = 10.0;

/// The potential errors of the sentence encoder.
#[derive(Debug, Display, Error)]
pub enum SentencePieceError {
    /// Malformed model proto: {0}
    Load(&'static str),
}

/// Sparse `(indices, values, dense_shape)` output of a batched encode.
///
/// `indices[k]` is the `(batch, position)` of token `values[k]`, ordered
/// row-major by batch then position; `dense_shape` is
/// `(batch_size, max_tokens_over_batch)`.
#[cfg_attr(test, derive(Debug))]
pub struct SparseTokenMatrix {
    pub(crate) indices: Vec<[i64; 2]>,
    pub(crate) values: Vec<i32>,
    pub(crate) dense_shape: [i64; 2],
}

impl SparseTokenMatrix {
    /// The `(batch, position)` coordinates of each token.
    pub fn indices(&self) -> &[[i64; 2]] {
        &self.indices
    }

    /// The token ids.
    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// The `(batch_size, max_tokens_per_row)` envelope.
    pub fn dense_shape(&self) -> [i64; 2] {
        self.dense_shape
    }
}

/// A unigram sentence encoder deserialized from a model proto.
///
/// Encoding samples a segmentation of the whole sentence: the best path
/// when `nbest_size` is `0` or `1`, otherwise a lattice sample smoothed by
/// `alpha`. The `reverse` flag is carried for compatibility and ignored,
/// as in the source framework.
pub struct SentencepieceTokenizer {
    pieces: HashMap<String, (i32, f32)>,
    max_piece_bytes: usize,
    unk_id: i32,
    bos_id: i32,
    eos_id: i32,
    unk_score: f32,
    add_dummy_prefix: bool,
    remove_extra_whitespaces: bool,
    escape_whitespaces: bool,
    nbest_size: i32,
    alpha: f32,
    add_bos: bool,
    add_eos: bool,
    reverse: bool,
}

impl SentencepieceTokenizer {
    /// Deserializes the model proto and fixes the encode options.
    ///
    /// # Errors
    /// Fails if the proto is malformed.
    pub fn new(
        model: &[u8],
        nbest_size: i32,
        alpha: f32,
        add_bos: bool,
        add_eos: bool,
        reverse: bool,
    ) -> Result<Self, SentencePieceError> {
        let ModelProto {
            pieces,
            unk_id,
            bos_id,
            eos_id,
            add_dummy_prefix,
            remove_extra_whitespaces,
            escape_whitespaces,
        } = ModelProto::parse(model)?;

        let mut matchable = HashMap::new();
        let mut max_piece_bytes = 1;
        let mut min_score = 0.0_f32;
        for (id, piece) in pieces.into_iter().enumerate() {
            if piece.kind.is_matchable() {
                min_score = min_score.min(piece.score);
                max_piece_bytes = max_piece_bytes.max(piece.piece.len());
                matchable.insert(piece.piece, (id as i32, piece.score));
            }
        }

        Ok(Self {
            pieces: matchable,
            max_piece_bytes,
            unk_id,
            bos_id,
            eos_id,
            unk_score: min_score - UNK_PENALTY,
            add_dummy_prefix,
            remove_extra_whitespaces,
            escape_whitespaces,
            nbest_size,
            alpha,
            add_bos,
            add_eos,
            reverse,
        })
    }

    /// The segmentation sampling width.
    pub fn nbest_size(&self) -> i32 {
        self.nbest_size
    }

    /// The sampling smoothing exponent.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Whether the begin-of-sentence id is prepended.
    pub fn add_bos(&self) -> bool {
        self.add_bos
    }

    /// Whether the end-of-sentence id is appended.
    pub fn add_eos(&self) -> bool {
        self.add_eos
    }

    /// Whether encode output would be reversed; carried but unused.
    pub fn reverse(&self) -> bool {
        self.reverse
    }

    /// Encodes a batch of sentences into sparse form.
    ///
    /// A sentence that cannot be encoded contributes an empty token list
    /// instead of failing the batch.
    pub fn evaluate(&self, sentences: &StringTensor) -> SparseTokenMatrix {
        let mut indices = Vec::new();
        let mut values = Vec::new();
        let mut max_tokens = 0_usize;

        for (batch, bytes) in sentences.iter().enumerate() {
            let ids = match std::str::from_utf8(bytes) {
                Ok(text) => self.encode(text),
                Err(_) => {
                    log::warn!("sentence #{batch} is not valid UTF-8, emitting no tokens");
                    Vec::new()
                }
            };
            for (position, &id) in ids.iter().enumerate() {
                indices.push([batch as i64, position as i64]);
                values.push(id);
            }
            max_tokens = max_tokens.max(ids.len());
        }

        SparseTokenMatrix {
            indices,
            values,
            dense_shape: [sentences.len() as i64, max_tokens as i64],
        }
    }

    /// Encodes one sentence.
    pub fn encode(&self, text: &str) -> Vec<i32> {
        let text = self.normalize(text);
        let mut ids = Vec::new();
        if self.add_bos {
            ids.push(self.bos_id);
        }
        if !text.is_empty() {
            ids.extend(self.segment(&text));
        }
        if self.add_eos {
            ids.push(self.eos_id);
        }
        ids
    }

    /// Whitespace pre-treatment: collapse runs, add the dummy prefix and
    /// escape spaces to the low line meta symbol.
    fn normalize(&self, text: &str) -> String {
        let mut text = if self.remove_extra_whitespaces {
            itertools::join(text.split_whitespace(), " ")
        } else {
            text.to_string()
        };
        if text.is_empty() {
            return text;
        }
        if self.add_dummy_prefix {
            text.insert(0, ' ');
        }
        if self.escape_whitespaces {
            text = text.replace(' ', "\u{2581}");
        }
        text
    }

    /// All lattice edges ending at boundary `end`: `(start, id, score)`.
    fn edges(
        &self,
        text: &str,
        boundaries: &[usize],
        end: usize,
    ) -> Vec<(usize, i32, f32)> {
        let end_pos = boundaries[end];
        let mut edges = Vec::new();
        for start in (0..end).rev() {
            let start_pos = boundaries[start];
            if end_pos - start_pos > self.max_piece_bytes {
                break;
            }
            if let Some(&(id, score)) = self.pieces.get(&text[start_pos..end_pos]) {
                edges.push((start, id, score));
            }
        }
        // A single unknown character is always a valid edge, scored just
        // below every known piece.
        if self
            .pieces
            .get(&text[boundaries[end - 1]..end_pos])
            .is_none()
        {
            edges.push((end - 1, self.unk_id, self.unk_score));
        }
        edges
    }

    /// Segments a normalized non-empty sentence into piece ids.
    fn segment(&self, text: &str) -> Vec<i32> {
        let mut boundaries = text.char_indices().map(|(i, _)| i).collect::<Vec<_>>();
        boundaries.push(text.len());

        if self.nbest_size == 0 || self.nbest_size == 1 {
            self.best_path(text, &boundaries)
        } else {
            self.sample_path(text, &boundaries)
        }
    }

    /// Viterbi best segmentation.
    fn best_path(&self, text: &str, boundaries: &[usize]) -> Vec<i32> {
        let count = boundaries.len();
        let mut best: Vec<Option<(f32, usize, i32)>> = vec![None; count];
        best[0] = Some((0.0, 0, 0));

        for end in 1..count {
            for (start, id, score) in self.edges(text, boundaries, end) {
                if let Some((prefix_score, _, _)) = best[start] {
                    let candidate = prefix_score + score;
                    if best[end].map_or(true, |(best_score, _, _)| candidate > best_score) {
                        best[end] = Some((candidate, start, id));
                    }
                }
            }
        }

        let mut ids = Vec::new();
        let mut position = count - 1;
        while position > 0 {
            let (_, start, id) = best[position].expect("unknown edges keep the lattice connected");
            ids.push(id);
            position = start;
        }
        ids.reverse();
        ids
    }

    /// Forward-filter backward-sample segmentation, smoothed by `alpha`.
    fn sample_path(&self, text: &str, boundaries: &[usize]) -> Vec<i32> {
        let count = boundaries.len();
        let mut forward = vec![f32::NEG_INFINITY; count];
        forward[0] = 0.0;
        for end in 1..count {
            for (start, _, score) in self.edges(text, boundaries, end) {
                forward[end] = log_sum_exp(forward[end], forward[start] + self.alpha * score);
            }
        }

        let mut rng = rand::thread_rng();
        let mut ids = Vec::new();
        let mut position = count - 1;
        while position > 0 {
            let edges = self.edges(text, boundaries, position);
            let total = edges
                .iter()
                .map(|&(start, _, score)| (forward[start] + self.alpha * score - forward[position]).exp())
                .sum::<f32>();
            let mut remaining = rng.gen_range(0.0..=total.max(f32::MIN_POSITIVE));
            let mut chosen = *edges.last().expect("unknown edges keep the lattice connected");
            for &(start, id, score) in &edges {
                remaining -= (forward[start] + self.alpha * score - forward[position]).exp();
                if remaining <= 0.0 {
                    chosen = (start, id, score);
                    break;
                }
            }
            ids.push(chosen.1);
            position = chosen.0;
        }
        ids.reverse();
        ids
    }
}

fn log_sum_exp(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        b
    } else if b == f32::NEG_INFINITY {
        a
    } else {
        let max = a.max(b);
        max + ((a - max).exp() + (b - max).exp()).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::{proto::wire, *};

    const UNK: u64 = 2;
    const CONTROL: u64 = 3;
    const NORMAL: u64 = 1;

    /// `<unk>`, `<s>`, `</s>` followed by a small scored vocabulary.
    fn model() -> Vec<u8> {
        wire::model(&[
            ("<unk>", 0.0, UNK),
            ("<s>", 0.0, CONTROL),
            ("</s>", 0.0, CONTROL),
            ("\u{2581}Hello", -1.0, NORMAL),
            ("\u{2581}He", -3.0, NORMAL),
            ("llo", -3.5, NORMAL),
            ("l", -4.0, NORMAL),
            ("o", -4.2, NORMAL),
        ])
    }

    fn tokenizer(add_bos: bool, add_eos: bool) -> SentencepieceTokenizer {
        SentencepieceTokenizer::new(&model(), 0, 0.0, add_bos, add_eos, false).unwrap()
    }

    #[test]
    fn test_best_path_prefers_high_scores() {
        // "▁Hello" (-1.0) beats "▁He" + "llo" (-6.5).
        assert_eq!(tokenizer(false, false).encode("Hello"), [3]);
    }

    #[test]
    fn test_unknown_characters_degrade() {
        let ids = tokenizer(false, false).encode("Hexlo");
        assert!(ids.contains(&0));
    }

    #[test]
    fn test_bos_eos() {
        assert_eq!(tokenizer(true, true).encode("Hello"), [1, 3, 2]);
    }

    #[test]
    fn test_sparse_layout() {
        let sentences = StringTensor::from_strings(["Hello", "Hello Hello"]).unwrap();
        let sparse = tokenizer(true, false).evaluate(&sentences);
        assert_eq!(sparse.dense_shape(), [2, 3]);
        assert_eq!(sparse.values(), [1, 3, 1, 3, 3]);
        assert_eq!(
            sparse.indices(),
            [[0, 0], [0, 1], [1, 0], [1, 1], [1, 2]],
        );
    }

    #[test]
    fn test_empty_sentence() {
        let sentences = StringTensor::from_strings([""]).unwrap();
        let sparse = tokenizer(true, true).evaluate(&sentences);
        assert_eq!(sparse.values(), [1, 2]);
        assert_eq!(sparse.dense_shape(), [1, 2]);
    }

    #[test]
    fn test_sampling_yields_valid_segmentations() {
        let tokenizer =
            SentencepieceTokenizer::new(&model(), -1, 1.0, false, false, false).unwrap();
        for _ in 0..16 {
            let ids = tokenizer.encode("Hello");
            assert!(!ids.is_empty());
            // Either the whole word or the "▁He llo" / "▁He l l o" splits.
            assert!(ids[0] == 3 || ids[0] == 4, "unexpected ids {ids:?}");
        }
    }

    #[test]
    fn test_malformed_model() {
        assert!(matches!(
            SentencepieceTokenizer::new(&[0x0A, 0xFF], 0, 0.0, false, false, false),
            Err(SentencePieceError::Load(_)),
        ));
    }
}
