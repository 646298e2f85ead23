#![cfg_attr(doc, forbid(broken_intra_doc_links, private_intra_doc_links))]
//! A tokenization operator suite over decomposed string and ragged tensors.
//!
//! Batches of UTF-8 strings flow through the operators as parallel index
//! arrays over a shared byte buffer instead of boxed string objects. The
//! suite covers the whole pre-inference text frontend: unpacking packed
//! string buffers, normalization (case folding, Unicode forms, regex
//! replacement), regex splitting, byte-to-printable-character remapping,
//! subword encoding (SentencePiece, WordPiece, BPE) and the final packing
//! of ragged id sequences into dense id/mask matrices.
//!
//! ```no_run
//! use tokenizer_ops::{
//!     model::wordpiece::WordpieceTokenizer,
//!     normalizer::CaseFold,
//!     packed::unpack_strings,
//!     post::pad::RaggedToDense,
//!     splitter::{RegexSplit, SplitBehavior},
//!     tensor::StringTensor,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let strings = unpack_strings(&packed_bytes())?;
//!     let strings = CaseFold.evaluate(&strings)?;
//!     let words = RegexSplit::new(r"\s+", SplitBehavior::Removed, false)?.evaluate(&strings.into())?;
//!     let vocab = StringTensor::from_strings(["[UNK]", "hello", "##s"])?;
//!     let ids = WordpieceTokenizer::new(&vocab, 0, "##", 100)?.evaluate(&words);
//!     let dense = RaggedToDense::new(128, 0).evaluate(&ids)?;
//!     Ok(())
//! }
//! # fn packed_bytes() -> Vec<u8> { unimplemented!() }
//! ```
//!
//! Every operator is a pure, synchronous function over its inputs; shared
//! state is immutable after construction, so independent evaluations may
//! run concurrently.

pub mod byte_level;
pub mod graph;
pub mod model;
pub mod normalizer;
pub mod packed;
pub mod post;
pub mod splitter;
pub mod tensor;
pub mod translate;

pub use crate::{
    byte_level::BytesToChars,
    graph::{Operator, Value},
    model::{
        bpe::BpeTokenizer,
        sentencepiece::SentencepieceTokenizer,
        wordpiece::WordpieceTokenizer,
    },
    normalizer::{CaseFold, NormalizeUnicode, NormalizationForm, RegexNormalization},
    packed::{pack_strings, unpack_strings},
    post::{combine::CombineSegments, pad::RaggedToDense},
    splitter::{RegexSplit, SplitBehavior},
    tensor::{RaggedStringTensor, RaggedTensor, StringTensor},
};

/// A stack allocated string with a maximum length of eight bytes.
type SmallString = smallstr::SmallString<[u8; 8]>;
