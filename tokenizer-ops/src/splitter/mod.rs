//! Regex splitting of string batches into ragged substring lists.
//!
//! The split is zero-copy: the output indexes into the very same byte
//! buffer as the input, only the offset arrays are rebuilt.

use std::{ops::Range, str, str::FromStr};

use displaydoc::Display;
use regex::Regex;
use thiserror::Error;

use crate::tensor::{RaggedStringTensor, StringTensor};

/// The potential errors of the splitter.
#[derive(Debug, Display, Error)]
pub enum SplitterError {
    /// Unknown split behaviour "{0}"
    UnknownBehavior(String),
    /// Invalid split pattern: {0}
    Pattern(#[from] regex::Error),
    /// String #{index} is not valid UTF-8
    InvalidUtf8 { index: usize },
}

/// What to do with delimiter matches when splitting.
///
/// When splitting on `","` with input `"a,b,,c"`:
/// - `Removed` => `[ "a", "b", "", "c" ]`
/// - `Isolated` => `[ "a", ",", "b", ",", ",", "c" ]`
/// - `MergedWithPrevious` => `[ "a,", "b,", ",", "c" ]`
/// - `MergedWithNext` => `[ "a", ",b", ",", ",c" ]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitBehavior {
    Removed,
    Isolated,
    MergedWithPrevious,
    MergedWithNext,
}

impl SplitBehavior {
    /// The canonical attribute spelling of the behaviour.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Removed => "removed",
            Self::Isolated => "isolated",
            Self::MergedWithPrevious => "merged_with_previous",
            Self::MergedWithNext => "merged_with_next",
        }
    }
}

impl FromStr for SplitBehavior {
    type Err = SplitterError;

    fn from_str(behavior: &str) -> Result<Self, Self::Err> {
        match behavior {
            "removed" => Ok(Self::Removed),
            "isolated" => Ok(Self::Isolated),
            "merged_with_previous" => Ok(Self::MergedWithPrevious),
            "merged_with_next" => Ok(Self::MergedWithNext),
            _ => Err(SplitterError::UnknownBehavior(behavior.to_string())),
        }
    }
}

/// Splits every string of a batch on regex matches.
///
/// Accepts a ragged batch; flat batches promote via
/// `RaggedStringTensor::from` with one string per row. The output aliases
/// the input byte buffer and only re-indexes it.
pub struct RegexSplit {
    pattern: Regex,
    behavior: SplitBehavior,
    invert: bool,
}

impl RegexSplit {
    /// Compiles the split pattern.
    ///
    /// # Errors
    /// Fails on an invalid pattern.
    pub fn new(
        pattern: &str,
        behavior: SplitBehavior,
        invert: bool,
    ) -> Result<Self, SplitterError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            behavior,
            invert,
        })
    }

    /// The split pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// The configured behaviour.
    pub fn behavior(&self) -> SplitBehavior {
        self.behavior
    }

    /// Whether match and non-match roles are swapped.
    pub fn invert(&self) -> bool {
        self.invert
    }

    /// Splits every string of every row, preserving the row count.
    ///
    /// Substring offsets are shifted by each word's begin offset so that
    /// the output indexes into the shared byte buffer.
    pub fn evaluate(
        &self,
        input: &RaggedStringTensor,
    ) -> Result<RaggedStringTensor, SplitterError> {
        let strings = input.strings();
        let mut rag_begins = Vec::with_capacity(input.rows());
        let mut rag_ends = Vec::with_capacity(input.rows());
        let mut begins = Vec::new();
        let mut ends = Vec::new();

        for row in 0..input.rows() {
            rag_begins.push(begins.len() as i32);
            for word in input.row_range(row) {
                let text = str::from_utf8(strings.bytes(word))
                    .map_err(|_| SplitterError::InvalidUtf8 { index: word })?;
                let base = strings.begins()[word];
                for span in self.split_spans(text) {
                    begins.push(base + span.start as i32);
                    ends.push(base + span.end as i32);
                }
            }
            rag_ends.push(begins.len() as i32);
        }

        Ok(RaggedStringTensor {
            rag_begins,
            rag_ends,
            strings: StringTensor {
                begins,
                ends,
                chars: strings.share_chars(),
            },
        })
    }

    /// Computes the byte spans of the parts of one string.
    fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }

        // Delimiter spans: regex matches, or their complement when
        // inverted. Empty-width matches cannot delimit anything.
        let matches = self
            .pattern
            .find_iter(text)
            .map(|found| found.range())
            .filter(|span| !span.is_empty())
            .collect::<Vec<_>>();
        let delimiters = if self.invert {
            complement(&matches, text.len())
                .into_iter()
                .filter(|span| !span.is_empty())
                .collect()
        } else {
            matches
        };
        // Content spans tile the rest of the string; the ones between
        // adjacent delimiters are empty and kept for `Removed` only.
        let contents = complement(&delimiters, text.len());

        match self.behavior {
            SplitBehavior::Removed => contents,
            SplitBehavior::Isolated => {
                let mut parts = Vec::with_capacity(contents.len() + delimiters.len());
                for (content, delimiter) in contents.iter().zip(&delimiters) {
                    if !content.is_empty() {
                        parts.push(content.clone());
                    }
                    parts.push(delimiter.clone());
                }
                if let Some(last) = contents.last() {
                    if !last.is_empty() {
                        parts.push(last.clone());
                    }
                }
                parts
            }
            SplitBehavior::MergedWithPrevious => {
                let mut parts = Vec::with_capacity(contents.len());
                for (content, delimiter) in contents.iter().zip(&delimiters) {
                    parts.push(content.start..delimiter.end);
                }
                if let Some(last) = contents.last() {
                    if !last.is_empty() {
                        parts.push(last.clone());
                    }
                }
                parts
            }
            SplitBehavior::MergedWithNext => {
                let mut parts = Vec::with_capacity(contents.len());
                if let Some(first) = contents.first() {
                    if !first.is_empty() {
                        parts.push(first.clone());
                    }
                }
                for (delimiter, content) in delimiters.iter().zip(&contents[1..]) {
                    parts.push(delimiter.start..content.end);
                }
                parts
            }
        }
    }
}

/// The spans between (and around) the given disjoint ordered spans,
/// including empty ones.
fn complement(spans: &[Range<usize>], len: usize) -> Vec<Range<usize>> {
    let mut gaps = Vec::with_capacity(spans.len() + 1);
    let mut cursor = 0;
    for span in spans {
        gaps.push(cursor..span.start);
        cursor = span.end;
    }
    gaps.push(cursor..len);
    gaps
}
