//! Per-string text normalizers.
//!
//! Every normalizer maps each string of a batch through a pure
//! `&str -> String` transform and reassembles a fresh decomposed tensor
//! with a growing byte buffer; the logical batch shape never changes.

use std::{borrow::Cow, str, str::FromStr};

use displaydoc::Display;
use regex::Regex;
use thiserror::Error;
use unicode_normalization_alignments::UnicodeNormalization;

use crate::tensor::StringTensor;

/// The potential errors of the normalizers.
#[derive(Debug, Display, Error)]
pub enum NormalizerError {
    /// Unknown Unicode normalization form "{0}"
    UnknownForm(String),
    /// Invalid search pattern: {0}
    Pattern(#[from] regex::Error),
    /// String #{index} is not valid UTF-8
    InvalidUtf8 { index: usize },
}

/// Applies the transform to each string and rebuilds the tensor.
pub(crate) fn normalize_each<'a>(
    strings: &'a StringTensor,
    mut normalize: impl FnMut(&'a str) -> Cow<'a, str>,
) -> Result<StringTensor, NormalizerError> {
    let mut begins = Vec::with_capacity(strings.len());
    let mut ends = Vec::with_capacity(strings.len());
    let mut buffer = Vec::with_capacity(strings.chars().len());
    for (index, bytes) in strings.iter().enumerate() {
        let text =
            str::from_utf8(bytes).map_err(|_| NormalizerError::InvalidUtf8 { index })?;
        begins.push(buffer.len() as i32);
        buffer.extend_from_slice(normalize(text).as_bytes());
        ends.push(buffer.len() as i32);
    }
    Ok(StringTensor {
        begins,
        ends,
        chars: buffer.into(),
    })
}

/// Locale-independent Unicode lowercasing.
pub struct CaseFold;

impl CaseFold {
    /// Lowercases every string of the batch.
    pub fn evaluate(&self, strings: &StringTensor) -> Result<StringTensor, NormalizerError> {
        normalize_each(strings, |text| {
            if text.chars().all(|c| c.is_lowercase() || !c.is_alphabetic()) {
                Cow::Borrowed(text)
            } else {
                Cow::Owned(text.chars().flat_map(char::to_lowercase).collect())
            }
        })
    }
}

/// A Unicode normalization form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormalizationForm {
    Nfd,
    Nfc,
    Nfkd,
    Nfkc,
}

impl NormalizationForm {
    /// The canonical attribute spelling of the form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nfd => "NFD",
            Self::Nfc => "NFC",
            Self::Nfkd => "NFKD",
            Self::Nfkc => "NFKC",
        }
    }
}

impl FromStr for NormalizationForm {
    type Err = NormalizerError;

    fn from_str(form: &str) -> Result<Self, Self::Err> {
        match form {
            "NFD" => Ok(Self::Nfd),
            "NFC" => Ok(Self::Nfc),
            "NFKD" => Ok(Self::Nfkd),
            "NFKC" => Ok(Self::Nfkc),
            _ => Err(NormalizerError::UnknownForm(form.to_string())),
        }
    }
}

/// Unicode normalization to one of the NFD/NFC/NFKD/NFKC forms.
pub struct NormalizeUnicode {
    form: NormalizationForm,
}

impl NormalizeUnicode {
    /// Creates a normalizer for the given form.
    pub fn new(form: NormalizationForm) -> Self {
        Self { form }
    }

    /// The configured normalization form.
    pub fn form(&self) -> NormalizationForm {
        self.form
    }

    /// Normalizes every string of the batch.
    pub fn evaluate(&self, strings: &StringTensor) -> Result<StringTensor, NormalizerError> {
        let form = self.form;
        normalize_each(strings, |text| {
            Cow::Owned(match form {
                NormalizationForm::Nfd => text.nfd().map(|(c, _)| c).collect(),
                NormalizationForm::Nfc => text.nfc().map(|(c, _)| c).collect(),
                NormalizationForm::Nfkd => text.nfkd().map(|(c, _)| c).collect(),
                NormalizationForm::Nfkc => text.nfkc().map(|(c, _)| c).collect(),
            })
        })
    }
}

/// Global regex replacement over every string of a batch.
///
/// The replacement may reference capture groups as `\1`..`\9`; search and
/// replacement are taken verbatim, without any trailing padding convention.
pub struct RegexNormalization {
    search: Regex,
    replace: String,
}

impl RegexNormalization {
    /// Compiles the search pattern and rewrites replacement backreferences.
    ///
    /// # Errors
    /// Fails on an invalid search pattern.
    pub fn new(search: &str, replace: &str) -> Result<Self, NormalizerError> {
        Ok(Self {
            search: Regex::new(search)?,
            replace: rewrite_backreferences(replace),
        })
    }

    /// The search pattern.
    pub fn search(&self) -> &str {
        self.search.as_str()
    }

    /// Replaces all matches in every string of the batch.
    pub fn evaluate(&self, strings: &StringTensor) -> Result<StringTensor, NormalizerError> {
        normalize_each(strings, |text| {
            self.search.replace_all(text, self.replace.as_str())
        })
    }
}

/// Rewrites `\1`..`\9` backreferences to the `${n}` replacement syntax and
/// neutralizes literal `$`.
fn rewrite_backreferences(replace: &str) -> String {
    let mut rewritten = String::with_capacity(replace.len());
    let mut chars = replace.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => rewritten.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(digit @ '1'..='9') => {
                    chars.next();
                    rewritten.push_str("${");
                    rewritten.push(digit);
                    rewritten.push('}');
                }
                Some('\\') => {
                    chars.next();
                    rewritten.push('\\');
                }
                _ => rewritten.push(c),
            },
            _ => rewritten.push(c),
        }
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_fold() {
        let strings = StringTensor::from_strings(["HeLLo", "ÉLÉGANT", "ß"]).unwrap();
        let folded = CaseFold.evaluate(&strings).unwrap();
        assert_eq!(folded.text(0).unwrap(), "hello");
        assert_eq!(folded.text(1).unwrap(), "élégant");
        assert_eq!(folded.text(2).unwrap(), "ß");
    }

    #[test]
    fn test_case_fold_idempotent() {
        let strings = StringTensor::from_strings(["MiXeD CaSe 123!"]).unwrap();
        let once = CaseFold.evaluate(&strings).unwrap();
        let twice = CaseFold.evaluate(&once).unwrap();
        assert_eq!(once.text(0).unwrap(), twice.text(0).unwrap());
    }

    #[test]
    fn test_unknown_form() {
        assert!(matches!(
            "NFX".parse::<NormalizationForm>(),
            Err(NormalizerError::UnknownForm(_)),
        ));
        assert_eq!(
            "NFKC".parse::<NormalizationForm>().unwrap(),
            NormalizationForm::Nfkc,
        );
    }

    #[test]
    fn test_unicode_forms() {
        let composed = StringTensor::from_strings(["élégant"]).unwrap();
        let decomposed = NormalizeUnicode::new(NormalizationForm::Nfd)
            .evaluate(&composed)
            .unwrap();
        assert_eq!(decomposed.bytes(0), "e\u{301}le\u{301}gant".as_bytes());
        let recomposed = NormalizeUnicode::new(NormalizationForm::Nfc)
            .evaluate(&decomposed)
            .unwrap();
        assert_eq!(recomposed.bytes(0), composed.bytes(0));
    }

    #[test]
    fn test_nfc_after_nfd_matches_nfc() {
        let strings = StringTensor::from_strings(["ﬁn é\u{301}"]).unwrap();
        let via_nfd = NormalizeUnicode::new(NormalizationForm::Nfc)
            .evaluate(
                &NormalizeUnicode::new(NormalizationForm::Nfd)
                    .evaluate(&strings)
                    .unwrap(),
            )
            .unwrap();
        let direct = NormalizeUnicode::new(NormalizationForm::Nfc)
            .evaluate(&strings)
            .unwrap();
        assert_eq!(via_nfd.bytes(0), direct.bytes(0));
    }

    #[test]
    fn test_regex_replace() {
        let strings = StringTensor::from_strings(["a-b--c"]).unwrap();
        let replaced = RegexNormalization::new("-+", " ")
            .unwrap()
            .evaluate(&strings)
            .unwrap();
        assert_eq!(replaced.text(0).unwrap(), "a b c");
    }

    #[test]
    fn test_regex_replace_backreference() {
        let strings = StringTensor::from_strings(["ab ab"]).unwrap();
        let replaced = RegexNormalization::new("(a)(b)", r"\2\1")
            .unwrap()
            .evaluate(&strings)
            .unwrap();
        assert_eq!(replaced.text(0).unwrap(), "ba ba");
    }

    #[test]
    fn test_regex_replace_idempotent_when_disjoint() {
        let strings = StringTensor::from_strings(["one two"]).unwrap();
        let normalization = RegexNormalization::new(r"\s+", "_").unwrap();
        let once = normalization.evaluate(&strings).unwrap();
        let twice = normalization.evaluate(&once).unwrap();
        assert_eq!(once.text(0).unwrap(), twice.text(0).unwrap());
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let strings = StringTensor::new(vec![0], vec![2], vec![0xFF, 0xFE]).unwrap();
        assert!(matches!(
            CaseFold.evaluate(&strings),
            Err(NormalizerError::InvalidUtf8 { index: 0 }),
        ));
    }
}
