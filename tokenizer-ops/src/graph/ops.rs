//! [`Operator`] implementations for the operator suite.
//!
//! Configured operators (normalizers, splitter, subword encoders) expose
//! their configuration through `attributes`; operators whose variable
//! parts arrive as graph constants (packed conversion, regex replacement,
//! dense packing, segment combination) are stateless here and read them
//! from their inputs, matching the source graphs.

use crate::{
    byte_level::BytesToChars,
    graph::{
        check_ragged_string_sig,
        check_string_sig,
        expect_arity,
        expect_element,
        ragged_i32_input,
        ragged_i32_output,
        ragged_output_sig,
        ragged_string_input,
        ragged_string_output,
        ragged_string_output_sig,
        scalar_i32,
        string_input,
        string_output,
        string_output_sig,
        value_u8,
        AttrValue,
        ElementType,
        EvaluateError,
        Operator,
        Signature,
        ValidateError,
        Value,
    },
    model::{
        bpe::BpeTokenizer,
        sentencepiece::SentencepieceTokenizer,
        wordpiece::WordpieceTokenizer,
    },
    normalizer::{CaseFold, NormalizeUnicode, RegexNormalization},
    packed::{pack_strings, unpack_strings},
    post::{combine::CombineSegments, pad::RaggedToDense},
    splitter::RegexSplit,
    tensor::RaggedStringTensor,
};

/// Unpacks a packed string buffer into a decomposed triple.
pub struct StringUnpack;

impl Operator for StringUnpack {
    fn op_name(&self) -> &'static str {
        "StringTensorUnpack"
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 1)?;
        expect_element(self.op_name(), inputs, 0, ElementType::U8)?;
        Ok(string_output_sig(None))
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 1)?;
        let packed = value_u8(self.op_name(), inputs, 0)?;
        Ok(string_output(&unpack_strings(packed)?))
    }
}

/// Packs a decomposed triple into the packed wire format.
pub struct StringPack;

impl Operator for StringPack {
    fn op_name(&self) -> &'static str {
        "StringTensorPack"
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 3)?;
        check_string_sig(self.op_name(), inputs, 0)?;
        Ok(vec![Signature::dynamic(ElementType::U8)])
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 3)?;
        let strings = string_input(self.op_name(), inputs, 0)?;
        Ok(vec![Value::U8(pack_strings(&strings))])
    }
}

impl Operator for CaseFold {
    fn op_name(&self) -> &'static str {
        "CaseFold"
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 3)?;
        check_string_sig(self.op_name(), inputs, 0)?;
        Ok(string_output_sig(inputs[0].len))
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 3)?;
        let strings = string_input(self.op_name(), inputs, 0)?;
        Ok(string_output(&CaseFold.evaluate(&strings)?))
    }
}

impl Operator for NormalizeUnicode {
    fn op_name(&self) -> &'static str {
        "NormalizeUnicode"
    }

    fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        vec![(
            "normalization_form",
            AttrValue::Str(self.form().as_str().to_string()),
        )]
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 3)?;
        check_string_sig(self.op_name(), inputs, 0)?;
        Ok(string_output_sig(inputs[0].len))
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 3)?;
        let strings = string_input(self.op_name(), inputs, 0)?;
        Ok(string_output(&NormalizeUnicode::evaluate(self, &strings)?))
    }
}

/// Global regex replacement with search and replacement patterns carried
/// as scalar string inputs 3 and 4.
///
/// The patterns are taken verbatim and compiled per call; graphs with
/// constant patterns should prefer the configured
/// [`RegexNormalization`] API.
pub struct RegexReplace;

impl Operator for RegexReplace {
    fn op_name(&self) -> &'static str {
        "RegexNormalization"
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        check_string_sig(self.op_name(), inputs, 0)?;
        expect_element(self.op_name(), inputs, 3, ElementType::U8)?;
        expect_element(self.op_name(), inputs, 4, ElementType::U8)?;
        Ok(string_output_sig(inputs[0].len))
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        let strings = string_input(self.op_name(), inputs, 0)?;
        let search = utf8_scalar(self.op_name(), inputs, 3)?;
        let replace = utf8_scalar(self.op_name(), inputs, 4)?;
        let normalization = RegexNormalization::new(search, replace)?;
        Ok(string_output(&normalization.evaluate(&strings)?))
    }
}

fn utf8_scalar<'a>(
    op: &'static str,
    inputs: &'a [Value],
    index: usize,
) -> Result<&'a str, EvaluateError> {
    std::str::from_utf8(value_u8(op, inputs, index)?).map_err(|_| {
        ValidateError::Shape {
            op,
            message: format!("input #{index} must be a UTF-8 string buffer"),
        }
        .into()
    })
}

impl Operator for RegexSplit {
    fn op_name(&self) -> &'static str {
        "RegexSplit"
    }

    fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        vec![
            ("pattern", AttrValue::Str(self.pattern().to_string())),
            (
                "behaviour",
                AttrValue::Str(self.behavior().as_str().to_string()),
            ),
            ("invert", AttrValue::Bool(self.invert())),
        ]
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        match inputs.len() {
            3 => check_string_sig(self.op_name(), inputs, 0)?,
            5 => check_ragged_string_sig(self.op_name(), inputs, 0)?,
            got => {
                return Err(ValidateError::Arity {
                    op: self.op_name(),
                    expected: 5,
                    got,
                })
            }
        }
        Ok(ragged_string_output_sig(inputs[0].len))
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        let ragged = match inputs.len() {
            3 => RaggedStringTensor::from(string_input(self.op_name(), inputs, 0)?),
            5 => ragged_string_input(self.op_name(), inputs, 0)?,
            got => {
                return Err(ValidateError::Arity {
                    op: self.op_name(),
                    expected: 5,
                    got,
                }
                .into())
            }
        };
        Ok(ragged_string_output(&RegexSplit::evaluate(self, &ragged)?))
    }
}

impl Operator for BytesToChars {
    fn op_name(&self) -> &'static str {
        "BytesToChars"
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        check_ragged_string_sig(self.op_name(), inputs, 0)?;
        Ok(ragged_string_output_sig(inputs[0].len))
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        let ragged = ragged_string_input(self.op_name(), inputs, 0)?;
        Ok(ragged_string_output(&BytesToChars.evaluate(&ragged)))
    }
}

impl Operator for WordpieceTokenizer {
    fn op_name(&self) -> &'static str {
        "WordpieceTokenizer"
    }

    fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        vec![
            (
                "suffix_indicator",
                AttrValue::Str(self.suffix_indicator().to_string()),
            ),
            (
                "max_bytes_per_word",
                AttrValue::I32(self.max_bytes_per_word() as i32),
            ),
        ]
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        check_ragged_string_sig(self.op_name(), inputs, 0)?;
        Ok(ragged_output_sig(inputs[0].len))
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        let words = ragged_string_input(self.op_name(), inputs, 0)?;
        Ok(ragged_i32_output(&WordpieceTokenizer::evaluate(
            self, &words,
        )))
    }
}

impl Operator for BpeTokenizer {
    fn op_name(&self) -> &'static str {
        "BPETokenizer"
    }

    fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        vec![
            ("unk_token", AttrValue::Str(self.unk_token().to_string())),
            ("fuse_unk", AttrValue::Bool(self.fuse_unk())),
            (
                "suffix_indicator",
                AttrValue::Str(self.suffix_indicator().to_string()),
            ),
            ("end_suffix", AttrValue::Str(self.end_suffix().to_string())),
            ("byte_fallback", AttrValue::Bool(self.byte_fallback())),
        ]
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        check_ragged_string_sig(self.op_name(), inputs, 0)?;
        Ok(ragged_output_sig(inputs[0].len))
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        let words = ragged_string_input(self.op_name(), inputs, 0)?;
        Ok(ragged_i32_output(&BpeTokenizer::evaluate(self, &words)))
    }
}

impl Operator for SentencepieceTokenizer {
    fn op_name(&self) -> &'static str {
        "SentencepieceTokenizer"
    }

    fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        vec![
            ("nbest_size", AttrValue::I32(self.nbest_size())),
            ("alpha", AttrValue::F32(self.alpha())),
            ("add_bos", AttrValue::Bool(self.add_bos())),
            ("add_eos", AttrValue::Bool(self.add_eos())),
            ("reverse", AttrValue::Bool(self.reverse())),
        ]
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 1)?;
        expect_element(self.op_name(), inputs, 0, ElementType::U8)?;
        Ok(vec![
            Signature::dynamic(ElementType::I64),
            Signature::dynamic(ElementType::I32),
            Signature::sized(ElementType::I64, 2),
        ])
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 1)?;
        let packed = value_u8(self.op_name(), inputs, 0)?;
        let sentences = unpack_strings(packed)?;
        let sparse = SentencepieceTokenizer::evaluate(self, &sentences);
        Ok(vec![
            Value::I64(sparse.indices().iter().flatten().copied().collect()),
            Value::I32(sparse.values().to_vec()),
            Value::I64(sparse.dense_shape().to_vec()),
        ])
    }
}

/// Packs a ragged id tensor into a dense matrix with mask, with the
/// target width and padding value carried as scalar inputs 3 and 4.
pub struct RaggedToDenseOp;

impl Operator for RaggedToDenseOp {
    fn op_name(&self) -> &'static str {
        "RaggedToDense"
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        for index in 0..4 {
            expect_element(self.op_name(), inputs, index, ElementType::I32)?;
        }
        expect_element(self.op_name(), inputs, 4, ElementType::I32)?;
        Ok(vec![
            Signature::dynamic(ElementType::I32),
            Signature::dynamic(ElementType::Bool),
        ])
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 5)?;
        let ragged = ragged_i32_input(self.op_name(), inputs, 0)?;
        let target_dim = scalar_i32(self.op_name(), inputs, 3)?;
        let default = scalar_i32(self.op_name(), inputs, 4)?;
        let dense = RaggedToDense::new(target_dim, default).evaluate(&ragged)?;
        Ok(vec![
            Value::I32(dense.data().to_vec()),
            Value::Bool(dense.mask().to_vec()),
        ])
    }
}

impl Operator for CombineSegments {
    fn op_name(&self) -> &'static str {
        "CombineSegments"
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        if inputs.len() < 4 || (inputs.len() - 1) % 3 != 0 {
            return Err(ValidateError::Arity {
                op: self.op_name(),
                expected: 4,
                got: inputs.len(),
            });
        }
        let segments = (inputs.len() - 1) / 3;
        for segment in 0..segments {
            for part in 0..3 {
                expect_element(self.op_name(), inputs, 3 * segment + part, ElementType::I32)?;
            }
        }
        expect_element(self.op_name(), inputs, inputs.len() - 1, ElementType::I32)?;
        if let Some(len) = inputs[inputs.len() - 1].len {
            if len != segments {
                return Err(ValidateError::Shape {
                    op: self.op_name(),
                    message: format!("{segments} segments but {len} segment ids"),
                });
            }
        }

        let mut outputs = ragged_output_sig(None);
        outputs.extend(ragged_output_sig(None));
        Ok(outputs)
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        if inputs.len() < 4 || (inputs.len() - 1) % 3 != 0 {
            return Err(ValidateError::Arity {
                op: self.op_name(),
                expected: 4,
                got: inputs.len(),
            }
            .into());
        }
        let count = (inputs.len() - 1) / 3;
        let mut segments = Vec::with_capacity(count);
        for segment in 0..count {
            segments.push(ragged_i32_input(self.op_name(), inputs, 3 * segment)?);
        }
        let segment_ids =
            crate::graph::value_i32(self.op_name(), inputs, inputs.len() - 1)?;

        let borrowed = segments.iter().collect::<Vec<_>>();
        let (combined, tags) = CombineSegments.evaluate(&borrowed, segment_ids)?;
        let mut outputs = ragged_i32_output(&combined);
        outputs.extend(ragged_i32_output(&tags));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        normalizer::NormalizationForm,
        splitter::SplitBehavior,
        tensor::StringTensor,
    };

    fn triple(strings: &[&str]) -> Vec<Value> {
        string_output(&StringTensor::from_strings(strings).unwrap())
    }

    #[test]
    fn test_unpack_pack_through_the_contract() {
        let packed = pack_strings(&StringTensor::from_strings(["ab", "c"]).unwrap());
        let unpacked = StringUnpack.evaluate(&[Value::U8(packed.clone())]).unwrap();
        assert_eq!(unpacked[0], Value::I32(vec![0, 2]));
        assert_eq!(unpacked[1], Value::I32(vec![2, 3]));
        let repacked = StringPack.evaluate(&unpacked).unwrap();
        assert_eq!(repacked[0], Value::U8(packed));
    }

    #[test]
    fn test_case_fold_contract() {
        let outputs = Operator::evaluate(&CaseFold, &triple(&["AbC"])).unwrap();
        assert_eq!(outputs[2], Value::U8(b"abc".to_vec()));
    }

    #[test]
    fn test_attributes_round_out_the_contract() {
        let normalize = NormalizeUnicode::new(NormalizationForm::Nfkc);
        assert_eq!(
            normalize.attributes(),
            [(
                "normalization_form",
                AttrValue::Str("NFKC".to_string()),
            )],
        );
        let split = RegexSplit::new(",", SplitBehavior::Removed, false).unwrap();
        assert_eq!(
            split.attributes()[1],
            ("behaviour", AttrValue::Str("removed".to_string())),
        );
    }

    #[test]
    fn test_regex_replace_patterns_as_inputs() {
        let mut inputs = triple(&["a-b"]);
        inputs.push(Value::U8(b"-".to_vec()));
        inputs.push(Value::U8(b" ".to_vec()));
        let outputs = RegexReplace.evaluate(&inputs).unwrap();
        assert_eq!(outputs[2], Value::U8(b"a b".to_vec()));
    }

    #[test]
    fn test_split_promotes_flat_input() {
        let split = RegexSplit::new(",", SplitBehavior::Removed, false).unwrap();
        let outputs = Operator::evaluate(&split, &triple(&["a,b"])).unwrap();
        assert_eq!(outputs.len(), 5);
        assert_eq!(outputs[0], Value::I32(vec![0]));
        assert_eq!(outputs[1], Value::I32(vec![2]));
        assert_eq!(outputs[2], Value::I32(vec![0, 2]));
        assert_eq!(outputs[3], Value::I32(vec![1, 3]));
    }

    #[test]
    fn test_ragged_to_dense_contract() {
        let inputs = vec![
            Value::I32(vec![0, 3]),
            Value::I32(vec![3, 5]),
            Value::I32(vec![7, 8, 9, 10, 11]),
            Value::I32(vec![4]),
            Value::I32(vec![0]),
        ];
        let outputs = RaggedToDenseOp.evaluate(&inputs).unwrap();
        assert_eq!(outputs[0], Value::I32(vec![7, 8, 9, 0, 10, 11, 0, 0]));
        assert_eq!(
            outputs[1],
            Value::Bool(vec![true, true, true, false, true, true, false, false]),
        );
    }

    #[test]
    fn test_validate_rejects_wrong_elements() {
        let sigs = [
            Signature::dynamic(ElementType::I64),
            Signature::dynamic(ElementType::I32),
            Signature::dynamic(ElementType::U8),
        ];
        assert!(Operator::validate(&CaseFold, &sigs).is_err());
        assert!(StringUnpack
            .validate(&[Signature::dynamic(ElementType::I32)])
            .is_err());
    }
}
