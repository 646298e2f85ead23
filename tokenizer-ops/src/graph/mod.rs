//! Uniform operator contract for embedding the suite in an inference
//! graph.
//!
//! At this boundary every tensor is a flat, typed value: decomposed
//! strings cross as `(i32 begins, i32 ends, u8 chars)` triples, ragged
//! strings as quintuples and ragged id tensors as `(i32, i32, i32)`
//! triples. Each operator declares its output signatures in `validate`,
//! consumes and produces values in `evaluate` and exposes its configuring
//! scalars as `attributes`.

pub mod ops;

use displaydoc::Display;
use thiserror::Error;

use crate::{
    model::{bpe::BpeError, VocabError},
    normalizer::NormalizerError,
    packed::PackedError,
    post::{combine::CombineError, pad::PadError},
    splitter::SplitterError,
    tensor::{RaggedStringTensor, RaggedTensor, StringTensor, TensorError},
};

/// The element types crossing the operator boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementType {
    U8,
    I32,
    I64,
    F32,
    Bool,
}

/// An owned flat tensor value.
#[derive(Clone)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub enum Value {
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    Bool(Vec<bool>),
}

impl Value {
    /// The element type of the value.
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::U8(_) => ElementType::U8,
            Self::I32(_) => ElementType::I32,
            Self::I64(_) => ElementType::I64,
            Self::F32(_) => ElementType::F32,
            Self::Bool(_) => ElementType::Bool,
        }
    }

    /// The element count of the value.
    pub fn len(&self) -> usize {
        match self {
            Self::U8(buffer) => buffer.len(),
            Self::I32(buffer) => buffer.len(),
            Self::I64(buffer) => buffer.len(),
            Self::F32(buffer) => buffer.len(),
            Self::Bool(buffer) => buffer.len(),
        }
    }

    /// Whether the value holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The declared signature of the value.
    pub fn signature(&self) -> Signature {
        Signature::sized(self.element_type(), self.len())
    }
}

/// The declared type and partial shape of an operator input or output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    pub element: ElementType,
    /// Element count when statically known.
    pub len: Option<usize>,
}

impl Signature {
    /// A signature of known length.
    pub fn sized(element: ElementType, len: usize) -> Self {
        Self {
            element,
            len: Some(len),
        }
    }

    /// A signature of dynamic length.
    pub fn dynamic(element: ElementType) -> Self {
        Self { element, len: None }
    }
}

/// A scalar operator attribute, as serialized alongside the graph.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Str(String),
    I32(i32),
    F32(f32),
    Bool(bool),
}

/// Validation failures; fatal for the graph build.
#[derive(Debug, Display, Error)]
pub enum ValidateError {
    /// {op} expects {expected} inputs, got {got}
    Arity {
        op: &'static str,
        expected: usize,
        got: usize,
    },
    /// Input #{index} of {op} must be {expected:?}, got {actual:?}
    Element {
        op: &'static str,
        index: usize,
        expected: ElementType,
        actual: ElementType,
    },
    /// {op}: {message}
    Shape { op: &'static str, message: String },
}

/// Evaluation failures; fatal per call.
#[derive(Debug, Display, Error)]
pub enum EvaluateError {
    /// Mismatched inputs: {0}
    Validate(#[from] ValidateError),
    /// Inconsistent tensor: {0}
    Tensor(#[from] TensorError),
    /// Malformed packed buffer: {0}
    Packed(#[from] PackedError),
    /// Normalization failed: {0}
    Normalizer(#[from] NormalizerError),
    /// Split failed: {0}
    Splitter(#[from] SplitterError),
    /// Vocabulary lookup failed: {0}
    Vocab(#[from] VocabError),
    /// Subword encoding failed: {0}
    Bpe(#[from] BpeError),
    /// Dense packing failed: {0}
    Pad(#[from] PadError),
    /// Segment combination failed: {0}
    Combine(#[from] CombineError),
    /// Internal invariant violated in {op}: {message}
    Internal { op: &'static str, message: String },
}

/// The capability set every operator of the suite exposes.
pub trait Operator {
    /// The stable operator name.
    fn op_name(&self) -> &'static str;

    /// The scalar attributes configuring the operator.
    fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        Vec::new()
    }

    /// Checks input signatures and declares the output signatures.
    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError>;

    /// Computes output values from input values.
    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError>;
}

pub(crate) fn expect_arity(
    op: &'static str,
    got: usize,
    expected: usize,
) -> Result<(), ValidateError> {
    if got == expected {
        Ok(())
    } else {
        Err(ValidateError::Arity { op, expected, got })
    }
}

pub(crate) fn expect_element(
    op: &'static str,
    inputs: &[Signature],
    index: usize,
    expected: ElementType,
) -> Result<(), ValidateError> {
    let actual = inputs[index].element;
    if actual == expected {
        Ok(())
    } else {
        Err(ValidateError::Element {
            op,
            index,
            expected,
            actual,
        })
    }
}

/// Checks an `(i32, i32, u8)` decomposed string input at `at`.
pub(crate) fn check_string_sig(
    op: &'static str,
    inputs: &[Signature],
    at: usize,
) -> Result<(), ValidateError> {
    expect_element(op, inputs, at, ElementType::I32)?;
    expect_element(op, inputs, at + 1, ElementType::I32)?;
    expect_element(op, inputs, at + 2, ElementType::U8)
}

/// Checks an `(i32, i32, i32, i32, u8)` ragged string input at `at`.
pub(crate) fn check_ragged_string_sig(
    op: &'static str,
    inputs: &[Signature],
    at: usize,
) -> Result<(), ValidateError> {
    expect_element(op, inputs, at, ElementType::I32)?;
    expect_element(op, inputs, at + 1, ElementType::I32)?;
    check_string_sig(op, inputs, at + 2)
}

/// The output signatures of a decomposed string tensor.
pub(crate) fn string_output_sig(len: Option<usize>) -> Vec<Signature> {
    vec![
        Signature {
            element: ElementType::I32,
            len,
        },
        Signature {
            element: ElementType::I32,
            len,
        },
        Signature::dynamic(ElementType::U8),
    ]
}

/// The output signatures of a ragged string tensor.
pub(crate) fn ragged_string_output_sig(rows: Option<usize>) -> Vec<Signature> {
    vec![
        Signature {
            element: ElementType::I32,
            len: rows,
        },
        Signature {
            element: ElementType::I32,
            len: rows,
        },
        Signature::dynamic(ElementType::I32),
        Signature::dynamic(ElementType::I32),
        Signature::dynamic(ElementType::U8),
    ]
}

/// The output signatures of a ragged i32 tensor.
pub(crate) fn ragged_output_sig(rows: Option<usize>) -> Vec<Signature> {
    vec![
        Signature {
            element: ElementType::I32,
            len: rows,
        },
        Signature {
            element: ElementType::I32,
            len: rows,
        },
        Signature::dynamic(ElementType::I32),
    ]
}

pub(crate) fn value_i32<'a>(
    op: &'static str,
    inputs: &'a [Value],
    index: usize,
) -> Result<&'a [i32], EvaluateError> {
    match &inputs[index] {
        Value::I32(buffer) => Ok(buffer),
        other => Err(ValidateError::Element {
            op,
            index,
            expected: ElementType::I32,
            actual: other.element_type(),
        }
        .into()),
    }
}

pub(crate) fn value_u8<'a>(
    op: &'static str,
    inputs: &'a [Value],
    index: usize,
) -> Result<&'a [u8], EvaluateError> {
    match &inputs[index] {
        Value::U8(buffer) => Ok(buffer),
        other => Err(ValidateError::Element {
            op,
            index,
            expected: ElementType::U8,
            actual: other.element_type(),
        }
        .into()),
    }
}

pub(crate) fn scalar_i32(
    op: &'static str,
    inputs: &[Value],
    index: usize,
) -> Result<i32, EvaluateError> {
    let buffer = value_i32(op, inputs, index)?;
    if buffer.len() == 1 {
        Ok(buffer[0])
    } else {
        Err(ValidateError::Shape {
            op,
            message: format!("input #{index} must be a scalar, got {} elements", buffer.len()),
        }
        .into())
    }
}

/// Rebuilds a string tensor from the three values at `at`.
pub(crate) fn string_input(
    op: &'static str,
    inputs: &[Value],
    at: usize,
) -> Result<StringTensor, EvaluateError> {
    let begins = value_i32(op, inputs, at)?.to_vec();
    let ends = value_i32(op, inputs, at + 1)?.to_vec();
    let chars = value_u8(op, inputs, at + 2)?.to_vec();
    StringTensor::new(begins, ends, chars).map_err(Into::into)
}

/// Rebuilds a ragged string tensor from the five values at `at`.
pub(crate) fn ragged_string_input(
    op: &'static str,
    inputs: &[Value],
    at: usize,
) -> Result<RaggedStringTensor, EvaluateError> {
    let rag_begins = value_i32(op, inputs, at)?.to_vec();
    let rag_ends = value_i32(op, inputs, at + 1)?.to_vec();
    let strings = string_input(op, inputs, at + 2)?;
    RaggedStringTensor::new(rag_begins, rag_ends, strings).map_err(Into::into)
}

/// Rebuilds a ragged i32 tensor from the three values at `at`.
pub(crate) fn ragged_i32_input(
    op: &'static str,
    inputs: &[Value],
    at: usize,
) -> Result<RaggedTensor<i32>, EvaluateError> {
    let rag_begins = value_i32(op, inputs, at)?.to_vec();
    let rag_ends = value_i32(op, inputs, at + 1)?.to_vec();
    let elems = value_i32(op, inputs, at + 2)?.to_vec();
    RaggedTensor::new(rag_begins, rag_ends, elems).map_err(Into::into)
}

pub(crate) fn string_output(strings: &StringTensor) -> Vec<Value> {
    vec![
        Value::I32(strings.begins().to_vec()),
        Value::I32(strings.ends().to_vec()),
        Value::U8(strings.chars().to_vec()),
    ]
}

pub(crate) fn ragged_string_output(ragged: &RaggedStringTensor) -> Vec<Value> {
    let mut values = vec![
        Value::I32(ragged.rag_begins().to_vec()),
        Value::I32(ragged.rag_ends().to_vec()),
    ];
    values.extend(string_output(ragged.strings()));
    values
}

pub(crate) fn ragged_i32_output(ragged: &RaggedTensor<i32>) -> Vec<Value> {
    vec![
        Value::I32(ragged.rag_begins().to_vec()),
        Value::I32(ragged.rag_ends().to_vec()),
        Value::I32(ragged.elems().to_vec()),
    ]
}

/// A materialized value, used by translators for model blobs, vocabularies
/// and configuration scalars.
pub struct Constant {
    value: Value,
}

impl Constant {
    /// Wraps the value.
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Operator for Constant {
    fn op_name(&self) -> &'static str {
        "Constant"
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 0)?;
        Ok(vec![self.value.signature()])
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 0)?;
        Ok(vec![self.value.clone()])
    }
}

/// Reshapes a decomposed string tensor.
///
/// Logical shapes live with the host graph; at this flat boundary only
/// the index arrays pass through, so the operation is an identity on the
/// triple.
pub struct Reshape;

impl Operator for Reshape {
    fn op_name(&self) -> &'static str {
        "Reshape"
    }

    fn validate(&self, inputs: &[Signature]) -> Result<Vec<Signature>, ValidateError> {
        expect_arity(self.op_name(), inputs.len(), 3)?;
        check_string_sig(self.op_name(), inputs, 0)?;
        Ok(inputs.to_vec())
    }

    fn evaluate(&self, inputs: &[Value]) -> Result<Vec<Value>, EvaluateError> {
        expect_arity(self.op_name(), inputs.len(), 3)?;
        Ok(inputs.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let constant = Constant::new(Value::I32(vec![1, 2, 3]));
        assert_eq!(
            constant.validate(&[]).unwrap(),
            [Signature::sized(ElementType::I32, 3)],
        );
        assert_eq!(
            constant.evaluate(&[]).unwrap(),
            [Value::I32(vec![1, 2, 3])],
        );
        assert!(constant.validate(&[Signature::dynamic(ElementType::U8)]).is_err());
    }

    #[test]
    fn test_reshape_is_identity_on_the_triple() {
        let values = vec![
            Value::I32(vec![0]),
            Value::I32(vec![2]),
            Value::U8(b"ab".to_vec()),
        ];
        assert_eq!(Reshape.evaluate(&values).unwrap(), values);
    }

    #[test]
    fn test_signature_checks() {
        let sigs = [
            Signature::dynamic(ElementType::I32),
            Signature::dynamic(ElementType::I32),
            Signature::dynamic(ElementType::I64),
        ];
        assert!(matches!(
            check_string_sig("Test", &sigs, 0),
            Err(ValidateError::Element { index: 2, .. }),
        ));
    }
}
