//! Translation of source-framework tokenizer nodes into operators.
//!
//! The boundary to the upstream framework is a pattern-match table: for
//! every recognized node type a translator builds the corresponding
//! configured operator from the node's attributes and constant inputs.
//! Wiring the resulting operators into the host graph stays with the
//! caller.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};

use crate::{
    graph::{AttrValue, Constant, Operator, Reshape, Value},
    model::{sentencepiece::SentencepieceTokenizer, wordpiece::WordpieceTokenizer},
    packed::unpack_strings,
    splitter::{RegexSplit, SplitBehavior},
    tensor::StringTensor,
};

/// A source-framework node: its type, attributes and those inputs whose
/// values are graph constants (keyed by input index). String-tensor
/// constants use the packed `u8` wire representation.
pub struct SourceNode {
    pub op_type: String,
    pub attributes: HashMap<String, AttrValue>,
    pub constant_inputs: HashMap<usize, Value>,
}

impl SourceNode {
    fn attr_str(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(AttrValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    fn attr_i32(&self, name: &str) -> Option<i32> {
        match self.attributes.get(name) {
            Some(AttrValue::I32(value)) => Some(*value),
            _ => None,
        }
    }

    fn attr_bool(&self, name: &str) -> Option<bool> {
        match self.attributes.get(name) {
            Some(AttrValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    fn constant(&self, index: usize) -> Result<&Value> {
        self.constant_inputs
            .get(&index)
            .ok_or_else(|| anyhow!("{}: input #{index} must be a constant", self.op_type))
    }

    fn constant_u8(&self, index: usize) -> Result<&[u8]> {
        match self.constant(index)? {
            Value::U8(buffer) => Ok(buffer),
            other => bail!(
                "{}: input #{index} must be a u8 constant, got {:?} elements",
                self.op_type,
                other.element_type(),
            ),
        }
    }

    fn constant_strings(&self, index: usize) -> Result<StringTensor> {
        unpack_strings(self.constant_u8(index)?)
            .with_context(|| format!("{}: input #{index}", self.op_type))
    }

    fn constant_scalar_i32(&self, index: usize) -> Result<i32> {
        match self.constant(index)? {
            Value::I32(buffer) if buffer.len() == 1 => Ok(buffer[0]),
            Value::I64(buffer) if buffer.len() == 1 => Ok(buffer[0] as i32),
            _ => bail!("{}: input #{index} must be a scalar integer", self.op_type),
        }
    }

    fn constant_scalar_f32(&self, index: usize) -> Result<f32> {
        match self.constant(index)? {
            Value::F32(buffer) if buffer.len() == 1 => Ok(buffer[0]),
            _ => bail!("{}: input #{index} must be a scalar float", self.op_type),
        }
    }

    fn constant_scalar_bool(&self, index: usize) -> Result<bool> {
        match self.constant(index)? {
            Value::Bool(buffer) if buffer.len() == 1 => Ok(buffer[0]),
            _ => bail!("{}: input #{index} must be a scalar bool", self.op_type),
        }
    }
}

/// A translator builds one configured operator from a source node.
pub type Translator = fn(&SourceNode) -> Result<Box<dyn Operator>>;

/// The pattern-match table of recognized source nodes.
pub struct Registry {
    table: HashMap<&'static str, Translator>,
}

impl Registry {
    /// The standard table.
    pub fn standard() -> Self {
        let mut table: HashMap<&'static str, Translator> = HashMap::new();
        table.insert("SentencepieceTokenizeOp", translate_sentencepiece);
        table.insert("RegexSplitWithOffsets", translate_regex_split);
        table.insert("WordpieceTokenizeWithOffsets", translate_wordpiece);
        table.insert("LookupTableFindV2", translate_lookup_table_find);
        table.insert("Reshape", translate_reshape);
        table.insert("Const", translate_const);
        Self { table }
    }

    /// Whether the node type is recognized.
    pub fn recognizes(&self, op_type: &str) -> bool {
        self.table.contains_key(op_type)
    }

    /// Translates one node.
    ///
    /// # Errors
    /// Fails on unrecognized node types and on malformed configurations.
    pub fn translate(&self, node: &SourceNode) -> Result<Box<dyn Operator>> {
        let translator = self
            .table
            .get(node.op_type.as_str())
            .ok_or_else(|| anyhow!("unrecognized source node type {}", node.op_type))?;
        translator(node)
    }
}

/// Inputs: 0 model proto, 2..=6 the nbest/alpha/add_bos/add_eos/reverse
/// scalars; input 1 (the sentences) stays wired in the host graph.
fn translate_sentencepiece(node: &SourceNode) -> Result<Box<dyn Operator>> {
    let model = node.constant_u8(0)?;
    let nbest_size = node.constant_scalar_i32(2)?;
    let alpha = node.constant_scalar_f32(3)?;
    let add_bos = node.constant_scalar_bool(4)?;
    let add_eos = node.constant_scalar_bool(5)?;
    let reverse = node.constant_scalar_bool(6)?;
    let tokenizer =
        SentencepieceTokenizer::new(model, nbest_size, alpha, add_bos, add_eos, reverse)
            .with_context(|| format!("{}: model proto", node.op_type))?;
    Ok(Box::new(tokenizer))
}

/// Input 1 carries the delimiter pattern; behaviour and inversion come as
/// attributes, defaulting to plain removal.
fn translate_regex_split(node: &SourceNode) -> Result<Box<dyn Operator>> {
    let pattern = std::str::from_utf8(node.constant_u8(1)?)
        .with_context(|| format!("{}: pattern", node.op_type))?;
    let behavior = node
        .attr_str("behaviour")
        .map(|behaviour| behaviour.parse::<SplitBehavior>())
        .transpose()?
        .unwrap_or(SplitBehavior::Removed);
    let invert = node.attr_bool("invert").unwrap_or(false);
    Ok(Box::new(RegexSplit::new(pattern, behavior, invert)?))
}

/// Input 1 carries the vocabulary. The unknown id is not known at this
/// node; it defaults to the last vocabulary entry until a lookup node
/// supplies the real one.
fn translate_wordpiece(node: &SourceNode) -> Result<Box<dyn Operator>> {
    let vocab = node.constant_strings(1)?;
    let suffix_indicator = node.attr_str("suffix_indicator").unwrap_or("##").to_string();
    let max_bytes_per_word = node.attr_i32("max_bytes_per_word").unwrap_or(100);
    let unk_token_id = node.attr_i32("unk_token_id").unwrap_or(-1);
    Ok(Box::new(WordpieceTokenizer::new(
        &vocab,
        unk_token_id,
        &suffix_indicator,
        max_bytes_per_word as usize,
    )?))
}

/// Re-translates the coupled WordPiece node with the real unknown id:
/// input 0 carries the vocabulary, input 2 the unknown token id.
fn translate_lookup_table_find(node: &SourceNode) -> Result<Box<dyn Operator>> {
    let vocab = node.constant_strings(0)?;
    let unk_token_id = node.constant_scalar_i32(2)?;
    let suffix_indicator = node.attr_str("suffix_indicator").unwrap_or("##").to_string();
    let max_bytes_per_word = node.attr_i32("max_bytes_per_word").unwrap_or(100);
    Ok(Box::new(WordpieceTokenizer::new(
        &vocab,
        unk_token_id,
        &suffix_indicator,
        max_bytes_per_word as usize,
    )?))
}

fn translate_reshape(_node: &SourceNode) -> Result<Box<dyn Operator>> {
    Ok(Box::new(Reshape))
}

/// The constant's payload travels as constant input 0.
fn translate_const(node: &SourceNode) -> Result<Box<dyn Operator>> {
    Ok(Box::new(Constant::new(node.constant(0)?.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{graph::Signature, packed::pack_strings};

    fn node(op_type: &str) -> SourceNode {
        SourceNode {
            op_type: op_type.to_string(),
            attributes: HashMap::new(),
            constant_inputs: HashMap::new(),
        }
    }

    #[test]
    fn test_recognized_set() {
        let registry = Registry::standard();
        for op_type in [
            "SentencepieceTokenizeOp",
            "RegexSplitWithOffsets",
            "WordpieceTokenizeWithOffsets",
            "LookupTableFindV2",
            "Reshape",
            "Const",
        ] {
            assert!(registry.recognizes(op_type), "{op_type}");
        }
        assert!(!registry.recognizes("Identity"));
        assert!(Registry::standard().translate(&node("Identity")).is_err());
    }

    #[test]
    fn test_translate_regex_split() {
        let mut node = node("RegexSplitWithOffsets");
        node.constant_inputs.insert(1, Value::U8(b",".to_vec()));
        node.attributes.insert(
            "behaviour".to_string(),
            AttrValue::Str("isolated".to_string()),
        );
        let op = Registry::standard().translate(&node).unwrap();
        assert_eq!(op.op_name(), "RegexSplit");
        assert_eq!(
            op.attributes()[1],
            ("behaviour", AttrValue::Str("isolated".to_string())),
        );
    }

    #[test]
    fn test_translate_wordpiece_and_lookup() {
        let vocab = pack_strings(&StringTensor::from_strings(["[UNK]", "a"]).unwrap());

        let mut wordpiece = node("WordpieceTokenizeWithOffsets");
        wordpiece.constant_inputs.insert(1, Value::U8(vocab.clone()));
        let op = Registry::standard().translate(&wordpiece).unwrap();
        assert_eq!(op.op_name(), "WordpieceTokenizer");

        let mut lookup = node("LookupTableFindV2");
        lookup.constant_inputs.insert(0, Value::U8(vocab));
        lookup.constant_inputs.insert(2, Value::I64(vec![0]));
        let op = Registry::standard().translate(&lookup).unwrap();
        assert_eq!(op.op_name(), "WordpieceTokenizer");
        // Five ragged string inputs, three ragged id outputs.
        let sigs = op
            .validate(&crate::graph::ragged_string_output_sig(None))
            .unwrap();
        assert_eq!(sigs.len(), 3);
    }

    #[test]
    fn test_translate_const() {
        let mut constant = node("Const");
        constant
            .constant_inputs
            .insert(0, Value::I32(vec![4, 5, 6]));
        let op = Registry::standard().translate(&constant).unwrap();
        assert_eq!(op.validate(&[]).unwrap(), [Signature::sized(
            crate::graph::ElementType::I32,
            3,
        )]);
    }

    #[test]
    fn test_missing_constant_is_an_error() {
        let registry = Registry::standard();
        assert!(registry.translate(&node("RegexSplitWithOffsets")).is_err());
        assert!(registry.translate(&node("Const")).is_err());
    }
}
