//! Minimal wire-format reader for the serialized subword model.
//!
//! Only the fields the encoder needs are materialized: the scored piece
//! list, the special token ids from the trainer section and the
//! whitespace handling flags from the normalizer section. Unknown fields
//! are skipped, unknown wire types rejected.

use crate::model::sentencepiece::SentencePieceError;

/// The role of a vocabulary piece.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PieceKind {
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl PieceKind {
    fn from_wire(value: u64) -> Self {
        match value {
            2 => Self::Unknown,
            3 => Self::Control,
            4 => Self::UserDefined,
            5 => Self::Unused,
            6 => Self::Byte,
            _ => Self::Normal,
        }
    }

    /// Whether the piece may match sentence text directly.
    pub(crate) fn is_matchable(&self) -> bool {
        matches!(self, Self::Normal | Self::UserDefined)
    }
}

#[derive(Debug)]
pub(crate) struct PieceProto {
    pub(crate) piece: String,
    pub(crate) score: f32,
    pub(crate) kind: PieceKind,
}

#[derive(Debug)]
pub(crate) struct ModelProto {
    pub(crate) pieces: Vec<PieceProto>,
    pub(crate) unk_id: i32,
    pub(crate) bos_id: i32,
    pub(crate) eos_id: i32,
    pub(crate) add_dummy_prefix: bool,
    pub(crate) remove_extra_whitespaces: bool,
    pub(crate) escape_whitespaces: bool,
}

impl ModelProto {
    /// Parses the serialized model.
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, SentencePieceError> {
        let mut model = Self {
            pieces: Vec::new(),
            unk_id: 0,
            bos_id: 1,
            eos_id: 2,
            add_dummy_prefix: true,
            remove_extra_whitespaces: true,
            escape_whitespaces: true,
        };

        let mut reader = Reader::new(bytes);
        while !reader.done() {
            let (field, wire) = reader.tag()?;
            match (field, wire) {
                (1, WIRE_LEN) => model.pieces.push(parse_piece(reader.delimited()?)?),
                (2, WIRE_LEN) => parse_trainer(reader.delimited()?, &mut model)?,
                (3, WIRE_LEN) => parse_normalizer(reader.delimited()?, &mut model)?,
                _ => reader.skip(wire)?,
            }
        }
        Ok(model)
    }
}

fn parse_piece(bytes: &[u8]) -> Result<PieceProto, SentencePieceError> {
    let mut piece = PieceProto {
        piece: String::new(),
        score: 0.0,
        kind: PieceKind::Normal,
    };
    let mut reader = Reader::new(bytes);
    while !reader.done() {
        let (field, wire) = reader.tag()?;
        match (field, wire) {
            (1, WIRE_LEN) => {
                piece.piece = std::str::from_utf8(reader.delimited()?)
                    .map_err(|_| SentencePieceError::Load("piece is not valid UTF-8"))?
                    .to_string();
            }
            (2, WIRE_FIXED32) => piece.score = f32::from_le_bytes(reader.fixed32()?),
            (3, WIRE_VARINT) => piece.kind = PieceKind::from_wire(reader.varint()?),
            _ => reader.skip(wire)?,
        }
    }
    Ok(piece)
}

fn parse_trainer(bytes: &[u8], model: &mut ModelProto) -> Result<(), SentencePieceError> {
    let mut reader = Reader::new(bytes);
    while !reader.done() {
        let (field, wire) = reader.tag()?;
        match (field, wire) {
            (40, WIRE_VARINT) => model.unk_id = reader.varint()? as i32,
            (41, WIRE_VARINT) => model.bos_id = reader.varint()? as i32,
            (42, WIRE_VARINT) => model.eos_id = reader.varint()? as i32,
            _ => reader.skip(wire)?,
        }
    }
    Ok(())
}

fn parse_normalizer(bytes: &[u8], model: &mut ModelProto) -> Result<(), SentencePieceError> {
    let mut reader = Reader::new(bytes);
    while !reader.done() {
        let (field, wire) = reader.tag()?;
        match (field, wire) {
            (3, WIRE_VARINT) => model.add_dummy_prefix = reader.varint()? != 0,
            (4, WIRE_VARINT) => model.remove_extra_whitespaces = reader.varint()? != 0,
            (5, WIRE_VARINT) => model.escape_whitespaces = reader.varint()? != 0,
            _ => reader.skip(wire)?,
        }
    }
    Ok(())
}

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn varint(&mut self) -> Result<u64, SentencePieceError> {
        let mut value = 0_u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .bytes
                .get(self.pos)
                .ok_or(SentencePieceError::Load("truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(SentencePieceError::Load("oversized varint"))
    }

    fn tag(&mut self) -> Result<(u32, u8), SentencePieceError> {
        let tag = self.varint()?;
        Ok(((tag >> 3) as u32, (tag & 0x7) as u8))
    }

    fn delimited(&mut self) -> Result<&'a [u8], SentencePieceError> {
        let len = self.varint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(SentencePieceError::Load("truncated field"))?;
        let bytes = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn fixed32(&mut self) -> Result<[u8; 4], SentencePieceError> {
        let end = self.pos + 4;
        let bytes = self
            .bytes
            .get(self.pos..end)
            .ok_or(SentencePieceError::Load("truncated fixed32 field"))?;
        self.pos = end;
        Ok(bytes.try_into().expect("4 byte slice"))
    }

    fn skip(&mut self, wire: u8) -> Result<(), SentencePieceError> {
        match wire {
            WIRE_VARINT => self.varint().map(drop),
            WIRE_FIXED64 => {
                let end = self.pos + 8;
                if end > self.bytes.len() {
                    return Err(SentencePieceError::Load("truncated fixed64 field"));
                }
                self.pos = end;
                Ok(())
            }
            WIRE_LEN => self.delimited().map(drop),
            WIRE_FIXED32 => self.fixed32().map(drop),
            _ => Err(SentencePieceError::Load("unsupported wire type")),
        }
    }
}

#[cfg(test)]
pub(crate) mod wire {
    //! Tiny writer used by tests to assemble serialized models.

    pub(crate) fn varint(buffer: &mut Vec<u8>, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                buffer.push(byte);
                break;
            }
            buffer.push(byte | 0x80);
        }
    }

    pub(crate) fn delimited(buffer: &mut Vec<u8>, field: u32, bytes: &[u8]) {
        varint(buffer, u64::from(field) << 3 | 2);
        varint(buffer, bytes.len() as u64);
        buffer.extend_from_slice(bytes);
    }

    pub(crate) fn int_field(buffer: &mut Vec<u8>, field: u32, value: u64) {
        varint(buffer, u64::from(field) << 3);
        varint(buffer, value);
    }

    pub(crate) fn float_field(buffer: &mut Vec<u8>, field: u32, value: f32) {
        varint(buffer, u64::from(field) << 3 | 5);
        buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Serializes a unigram model with the given scored pieces.
    pub(crate) fn model(pieces: &[(&str, f32, u64)]) -> Vec<u8> {
        let mut buffer = Vec::new();
        for &(piece, score, kind) in pieces {
            let mut body = Vec::new();
            delimited(&mut body, 1, piece.as_bytes());
            float_field(&mut body, 2, score);
            int_field(&mut body, 3, kind);
            delimited(&mut buffer, 1, &body);
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pieces_and_defaults() {
        let bytes = wire::model(&[("<unk>", 0.0, 2), ("▁he", -1.5, 1), ("llo", -2.0, 1)]);
        let model = ModelProto::parse(&bytes).unwrap();
        assert_eq!(model.pieces.len(), 3);
        assert_eq!(model.pieces[0].kind, PieceKind::Unknown);
        assert_eq!(model.pieces[1].piece, "▁he");
        assert_eq!(model.pieces[1].score, -1.5);
        assert_eq!((model.unk_id, model.bos_id, model.eos_id), (0, 1, 2));
        assert!(model.add_dummy_prefix);
    }

    #[test]
    fn test_parse_trainer_and_normalizer() {
        let mut bytes = wire::model(&[("<unk>", 0.0, 2)]);
        let mut trainer = Vec::new();
        wire::int_field(&mut trainer, 40, 3);
        wire::int_field(&mut trainer, 41, 4);
        wire::int_field(&mut trainer, 42, 5);
        wire::delimited(&mut bytes, 2, &trainer);
        let mut normalizer = Vec::new();
        wire::int_field(&mut normalizer, 3, 0);
        wire::delimited(&mut bytes, 3, &normalizer);

        let model = ModelProto::parse(&bytes).unwrap();
        assert_eq!((model.unk_id, model.bos_id, model.eos_id), (3, 4, 5));
        assert!(!model.add_dummy_prefix);
        assert!(model.remove_extra_whitespaces);
    }

    #[test]
    fn test_rejects_truncated() {
        let bytes = wire::model(&[("<unk>", 0.0, 2)]);
        assert!(matches!(
            ModelProto::parse(&bytes[..bytes.len() - 1]),
            Err(SentencePieceError::Load(_)),
        ));
    }

    #[test]
    fn test_skips_unknown_fields() {
        let mut bytes = Vec::new();
        wire::int_field(&mut bytes, 99, 7);
        wire::delimited(&mut bytes, 98, b"ignored");
        let tail = wire::model(&[("a", -1.0, 1)]);
        bytes.extend_from_slice(&tail);
        let model = ModelProto::parse(&bytes).unwrap();
        assert_eq!(model.pieces.len(), 1);
    }
}
