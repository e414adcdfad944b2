//! Closure stream format
//!
//! ```text
//! "EMBR" | version u32 | proto | TAIL u32 | crc32 u32
//! proto := PART name source
//!          PART literals
//!          PART parameters
//!          PART outers
//!          PART line info
//!          PART instructions
//!          PART nested functions (count, proto*)
//!          PART stack_size flags
//! ```
//!
//! Every section is preceded by the `PART` sentinel. The checksum covers the
//! proto bytes and is checked after the structure has been read, so a damaged
//! sentinel is reported as such rather than as a checksum failure.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::instruction::Instruction;
use crate::proto::{FunctionProto, LineInfo, Literal, OuterDesc, OuterSource};
use thiserror::Error;

/// Magic number for serialized closures: "EMBR"
pub const MAGIC: [u8; 4] = *b"EMBR";

/// Current stream version
pub const VERSION: u32 = 1;

/// Section sentinel ("PART" read as a little-endian u32)
pub const TAG_PART: u32 = 0x5452_4150;

/// End-of-stream sentinel ("TAIL" read as a little-endian u32)
pub const TAG_TAIL: u32 = 0x4C49_4154;

/// Literal type tags
pub mod literal_tag {
    /// null
    pub const NULL: u8 = 0;
    /// false
    pub const FALSE: u8 = 1;
    /// true
    pub const TRUE: u8 = 2;
    /// i64 payload
    pub const INTEGER: u8 = 3;
    /// f64 payload
    pub const FLOAT: u8 = 4;
    /// string payload
    pub const STRING: u8 = 5;
}

mod outer_tag {
    pub const LOCAL: u8 = 0;
    pub const OUTER: u8 = 1;
    pub const SYMBOL: u8 = 2;
}

const FLAG_GENERATOR: u8 = 1 << 0;
const FLAG_VARPARAMS: u8 = 1 << 1;

/// Stream encoding/decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SerializeError {
    /// Underlying read failure
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected EMBR, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// A section sentinel did not match
    #[error("Sentinel mismatch at offset {offset}: expected {expected:#010x}, found {found:#010x}")]
    SentinelMismatch {
        /// Sentinel that should be present
        expected: u32,
        /// Value actually read
        found: u32,
        /// Offset of the sentinel
        offset: usize,
    },

    /// Unknown literal tag
    #[error("Invalid literal tag {tag} at offset {offset}")]
    InvalidLiteralTag {
        /// Tag byte read
        tag: u8,
        /// Offset of the tag
        offset: usize,
    },

    /// Unknown captured-variable tag
    #[error("Invalid outer value tag {tag} at offset {offset}")]
    InvalidOuterTag {
        /// Tag byte read
        tag: u8,
        /// Offset of the tag
        offset: usize,
    },

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Checksum of the bytes read
        actual: u32,
    },

    /// Bytes left after the end of the stream
    #[error("{0} trailing bytes after end of stream")]
    TrailingBytes(usize),
}

/// Encode a prototype tree into a closure stream
pub fn encode_proto(proto: &FunctionProto) -> Vec<u8> {
    let mut writer = BytecodeWriter::with_capacity(256);
    writer.emit_bytes(&MAGIC);
    writer.emit_u32(VERSION);

    let start = writer.offset();
    write_proto(&mut writer, proto);
    let checksum = crc32fast::hash(&writer.buffer()[start..]);

    writer.emit_u32(TAG_TAIL);
    writer.emit_u32(checksum);
    writer.into_bytes()
}

/// Decode a closure stream
pub fn decode_proto(data: &[u8]) -> Result<FunctionProto, SerializeError> {
    let mut reader = BytecodeReader::new(data);

    let magic_bytes = reader.read_bytes(4)?;
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&magic_bytes);
    if magic != MAGIC {
        return Err(SerializeError::InvalidMagic(magic));
    }

    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(SerializeError::UnsupportedVersion(version));
    }

    let start = reader.position();
    let proto = read_proto(&mut reader)?;
    let actual = crc32fast::hash(reader.consumed_since(start));

    expect_tag(&mut reader, TAG_TAIL)?;
    let expected = reader.read_u32()?;
    if expected != actual {
        return Err(SerializeError::ChecksumMismatch { expected, actual });
    }
    if reader.remaining() != 0 {
        return Err(SerializeError::TrailingBytes(reader.remaining()));
    }

    Ok(proto)
}

fn write_proto(w: &mut BytecodeWriter, proto: &FunctionProto) {
    w.emit_u32(TAG_PART);
    w.emit_string(&proto.name);
    w.emit_string(&proto.source_name);

    w.emit_u32(TAG_PART);
    w.emit_u32(proto.literals.len() as u32);
    for literal in &proto.literals {
        write_literal(w, literal);
    }

    w.emit_u32(TAG_PART);
    w.emit_u32(proto.parameters.len() as u32);
    for param in &proto.parameters {
        w.emit_string(param);
    }

    w.emit_u32(TAG_PART);
    w.emit_u32(proto.outer_values.len() as u32);
    for outer in &proto.outer_values {
        w.emit_string(&outer.name);
        match &outer.source {
            OuterSource::Local(reg) => {
                w.emit_u8(outer_tag::LOCAL);
                w.emit_u32(*reg);
            }
            OuterSource::Outer(idx) => {
                w.emit_u8(outer_tag::OUTER);
                w.emit_u32(*idx);
            }
            OuterSource::Symbol(name) => {
                w.emit_u8(outer_tag::SYMBOL);
                w.emit_string(name);
            }
        }
    }

    w.emit_u32(TAG_PART);
    w.emit_u32(proto.line_info.len() as u32);
    for info in &proto.line_info {
        w.emit_u32(info.line);
        w.emit_u32(info.op_index);
    }

    w.emit_u32(TAG_PART);
    w.emit_u32(proto.instructions.len() as u32);
    for instr in &proto.instructions {
        instr.encode(w);
    }

    w.emit_u32(TAG_PART);
    w.emit_u32(proto.functions.len() as u32);
    for func in &proto.functions {
        write_proto(w, func);
    }

    w.emit_u32(TAG_PART);
    w.emit_u32(proto.stack_size as u32);
    let mut flags = 0;
    if proto.is_generator {
        flags |= FLAG_GENERATOR;
    }
    if proto.varparams {
        flags |= FLAG_VARPARAMS;
    }
    w.emit_u8(flags);
}

fn write_literal(w: &mut BytecodeWriter, literal: &Literal) {
    match literal {
        Literal::Null => w.emit_u8(literal_tag::NULL),
        Literal::Bool(false) => w.emit_u8(literal_tag::FALSE),
        Literal::Bool(true) => w.emit_u8(literal_tag::TRUE),
        Literal::Integer(i) => {
            w.emit_u8(literal_tag::INTEGER);
            w.emit_i64(*i);
        }
        Literal::Float(f) => {
            w.emit_u8(literal_tag::FLOAT);
            w.emit_f64(*f);
        }
        Literal::String(s) => {
            w.emit_u8(literal_tag::STRING);
            w.emit_string(s);
        }
    }
}

fn expect_tag(r: &mut BytecodeReader<'_>, expected: u32) -> Result<(), SerializeError> {
    let offset = r.position();
    let found = r.read_u32()?;
    if found != expected {
        return Err(SerializeError::SentinelMismatch {
            expected,
            found,
            offset,
        });
    }
    Ok(())
}

/// Read a section count, capping the preallocation by what the stream can hold
fn read_count(r: &mut BytecodeReader<'_>, min_item_size: usize) -> Result<(usize, usize), SerializeError> {
    let count = r.read_u32()? as usize;
    let capacity = count.min(r.remaining() / min_item_size.max(1));
    Ok((count, capacity))
}

fn read_proto(r: &mut BytecodeReader<'_>) -> Result<FunctionProto, SerializeError> {
    expect_tag(r, TAG_PART)?;
    let name = r.read_string()?;
    let source_name = r.read_string()?;

    expect_tag(r, TAG_PART)?;
    let (count, capacity) = read_count(r, 1)?;
    let mut literals = Vec::with_capacity(capacity);
    for _ in 0..count {
        literals.push(read_literal(r)?);
    }

    expect_tag(r, TAG_PART)?;
    let (count, capacity) = read_count(r, 4)?;
    let mut parameters = Vec::with_capacity(capacity);
    for _ in 0..count {
        parameters.push(r.read_string()?);
    }

    expect_tag(r, TAG_PART)?;
    let (count, capacity) = read_count(r, 9)?;
    let mut outer_values = Vec::with_capacity(capacity);
    for _ in 0..count {
        let name = r.read_string()?;
        let offset = r.position();
        let source = match r.read_u8()? {
            outer_tag::LOCAL => OuterSource::Local(r.read_u32()?),
            outer_tag::OUTER => OuterSource::Outer(r.read_u32()?),
            outer_tag::SYMBOL => OuterSource::Symbol(r.read_string()?),
            tag => return Err(SerializeError::InvalidOuterTag { tag, offset }),
        };
        outer_values.push(OuterDesc { name, source });
    }

    expect_tag(r, TAG_PART)?;
    let (count, capacity) = read_count(r, 8)?;
    let mut line_info = Vec::with_capacity(capacity);
    for _ in 0..count {
        let line = r.read_u32()?;
        let op_index = r.read_u32()?;
        line_info.push(LineInfo { line, op_index });
    }

    expect_tag(r, TAG_PART)?;
    let (count, capacity) = read_count(r, Instruction::ENCODED_SIZE)?;
    let mut instructions = Vec::with_capacity(capacity);
    for _ in 0..count {
        instructions.push(Instruction::decode(r)?);
    }

    expect_tag(r, TAG_PART)?;
    let (count, capacity) = read_count(r, 4)?;
    let mut functions = Vec::with_capacity(capacity);
    for _ in 0..count {
        functions.push(read_proto(r)?);
    }

    expect_tag(r, TAG_PART)?;
    let stack_size = r.read_u32()? as usize;
    let flags = r.read_u8()?;

    Ok(FunctionProto {
        name,
        source_name,
        literals,
        parameters,
        outer_values,
        line_info,
        instructions,
        functions,
        stack_size,
        is_generator: flags & FLAG_GENERATOR != 0,
        varparams: flags & FLAG_VARPARAMS != 0,
    })
}

fn read_literal(r: &mut BytecodeReader<'_>) -> Result<Literal, SerializeError> {
    let offset = r.position();
    let literal = match r.read_u8()? {
        literal_tag::NULL => Literal::Null,
        literal_tag::FALSE => Literal::Bool(false),
        literal_tag::TRUE => Literal::Bool(true),
        literal_tag::INTEGER => Literal::Integer(r.read_i64()?),
        literal_tag::FLOAT => Literal::Float(r.read_f64()?),
        literal_tag::STRING => Literal::String(r.read_string()?),
        tag => return Err(SerializeError::InvalidLiteralTag { tag, offset }),
    };
    Ok(literal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;

    fn sample() -> FunctionProto {
        let mut inner = FunctionBuilder::new("inner");
        inner.outer_local("x", 1);
        inner.outer_symbol("print");
        inner.get_outer(1, 0);
        inner.ret(1);

        let mut b = FunctionBuilder::new("main");
        b.source("main.nut");
        let x = b.param("x");
        b.line(1);
        b.load(2, "text");
        b.load(3, 2.5f64);
        b.load(4, Literal::Null);
        b.load(4, true);
        b.closure(5, 0);
        b.function(inner.build());
        b.ret(x);
        b.varparams();
        b.build()
    }

    #[test]
    fn test_stream_layout() {
        let bytes = encode_proto(&sample());
        assert_eq!(&bytes[..4], b"EMBR");
        assert_eq!(&bytes[8..12], &TAG_PART.to_le_bytes());
        let tail = &bytes[bytes.len() - 8..bytes.len() - 4];
        assert_eq!(tail, &TAG_TAIL.to_le_bytes());
    }

    #[test]
    fn test_decode_matches_source() {
        let proto = sample();
        let decoded = decode_proto(&encode_proto(&proto)).unwrap();
        assert_eq!(decoded, proto);
        assert!(decoded.varparams);
        assert!(!decoded.is_generator);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode_proto(&sample());
        bytes[0] = b'X';
        assert!(matches!(
            decode_proto(&bytes),
            Err(SerializeError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_bad_version() {
        let mut bytes = encode_proto(&sample());
        bytes[4] = 9;
        assert_eq!(decode_proto(&bytes), Err(SerializeError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_sentinel_mismatch_is_fatal() {
        let mut bytes = encode_proto(&sample());
        bytes[8] ^= 0xFF;
        match decode_proto(&bytes) {
            Err(SerializeError::SentinelMismatch { expected, offset, .. }) => {
                assert_eq!(expected, TAG_PART);
                assert_eq!(offset, 8);
            }
            other => panic!("expected sentinel mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_tail() {
        let mut bytes = encode_proto(&sample());
        let at = bytes.len() - 8;
        bytes[at] ^= 0xFF;
        assert!(matches!(
            decode_proto(&bytes),
            Err(SerializeError::SentinelMismatch { expected: TAG_TAIL, .. })
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = encode_proto(&sample());
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            decode_proto(&bytes),
            Err(SerializeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = encode_proto(&sample());
        assert!(matches!(
            decode_proto(&bytes[..bytes.len() / 2]),
            Err(SerializeError::Decode(DecodeError::UnexpectedEnd(_)))
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode_proto(&sample());
        bytes.push(0);
        assert_eq!(decode_proto(&bytes), Err(SerializeError::TrailingBytes(1)));
    }
}
