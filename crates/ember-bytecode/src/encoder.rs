//! Little-endian binary writer and reader
//!
//! Shared by the instruction encoder and the closure stream format.

use crate::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur while reading a binary stream
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of stream
    #[error("Unexpected end of stream at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),
}

/// Binary writer
///
/// All multi-byte values are written little-endian; strings are a `u32`
/// length followed by UTF-8 bytes.
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the bytes written so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current write offset
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 32-bit unsigned integer
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a length-prefixed string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit an opcode byte
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Overwrite a previously emitted `u32`
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Binary reader over a borrowed buffer
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Remaining bytes
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Bytes consumed between `start` and the current position
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.buffer[start.min(self.position)..self.position]
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self
            .position
            .checked_add(N)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.position..end]);
        self.position = end;
        Ok(bytes)
    }

    // ===== Basic Reading =====

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take().map(u32::from_le_bytes)
    }

    /// Read a 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.take().map(i32::from_le_bytes)
    }

    /// Read a 64-bit signed integer
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.take().map(i64::from_le_bytes)
    }

    /// Read a 64-bit float
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.take().map(f64::from_le_bytes)
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let bytes = self.buffer[self.position..end].to_vec();
        self.position = end;
        Ok(bytes)
    }

    /// Read an opcode byte
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, self.position - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(0x42);
        writer.emit_u32(0xABCD_EF01);

        assert_eq!(writer.buffer(), &[0x42, 0x01, 0xEF, 0xCD, 0xAB]);
    }

    #[test]
    fn test_patch_u32() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u32(0);
        writer.emit_u8(7);
        writer.patch_u32(0, 0x0102_0304);

        let mut reader = BytecodeReader::new(writer.buffer());
        assert_eq!(reader.read_u32(), Ok(0x0102_0304));
        assert_eq!(reader.read_u8(), Ok(7));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_read_past_end() {
        let mut reader = BytecodeReader::new(&[1, 2]);
        assert_eq!(reader.read_u32(), Err(DecodeError::UnexpectedEnd(0)));
        assert_eq!(reader.read_u8(), Ok(1));
    }

    #[test]
    fn test_string_length_overflow() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u32(100);
        writer.emit_u8(b'a');

        let mut reader = BytecodeReader::new(writer.buffer());
        assert_eq!(reader.read_string(), Err(DecodeError::UnexpectedEnd(4)));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u32(2);
        writer.emit_u8(0xC3);
        writer.emit_u8(0x28);

        let mut reader = BytecodeReader::new(writer.buffer());
        assert_eq!(reader.read_string(), Err(DecodeError::InvalidUtf8(4)));
    }

    #[test]
    fn test_invalid_opcode() {
        let mut reader = BytecodeReader::new(&[0xEE]);
        assert_eq!(reader.read_opcode(), Err(DecodeError::InvalidOpcode(0xEE, 0)));
    }
}
