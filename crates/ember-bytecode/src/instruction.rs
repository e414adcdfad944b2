//! Fixed-width instruction record

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::opcode::Opcode;
use std::fmt;

/// Register operand meaning "no target"
pub const NO_TARGET: u8 = 0xFF;

/// One decoded instruction
///
/// `arg1` is the wide operand (literal index, immediate integer, jump
/// offset or register, depending on the opcode); the three byte operands
/// are registers or sub-opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Operation
    pub op: Opcode,
    /// Usually the target register
    pub arg0: u8,
    /// Wide operand
    pub arg1: i32,
    /// Byte operand
    pub arg2: u8,
    /// Byte operand
    pub arg3: u8,
}

impl Instruction {
    /// Encoded size in bytes
    pub const ENCODED_SIZE: usize = 8;

    /// Create an instruction
    pub const fn new(op: Opcode, arg0: u8, arg1: i32, arg2: u8, arg3: u8) -> Self {
        Self {
            op,
            arg0,
            arg1,
            arg2,
            arg3,
        }
    }

    /// Target index of a jump located at `index`, if this is a jump
    pub fn jump_target(&self, index: usize) -> Option<i64> {
        self.op
            .is_jump()
            .then(|| index as i64 + 1 + i64::from(self.arg1))
    }

    /// Write the instruction as `op arg0 arg2 arg3 arg1`
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_opcode(self.op);
        writer.emit_u8(self.arg0);
        writer.emit_u8(self.arg2);
        writer.emit_u8(self.arg3);
        writer.emit_i32(self.arg1);
    }

    /// Read an instruction written by [`Instruction::encode`]
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let op = reader.read_opcode()?;
        let arg0 = reader.read_u8()?;
        let arg2 = reader.read_u8()?;
        let arg3 = reader.read_u8()?;
        let arg1 = reader.read_i32()?;
        Ok(Self {
            op,
            arg0,
            arg1,
            arg2,
            arg3,
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {:>3} {:>8} {:>3} {:>3}",
            self.op.name(),
            self.arg0,
            self.arg1,
            self.arg2,
            self.arg3
        )
    }
}
