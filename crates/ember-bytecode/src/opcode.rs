//! Bytecode opcodes for the Ember VM
//!
//! Every instruction is a fixed-width record (see [`crate::Instruction`]).
//! Operands name registers relative to the current frame base unless the
//! table below says otherwise; jump offsets are relative to the instruction
//! following the jump.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Loads & moves
//! - 0x10-0x1F: Slot access
//! - 0x20-0x2F: Arithmetic & logic
//! - 0x30-0x3F: Comparison
//! - 0x40-0x4F: Control flow
//! - 0x50-0x5F: Calls
//! - 0x60-0x6F: Closures & outer values
//! - 0x70-0x7F: Object construction & reflection
//! - 0x80-0x8F: Exception traps
//! - 0x90-0x9F: Generators & iteration

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Loads & Moves (0x00-0x0F) =====
    /// r[a0] = literal[a1]
    Load = 0x00,
    /// r[a0] = Integer(a1)
    LoadInt = 0x01,
    /// r[a0] = Float(f32::from_bits(a1))
    LoadFloat = 0x02,
    /// r[a0 .. a0+a1] = null
    LoadNulls = 0x03,
    /// r[a0] = a1 != 0
    LoadBool = 0x04,
    /// r[a0] = root table
    LoadRoot = 0x05,
    /// r[a0] = r[a1]
    Move = 0x06,

    // ===== Slot Access (0x10-0x1F) =====
    /// r[a0] = r[a1][r[a2]]
    Get = 0x10,
    /// r[a0] = r[a2][literal[a1]]
    GetK = 0x11,
    /// r[a1][r[a2]] = r[a3], optional copy to r[a0]
    Set = 0x12,
    /// r[a1][r[a2]] <- r[a3], optional copy to r[a0]
    NewSlot = 0x13,
    /// r[a0] = delete r[a1][r[a2]]
    Delete = 0x14,

    // ===== Arithmetic & Logic (0x20-0x2F) =====
    /// r[a0] = r[a1] + r[a2]
    Add = 0x20,
    /// r[a0] = r[a1] - r[a2]
    Sub = 0x21,
    /// r[a0] = r[a1] * r[a2]
    Mul = 0x22,
    /// r[a0] = r[a1] / r[a2]
    Div = 0x23,
    /// r[a0] = r[a1] % r[a2]
    Mod = 0x24,
    /// r[a0] = r[a1] (bit op a3) r[a2]
    Bitw = 0x25,
    /// r[a0] = -r[a1]
    Neg = 0x26,
    /// r[a0] = !r[a1]
    Not = 0x27,

    // ===== Comparison (0x30-0x3F) =====
    /// r[a0] = r[a1] (cmp op a3) r[a2]
    Cmp = 0x30,
    /// r[a0] = r[a2] == (a3 ? literal[a1] : r[a1])
    Eq = 0x31,
    /// r[a0] = r[a2] != (a3 ? literal[a1] : r[a1])
    Ne = 0x32,

    // ===== Control Flow (0x40-0x4F) =====
    /// ip += a1
    Jmp = 0x40,
    /// if !r[a0] { ip += a1 }
    Jz = 0x41,
    /// if !r[a2] { r[a0] = r[a2]; ip += a1 }
    And = 0x42,
    /// if r[a2] { r[a0] = r[a2]; ip += a1 }
    Or = 0x43,

    // ===== Calls (0x50-0x5F) =====
    /// r[a3] = r[a2]; r[a0] = r[a2][r[a1]]
    PrepCall = 0x50,
    /// r[a3] = r[a2]; r[a0] = r[a2][literal[a1]]
    PrepCallK = 0x51,
    /// r[a0] = r[a1](r[a2] .. r[a2+a3])
    Call = 0x52,
    /// Like CALL, reusing the current frame for script callees
    TailCall = 0x53,
    /// Return r[a1], or null when a0 is 0xFF
    Return = 0x54,

    // ===== Closures & Outer Values (0x60-0x6F) =====
    /// r[a0] = closure over functions[a1]
    Closure = 0x60,
    /// r[a0] = outer[a1]
    GetOuter = 0x61,
    /// outer[a1] = r[a2], optional copy to r[a0]
    SetOuter = 0x62,

    // ===== Objects (0x70-0x7F) =====
    /// r[a0] = new object of kind a3
    NewObj = 0x70,
    /// r[a0].push(operand a1 of kind a2)
    AppendArray = 0x71,
    /// r[a0] = r[a1] with delegate r[a2]
    Delegate = 0x72,
    /// r[a0] = r[a2] instanceof r[a1]
    InstanceOf = 0x73,
    /// r[a0] = typeof r[a1]
    TypeOf = 0x74,

    // ===== Exception Traps (0x80-0x8F) =====
    /// Push a trap catching into r[a0] and continuing at ip + a1
    PushTrap = 0x80,
    /// Pop a0 traps
    PopTrap = 0x81,
    /// Throw r[a0]
    Throw = 0x82,

    // ===== Generators & Iteration (0x90-0x9F) =====
    /// Yield r[a1], or null when a0 is 0xFF
    Yield = 0x90,
    /// r[a0] = resume r[a1]
    Resume = 0x91,
    /// Step the iteration of r[a0] into r[a2..a2+3], ip += a1 when exhausted
    Foreach = 0x92,
    /// ip += a1 when r[a0] is a finished generator
    PostForeach = 0x93,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Load),
            0x01 => Some(Self::LoadInt),
            0x02 => Some(Self::LoadFloat),
            0x03 => Some(Self::LoadNulls),
            0x04 => Some(Self::LoadBool),
            0x05 => Some(Self::LoadRoot),
            0x06 => Some(Self::Move),

            0x10 => Some(Self::Get),
            0x11 => Some(Self::GetK),
            0x12 => Some(Self::Set),
            0x13 => Some(Self::NewSlot),
            0x14 => Some(Self::Delete),

            0x20 => Some(Self::Add),
            0x21 => Some(Self::Sub),
            0x22 => Some(Self::Mul),
            0x23 => Some(Self::Div),
            0x24 => Some(Self::Mod),
            0x25 => Some(Self::Bitw),
            0x26 => Some(Self::Neg),
            0x27 => Some(Self::Not),

            0x30 => Some(Self::Cmp),
            0x31 => Some(Self::Eq),
            0x32 => Some(Self::Ne),

            0x40 => Some(Self::Jmp),
            0x41 => Some(Self::Jz),
            0x42 => Some(Self::And),
            0x43 => Some(Self::Or),

            0x50 => Some(Self::PrepCall),
            0x51 => Some(Self::PrepCallK),
            0x52 => Some(Self::Call),
            0x53 => Some(Self::TailCall),
            0x54 => Some(Self::Return),

            0x60 => Some(Self::Closure),
            0x61 => Some(Self::GetOuter),
            0x62 => Some(Self::SetOuter),

            0x70 => Some(Self::NewObj),
            0x71 => Some(Self::AppendArray),
            0x72 => Some(Self::Delegate),
            0x73 => Some(Self::InstanceOf),
            0x74 => Some(Self::TypeOf),

            0x80 => Some(Self::PushTrap),
            0x81 => Some(Self::PopTrap),
            0x82 => Some(Self::Throw),

            0x90 => Some(Self::Yield),
            0x91 => Some(Self::Resume),
            0x92 => Some(Self::Foreach),
            0x93 => Some(Self::PostForeach),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Mnemonic used by the disassembler
    pub fn name(self) -> &'static str {
        match self {
            Self::Load => "LOAD",
            Self::LoadInt => "LOADINT",
            Self::LoadFloat => "LOADFLOAT",
            Self::LoadNulls => "LOADNULLS",
            Self::LoadBool => "LOADBOOL",
            Self::LoadRoot => "LOADROOT",
            Self::Move => "MOVE",
            Self::Get => "GET",
            Self::GetK => "GETK",
            Self::Set => "SET",
            Self::NewSlot => "NEWSLOT",
            Self::Delete => "DELETE",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Bitw => "BITW",
            Self::Neg => "NEG",
            Self::Not => "NOT",
            Self::Cmp => "CMP",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Jmp => "JMP",
            Self::Jz => "JZ",
            Self::And => "AND",
            Self::Or => "OR",
            Self::PrepCall => "PREPCALL",
            Self::PrepCallK => "PREPCALLK",
            Self::Call => "CALL",
            Self::TailCall => "TAILCALL",
            Self::Return => "RETURN",
            Self::Closure => "CLOSURE",
            Self::GetOuter => "GETOUTER",
            Self::SetOuter => "SETOUTER",
            Self::NewObj => "NEWOBJ",
            Self::AppendArray => "APPENDARRAY",
            Self::Delegate => "DELEGATE",
            Self::InstanceOf => "INSTANCEOF",
            Self::TypeOf => "TYPEOF",
            Self::PushTrap => "PUSHTRAP",
            Self::PopTrap => "POPTRAP",
            Self::Throw => "THROW",
            Self::Yield => "YIELD",
            Self::Resume => "RESUME",
            Self::Foreach => "FOREACH",
            Self::PostForeach => "POSTFOREACH",
        }
    }

    /// Whether arg1 of this opcode is a relative jump offset
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jmp
                | Self::Jz
                | Self::And
                | Self::Or
                | Self::PushTrap
                | Self::Foreach
                | Self::PostForeach
        )
    }
}

/// Comparison selected by arg3 of CMP
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `>`
    Gt = 0,
    /// `>=`
    Ge = 1,
    /// `<`
    Lt = 2,
    /// `<=`
    Le = 3,
    /// `<=>`, producing -1, 0 or 1
    ThreeWay = 4,
}

impl CmpOp {
    /// Convert a byte to a comparison
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Gt),
            1 => Some(Self::Ge),
            2 => Some(Self::Lt),
            3 => Some(Self::Le),
            4 => Some(Self::ThreeWay),
            _ => None,
        }
    }
}

/// Bitwise operation selected by arg3 of BITW
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    /// `&`
    And = 0,
    /// `|`
    Or = 1,
    /// `^`
    Xor = 2,
    /// `<<`
    Shl = 3,
    /// Arithmetic `>>`
    Shr = 4,
    /// Logical `>>>`
    UShr = 5,
}

impl BitOp {
    /// Convert a byte to a bitwise operation
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::And),
            1 => Some(Self::Or),
            2 => Some(Self::Xor),
            3 => Some(Self::Shl),
            4 => Some(Self::Shr),
            5 => Some(Self::UShr),
            _ => None,
        }
    }
}

/// Object kind created by NEWOBJ (arg3)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewObjKind {
    /// Empty table
    Table = 0,
    /// Empty array with capacity a1
    Array = 1,
    /// Class, inheriting from r[a1] when a1 >= 0
    Class = 2,
}

impl NewObjKind {
    /// Convert a byte to an object kind
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Table),
            1 => Some(Self::Array),
            2 => Some(Self::Class),
            _ => None,
        }
    }
}

/// Operand kind of APPENDARRAY (arg2)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendKind {
    /// Append r[a1]
    Register = 0,
    /// Append literal[a1]
    Literal = 1,
    /// Append Integer(a1)
    Integer = 2,
}

impl AppendKind {
    /// Convert a byte to an append kind
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Register),
            1 => Some(Self::Literal),
            2 => Some(Self::Integer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op.to_u8(), byte);
            }
        }
    }

    #[test]
    fn test_jump_classification() {
        assert!(Opcode::Jz.is_jump());
        assert!(Opcode::Foreach.is_jump());
        assert!(!Opcode::Call.is_jump());
    }

    #[test]
    fn test_sub_operands() {
        assert_eq!(CmpOp::from_u8(4), Some(CmpOp::ThreeWay));
        assert_eq!(CmpOp::from_u8(5), None);
        assert_eq!(BitOp::from_u8(5), Some(BitOp::UShr));
        assert_eq!(NewObjKind::from_u8(2), Some(NewObjKind::Class));
        assert_eq!(AppendKind::from_u8(3), None);
    }
}
