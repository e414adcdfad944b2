//! Structural prototype verification
//!
//! Checks that every operand of every instruction stays inside the frame,
//! the literal pool, the nested-function list and the outer-value list, and
//! that jumps land on an instruction. Runs recursively over nested
//! prototypes, validating their captures against the enclosing prototype.

use crate::instruction::{Instruction, NO_TARGET};
use crate::opcode::{AppendKind, BitOp, CmpOp, NewObjKind, Opcode};
use crate::proto::{FunctionProto, OuterSource};

/// Prototype verification errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    /// Jump outside the instruction array
    #[error("Invalid jump target {target} at instruction {offset} of '{function}'")]
    InvalidJumpTarget {
        /// Function name
        function: String,
        /// Computed target
        target: i64,
        /// Instruction index
        offset: usize,
    },

    /// Register outside the frame
    #[error("Register {register} out of frame (stack size {max}) at instruction {offset} of '{function}'")]
    InvalidRegister {
        /// Function name
        function: String,
        /// Register referenced
        register: i64,
        /// Frame size
        max: usize,
        /// Instruction index
        offset: usize,
    },

    /// Literal index outside the pool
    #[error("Invalid literal reference {index} at instruction {offset} of '{function}'")]
    InvalidLiteralRef {
        /// Function name
        function: String,
        /// Index referenced
        index: i32,
        /// Instruction index
        offset: usize,
    },

    /// Nested function index out of range
    #[error("Invalid function reference {index} at instruction {offset} of '{function}'")]
    InvalidFunctionRef {
        /// Function name
        function: String,
        /// Index referenced
        index: i32,
        /// Instruction index
        offset: usize,
    },

    /// Outer value index out of range
    #[error("Invalid outer value reference {index} at instruction {offset} of '{function}'")]
    InvalidOuterRef {
        /// Function name
        function: String,
        /// Index referenced
        index: i32,
        /// Instruction index
        offset: usize,
    },

    /// Sub-operation byte not recognized
    #[error("Invalid operand for {opcode:?} at instruction {offset} of '{function}'")]
    InvalidOperand {
        /// Function name
        function: String,
        /// Opcode
        opcode: Opcode,
        /// Instruction index
        offset: usize,
    },

    /// Capture descriptor that cannot be satisfied by the enclosing function
    #[error("Outer value '{name}' of '{function}' cannot be captured from its parent")]
    InvalidCapture {
        /// Function name
        function: String,
        /// Captured variable
        name: String,
    },

    /// Frame smaller than the parameter list
    #[error("Stack size {stack_size} of '{function}' is smaller than its {params} parameters")]
    StackTooSmall {
        /// Function name
        function: String,
        /// Declared stack size
        stack_size: usize,
        /// Parameter count
        params: usize,
    },
}

/// Verify a prototype tree
pub fn verify_proto(proto: &FunctionProto) -> Result<(), VerifyError> {
    verify_function(proto, None)
}

fn verify_function(proto: &FunctionProto, parent: Option<&FunctionProto>) -> Result<(), VerifyError> {
    if proto.stack_size < proto.param_count() {
        return Err(VerifyError::StackTooSmall {
            function: proto.name.clone(),
            stack_size: proto.stack_size,
            params: proto.param_count(),
        });
    }

    if let Some(parent) = parent {
        for outer in &proto.outer_values {
            let ok = match &outer.source {
                OuterSource::Local(reg) => (*reg as usize) < parent.stack_size,
                OuterSource::Outer(idx) => (*idx as usize) < parent.outer_values.len(),
                OuterSource::Symbol(_) => true,
            };
            if !ok {
                return Err(VerifyError::InvalidCapture {
                    function: proto.name.clone(),
                    name: outer.name.clone(),
                });
            }
        }
    }

    let checker = Checker { proto };
    for (offset, instr) in proto.instructions.iter().enumerate() {
        checker.instruction(offset, instr)?;
    }

    for func in &proto.functions {
        verify_function(func, Some(proto))?;
    }
    Ok(())
}

struct Checker<'a> {
    proto: &'a FunctionProto,
}

impl Checker<'_> {
    fn name(&self) -> String {
        self.proto.name.clone()
    }

    fn reg(&self, offset: usize, register: i64) -> Result<(), VerifyError> {
        if register < 0 || register as usize >= self.proto.stack_size {
            return Err(VerifyError::InvalidRegister {
                function: self.name(),
                register,
                max: self.proto.stack_size,
                offset,
            });
        }
        Ok(())
    }

    fn reg8(&self, offset: usize, register: u8) -> Result<(), VerifyError> {
        self.reg(offset, i64::from(register))
    }

    fn target(&self, offset: usize, register: u8) -> Result<(), VerifyError> {
        if register == NO_TARGET {
            return Ok(());
        }
        self.reg8(offset, register)
    }

    fn literal(&self, offset: usize, index: i32) -> Result<(), VerifyError> {
        if index < 0 || index as usize >= self.proto.literals.len() {
            return Err(VerifyError::InvalidLiteralRef {
                function: self.name(),
                index,
                offset,
            });
        }
        Ok(())
    }

    fn outer(&self, offset: usize, index: i32) -> Result<(), VerifyError> {
        if index < 0 || index as usize >= self.proto.outer_values.len() {
            return Err(VerifyError::InvalidOuterRef {
                function: self.name(),
                index,
                offset,
            });
        }
        Ok(())
    }

    fn operand(&self, offset: usize, opcode: Opcode, valid: bool) -> Result<(), VerifyError> {
        if !valid {
            return Err(VerifyError::InvalidOperand {
                function: self.name(),
                opcode,
                offset,
            });
        }
        Ok(())
    }

    fn jump(&self, offset: usize, instr: &Instruction) -> Result<(), VerifyError> {
        if let Some(target) = instr.jump_target(offset) {
            if target < 0 || target as usize >= self.proto.instructions.len() {
                return Err(VerifyError::InvalidJumpTarget {
                    function: self.name(),
                    target,
                    offset,
                });
            }
        }
        Ok(())
    }

    fn instruction(&self, offset: usize, instr: &Instruction) -> Result<(), VerifyError> {
        use Opcode::*;

        self.jump(offset, instr)?;
        let a1 = i64::from(instr.arg1);
        match instr.op {
            Load => {
                self.reg8(offset, instr.arg0)?;
                self.literal(offset, instr.arg1)
            }
            LoadInt | LoadFloat | LoadBool | LoadRoot => self.reg8(offset, instr.arg0),
            LoadNulls => {
                self.operand(offset, instr.op, instr.arg1 >= 0)?;
                if instr.arg1 > 0 {
                    self.reg8(offset, instr.arg0)?;
                    self.reg(offset, i64::from(instr.arg0) + a1 - 1)?;
                }
                Ok(())
            }
            Move | Neg | Not | TypeOf => {
                self.reg8(offset, instr.arg0)?;
                self.reg(offset, a1)
            }
            Get | Delete | Add | Sub | Mul | Div | Mod | Delegate | InstanceOf => {
                self.reg8(offset, instr.arg0)?;
                self.reg(offset, a1)?;
                self.reg8(offset, instr.arg2)
            }
            Bitw => {
                self.operand(offset, instr.op, BitOp::from_u8(instr.arg3).is_some())?;
                self.reg8(offset, instr.arg0)?;
                self.reg(offset, a1)?;
                self.reg8(offset, instr.arg2)
            }
            Cmp => {
                self.operand(offset, instr.op, CmpOp::from_u8(instr.arg3).is_some())?;
                self.reg8(offset, instr.arg0)?;
                self.reg(offset, a1)?;
                self.reg8(offset, instr.arg2)
            }
            GetK => {
                self.reg8(offset, instr.arg0)?;
                self.reg8(offset, instr.arg2)?;
                self.literal(offset, instr.arg1)
            }
            Set | NewSlot => {
                self.target(offset, instr.arg0)?;
                self.reg(offset, a1)?;
                self.reg8(offset, instr.arg2)?;
                self.reg8(offset, instr.arg3)
            }
            Eq | Ne => {
                self.reg8(offset, instr.arg0)?;
                self.reg8(offset, instr.arg2)?;
                if instr.arg3 != 0 {
                    self.literal(offset, instr.arg1)
                } else {
                    self.reg(offset, a1)
                }
            }
            Jmp | PopTrap => Ok(()),
            Jz | PushTrap | PostForeach => self.reg8(offset, instr.arg0),
            And | Or => {
                self.reg8(offset, instr.arg0)?;
                self.reg8(offset, instr.arg2)
            }
            PrepCall => {
                self.reg8(offset, instr.arg0)?;
                self.reg(offset, a1)?;
                self.reg8(offset, instr.arg2)?;
                self.reg8(offset, instr.arg3)
            }
            PrepCallK => {
                self.reg8(offset, instr.arg0)?;
                self.literal(offset, instr.arg1)?;
                self.reg8(offset, instr.arg2)?;
                self.reg8(offset, instr.arg3)
            }
            Call | TailCall => {
                self.target(offset, instr.arg0)?;
                self.reg(offset, a1)?;
                self.operand(offset, instr.op, instr.arg3 > 0)?;
                self.reg8(offset, instr.arg2)?;
                self.reg(offset, i64::from(instr.arg2) + i64::from(instr.arg3) - 1)
            }
            Return | Yield => {
                if instr.arg0 != NO_TARGET {
                    self.reg(offset, a1)?;
                }
                Ok(())
            }
            Closure => {
                self.reg8(offset, instr.arg0)?;
                if instr.arg1 < 0 || instr.arg1 as usize >= self.proto.functions.len() {
                    return Err(VerifyError::InvalidFunctionRef {
                        function: self.name(),
                        index: instr.arg1,
                        offset,
                    });
                }
                Ok(())
            }
            GetOuter => {
                self.reg8(offset, instr.arg0)?;
                self.outer(offset, instr.arg1)
            }
            SetOuter => {
                self.target(offset, instr.arg0)?;
                self.reg8(offset, instr.arg2)?;
                self.outer(offset, instr.arg1)
            }
            NewObj => {
                self.reg8(offset, instr.arg0)?;
                match NewObjKind::from_u8(instr.arg3) {
                    Some(NewObjKind::Class) if instr.arg1 >= 0 => self.reg(offset, a1),
                    Some(_) => Ok(()),
                    None => self.operand(offset, instr.op, false),
                }
            }
            AppendArray => {
                self.reg8(offset, instr.arg0)?;
                match AppendKind::from_u8(instr.arg2) {
                    Some(AppendKind::Register) => self.reg(offset, a1),
                    Some(AppendKind::Literal) => self.literal(offset, instr.arg1),
                    Some(AppendKind::Integer) => Ok(()),
                    None => self.operand(offset, instr.op, false),
                }
            }
            Throw => self.reg8(offset, instr.arg0),
            Resume => {
                self.reg8(offset, instr.arg0)?;
                self.reg(offset, a1)
            }
            Foreach => {
                self.reg8(offset, instr.arg0)?;
                self.reg(offset, i64::from(instr.arg2) + 2)
            }
        }
    }
}
