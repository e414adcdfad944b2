//! Control flow opcode handlers: Jmp, Jz, And, Or
//!
//! Offsets are relative to the instruction after the jump.

use ember_bytecode::{Instruction, Opcode};

use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Vm;
use crate::VmError;

impl Vm {
    pub(in crate::vm::interpreter) fn exec_control_flow_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::Jmp => self.jump(instr.arg1).into(),

            Opcode::Jz => {
                if self.reg(instr.arg0).is_truthy() {
                    OpcodeResult::Continue
                } else {
                    self.jump(instr.arg1).into()
                }
            }

            // Short-circuit: a falsy (And) or truthy (Or) operand is the result.
            Opcode::And | Opcode::Or => {
                let value = self.reg(instr.arg2);
                let short = value.is_truthy() == (instr.op == Opcode::Or);
                if !short {
                    return OpcodeResult::Continue;
                }
                match self.set_reg(instr.arg0, value) {
                    Ok(()) => self.jump(instr.arg1).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }
}
