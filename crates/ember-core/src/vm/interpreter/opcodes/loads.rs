//! Load and move opcode handlers: Load, LoadInt, LoadFloat, LoadNulls, LoadBool, LoadRoot, Move

use ember_bytecode::{Instruction, Opcode};

use crate::value::Value;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Vm;
use crate::VmError;

impl Vm {
    pub(in crate::vm::interpreter) fn exec_load_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::Load => match self.literal(instr.arg1) {
                Ok(value) => self.set_reg(instr.arg0, value).into(),
                Err(e) => OpcodeResult::Error(e),
            },

            Opcode::LoadInt => self
                .set_reg(instr.arg0, Value::Integer(i64::from(instr.arg1)))
                .into(),

            Opcode::LoadFloat => {
                let value = f32::from_bits(instr.arg1 as u32);
                self.set_reg(instr.arg0, Value::Float(f64::from(value)))
                    .into()
            }

            Opcode::LoadNulls => {
                let count = instr.arg1.max(0) as usize;
                let first = self.base() + usize::from(instr.arg0);
                match self.stack.ensure(first + count) {
                    Ok(()) => {
                        self.stack.clear_range(first, first + count);
                        OpcodeResult::Continue
                    }
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::LoadBool => self
                .set_reg(instr.arg0, Value::Bool(instr.arg1 != 0))
                .into(),

            Opcode::LoadRoot => {
                let root = Value::Table(self.ctx.root_table());
                self.set_reg(instr.arg0, root).into()
            }

            Opcode::Move => {
                let value = self.reg(instr.arg1 as u8);
                self.set_reg(instr.arg0, value).into()
            }

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }
}
