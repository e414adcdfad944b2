//! Iteration opcode handlers: Foreach, PostForeach
//!
//! FOREACH keeps its state in three registers starting at `a2`: key,
//! value and cursor. The cursor starts as null. Tables, arrays, strings
//! and classes iterate natively; instances and user data with `_nexti`
//! iterate through it, the cursor holding the previous key. Generators are
//! resumed once per step and finish the loop when they return.

use ember_bytecode::{Instruction, Opcode};

use crate::object::{GeneratorState, Member, MetaMethod};
use crate::value::Value;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Vm;
use crate::{VmError, VmResult};

/// Outcome of one FOREACH step
enum Step {
    /// Key and value for the next iteration, plus the new cursor
    Item(Value, Value, Value),
    /// A generator frame was pushed; its yield lands in the value register
    Resumed,
    /// Iteration finished
    Done,
}

impl Vm {
    pub(in crate::vm::interpreter) fn exec_iteration_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::Foreach => self.foreach(instr).into(),

            Opcode::PostForeach => match self.reg(instr.arg0) {
                Value::Generator(generator)
                    if generator.borrow().state() == GeneratorState::Dead =>
                {
                    self.jump(instr.arg1).into()
                }
                _ => OpcodeResult::Continue,
            },

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }

    fn foreach(&mut self, instr: Instruction) -> VmResult<()> {
        let container = self.reg(instr.arg0);
        let regs = state_registers(instr.arg2)?;
        let cursor = self.reg(regs.cursor);

        match self.step(&container, &cursor, regs)? {
            Step::Item(key, value, next) => {
                self.set_reg(regs.key, key)?;
                self.set_reg(regs.value, value)?;
                self.set_reg(regs.cursor, next)
            }
            Step::Resumed => Ok(()),
            Step::Done => self.jump(instr.arg1),
        }
    }

    fn step(&mut self, container: &Value, cursor: &Value, regs: StateRegisters) -> VmResult<Step> {
        match container {
            Value::Table(table) => {
                let position = position(cursor)?;
                let next = table.borrow().next(position);
                Ok(match next {
                    Some((k, v, n)) => Step::Item(k, v, index_value(n)),
                    None => Step::Done,
                })
            }

            Value::Array(array) => {
                let position = position(cursor)?;
                let array = array.borrow();
                Ok(match array.values().get(position) {
                    Some(v) => Step::Item(index_value(position), v.clone(), index_value(position + 1)),
                    None => Step::Done,
                })
            }

            Value::String(string) => {
                let position = position(cursor)?;
                Ok(match string.as_bytes().get(position) {
                    Some(byte) => Step::Item(
                        index_value(position),
                        Value::Integer(i64::from(*byte)),
                        index_value(position + 1),
                    ),
                    None => Step::Done,
                })
            }

            Value::Class(class) => {
                let position = position(cursor)?;
                let class = class.borrow();
                Ok(match class.next_member(position) {
                    Some((key, _, n)) => {
                        let value = class.get(&key).unwrap_or_default();
                        Step::Item(key, value, index_value(n))
                    }
                    None => Step::Done,
                })
            }

            Value::Instance(instance) => {
                if let Some(step) = self.step_nexti(container, cursor)? {
                    return Ok(step);
                }
                let position = position(cursor)?;
                let instance = instance.borrow();
                let class = instance.class();
                let class = class.borrow();
                Ok(match class.next_member(position) {
                    Some((key, member, n)) => {
                        let value = match member {
                            Member::Field(i) => instance.field(i),
                            Member::Method(i) => class.method(i),
                        };
                        Step::Item(key, value.unwrap_or_default(), index_value(n))
                    }
                    None => Step::Done,
                })
            }

            Value::UserData(_) => self.step_nexti(container, cursor)?.ok_or_else(|| {
                VmError::TypeError("cannot iterate userdata without _nexti".into())
            }),

            Value::Generator(generator) => {
                if generator.borrow().state() == GeneratorState::Dead {
                    return Ok(Step::Done);
                }
                let position = position(cursor)?;
                self.set_reg(regs.key, index_value(position))?;
                self.set_reg(regs.cursor, index_value(position + 1))?;
                self.resume_into(generator, Some(regs.value), false)?;
                Ok(Step::Resumed)
            }

            other => Err(VmError::TypeError(format!(
                "cannot iterate '{}'",
                other.type_name()
            ))),
        }
    }

    /// Step through `_nexti`: the cursor holds the previous key
    fn step_nexti(&mut self, container: &Value, cursor: &Value) -> VmResult<Option<Step>> {
        let Some(handler) = self.metamethod(container, MetaMethod::Nexti) else {
            return Ok(None);
        };
        let key = self.call_sync(&handler, container.clone(), &[cursor.clone()])?;
        if key.is_null() {
            return Ok(Some(Step::Done));
        }
        let value = self.get_slot(container, &key)?;
        Ok(Some(Step::Item(key.clone(), value, key)))
    }
}

/// Key, value and cursor registers of a FOREACH loop
#[derive(Clone, Copy)]
struct StateRegisters {
    key: u8,
    value: u8,
    cursor: u8,
}

fn state_registers(first: u8) -> VmResult<StateRegisters> {
    let cursor = first.checked_add(2).ok_or_else(|| {
        VmError::RuntimeError(format!(
            "foreach state registers starting at {} exceed the register range",
            first
        ))
    })?;
    Ok(StateRegisters {
        key: first,
        value: cursor - 1,
        cursor,
    })
}

fn position(cursor: &Value) -> VmResult<usize> {
    match cursor {
        Value::Null => Ok(0),
        Value::Integer(i) => usize::try_from(*i)
            .map_err(|_| VmError::RuntimeError(format!("invalid iteration cursor {}", i))),
        other => Err(VmError::RuntimeError(format!(
            "invalid iteration cursor of type '{}'",
            other.type_name()
        ))),
    }
}

fn index_value(index: usize) -> Value {
    Value::Integer(index as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_bytecode::FunctionBuilder;

    /// sum(container): adds every value produced by foreach
    fn summing_loop(vm: &mut Vm) -> Value {
        let mut b = FunctionBuilder::new("sum");
        b.param("container");
        // r2 = total, r3..r5 = key, value, cursor
        b.load_int(2, 0);
        b.load_nulls(3, 3);
        let top = b.pos();
        let exit = b.foreach(1, 3);
        let post = b.post_foreach(1);
        b.add(2, 2, 4);
        b.jmp_to(top);
        b.patch_jump(exit);
        b.patch_jump(post);
        b.ret(2);
        vm.load_function(&b.build()).unwrap()
    }

    #[test]
    fn test_foreach_over_array() {
        let mut vm = Vm::new();
        let sum = summing_loop(&mut vm);
        let array = vm.new_array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        assert_eq!(vm.call(&sum, &[array]).unwrap(), Value::Integer(6));
    }

    #[test]
    fn test_foreach_over_table() {
        let mut vm = Vm::new();
        let sum = summing_loop(&mut vm);
        let table = vm.new_table();
        for (k, v) in [("a", 10), ("b", 20), ("c", 30)] {
            let key = vm.intern(k);
            vm.new_slot(&table, key, Value::Integer(v)).unwrap();
        }
        assert_eq!(vm.call(&sum, &[table]).unwrap(), Value::Integer(60));
    }

    #[test]
    fn test_foreach_over_generator() {
        let mut vm = Vm::new();
        let mut g = FunctionBuilder::new("three");
        g.generator();
        g.load_int(1, 5);
        g.yield_value(1);
        g.yield_value(1);
        g.yield_value(1);
        g.load_int(1, 100);
        g.ret(1);
        let three = vm.load_function(&g.build()).unwrap();
        let generator = vm.call(&three, &[]).unwrap();

        let sum = summing_loop(&mut vm);
        assert_eq!(vm.call(&sum, &[generator]).unwrap(), Value::Integer(15));
    }

    #[test]
    fn test_foreach_state_past_last_register_fails() {
        let mut vm = Vm::new();
        let mut b = FunctionBuilder::new("wide");
        b.param("container");
        b.stack_size(300);
        b.emit(Instruction::new(Opcode::Foreach, 1, 0, 254, 0));
        b.ret_null();
        let wide = vm.load_function(&b.build()).unwrap();
        let array = vm.new_array(vec![Value::Integer(1)]);
        assert!(matches!(
            vm.call(&wide, &[array]),
            Err(VmError::RuntimeError(_))
        ));
    }

    #[test]
    fn test_foreach_rejects_numbers() {
        let mut vm = Vm::new();
        let sum = summing_loop(&mut vm);
        assert!(matches!(
            vm.call(&sum, &[Value::Integer(3)]),
            Err(VmError::TypeError(_))
        ));
    }
}
