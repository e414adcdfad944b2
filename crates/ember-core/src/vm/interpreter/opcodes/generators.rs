//! Generator opcode handlers: Yield, Resume
//!
//! A resumed generator runs as an ordinary frame placed above the caller's
//! window. Yielding moves the window and the frame's traps back into the
//! generator object.

use std::rc::Rc;

use ember_bytecode::{Instruction, Opcode, NO_TARGET};

use crate::object::{GeneratorState, SavedTrap};
use crate::stack::CallFrame;
use crate::value::{GeneratorRef, Value};
use crate::vm::interpreter::execution::{no_frame, OpcodeResult};
use crate::vm::interpreter::{ExecutionResult, Trap, Vm};
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm::interpreter) fn exec_generator_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::Yield => {
                let value = if instr.arg0 != NO_TARGET {
                    self.reg(instr.arg1 as u8)
                } else {
                    Value::Null
                };
                self.yield_value(value).into()
            }

            Opcode::Resume => match self.reg(instr.arg1 as u8) {
                Value::Generator(generator) => {
                    let target = (instr.arg0 != NO_TARGET).then_some(instr.arg0);
                    self.resume_into(&generator, target, false).into()
                }
                other => OpcodeResult::Error(VmError::TypeError(format!(
                    "cannot resume a '{}'",
                    other.type_name()
                ))),
            },

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }

    fn yield_value(&mut self, value: Value) -> VmResult<OpcodeResult> {
        let generator = self
            .frame()?
            .generator
            .clone()
            .ok_or_else(|| VmError::GeneratorError("yield outside of a generator".into()))?;
        let index = self.stack.frame_count() - 1;
        let frame = self.stack.pop_frame().ok_or_else(no_frame)?;

        let mut traps = Vec::new();
        while self.traps.last().is_some_and(|t| t.frame == index) {
            if let Some(trap) = self.traps.pop() {
                traps.push(SavedTrap {
                    ip: trap.ip,
                    stack_offset: trap.stack_top.saturating_sub(frame.base),
                    ex_target: trap.ex_target,
                });
            }
        }
        traps.reverse();

        let window = self.stack.take_range(frame.base, frame.top());
        generator.borrow_mut().save(window, frame.ip, traps);
        self.leave_frame(frame, value)
    }

    /// Push a frame continuing `generator` above the current stack
    pub(crate) fn resume_into(
        &mut self,
        generator: &GeneratorRef,
        target: Option<u8>,
        root: bool,
    ) -> VmResult<()> {
        match generator.borrow().state() {
            GeneratorState::Suspended => {}
            GeneratorState::Running => {
                return Err(VmError::GeneratorError(
                    "resuming an active generator".into(),
                ))
            }
            GeneratorState::Dead => {
                return Err(VmError::GeneratorError("resuming a dead generator".into()))
            }
        }

        let (window, ip, saved) = generator.borrow_mut().start_resume();
        let closure = Rc::clone(generator.borrow().closure());
        let base = self.stack.len();
        let pushed = window
            .into_iter()
            .try_for_each(|value| self.stack.push(value))
            .and_then(|()| {
                self.stack.push_frame(CallFrame {
                    closure,
                    ip,
                    base,
                    target,
                    root,
                    generator: Some(Rc::clone(generator)),
                })
            });
        if let Err(e) = pushed {
            self.stack.truncate(base);
            drop(generator.borrow_mut().kill());
            return Err(e);
        }

        let frame = self.stack.frame_count() - 1;
        self.traps.extend(saved.into_iter().map(|t| Trap {
            frame,
            ip: t.ip,
            stack_top: base + t.stack_offset,
            ex_target: t.ex_target,
        }));
        self.stats.calls += 1;
        Ok(())
    }

    /// Resume a generator from the host or a native and wait for its next value
    ///
    /// Returns the yielded value, or the return value once the generator
    /// finishes.
    ///
    /// # Errors
    ///
    /// Returns `VmError::GeneratorError` if the generator is dead or already
    /// running, or any error the generator body raises.
    pub fn resume_generator(&mut self, generator: &GeneratorRef) -> VmResult<Value> {
        let saved_len = self.stack.len();
        let root_depth = self.stack.frame_count();
        self.sync_calls += 1;
        let result = self
            .resume_into(generator, None, true)
            .and_then(|()| self.run_frames(root_depth));
        self.sync_calls -= 1;
        self.stack.resize(saved_len)?;
        match result? {
            ExecutionResult::Completed(value) => Ok(value),
            ExecutionResult::Suspended(_) => Err(VmError::ThreadError(
                "cannot suspend a thread from a nested call".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_bytecode::FunctionBuilder;

    fn one_two(vm: &mut Vm) -> Value {
        let mut g = FunctionBuilder::new("one_two");
        g.generator();
        g.load_int(1, 1);
        g.yield_value(1);
        g.load_int(1, 2);
        g.yield_value(1);
        g.ret_null();
        let f = vm.load_function(&g.build()).unwrap();
        vm.call(&f, &[]).unwrap()
    }

    #[test]
    fn test_calling_generator_function_does_not_run_it() {
        let mut vm = Vm::new();
        let generator = one_two(&mut vm);
        let generator = generator.as_generator().unwrap();
        assert_eq!(generator.borrow().state(), GeneratorState::Suspended);
        assert_eq!(vm.stats().generators_created, 1);
    }

    #[test]
    fn test_resume_until_dead() {
        let mut vm = Vm::new();
        let generator = one_two(&mut vm);
        let generator = generator.as_generator().unwrap().clone();
        assert_eq!(vm.resume_generator(&generator).unwrap(), Value::Integer(1));
        assert_eq!(vm.resume_generator(&generator).unwrap(), Value::Integer(2));
        assert_eq!(vm.resume_generator(&generator).unwrap(), Value::Null);
        assert_eq!(generator.borrow().state(), GeneratorState::Dead);
        assert!(matches!(
            vm.resume_generator(&generator),
            Err(VmError::GeneratorError(_))
        ));
    }

    #[test]
    fn test_resume_opcode_from_script() {
        let mut vm = Vm::new();
        let mut g = FunctionBuilder::new("count");
        g.generator();
        g.param("start");
        g.yield_value(1);
        g.load_int(2, 1);
        g.add(1, 1, 2);
        g.yield_value(1);
        g.ret_null();

        let mut b = FunctionBuilder::new("main");
        let index = b.function(g.build());
        b.closure(1, index);
        b.load_root(2);
        b.load_int(3, 10);
        b.call(4, 1, 2, 2);
        b.resume(5, 4);
        b.resume(6, 4);
        b.add(7, 5, 6);
        b.ret(7);
        let main = vm.load_function(&b.build()).unwrap();
        assert_eq!(vm.call(&main, &[]).unwrap(), Value::Integer(21));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_yield_reads_register_for_any_non_null_marker() {
        let mut vm = Vm::new();
        let mut g = FunctionBuilder::new("seven");
        g.generator();
        g.load_int(1, 7);
        g.emit(Instruction::new(Opcode::Yield, 0, 1, 0, 0));
        g.ret_null();
        let f = vm.load_function(&g.build()).unwrap();
        let generator = vm.call(&f, &[]).unwrap();
        let generator = generator.as_generator().unwrap().clone();
        assert_eq!(vm.resume_generator(&generator).unwrap(), Value::Integer(7));
    }

    #[test]
    fn test_yield_outside_generator_fails() {
        let mut vm = Vm::new();
        let mut b = FunctionBuilder::new("main");
        b.yield_null();
        let main = vm.load_function(&b.build()).unwrap();
        assert!(matches!(
            vm.call(&main, &[]),
            Err(VmError::GeneratorError(_))
        ));
    }
}
