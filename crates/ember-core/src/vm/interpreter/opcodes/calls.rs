//! Call opcode handlers: PrepCall, PrepCallK, Call, TailCall, Return
//!
//! A call's `this` and arguments sit in consecutive caller registers; the
//! callee's window starts at `this`. Return values travel back through the
//! frame's target register.

use ember_bytecode::{Instruction, Opcode, NO_TARGET};

use crate::object::Prototype;
use crate::stack::CallFrame;
use crate::value::Value;
use crate::vm::interpreter::execution::{no_frame, CallStart, OpcodeResult};
use crate::vm::interpreter::{SuspendPoint, Vm};
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm::interpreter) fn exec_call_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::PrepCall | Opcode::PrepCallK => self.prep_call(instr).into(),

            Opcode::Call => {
                let callee = self.reg(instr.arg1 as u8);
                self.call_op(callee, instr).into()
            }

            Opcode::TailCall => {
                let callee = self.reg(instr.arg1 as u8);
                match self.can_tail_call(&callee) {
                    Ok(true) => self.tail_call(callee, instr).into(),
                    Ok(false) => self.call_op(callee, instr).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::Return => {
                let value = if instr.arg0 != NO_TARGET {
                    self.reg(instr.arg1 as u8)
                } else {
                    Value::Null
                };
                self.return_value(value).into()
            }

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }

    /// r[a3] = r[a2]; r[a0] = r[a2][key]
    fn prep_call(&mut self, instr: Instruction) -> VmResult<()> {
        let obj = self.reg(instr.arg2);
        let key = if instr.op == Opcode::PrepCallK {
            self.literal(instr.arg1)?
        } else {
            self.reg(instr.arg1 as u8)
        };
        let function = self.get_slot(&obj, &key)?;
        self.set_reg(instr.arg3, obj)?;
        self.set_reg(instr.arg0, function)
    }

    fn call_op(&mut self, callee: Value, instr: Instruction) -> VmResult<OpcodeResult> {
        let base = self.base() + usize::from(instr.arg2);
        let nargs = usize::from(instr.arg3);
        let target = (instr.arg0 != NO_TARGET).then_some(instr.arg0);

        match self.call_value(callee, base, nargs, target, false)? {
            CallStart::Pushed => Ok(OpcodeResult::Continue),
            CallStart::Done(value) => {
                self.set_target(instr.arg0, value)?;
                Ok(OpcodeResult::Continue)
            }
            CallStart::Suspend(value) => {
                if !self.can_suspend() {
                    return Err(VmError::ThreadError(
                        "cannot suspend a thread from a nested call".into(),
                    ));
                }
                self.suspended = Some(SuspendPoint {
                    target,
                    root_depth: 0,
                    stack_base: 0,
                });
                Ok(OpcodeResult::Suspend(value))
            }
        }
    }

    /// Only the outermost run loop, with no native or synchronous call in
    /// between, may give up the thread
    fn can_suspend(&self) -> bool {
        self.nesting == 1 && self.native_frames.is_empty() && self.sync_calls == 0
    }

    fn can_tail_call(&self, callee: &Value) -> VmResult<bool> {
        let Value::Closure(closure) = callee else {
            return Ok(false);
        };
        let frame = self.frame()?;
        let index = self.stack.frame_count() - 1;
        let owns_trap = self.traps.last().is_some_and(|t| t.frame == index);
        Ok(!closure.proto().is_generator && frame.generator.is_none() && !owns_trap)
    }

    /// Replace the current frame with the callee's
    fn tail_call(&mut self, callee: Value, instr: Instruction) -> VmResult<OpcodeResult> {
        let Value::Closure(closure) = callee else {
            return self.call_op(callee, instr);
        };
        let nargs = usize::from(instr.arg3);
        if !arity_matches(closure.proto(), nargs) {
            return self.call_op(Value::Closure(closure), instr);
        }

        let frame = self.stack.pop_frame().ok_or_else(no_frame)?;
        let first = frame.base + usize::from(instr.arg2);
        let args = self.stack.take_range(first, first + nargs);
        self.stack.clear_range(frame.base, frame.top());
        for (i, arg) in args.into_iter().enumerate() {
            self.stack.set(frame.base + i, arg)?;
        }
        self.enter_closure(closure, frame.base, nargs, frame.target, frame.root)?;
        self.stats.tail_calls += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Pop the current frame and deliver its result
    pub(crate) fn return_value(&mut self, value: Value) -> VmResult<OpcodeResult> {
        let frame = self.stack.pop_frame().ok_or_else(no_frame)?;
        if let Some(generator) = &frame.generator {
            drop(generator.borrow_mut().kill());
        }
        self.leave_frame(frame, value)
    }

    /// Finish a frame that has already been popped
    pub(crate) fn leave_frame(&mut self, frame: CallFrame, value: Value) -> VmResult<OpcodeResult> {
        self.drop_traps(self.stack.frame_count());
        if frame.root {
            return Ok(OpcodeResult::Return(value));
        }
        let caller_top = self.frame()?.top();
        self.stack.resize(caller_top)?;
        if let Some(target) = frame.target {
            self.set_reg(target, value)?;
        }
        Ok(OpcodeResult::Continue)
    }
}

fn arity_matches(proto: &Prototype, nargs: usize) -> bool {
    let nparams = proto.param_count();
    if proto.varparams {
        nargs + 1 >= nparams
    } else {
        nargs == nparams
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_bytecode::FunctionBuilder;

    /// countdown(n): if n == 0 return "done" else return countdown(n - 1)
    fn countdown(vm: &mut Vm) -> Value {
        let mut b = FunctionBuilder::new("countdown");
        b.param("n");
        // r1 = n, r2 = callee, r3 = this, r4 = n - 1, r5 = flag
        b.eq_literal(5, 1, 0i64);
        let skip = b.jz(5);
        b.load(2, "done");
        b.ret(2);
        b.patch_jump(skip);
        b.load_root(3);
        b.get_k(2, 3, "countdown");
        b.load_int(4, 1);
        b.sub(4, 1, 4);
        b.tail_call(6, 2, 3, 2);
        b.ret(6);
        let f = vm.load_function(&b.build()).unwrap();
        vm.set_global("countdown", f.clone()).unwrap();
        f
    }

    #[test]
    fn test_tail_calls_do_not_grow_frames() {
        let mut vm = Vm::new();
        let f = countdown(&mut vm);
        let result = vm.call(&f, &[Value::Integer(5000)]).unwrap();
        assert_eq!(result.as_str(), Some("done"));
        assert_eq!(vm.stats().tail_calls, 5000);
        assert_eq!(vm.stack().frame_count(), 0);
    }

    #[test]
    fn test_call_arity_mismatch() {
        let mut vm = Vm::new();
        let f = countdown(&mut vm);
        assert!(matches!(
            vm.call(&f, &[]),
            Err(VmError::ArgumentError(_))
        ));
    }

    #[test]
    fn test_prep_call_binds_this() {
        let mut vm = Vm::new();
        // obj.get_this() returns its receiver
        let mut m = FunctionBuilder::new("get_this");
        m.ret(0);
        let method = vm.load_function(&m.build()).unwrap();
        let obj = vm.new_table();
        let key = vm.intern("get_this");
        vm.new_slot(&obj, key, method).unwrap();

        let mut b = FunctionBuilder::new("main");
        b.param("obj");
        b.prep_call_k(2, 1, "get_this", 3);
        b.call(4, 2, 3, 1);
        b.ret(4);
        let main = vm.load_function(&b.build()).unwrap();
        let result = vm.call(&main, &[obj.clone()]).unwrap();
        assert_eq!(result, obj);
    }

    #[test]
    fn test_return_reads_register_for_any_non_null_marker() {
        let mut vm = Vm::new();
        let mut b = FunctionBuilder::new("identity");
        b.param("x");
        b.emit(Instruction::new(Opcode::Return, 0, 1, 0, 0));
        let f = vm.load_function(&b.build()).unwrap();
        assert_eq!(vm.call(&f, &[Value::Integer(5)]).unwrap(), Value::Integer(5));
    }

    #[test]
    fn test_falling_off_the_end_returns_null() {
        let mut vm = Vm::new();
        let mut b = FunctionBuilder::new("open_ended");
        b.load_int(1, 3);
        let f = vm.load_function(&b.build()).unwrap();
        assert_eq!(vm.call(&f, &[]).unwrap(), Value::Null);
        assert_eq!(vm.stack().frame_count(), 0);
    }
}
