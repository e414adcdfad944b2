//! Exception opcode handlers: PushTrap, PopTrap, Throw

use ember_bytecode::{Instruction, Opcode};

use crate::vm::interpreter::execution::{no_frame, OpcodeResult};
use crate::vm::interpreter::{Trap, Vm};
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm::interpreter) fn exec_exception_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::PushTrap => self.push_trap(instr.arg0, instr.arg1).into(),

            Opcode::PopTrap => {
                let depth = self.stack.frame_count().saturating_sub(1);
                for _ in 0..instr.arg0 {
                    if self.traps.last().is_some_and(|t| t.frame == depth) {
                        self.traps.pop();
                    } else {
                        return OpcodeResult::Error(VmError::RuntimeError(
                            "trap stack underflow".into(),
                        ));
                    }
                }
                OpcodeResult::Continue
            }

            Opcode::Throw => OpcodeResult::Error(VmError::Thrown(self.reg(instr.arg0))),

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }

    fn push_trap(&mut self, ex_target: u8, offset: i32) -> VmResult<()> {
        let frame = self.stack.current_frame().ok_or_else(no_frame)?;
        let ip = frame.ip as i64 + i64::from(offset);
        let ip = usize::try_from(ip)
            .map_err(|_| VmError::RuntimeError(format!("trap handler at {}", ip)))?;
        self.traps.push(Trap {
            frame: self.stack.frame_count() - 1,
            ip,
            stack_top: self.stack.len(),
            ex_target,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use ember_bytecode::FunctionBuilder;

    #[test]
    fn test_trap_catches_thrown_value() {
        let mut vm = Vm::new();
        let mut b = FunctionBuilder::new("main");
        let trap = b.push_trap(1);
        b.load(2, "boom");
        b.throw(2);
        b.patch_jump(trap);
        b.ret(1);
        let main = vm.load_function(&b.build()).unwrap();
        let caught = vm.call(&main, &[]).unwrap();
        assert_eq!(caught.as_str(), Some("boom"));
        assert_eq!(vm.stats().errors_caught, 1);
    }

    #[test]
    fn test_trap_catches_runtime_error_from_callee() {
        let mut vm = Vm::new();
        let mut f = FunctionBuilder::new("divide");
        f.load_int(1, 1);
        f.load_int(2, 0);
        f.div(1, 1, 2);
        f.ret(1);

        let mut b = FunctionBuilder::new("main");
        let index = b.function(f.build());
        let trap = b.push_trap(1);
        b.closure(2, index);
        b.load_root(3);
        b.call(4, 2, 3, 1);
        b.pop_trap(1);
        b.load_int(1, 0);
        b.patch_jump(trap);
        b.ret(1);
        let main = vm.load_function(&b.build()).unwrap();
        let caught = vm.call(&main, &[]).unwrap();
        assert!(caught.as_str().is_some_and(|s| s.contains("division by zero")));
        assert_eq!(vm.stack().frame_count(), 0);
    }

    #[test]
    fn test_uncaught_throw_reaches_host() {
        let mut vm = Vm::new();
        let mut b = FunctionBuilder::new("main");
        b.load_int(1, 3);
        b.throw(1);
        let main = vm.load_function(&b.build()).unwrap();
        match vm.call(&main, &[]) {
            Err(VmError::Thrown(v)) => assert_eq!(v, Value::Integer(3)),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert!(vm.stack().is_empty());
    }
}
