//! Closure opcode handlers: Closure, GetOuter, SetOuter

use std::rc::Rc;

use ember_bytecode::{Instruction, Opcode, OuterSource};

use crate::object::Outer;
use crate::value::Value;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Vm;
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm::interpreter) fn exec_closure_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::Closure => self.make_closure(instr.arg0, instr.arg1).into(),

            Opcode::GetOuter => match self.outer_cell(instr.arg1) {
                Ok(cell) => self.set_reg(instr.arg0, cell.get()).into(),
                Err(e) => OpcodeResult::Error(e),
            },

            Opcode::SetOuter => {
                let value = self.reg(instr.arg2);
                match self.outer_cell(instr.arg1) {
                    Ok(cell) => {
                        cell.set(value.clone());
                        self.set_target(instr.arg0, value).into()
                    }
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }

    fn outer_cell(&self, index: i32) -> VmResult<Rc<Outer>> {
        let frame = self.frame()?;
        let index = usize::try_from(index)
            .map_err(|_| VmError::RuntimeError(format!("invalid outer index {}", index)))?;
        frame.closure.outer(index).map(Rc::clone)
    }

    /// Instantiate nested function `index`, capturing its outer values
    fn make_closure(&mut self, dst: u8, index: i32) -> VmResult<()> {
        let current = Rc::clone(&self.frame()?.closure);
        let proto = usize::try_from(index)
            .ok()
            .and_then(|i| current.proto().functions.get(i))
            .cloned()
            .ok_or_else(|| VmError::RuntimeError(format!("function {} out of range", index)))?;

        let mut outers = Vec::with_capacity(proto.outer_values.len());
        for desc in &proto.outer_values {
            let cell = match &desc.source {
                OuterSource::Local(reg) => {
                    let reg = u8::try_from(*reg).map_err(|_| {
                        VmError::RuntimeError(format!("invalid capture register {}", reg))
                    })?;
                    self.ctx.new_outer(self.reg(reg))
                }
                OuterSource::Outer(i) => Rc::clone(current.outer(*i as usize)?),
                OuterSource::Symbol(name) => {
                    let this = self.reg(0);
                    let key = self.ctx.intern(name);
                    let value = self.get_slot(&this, &key).map_err(|_| {
                        VmError::LookupError(format!("the index '{}' does not exist", name))
                    })?;
                    self.ctx.new_outer(value)
                }
            };
            outers.push(cell);
        }

        let closure = self.ctx.new_closure(proto, outers);
        self.set_reg(dst, Value::Closure(closure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_bytecode::{FunctionBuilder, NO_TARGET};

    /// make_counter() returns a closure whose outer cell counts calls
    fn make_counter(vm: &mut Vm) -> Value {
        let mut inner = FunctionBuilder::new("tick");
        inner.outer_local("count", 1);
        inner.get_outer(1, 0);
        inner.load_int(2, 1);
        inner.add(1, 1, 2);
        inner.set_outer(NO_TARGET, 0, 1);
        inner.ret(1);

        let mut outer = FunctionBuilder::new("make_counter");
        let index = outer.function(inner.build());
        outer.load_int(1, 0);
        outer.closure(2, index);
        outer.ret(2);
        let f = vm.load_function(&outer.build()).unwrap();
        vm.call(&f, &[]).unwrap()
    }

    #[test]
    fn test_captured_cell_persists_between_calls() {
        let mut vm = Vm::new();
        let tick = make_counter(&mut vm);
        assert_eq!(vm.call(&tick, &[]).unwrap(), Value::Integer(1));
        assert_eq!(vm.call(&tick, &[]).unwrap(), Value::Integer(2));
    }

    #[test]
    fn test_symbol_capture_reads_this() {
        let mut vm = Vm::new();
        vm.set_global("limit", Value::Integer(9)).unwrap();

        let mut inner = FunctionBuilder::new("get_limit");
        inner.outer_symbol("limit");
        inner.get_outer(1, 0);
        inner.ret(1);

        let mut outer = FunctionBuilder::new("main");
        let index = outer.function(inner.build());
        outer.closure(1, index);
        outer.ret(1);
        let main = vm.load_function(&outer.build()).unwrap();
        let get_limit = vm.call(&main, &[]).unwrap();
        assert_eq!(vm.call(&get_limit, &[]).unwrap(), Value::Integer(9));
    }

    #[test]
    fn test_missing_symbol_capture_fails() {
        let mut vm = Vm::new();
        let mut inner = FunctionBuilder::new("f");
        inner.outer_symbol("nowhere");
        inner.ret_null();
        let mut outer = FunctionBuilder::new("main");
        let index = outer.function(inner.build());
        outer.closure(1, index);
        outer.ret(1);
        let main = vm.load_function(&outer.build()).unwrap();
        assert!(matches!(
            vm.call(&main, &[]),
            Err(VmError::LookupError(_))
        ));
    }
}
