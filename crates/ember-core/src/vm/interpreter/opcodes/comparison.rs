//! Comparison opcode handlers: Cmp, Eq, Ne

use std::cmp::Ordering;

use ember_bytecode::{CmpOp, Instruction, Opcode};

use crate::object::MetaMethod;
use crate::value::Value;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Vm;
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm::interpreter) fn exec_comparison_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::Cmp => {
                let a = self.reg(instr.arg1 as u8);
                let b = self.reg(instr.arg2);
                let Some(op) = CmpOp::from_u8(instr.arg3) else {
                    return OpcodeResult::Error(VmError::RuntimeError(format!(
                        "invalid comparison {}",
                        instr.arg3
                    )));
                };
                let result = self.compare(&a, &b).map(|ord| match op {
                    CmpOp::Gt => Value::Bool(ord == Ordering::Greater),
                    CmpOp::Ge => Value::Bool(ord != Ordering::Less),
                    CmpOp::Lt => Value::Bool(ord == Ordering::Less),
                    CmpOp::Le => Value::Bool(ord != Ordering::Greater),
                    CmpOp::ThreeWay => Value::Integer(ord as i64),
                });
                match result {
                    Ok(value) => self.set_reg(instr.arg0, value).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::Eq | Opcode::Ne => {
                let b = if instr.arg3 == 1 {
                    match self.literal(instr.arg1) {
                        Ok(value) => value,
                        Err(e) => return OpcodeResult::Error(e),
                    }
                } else {
                    self.reg(instr.arg1 as u8)
                };
                let a = self.reg(instr.arg2);
                let equal = values_equal(&a, &b);
                let result = if instr.op == Opcode::Eq { equal } else { !equal };
                self.set_reg(instr.arg0, Value::Bool(result)).into()
            }

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }

    /// Order two values, consulting `_cmp` for tables, instances and user data
    ///
    /// `_cmp` is called on the left operand with the right one and must
    /// return an integer: negative, zero or positive.
    pub fn compare(&mut self, a: &Value, b: &Value) -> VmResult<Ordering> {
        let same_kind = a.type_name() == b.type_name();
        if same_kind && matches!(a, Value::Table(_) | Value::Instance(_) | Value::UserData(_)) {
            if let Some(handler) = self.metamethod(a, MetaMethod::Cmp) {
                return match self.call_sync(&handler, a.clone(), &[b.clone()])? {
                    Value::Integer(i) => Ok(i.cmp(&0)),
                    other => Err(VmError::TypeError(format!(
                        "_cmp must return an integer, got '{}'",
                        other.type_name()
                    ))),
                };
            }
        }
        a.default_order(b)
    }
}

/// Equality used by `==`: numbers compare across integer and float, heap
/// values by identity
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
            (*x as f64) == *y
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_type_number_equality() {
        assert!(values_equal(&Value::Integer(2), &Value::Float(2.0)));
        assert!(!values_equal(&Value::Integer(2), &Value::Bool(true)));
        assert!(!values_equal(&Value::Float(f64::NAN), &Value::Float(f64::NAN)));
    }

    #[test]
    fn test_compare_plain_values() {
        let mut vm = Vm::new();
        assert_eq!(
            vm.compare(&Value::Integer(1), &Value::Float(1.5)).unwrap(),
            Ordering::Less
        );
        let (a, b) = (vm.intern("abc"), vm.intern("abd"));
        assert_eq!(vm.compare(&a, &b).unwrap(), Ordering::Less);
        assert!(vm.compare(&a, &Value::Integer(1)).is_err());
    }

    #[test]
    fn test_tables_without_cmp_cannot_be_ordered() {
        let mut vm = Vm::new();
        let (a, b) = (vm.new_table(), vm.new_table());
        assert!(matches!(vm.compare(&a, &b), Err(VmError::TypeError(_))));
    }
}
