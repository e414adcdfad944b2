//! Arithmetic opcode handlers: Add, Sub, Mul, Div, Mod, Bitw, Neg, Not
//!
//! Integer arithmetic wraps; mixing an integer with a float promotes to
//! float. `+` with a string on either side concatenates. Other operand
//! types dispatch to the left operand's metamethod.

use ember_bytecode::{BitOp, Instruction, Opcode};

use crate::object::MetaMethod;
use crate::value::Value;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Vm;
use crate::{VmError, VmResult};

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
}

impl ArithOp {
    fn from_opcode(op: Opcode) -> Option<Self> {
        match op {
            Opcode::Add => Some(ArithOp::Add),
            Opcode::Sub => Some(ArithOp::Sub),
            Opcode::Mul => Some(ArithOp::Mul),
            Opcode::Div => Some(ArithOp::Div),
            Opcode::Mod => Some(ArithOp::Mod),
            _ => None,
        }
    }

    fn metamethod(self) -> MetaMethod {
        match self {
            ArithOp::Add => MetaMethod::Add,
            ArithOp::Sub => MetaMethod::Sub,
            ArithOp::Mul => MetaMethod::Mul,
            ArithOp::Div => MetaMethod::Div,
            ArithOp::Mod => MetaMethod::Modulo,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        }
    }
}

impl Vm {
    pub(in crate::vm::interpreter) fn exec_arithmetic_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let Some(op) = ArithOp::from_opcode(instr.op) else {
                    return OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8()));
                };
                let a = self.reg(instr.arg1 as u8);
                let b = self.reg(instr.arg2);
                match self.arith(op, &a, &b) {
                    Ok(value) => self.set_reg(instr.arg0, value).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::Bitw => {
                let a = self.reg(instr.arg1 as u8);
                let b = self.reg(instr.arg2);
                let result = BitOp::from_u8(instr.arg3)
                    .ok_or_else(|| {
                        VmError::RuntimeError(format!("invalid bitwise operation {}", instr.arg3))
                    })
                    .and_then(|op| bitwise(op, &a, &b));
                match result {
                    Ok(value) => self.set_reg(instr.arg0, value).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::Neg => {
                let value = self.reg(instr.arg1 as u8);
                let result = match value {
                    Value::Integer(i) => Ok(Value::Integer(i.wrapping_neg())),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => match self.metamethod(&other, MetaMethod::Unm) {
                        Some(handler) => self.call_sync(&handler, other, &[]),
                        None => Err(VmError::TypeError(format!(
                            "attempt to negate '{}'",
                            other.type_name()
                        ))),
                    },
                };
                match result {
                    Ok(value) => self.set_reg(instr.arg0, value).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::Not => {
                let truthy = self.reg(instr.arg1 as u8).is_truthy();
                self.set_reg(instr.arg0, Value::Bool(!truthy)).into()
            }

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }

    /// Apply a binary arithmetic operator, including metamethod dispatch
    ///
    /// # Errors
    ///
    /// Returns `VmError::ArithmeticError` for integer division or modulo by
    /// zero and `VmError::TypeError` for unsupported operand types.
    pub fn arith(&mut self, op: ArithOp, a: &Value, b: &Value) -> VmResult<Value> {
        match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => integer_arith(op, *x, *y),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                let x = a.as_float().unwrap_or_default();
                let y = b.as_float().unwrap_or_default();
                Ok(Value::Float(match op {
                    ArithOp::Add => x + y,
                    ArithOp::Sub => x - y,
                    ArithOp::Mul => x * y,
                    ArithOp::Div => x / y,
                    ArithOp::Mod => x % y,
                }))
            }
            (Value::String(_), _) | (_, Value::String(_)) if op == ArithOp::Add => {
                let mut text = self.to_display_string(a)?;
                text.push_str(&self.to_display_string(b)?);
                Ok(self.ctx.intern(&text))
            }
            _ => match self.metamethod(a, op.metamethod()) {
                Some(handler) => self.call_sync(&handler, a.clone(), &[b.clone()]),
                None => Err(VmError::TypeError(format!(
                    "arith op {} between '{}' and '{}'",
                    op.symbol(),
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }

    /// Text of a value as `print` and concatenation see it, honoring `_tostring`
    pub fn to_display_string(&mut self, value: &Value) -> VmResult<String> {
        if let Value::String(s) = value {
            return Ok(s.to_string_lossy());
        }
        match self.metamethod(value, MetaMethod::ToString) {
            Some(handler) => {
                let text = self.call_sync(&handler, value.clone(), &[])?;
                match text {
                    Value::String(s) => Ok(s.to_string_lossy()),
                    other => Ok(other.to_string()),
                }
            }
            None => Ok(value.to_string()),
        }
    }
}

fn integer_arith(op: ArithOp, x: i64, y: i64) -> VmResult<Value> {
    let value = match op {
        ArithOp::Add => x.wrapping_add(y),
        ArithOp::Sub => x.wrapping_sub(y),
        ArithOp::Mul => x.wrapping_mul(y),
        ArithOp::Div => {
            if y == 0 {
                return Err(VmError::ArithmeticError("division by zero".into()));
            }
            x.wrapping_div(y)
        }
        ArithOp::Mod => {
            if y == 0 {
                return Err(VmError::ArithmeticError("modulo by zero".into()));
            }
            x.wrapping_rem(y)
        }
    };
    Ok(Value::Integer(value))
}

fn bitwise(op: BitOp, a: &Value, b: &Value) -> VmResult<Value> {
    let (Value::Integer(x), Value::Integer(y)) = (a, b) else {
        return Err(VmError::TypeError(format!(
            "bitwise op between '{}' and '{}'",
            a.type_name(),
            b.type_name()
        )));
    };
    let (x, y) = (*x, *y);
    let shift = (y & 63) as u32;
    Ok(Value::Integer(match op {
        BitOp::And => x & y,
        BitOp::Or => x | y,
        BitOp::Xor => x ^ y,
        BitOp::Shl => x.wrapping_shl(shift),
        BitOp::Shr => x.wrapping_shr(shift),
        BitOp::UShr => ((x as u64) >> shift) as i64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic_wraps() {
        assert_eq!(
            integer_arith(ArithOp::Add, i64::MAX, 1).unwrap(),
            Value::Integer(i64::MIN)
        );
        assert_eq!(integer_arith(ArithOp::Mod, -7, 3).unwrap(), Value::Integer(-1));
        assert!(matches!(
            integer_arith(ArithOp::Div, 1, 0),
            Err(VmError::ArithmeticError(_))
        ));
    }

    #[test]
    fn test_mixed_operands_promote() {
        let mut vm = Vm::new();
        let v = vm
            .arith(ArithOp::Div, &Value::Integer(3), &Value::Float(2.0))
            .unwrap();
        assert_eq!(v, Value::Float(1.5));
    }

    #[test]
    fn test_string_concatenation() {
        let mut vm = Vm::new();
        let a = vm.intern("n=");
        let v = vm.arith(ArithOp::Add, &a, &Value::Integer(4)).unwrap();
        assert_eq!(v.as_str(), Some("n=4"));
        assert!(vm.arith(ArithOp::Sub, &a, &Value::Integer(4)).is_err());
    }

    #[test]
    fn test_shifts() {
        assert_eq!(
            bitwise(BitOp::UShr, &Value::Integer(-1), &Value::Integer(60)).unwrap(),
            Value::Integer(15)
        );
        assert_eq!(
            bitwise(BitOp::Shr, &Value::Integer(-16), &Value::Integer(2)).unwrap(),
            Value::Integer(-4)
        );
        assert!(bitwise(BitOp::And, &Value::Float(1.0), &Value::Integer(1)).is_err());
    }
}
