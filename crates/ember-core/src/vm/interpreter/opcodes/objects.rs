//! Slot access and object construction: Get, GetK, Set, NewSlot, Delete,
//! NewObj, AppendArray, Delegate, InstanceOf, TypeOf
//!
//! Lookups that miss fall back to metamethods: tables and user data find
//! them in their delegate, instances in their class.

use ember_bytecode::{AppendKind, Instruction, NewObjKind, Opcode};

use crate::object::{Class, MetaMethod, Table};
use crate::value::{ArrayRef, StringRef, Value};
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Vm;
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm::interpreter) fn exec_slot_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::Get => {
                let obj = self.reg(instr.arg1 as u8);
                let key = self.reg(instr.arg2);
                match self.get_slot(&obj, &key) {
                    Ok(value) => self.set_reg(instr.arg0, value).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::GetK => {
                let obj = self.reg(instr.arg2);
                let value = self
                    .literal(instr.arg1)
                    .and_then(|key| self.get_slot(&obj, &key));
                match value {
                    Ok(value) => self.set_reg(instr.arg0, value).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::Set => {
                let obj = self.reg(instr.arg1 as u8);
                let key = self.reg(instr.arg2);
                let value = self.reg(instr.arg3);
                match self.set_slot(&obj, &key, value.clone()) {
                    Ok(()) => self.set_target(instr.arg0, value).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::NewSlot => {
                let obj = self.reg(instr.arg1 as u8);
                let key = self.reg(instr.arg2);
                let value = self.reg(instr.arg3);
                match self.new_slot(&obj, key, value.clone()) {
                    Ok(()) => self.set_target(instr.arg0, value).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::Delete => {
                let obj = self.reg(instr.arg1 as u8);
                let key = self.reg(instr.arg2);
                match self.delete_slot(&obj, &key) {
                    Ok(value) => self.set_reg(instr.arg0, value).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }

    pub(in crate::vm::interpreter) fn exec_object_ops(&mut self, instr: Instruction) -> OpcodeResult {
        match instr.op {
            Opcode::NewObj => self.new_object(instr).into(),

            Opcode::AppendArray => {
                let value = match AppendKind::from_u8(instr.arg2) {
                    Some(AppendKind::Register) => Ok(self.reg(instr.arg1 as u8)),
                    Some(AppendKind::Literal) => self.literal(instr.arg1),
                    Some(AppendKind::Integer) => Ok(Value::Integer(i64::from(instr.arg1))),
                    None => Err(VmError::RuntimeError(format!(
                        "invalid append kind {}",
                        instr.arg2
                    ))),
                };
                match (self.reg(instr.arg0), value) {
                    (Value::Array(array), Ok(value)) => {
                        array.borrow_mut().push(value);
                        OpcodeResult::Continue
                    }
                    (_, Err(e)) => OpcodeResult::Error(e),
                    (other, Ok(_)) => OpcodeResult::Error(VmError::TypeError(format!(
                        "cannot append to '{}'",
                        other.type_name()
                    ))),
                }
            }

            Opcode::Delegate => {
                let obj = self.reg(instr.arg1 as u8);
                let delegate = self.reg(instr.arg2);
                match self.set_delegate(&obj, &delegate) {
                    Ok(()) => self.set_reg(instr.arg0, obj).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            Opcode::InstanceOf => {
                let class = self.reg(instr.arg1 as u8);
                let obj = self.reg(instr.arg2);
                let Value::Class(class) = class else {
                    return OpcodeResult::Error(VmError::TypeError(format!(
                        "cannot apply instanceof between '{}' and '{}'",
                        obj.type_name(),
                        class.type_name()
                    )));
                };
                let result = match &obj {
                    Value::Instance(instance) => {
                        let own = instance.borrow().class();
                        Class::is_subclass_of(&own, &class)
                    }
                    _ => false,
                };
                self.set_reg(instr.arg0, Value::Bool(result)).into()
            }

            Opcode::TypeOf => {
                let value = self.reg(instr.arg1 as u8);
                match self.type_of(&value) {
                    Ok(name) => self.set_reg(instr.arg0, name).into(),
                    Err(e) => OpcodeResult::Error(e),
                }
            }

            _ => OpcodeResult::Error(VmError::InvalidOpcode(instr.op.to_u8())),
        }
    }

    fn new_object(&mut self, instr: Instruction) -> VmResult<()> {
        let value = match NewObjKind::from_u8(instr.arg3) {
            Some(NewObjKind::Table) => {
                let capacity = instr.arg1.max(0) as usize;
                Value::Table(self.ctx.new_table_with_capacity(capacity))
            }
            Some(NewObjKind::Array) => {
                let capacity = instr.arg1.max(0) as usize;
                Value::Array(self.ctx.new_array(capacity))
            }
            Some(NewObjKind::Class) => {
                let base = if instr.arg1 >= 0 {
                    match self.reg(instr.arg1 as u8) {
                        Value::Class(base) => Some(base),
                        other => {
                            return Err(VmError::TypeError(format!(
                                "cannot inherit from '{}'",
                                other.type_name()
                            )))
                        }
                    }
                } else {
                    None
                };
                let class = self.ctx.new_class(base.clone());
                let class = Value::Class(class);
                let inherited = base.and_then(|b| b.borrow().metamethod(MetaMethod::Inherited));
                if let Some(handler) = inherited {
                    self.call_sync(&handler, class.clone(), &[])?;
                }
                class
            }
            None => {
                return Err(VmError::RuntimeError(format!(
                    "invalid object kind {}",
                    instr.arg3
                )))
            }
        };
        self.set_reg(instr.arg0, value)
    }

    // ===== Slot Protocol =====

    /// Read `obj[key]`, following delegates and the `_get` metamethod
    ///
    /// # Errors
    ///
    /// Returns `VmError::LookupError` for missing keys, `VmError::IndexError`
    /// for out-of-range array or string indices and `VmError::TypeError` for
    /// values that cannot be indexed.
    pub fn get_slot(&mut self, obj: &Value, key: &Value) -> VmResult<Value> {
        let found = match obj {
            Value::Table(table) => table.borrow().get(key),
            Value::Instance(instance) => instance.borrow().get(key),
            Value::Class(class) => class.borrow().get(key),
            Value::UserData(data) => {
                let delegate = data.borrow().delegate();
                delegate.and_then(|d| d.borrow().get(key))
            }
            Value::Array(array) => return index_array(array, key),
            Value::String(string) => return index_string(string, key),
            other => {
                return Err(VmError::TypeError(format!(
                    "cannot index '{}'",
                    other.type_name()
                )))
            }
        };
        if let Some(value) = found {
            return Ok(value);
        }
        match self.metamethod(obj, MetaMethod::Get) {
            Some(handler) => self.call_sync(&handler, obj.clone(), &[key.clone()]),
            None => Err(missing_key(key)),
        }
    }

    /// Assign an existing slot, falling back to the `_set` metamethod
    pub fn set_slot(&mut self, obj: &Value, key: &Value, value: Value) -> VmResult<()> {
        let stored = match obj {
            Value::Table(table) => table.borrow_mut().set(key, value.clone()),
            Value::Instance(instance) => instance.borrow_mut().set(key, value.clone()),
            Value::Class(class) => class.borrow_mut().set(key, value.clone()),
            Value::UserData(_) => false,
            Value::Array(array) => {
                let index = array_index(key)?;
                array.borrow_mut().set(index, value)?;
                return Ok(());
            }
            other => {
                return Err(VmError::TypeError(format!(
                    "cannot assign into '{}'",
                    other.type_name()
                )))
            }
        };
        if stored {
            return Ok(());
        }
        match self.metamethod(obj, MetaMethod::Set) {
            Some(handler) => {
                self.call_sync(&handler, obj.clone(), &[key.clone(), value])?;
                Ok(())
            }
            None => Err(missing_key(key)),
        }
    }

    /// Create or replace a slot (`<-`)
    ///
    /// Tables consult `_newslot` for keys they do not have yet; classes
    /// reject new members once instantiated.
    pub fn new_slot(&mut self, obj: &Value, key: Value, value: Value) -> VmResult<()> {
        match obj {
            Value::Table(table) => {
                key.check_key()?;
                let exists = table.borrow().contains_key(&key);
                if !exists {
                    if let Some(handler) = self.metamethod(obj, MetaMethod::NewSlot) {
                        self.call_sync(&handler, obj.clone(), &[key, value])?;
                        return Ok(());
                    }
                }
                table.borrow_mut().new_slot(key, value)
            }
            Value::Class(class) => class.borrow_mut().new_slot(key, value),
            Value::Instance(_) | Value::UserData(_) => {
                match self.metamethod(obj, MetaMethod::NewSlot) {
                    Some(handler) => {
                        self.call_sync(&handler, obj.clone(), &[key, value])?;
                        Ok(())
                    }
                    None => Err(VmError::StructuralError(format!(
                        "cannot create a slot in '{}'",
                        obj.type_name()
                    ))),
                }
            }
            other => Err(VmError::TypeError(format!(
                "cannot create a slot in '{}'",
                other.type_name()
            ))),
        }
    }

    /// Remove a slot, returning its value
    pub fn delete_slot(&mut self, obj: &Value, key: &Value) -> VmResult<Value> {
        if let Value::Table(table) = obj {
            let removed = table.borrow_mut().remove(key);
            if let Some(value) = removed {
                return Ok(value);
            }
        }
        match obj {
            Value::Table(_) | Value::Instance(_) | Value::UserData(_) => {
                match self.metamethod(obj, MetaMethod::DelSlot) {
                    Some(handler) => self.call_sync(&handler, obj.clone(), &[key.clone()]),
                    None => Err(missing_key(key)),
                }
            }
            other => Err(VmError::TypeError(format!(
                "cannot delete a slot from '{}'",
                other.type_name()
            ))),
        }
    }

    /// Set or clear the delegate of a table or user data
    pub fn set_delegate(&mut self, obj: &Value, delegate: &Value) -> VmResult<()> {
        let delegate = match delegate {
            Value::Null => None,
            Value::Table(table) => Some(table.clone()),
            other => {
                return Err(VmError::TypeError(format!(
                    "a '{}' cannot be a delegate",
                    other.type_name()
                )))
            }
        };
        match obj {
            Value::Table(table) => Table::set_delegate(table, delegate),
            Value::UserData(data) => {
                data.borrow_mut().set_delegate(delegate);
                Ok(())
            }
            other => Err(VmError::TypeError(format!(
                "cannot set the delegate of '{}'",
                other.type_name()
            ))),
        }
    }

    /// Type name of a value, honoring `_typeof`
    pub fn type_of(&mut self, value: &Value) -> VmResult<Value> {
        match self.metamethod(value, MetaMethod::Typeof) {
            Some(handler) => self.call_sync(&handler, value.clone(), &[]),
            None => Ok(self.ctx.intern(value.type_name())),
        }
    }

    /// Metamethod `mm` of a table or user data delegate, or of an instance's class
    pub(crate) fn metamethod(&self, value: &Value, mm: MetaMethod) -> Option<Value> {
        let delegate = match value {
            Value::Table(table) => table.borrow().delegate()?,
            Value::UserData(data) => data.borrow().delegate()?,
            Value::Instance(instance) => {
                let class = instance.borrow().class();
                let found = class.borrow().metamethod(mm);
                return found;
            }
            _ => return None,
        };
        let name = self.ctx.metamethod_name(mm);
        let found = delegate.borrow().get(&name);
        found
    }
}

fn missing_key(key: &Value) -> VmError {
    VmError::LookupError(format!("the index '{}' does not exist", key))
}

fn array_index(key: &Value) -> VmResult<i64> {
    match key {
        Value::Integer(i) => Ok(*i),
        Value::Float(f) => Ok(*f as i64),
        other => Err(VmError::TypeError(format!(
            "indexing array with '{}'",
            other.type_name()
        ))),
    }
}

fn index_array(array: &ArrayRef, key: &Value) -> VmResult<Value> {
    let index = array_index(key)?;
    Ok(array.borrow().get(index)?)
}

fn index_string(string: &StringRef, key: &Value) -> VmResult<Value> {
    let Value::Integer(index) = key else {
        return Err(VmError::TypeError(format!(
            "indexing string with '{}'",
            key.type_name()
        )));
    };
    usize::try_from(*index)
        .ok()
        .and_then(|i| string.as_bytes().get(i))
        .map(|byte| Value::Integer(i64::from(*byte)))
        .ok_or_else(|| {
            VmError::IndexError(format!(
                "index {} out of range for string of length {}",
                index,
                string.len()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_get_follows_delegate() {
        let mut vm = Vm::new();
        let proto = vm.ctx.new_table();
        let key = vm.intern("greeting");
        proto
            .borrow_mut()
            .new_slot(key.clone(), Value::Integer(1))
            .unwrap();
        let table = vm.new_table();
        vm.set_delegate(&table, &Value::Table(proto)).unwrap();
        assert_eq!(vm.get_slot(&table, &key).unwrap(), Value::Integer(1));
        let missing = vm.intern("missing");
        assert!(matches!(
            vm.get_slot(&table, &missing),
            Err(VmError::LookupError(_))
        ));
    }

    #[test]
    fn test_set_requires_existing_key() {
        let mut vm = Vm::new();
        let table = vm.new_table();
        let key = vm.intern("x");
        assert!(vm.set_slot(&table, &key, Value::Integer(1)).is_err());
        vm.new_slot(&table, key.clone(), Value::Integer(1)).unwrap();
        vm.set_slot(&table, &key, Value::Integer(2)).unwrap();
        assert_eq!(vm.get_slot(&table, &key).unwrap(), Value::Integer(2));
        assert_eq!(vm.delete_slot(&table, &key).unwrap(), Value::Integer(2));
    }

    #[test]
    fn test_string_and_array_indexing() {
        let mut vm = Vm::new();
        let s = vm.intern("AB");
        assert_eq!(vm.get_slot(&s, &Value::Integer(1)).unwrap(), Value::Integer(66));
        assert!(matches!(
            vm.get_slot(&s, &Value::Integer(2)),
            Err(VmError::IndexError(_))
        ));

        let array = vm.new_array(vec![Value::Integer(5)]);
        assert_eq!(vm.get_slot(&array, &Value::Integer(0)).unwrap(), Value::Integer(5));
        assert!(matches!(
            vm.get_slot(&array, &Value::Integer(3)),
            Err(VmError::IndexError(_))
        ));
        let len = vm.intern("len");
        assert!(matches!(
            vm.get_slot(&array, &len),
            Err(VmError::TypeError(_))
        ));
    }

    #[test]
    fn test_new_slot_rejects_null_key() {
        let mut vm = Vm::new();
        let table = vm.new_table();
        assert!(matches!(
            vm.new_slot(&table, Value::Null, Value::Integer(1)),
            Err(VmError::StructuralError(_))
        ));
    }

    #[test]
    fn test_type_of_plain_values() {
        let mut vm = Vm::new();
        let name = vm.type_of(&Value::Float(1.0)).unwrap();
        assert_eq!(name.as_str(), Some("float"));
    }
}
