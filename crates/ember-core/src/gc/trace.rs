//! Collectable implementations for every object kind

use std::cell::RefCell;

use super::{address_of, Collectable};
use crate::object::{Array, Class, Closure, Generator, Instance, NativeClosure, Outer, Table, UserData};
use crate::value::Value;
use crate::vm::Vm;

fn visit_value(visit: &mut dyn FnMut(usize), value: &Value) {
    if let Some(addr) = value.gc_address() {
        visit(addr);
    }
}

impl Collectable for RefCell<Table> {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        let Ok(table) = self.try_borrow() else {
            return false;
        };
        table.for_each_value(|v| visit_value(visit, v));
        if let Some(delegate) = table.delegate() {
            visit(address_of(&delegate));
        }
        true
    }

    fn clear(&self, garbage: &mut Vec<Value>) {
        if let Ok(mut table) = self.try_borrow_mut() {
            table.drain_into(garbage);
        }
    }
}

impl Collectable for RefCell<Array> {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        let Ok(array) = self.try_borrow() else {
            return false;
        };
        array.values().iter().for_each(|v| visit_value(visit, v));
        true
    }

    fn clear(&self, garbage: &mut Vec<Value>) {
        if let Ok(mut array) = self.try_borrow_mut() {
            garbage.extend(array.take_values());
        }
    }
}

impl Collectable for Closure {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        for cell in self.outers() {
            visit(address_of(cell));
        }
        true
    }

    // Cells are shared and immutable from here; clearing them breaks the cycle.
    fn clear(&self, _garbage: &mut Vec<Value>) {}
}

impl Collectable for Outer {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        let Ok(value) = self.cell().try_borrow() else {
            return false;
        };
        visit_value(visit, &value);
        true
    }

    fn clear(&self, garbage: &mut Vec<Value>) {
        if let Ok(mut value) = self.cell().try_borrow_mut() {
            garbage.push(std::mem::take(&mut *value));
        }
    }
}

impl Collectable for NativeClosure {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        let Ok(outers) = self.outers().try_borrow() else {
            return false;
        };
        outers.iter().for_each(|v| visit_value(visit, v));
        true
    }

    fn clear(&self, garbage: &mut Vec<Value>) {
        if let Ok(mut outers) = self.outers().try_borrow_mut() {
            garbage.append(&mut outers);
        }
    }
}

impl Collectable for RefCell<Generator> {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        let Ok(generator) = self.try_borrow() else {
            return false;
        };
        visit(address_of(generator.closure()));
        generator
            .saved_values()
            .iter()
            .for_each(|v| visit_value(visit, v));
        true
    }

    fn clear(&self, garbage: &mut Vec<Value>) {
        if let Ok(mut generator) = self.try_borrow_mut() {
            garbage.extend(generator.kill());
        }
    }
}

impl Collectable for RefCell<Class> {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        let Ok(class) = self.try_borrow() else {
            return false;
        };
        if let Some(base) = class.base_ref() {
            visit(address_of(base));
        }
        class.for_each_value(|v| visit_value(visit, v));
        true
    }

    fn clear(&self, garbage: &mut Vec<Value>) {
        if let Ok(mut class) = self.try_borrow_mut() {
            class.drain_into(garbage);
        }
    }
}

impl Collectable for RefCell<Instance> {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        let Ok(instance) = self.try_borrow() else {
            return false;
        };
        visit(address_of(instance.class_ref()));
        instance.for_each_value(|v| visit_value(visit, v));
        true
    }

    fn clear(&self, garbage: &mut Vec<Value>) {
        if let Ok(mut instance) = self.try_borrow_mut() {
            instance.drain_into(garbage);
        }
    }
}

impl Collectable for RefCell<UserData> {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        let Ok(data) = self.try_borrow() else {
            return false;
        };
        if let Some(delegate) = data.delegate_ref() {
            visit(address_of(delegate));
        }
        true
    }

    fn clear(&self, garbage: &mut Vec<Value>) {
        if let Ok(mut data) = self.try_borrow_mut() {
            if let Some(delegate) = data.take_delegate() {
                garbage.push(Value::Table(delegate));
            }
        }
    }
}

impl Collectable for RefCell<Vm> {
    fn trace(&self, visit: &mut dyn FnMut(usize)) -> bool {
        let Ok(vm) = self.try_borrow() else {
            return false;
        };
        vm.trace_refs(visit);
        true
    }

    fn clear(&self, garbage: &mut Vec<Value>) {
        if let Ok(mut vm) = self.try_borrow_mut() {
            vm.drain_into(garbage);
        }
    }
}
