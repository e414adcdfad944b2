//! Classes and instances
//!
//! A class keeps a member table mapping names to an encoded slot: fields
//! index into `defaults`, methods into `methods`. Deriving from a base
//! copies the base's members, so lookups never walk the base chain.
//! Instantiating a class locks it (and its bases) against new members;
//! existing members may still be reassigned.

use std::rc::Rc;

use crate::object::Table;
use crate::value::{ClassRef, Value};
use crate::{VmError, VmResult};

/// Operator and protocol hooks a class (or a delegate table) can define
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaMethod {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a % b`
    Modulo,
    /// `-a`
    Unm,
    /// Assignment to a missing member
    Set,
    /// Read of a missing member
    Get,
    /// `typeof a`
    Typeof,
    /// foreach step
    Nexti,
    /// Ordering
    Cmp,
    /// Calling the object
    Call,
    /// New-slot on the object
    NewSlot,
    /// Delete on the object
    DelSlot,
    /// String conversion
    ToString,
    /// A class derived from this one
    Inherited,
}

impl MetaMethod {
    /// Number of metamethods
    pub const COUNT: usize = 16;

    /// Every metamethod, in slot order
    pub const ALL: [MetaMethod; Self::COUNT] = [
        MetaMethod::Add,
        MetaMethod::Sub,
        MetaMethod::Mul,
        MetaMethod::Div,
        MetaMethod::Modulo,
        MetaMethod::Unm,
        MetaMethod::Set,
        MetaMethod::Get,
        MetaMethod::Typeof,
        MetaMethod::Nexti,
        MetaMethod::Cmp,
        MetaMethod::Call,
        MetaMethod::NewSlot,
        MetaMethod::DelSlot,
        MetaMethod::ToString,
        MetaMethod::Inherited,
    ];

    /// Member name that defines this metamethod
    pub fn name(self) -> &'static str {
        match self {
            MetaMethod::Add => "_add",
            MetaMethod::Sub => "_sub",
            MetaMethod::Mul => "_mul",
            MetaMethod::Div => "_div",
            MetaMethod::Modulo => "_modulo",
            MetaMethod::Unm => "_unm",
            MetaMethod::Set => "_set",
            MetaMethod::Get => "_get",
            MetaMethod::Typeof => "_typeof",
            MetaMethod::Nexti => "_nexti",
            MetaMethod::Cmp => "_cmp",
            MetaMethod::Call => "_call",
            MetaMethod::NewSlot => "_newslot",
            MetaMethod::DelSlot => "_delslot",
            MetaMethod::ToString => "_tostring",
            MetaMethod::Inherited => "_inherited",
        }
    }

    /// Look up a metamethod by member name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|mm| mm.name() == name)
    }

    /// Slot index
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Name of the member run when a class is called
pub const CONSTRUCTOR_NAME: &str = "constructor";

/// Decoded member slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member {
    /// Index into the instance values / class defaults
    Field(usize),
    /// Index into the class methods
    Method(usize),
}

impl Member {
    fn encode(self) -> Value {
        match self {
            Member::Field(i) => Value::Integer((i as i64) << 1),
            Member::Method(i) => Value::Integer(((i as i64) << 1) | 1),
        }
    }

    fn decode(value: &Value) -> Option<Self> {
        let raw = value.as_integer()?;
        let idx = (raw >> 1) as usize;
        Some(if raw & 1 == 1 {
            Member::Method(idx)
        } else {
            Member::Field(idx)
        })
    }
}

/// Class definition
pub struct Class {
    base: Option<ClassRef>,
    members: Table,
    defaults: Vec<Value>,
    methods: Vec<Value>,
    metamethods: Vec<Value>,
    constructor: Option<usize>,
    locked: bool,
}

impl Class {
    /// Create a class, inheriting every member of `base`
    pub fn new(base: Option<ClassRef>) -> Self {
        match &base {
            Some(parent) => {
                let parent_ref = parent.borrow();
                Self {
                    members: parent_ref.members.clone(),
                    defaults: parent_ref.defaults.clone(),
                    methods: parent_ref.methods.clone(),
                    metamethods: parent_ref.metamethods.clone(),
                    constructor: parent_ref.constructor,
                    locked: false,
                    base: Some(Rc::clone(parent)),
                }
            }
            None => Self {
                base: None,
                members: Table::new(),
                defaults: Vec::new(),
                methods: Vec::new(),
                metamethods: vec![Value::Null; MetaMethod::COUNT],
                constructor: None,
                locked: false,
            },
        }
    }

    /// Base class
    pub fn base(&self) -> Option<ClassRef> {
        self.base.clone()
    }

    pub(crate) fn base_ref(&self) -> Option<&ClassRef> {
        self.base.as_ref()
    }

    /// Check if the class has been instantiated
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Lock `class` and every base against new members
    pub fn lock(class: &ClassRef) {
        let mut cursor = Some(Rc::clone(class));
        while let Some(current) = cursor {
            let mut current_ref = current.borrow_mut();
            current_ref.locked = true;
            cursor = current_ref.base.clone();
        }
    }

    /// Member slot for `key`
    pub fn member(&self, key: &Value) -> Option<Member> {
        self.members.raw_get(key).as_ref().and_then(Member::decode)
    }

    /// Value of a field default or method
    pub fn get(&self, key: &Value) -> Option<Value> {
        match self.member(key)? {
            Member::Field(i) => self.defaults.get(i).cloned(),
            Member::Method(i) => self.methods.get(i).cloned(),
        }
    }

    /// Method at `index`
    pub fn method(&self, index: usize) -> Option<Value> {
        self.methods.get(index).cloned()
    }

    /// Field defaults, in slot order
    pub fn defaults(&self) -> &[Value] {
        &self.defaults
    }

    /// Constructor method, if any
    pub fn constructor(&self) -> Option<Value> {
        self.constructor.and_then(|i| self.method(i))
    }

    /// Metamethod defined by this class
    pub fn metamethod(&self, mm: MetaMethod) -> Option<Value> {
        self.metamethods
            .get(mm.index())
            .filter(|v| !v.is_null())
            .cloned()
    }

    /// Member-table entry after `cursor`, decoded into its current value
    pub fn next_member(&self, cursor: usize) -> Option<(Value, Member, usize)> {
        self.members
            .next(cursor)
            .and_then(|(key, slot, next)| Member::decode(&slot).map(|m| (key, m, next)))
    }

    /// Add or replace a member
    pub fn new_slot(&mut self, key: Value, value: Value) -> VmResult<()> {
        if self.locked {
            return Err(VmError::StructuralError(
                "cannot add members to a class that has been instantiated".into(),
            ));
        }
        key.check_key()?;

        let is_method = value.is_callable();
        match self.member(&key) {
            Some(Member::Method(i)) if is_method => self.methods[i] = value.clone(),
            Some(Member::Field(i)) if !is_method => {
                self.defaults[i] = value;
                return Ok(());
            }
            _ if is_method => {
                self.methods.push(value.clone());
                let idx = self.methods.len() - 1;
                self.members.new_slot(key.clone(), Member::Method(idx).encode())?;
                if key.as_str() == Some(CONSTRUCTOR_NAME) {
                    self.constructor = Some(idx);
                }
            }
            _ => {
                self.defaults.push(value);
                let idx = self.defaults.len() - 1;
                self.members.new_slot(key, Member::Field(idx).encode())?;
                return Ok(());
            }
        }

        if let Some(mm) = key.as_str().and_then(MetaMethod::from_name) {
            self.metamethods[mm.index()] = value;
        }
        Ok(())
    }

    /// Reassign an existing member; returns false if absent
    ///
    /// Allowed on locked classes.
    pub fn set(&mut self, key: &Value, value: Value) -> bool {
        match self.member(key) {
            Some(Member::Field(i)) => {
                self.defaults[i] = value;
                true
            }
            Some(Member::Method(i)) => {
                if let Some(mm) = key.as_str().and_then(MetaMethod::from_name) {
                    self.metamethods[mm.index()] = value.clone();
                }
                self.methods[i] = value;
                true
            }
            None => false,
        }
    }

    /// Create an instance, locking the class
    pub fn instantiate(class: &ClassRef) -> Instance {
        Class::lock(class);
        let values = class.borrow().defaults.clone();
        Instance {
            class: Rc::clone(class),
            values,
        }
    }

    /// Check if `class` is `ancestor` or derives from it
    pub fn is_subclass_of(class: &ClassRef, ancestor: &ClassRef) -> bool {
        let mut cursor = Some(Rc::clone(class));
        while let Some(current) = cursor {
            if Rc::ptr_eq(&current, ancestor) {
                return true;
            }
            cursor = current.borrow().base.clone();
        }
        false
    }

    pub(crate) fn for_each_value(&self, mut visit: impl FnMut(&Value)) {
        self.members.for_each_value(&mut visit);
        self.defaults.iter().for_each(&mut visit);
        self.methods.iter().for_each(&mut visit);
        self.metamethods.iter().for_each(&mut visit);
    }

    pub(crate) fn drain_into(&mut self, garbage: &mut Vec<Value>) {
        self.members.drain_into(garbage);
        garbage.append(&mut self.defaults);
        garbage.append(&mut self.methods);
        garbage.extend(self.metamethods.iter_mut().map(std::mem::take));
        if let Some(base) = self.base.take() {
            garbage.push(Value::Class(base));
        }
        self.constructor = None;
    }
}

/// Instance of a class
pub struct Instance {
    class: ClassRef,
    values: Vec<Value>,
}

impl Instance {
    /// Class of this instance
    pub fn class(&self) -> ClassRef {
        Rc::clone(&self.class)
    }

    /// Field value or class method
    pub fn get(&self, key: &Value) -> Option<Value> {
        let class = self.class.borrow();
        match class.member(key)? {
            Member::Field(i) => self.values.get(i).cloned(),
            Member::Method(i) => class.method(i),
        }
    }

    /// Assign an existing field; returns false if `key` is not a field
    pub fn set(&mut self, key: &Value, value: Value) -> bool {
        let member = self.class.borrow().member(key);
        match member {
            Some(Member::Field(i)) if i < self.values.len() => {
                self.values[i] = value;
                true
            }
            _ => false,
        }
    }

    /// Field value by slot index
    pub fn field(&self, index: usize) -> Option<Value> {
        self.values.get(index).cloned()
    }

    pub(crate) fn class_ref(&self) -> &ClassRef {
        &self.class
    }

    pub(crate) fn for_each_value(&self, visit: impl FnMut(&Value)) {
        self.values.iter().for_each(visit);
    }

    pub(crate) fn drain_into(&mut self, garbage: &mut Vec<Value>) {
        garbage.append(&mut self.values);
    }
}
