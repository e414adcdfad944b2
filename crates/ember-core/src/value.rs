//! Dynamic value representation
//!
//! A [`Value`] is either an immediate scalar or a counted reference to a
//! heap object. Cloning a value adds a reference and dropping it releases
//! one; objects whose count reaches zero are freed immediately. Reference
//! cycles are left to the collector in [`crate::gc`].
//!
//! # Equality
//!
//! The `PartialEq` impl is raw identity: scalars compare by value (an
//! integer never equals a float), strings by content and heap objects by
//! address. Script-level `==` with numeric promotion lives in the
//! interpreter. Table keys use [`Value::key_eq`], which compares floats by
//! bit pattern.

use rustc_hash::FxHasher;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::gc::address_of;
use crate::object::{
    Array, Class, Closure, Generator, Instance, NativeClosure, Prototype, Table, UserData,
};
use crate::string::ScriptString;
use crate::vm::Vm;
use crate::{VmError, VmResult};

/// Shared string handle
pub type StringRef = Rc<ScriptString>;
/// Shared table handle
pub type TableRef = Rc<RefCell<Table>>;
/// Shared array handle
pub type ArrayRef = Rc<RefCell<Array>>;
/// Shared closure handle
pub type ClosureRef = Rc<Closure>;
/// Shared native closure handle
pub type NativeRef = Rc<NativeClosure>;
/// Shared generator handle
pub type GeneratorRef = Rc<RefCell<Generator>>;
/// Shared class handle
pub type ClassRef = Rc<RefCell<Class>>;
/// Shared instance handle
pub type InstanceRef = Rc<RefCell<Instance>>;
/// Shared user data handle
pub type UserDataRef = Rc<RefCell<UserData>>;
/// Shared thread handle
pub type ThreadRef = Rc<RefCell<Vm>>;

/// Dynamically typed script value
#[derive(Clone, Default)]
pub enum Value {
    /// null
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Opaque host pointer, never dereferenced
    UserPointer(usize),
    /// Interned string
    String(StringRef),
    /// Hash table
    Table(TableRef),
    /// Dynamic array
    Array(ArrayRef),
    /// Script closure
    Closure(ClosureRef),
    /// Host function
    NativeClosure(NativeRef),
    /// Suspended or finished generator
    Generator(GeneratorRef),
    /// Class
    Class(ClassRef),
    /// Class instance
    Instance(InstanceRef),
    /// Host data with an optional delegate
    UserData(UserDataRef),
    /// Separate interpreter thread sharing the runtime
    Thread(ThreadRef),
    /// Loaded function prototype
    FuncProto(Rc<Prototype>),
}

impl Value {
    // ===== Type Queries =====

    /// Script-visible type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::UserPointer(_) => "userpointer",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Array(_) => "array",
            Value::Closure(_) | Value::NativeClosure(_) => "function",
            Value::Generator(_) => "generator",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::UserData(_) => "userdata",
            Value::Thread(_) => "thread",
            Value::FuncProto(_) => "funcproto",
        }
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is an integer or a float
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Check if this value can be called
    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::NativeClosure(_))
    }

    /// Truthiness: null, false, 0 and 0.0 are false; everything else is true
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            _ => true,
        }
    }

    // ===== Accessors =====

    /// Extract an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a number as f64, promoting integers
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Extract a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract a string handle
    pub fn as_string(&self) -> Option<&StringRef> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Extract a string as UTF-8 text
    pub fn as_str(&self) -> Option<&str> {
        self.as_string().and_then(|s| s.as_str())
    }

    /// Extract a table handle
    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Extract an array handle
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Extract a closure handle
    pub fn as_closure(&self) -> Option<&ClosureRef> {
        match self {
            Value::Closure(c) => Some(c),
            _ => None,
        }
    }

    /// Extract a generator handle
    pub fn as_generator(&self) -> Option<&GeneratorRef> {
        match self {
            Value::Generator(g) => Some(g),
            _ => None,
        }
    }

    /// Extract a class handle
    pub fn as_class(&self) -> Option<&ClassRef> {
        match self {
            Value::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Extract an instance handle
    pub fn as_instance(&self) -> Option<&InstanceRef> {
        match self {
            Value::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Extract a thread handle
    pub fn as_thread(&self) -> Option<&ThreadRef> {
        match self {
            Value::Thread(t) => Some(t),
            _ => None,
        }
    }

    /// Address of the collectable object behind this value, if any
    pub fn gc_address(&self) -> Option<usize> {
        match self {
            Value::Table(t) => Some(address_of(t)),
            Value::Array(a) => Some(address_of(a)),
            Value::Closure(c) => Some(address_of(c)),
            Value::NativeClosure(n) => Some(address_of(n)),
            Value::Generator(g) => Some(address_of(g)),
            Value::Class(c) => Some(address_of(c)),
            Value::Instance(i) => Some(address_of(i)),
            Value::UserData(u) => Some(address_of(u)),
            Value::Thread(t) => Some(address_of(t)),
            _ => None,
        }
    }

    fn heap_address(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(address_of(s)),
            Value::FuncProto(p) => Some(address_of(p)),
            other => other.gc_address(),
        }
    }

    // ===== Table Keys =====

    /// Reject keys that can never be stored
    pub fn check_key(&self) -> VmResult<()> {
        match self {
            Value::Null => Err(VmError::StructuralError("null cannot be used as a key".into())),
            Value::Float(f) if f.is_nan() => {
                Err(VmError::StructuralError("NaN cannot be used as a key".into()))
            }
            _ => Ok(()),
        }
    }

    /// Key identity: same variant and payload; floats by bit pattern
    pub fn key_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => float_key_bits(*a) == float_key_bits(*b),
            (Value::UserPointer(a), Value::UserPointer(b)) => a == b,
            (Value::String(a), Value::String(b)) => {
                Rc::ptr_eq(a, b) || a.as_bytes() == b.as_bytes()
            }
            _ => match (self.heap_address(), other.heap_address()) {
                (Some(a), Some(b)) => a == b && self.type_name() == other.type_name(),
                _ => false,
            },
        }
    }

    /// Hash consistent with [`Value::key_eq`]
    pub fn key_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        match self {
            Value::Null => 0u8.hash(&mut hasher),
            Value::Bool(b) => (1u8, *b).hash(&mut hasher),
            Value::Integer(i) => (2u8, *i).hash(&mut hasher),
            Value::Float(f) => (3u8, float_key_bits(*f)).hash(&mut hasher),
            Value::UserPointer(p) => (4u8, *p).hash(&mut hasher),
            Value::String(s) => return s.hash_code(),
            other => (5u8, other.heap_address().unwrap_or(0)).hash(&mut hasher),
        }
        hasher.finish()
    }

    // ===== Ordering =====

    /// Ordering of numbers and strings without metamethods
    pub fn default_order(&self, other: &Value) -> VmResult<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => Ok(a.partial_cmp(&b).unwrap_or(Ordering::Less)),
                _ => Err(VmError::TypeError(format!(
                    "comparison between '{}' and '{}'",
                    self.type_name(),
                    other.type_name()
                ))),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a == b,
            _ => self.key_eq(other),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::UserPointer(p) => write!(f, "(userpointer : {:#x})", p),
            other => write!(
                f,
                "({} : {:#x})",
                other.type_name(),
                other.heap_address().unwrap_or(0)
            ),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Integer(i) => write!(f, "Integer({})", i),
            Value::Float(x) => write!(f, "Float({:?})", x),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::UserPointer(p) => write!(f, "UserPointer({:#x})", p),
            other => write!(
                f,
                "{}({:#x})",
                other.type_name(),
                other.heap_address().unwrap_or(0)
            ),
        }
    }
}

/// Float key identity: bit pattern, with both zeros as one key
fn float_key_bits(f: f64) -> u64 {
    if f == 0.0 {
        0
    } else {
        f.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(Value::Integer(-1).is_truthy());
        assert!(Value::Float(0.5).is_truthy());
        assert!(Value::UserPointer(0).is_truthy());
    }

    #[test]
    fn test_key_identity_is_type_strict() {
        assert!(!Value::Integer(1).key_eq(&Value::Float(1.0)));
        assert!(Value::Float(0.0).key_eq(&Value::Float(-0.0)));
        assert_eq!(Value::Float(0.0).key_hash(), Value::Float(-0.0).key_hash());
        assert!(Value::Float(f64::NAN).key_eq(&Value::Float(f64::NAN)));
        assert_ne!(Value::Integer(1).key_hash(), Value::Bool(true).key_hash());
    }

    #[test]
    fn test_check_key() {
        assert!(Value::Null.check_key().is_err());
        assert!(Value::Float(f64::NAN).check_key().is_err());
        assert!(Value::Float(1.5).check_key().is_ok());
        assert!(Value::Bool(false).check_key().is_ok());
    }

    #[test]
    fn test_default_order_promotes_numbers() {
        assert_eq!(
            Value::Integer(1).default_order(&Value::Float(1.5)).unwrap(),
            Ordering::Less
        );
        assert!(Value::Integer(1).default_order(&Value::Null).is_err());
    }

    #[test]
    fn test_display_scalars() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Float(3.0).to_string(), "3");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Integer(-7).to_string(), "-7");
    }
}
