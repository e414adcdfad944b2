//! Shared runtime state
//!
//! A [`RuntimeContext`] is shared by a main [`super::Vm`] and every thread
//! created from it: one string table, one root table, one collector and
//! one error handler.

use std::cell::RefCell;
use std::rc::Rc;

use crate::gc::GarbageCollector;
use crate::object::{
    Array, Class, Closure, Generator, MetaMethod, NativeClosure, Outer, Prototype, Table, UserData,
};
use crate::string::StringInterner;
use crate::value::{
    ArrayRef, ClassRef, ClosureRef, GeneratorRef, InstanceRef, NativeRef, StringRef, TableRef,
    UserDataRef, Value,
};
use crate::vm::defaults::*;

/// Host callback receiving `print` output
pub type PrintFn = Rc<dyn Fn(&str)>;

/// VM configuration
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Maximum nested native calls and run loops
    pub max_native_calls: usize,

    /// Maximum script call frames per thread
    pub max_call_depth: usize,

    /// Initial register stack capacity
    pub initial_stack_size: usize,

    /// Maximum register stack size
    pub max_stack_size: usize,

    /// Collector registry pruning threshold
    pub gc_prune_threshold: usize,

    /// Initial string table buckets
    pub string_table_buckets: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_native_calls: DEFAULT_MAX_NATIVE_CALLS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            initial_stack_size: DEFAULT_INITIAL_STACK_SIZE,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            gc_prune_threshold: DEFAULT_GC_PRUNE_THRESHOLD,
            string_table_buckets: DEFAULT_STRING_BUCKETS,
        }
    }
}

impl VmOptions {
    /// Set the native call limit
    pub fn with_max_native_calls(mut self, limit: usize) -> Self {
        self.max_native_calls = limit;
        self
    }

    /// Set the call depth limit
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Set the register stack limit
    pub fn with_max_stack_size(mut self, slots: usize) -> Self {
        self.max_stack_size = slots;
        self
    }
}

/// State shared by every thread of one runtime
pub struct RuntimeContext {
    options: VmOptions,
    strings: StringInterner,
    root: RefCell<TableRef>,
    gc: RefCell<GarbageCollector>,
    error_handler: RefCell<Option<Value>>,
    print: RefCell<Option<PrintFn>>,
    metamethod_names: Vec<StringRef>,
    constructor_name: StringRef,
}

impl RuntimeContext {
    /// Create a runtime with a fresh root table
    pub fn new(options: VmOptions) -> Rc<Self> {
        let strings = StringInterner::with_buckets(options.string_table_buckets);
        let mut gc = GarbageCollector::with_prune_threshold(options.gc_prune_threshold);
        let root = Rc::new(RefCell::new(Table::new()));
        gc.register(&root);
        let metamethod_names = MetaMethod::ALL
            .iter()
            .map(|mm| strings.intern(mm.name()))
            .collect();
        let constructor_name = strings.intern(crate::object::CONSTRUCTOR_NAME);

        Rc::new(Self {
            options,
            strings,
            root: RefCell::new(root),
            gc: RefCell::new(gc),
            error_handler: RefCell::new(None),
            print: RefCell::new(None),
            metamethod_names,
            constructor_name,
        })
    }

    /// Configuration
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// String interner
    pub fn strings(&self) -> &StringInterner {
        &self.strings
    }

    /// Intern a string and wrap it as a value
    pub fn intern(&self, text: &str) -> Value {
        Value::String(self.strings.intern(text))
    }

    /// Root table
    pub fn root_table(&self) -> TableRef {
        self.root.borrow().clone()
    }

    /// Replace the root table, returning the previous one
    pub fn replace_root_table(&self, table: TableRef) -> TableRef {
        std::mem::replace(&mut *self.root.borrow_mut(), table)
    }

    /// Name value of a metamethod
    pub fn metamethod_name(&self, mm: MetaMethod) -> Value {
        Value::String(self.metamethod_names[mm.index()].clone())
    }

    /// Name value of the constructor member
    pub fn constructor_name(&self) -> Value {
        Value::String(self.constructor_name.clone())
    }

    // ===== Error Handler & Output =====

    /// Installed error handler
    pub fn error_handler(&self) -> Option<Value> {
        self.error_handler.borrow().clone()
    }

    /// Install or remove the error handler
    pub fn set_error_handler(&self, handler: Option<Value>) {
        *self.error_handler.borrow_mut() = handler;
    }

    /// Route `print` output to a host callback
    pub fn set_print_function(&self, print: Option<PrintFn>) {
        *self.print.borrow_mut() = print;
    }

    /// Write a line of script output
    pub fn print(&self, text: &str) {
        let print = self.print.borrow().clone();
        match print {
            Some(print) => print(text),
            None => println!("{}", text),
        }
    }

    // ===== Collector =====

    /// Run the cycle collector
    pub fn collect_garbage(&self) -> usize {
        self.gc.borrow_mut().collect()
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> crate::gc::GcStats {
        self.gc.borrow().stats().clone()
    }

    /// Registered objects still alive
    pub fn live_objects(&self) -> usize {
        self.gc.borrow().live_objects()
    }

    pub(crate) fn register<T: crate::gc::Collectable + 'static>(&self, object: &Rc<T>) {
        self.gc.borrow_mut().register(object);
    }

    // ===== Allocation =====

    /// Allocate a table
    pub fn new_table(&self) -> TableRef {
        let table = Rc::new(RefCell::new(Table::new()));
        self.register(&table);
        table
    }

    /// Allocate a table sized for `capacity` entries
    pub fn new_table_with_capacity(&self, capacity: usize) -> TableRef {
        let table = Rc::new(RefCell::new(Table::with_capacity(capacity)));
        self.register(&table);
        table
    }

    /// Allocate an array with room for `capacity` values
    pub fn new_array(&self, capacity: usize) -> ArrayRef {
        let array = Rc::new(RefCell::new(Array::with_capacity(capacity)));
        self.register(&array);
        array
    }

    /// Wrap values in a new array
    pub fn array_from(&self, values: Vec<Value>) -> ArrayRef {
        let array = Rc::new(RefCell::new(Array::from_values(values)));
        self.register(&array);
        array
    }

    /// Allocate a captured-variable cell
    pub fn new_outer(&self, value: Value) -> Rc<Outer> {
        let cell = Rc::new(Outer::new(value));
        self.register(&cell);
        cell
    }

    /// Allocate a closure
    pub fn new_closure(&self, proto: Rc<Prototype>, outers: Vec<Rc<Outer>>) -> ClosureRef {
        let closure = Rc::new(Closure::new(proto, outers));
        self.register(&closure);
        closure
    }

    /// Register a native closure
    pub fn new_native(&self, native: NativeClosure) -> NativeRef {
        let native = Rc::new(native);
        self.register(&native);
        native
    }

    /// Allocate a class
    pub fn new_class(&self, base: Option<ClassRef>) -> ClassRef {
        let class = Rc::new(RefCell::new(Class::new(base)));
        self.register(&class);
        class
    }

    /// Instantiate a class, locking it
    pub fn new_instance(&self, class: &ClassRef) -> InstanceRef {
        let instance = Rc::new(RefCell::new(Class::instantiate(class)));
        self.register(&instance);
        instance
    }

    /// Allocate a suspended generator
    pub fn new_generator(&self, closure: ClosureRef, window: Vec<Value>) -> GeneratorRef {
        let generator = Rc::new(RefCell::new(Generator::new(closure, window)));
        self.register(&generator);
        generator
    }

    /// Wrap host data
    pub fn new_userdata(&self, data: UserData) -> UserDataRef {
        let data = Rc::new(RefCell::new(data));
        self.register(&data);
        data
    }

    /// Drop globals and the error handler, then reclaim whatever cycles remain
    pub(crate) fn shutdown(&self) {
        if let Ok(root) = self.root.try_borrow() {
            if let Ok(mut table) = root.try_borrow_mut() {
                table.clear();
            }
        }
        if let Ok(mut handler) = self.error_handler.try_borrow_mut() {
            handler.take();
        }
        if let Ok(mut gc) = self.gc.try_borrow_mut() {
            let freed = gc.collect();
            tracing::debug!(freed, "runtime shut down");
        }
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("options", &self.options)
            .field("strings", &self.strings.len())
            .finish()
    }
}
