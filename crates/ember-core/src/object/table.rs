//! Hash table with chained open addressing
//!
//! Nodes live in a power-of-two array. Each key has a main position
//! (`hash & (size - 1)`); colliding keys are linked through `next` into
//! free nodes taken from a downward-moving free pointer. A node that sits
//! in another key's main position is evicted to a free node on insertion,
//! so every chain starts at its own main position.
//!
//! Removal unlinks the node from its chain. When the removed node heads
//! its chain, the successor is moved into the main position, which keeps
//! the chain-head invariant and guarantees free nodes never carry a link.

use std::rc::Rc;

use crate::value::{TableRef, Value};
use crate::{VmError, VmResult};

/// Smallest node array
pub const MIN_TABLE_SIZE: usize = 4;

#[derive(Clone, Default)]
struct Node {
    key: Value,
    val: Value,
    next: Option<usize>,
}

impl Node {
    fn is_free(&self) -> bool {
        self.key.is_null()
    }
}

/// Script hash table with an optional delegate
#[derive(Clone)]
pub struct Table {
    nodes: Vec<Node>,
    first_free: usize,
    used: usize,
    delegate: Option<TableRef>,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a table that can hold `capacity` entries without growing
    pub fn with_capacity(capacity: usize) -> Self {
        let size = (capacity * 4 / 3 + 1).max(MIN_TABLE_SIZE).next_power_of_two();
        Self {
            nodes: Self::alloc(size),
            first_free: size,
            used: 0,
            delegate: None,
        }
    }

    fn alloc(size: usize) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(size);
        nodes.resize_with(size, Node::default);
        nodes
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.used
    }

    /// Check if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Number of entries, counted by walking the node array
    pub fn count_used(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_free()).count()
    }

    /// Size of the node array
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    fn main_position(&self, key: &Value) -> usize {
        (key.key_hash() as usize) & (self.nodes.len() - 1)
    }

    fn find(&self, key: &Value) -> Option<usize> {
        if key.is_null() {
            return None;
        }
        let mut cursor = Some(self.main_position(key));
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            if node.key.key_eq(key) {
                return Some(idx);
            }
            cursor = node.next;
        }
        None
    }

    // ===== Lookup =====

    /// Own entry only
    pub fn raw_get(&self, key: &Value) -> Option<Value> {
        self.find(key).map(|idx| self.nodes[idx].val.clone())
    }

    /// Own entry, then the delegate chain
    pub fn get(&self, key: &Value) -> Option<Value> {
        if let Some(value) = self.raw_get(key) {
            return Some(value);
        }
        self.delegate
            .as_ref()
            .and_then(|delegate| delegate.borrow().get(key))
    }

    /// Check if the key is present in this table
    pub fn contains_key(&self, key: &Value) -> bool {
        self.find(key).is_some()
    }

    // ===== Mutation =====

    /// Overwrite an existing entry; returns false if the key is absent
    pub fn set(&mut self, key: &Value, value: Value) -> bool {
        match self.find(key) {
            Some(idx) => {
                self.nodes[idx].val = value;
                true
            }
            None => false,
        }
    }

    /// Insert or overwrite
    pub fn new_slot(&mut self, key: Value, value: Value) -> VmResult<()> {
        key.check_key()?;
        if let Some(idx) = self.find(&key) {
            self.nodes[idx].val = value;
            return Ok(());
        }

        if self.used + 1 > self.nodes.len() * 3 / 4 {
            self.rehash(self.nodes.len() * 2);
        }
        if let Err((key, value)) = self.insert_new(key, value) {
            // Free pointer ran past the remaining holes; rebuild in place.
            self.rehash(self.nodes.len());
            if let Err((key, value)) = self.insert_new(key, value) {
                self.rehash(self.nodes.len() * 2);
                let _ = self.insert_new(key, value);
            }
        }
        Ok(())
    }

    fn insert_new(&mut self, key: Value, value: Value) -> Result<(), (Value, Value)> {
        let mp = self.main_position(&key);
        if self.nodes[mp].is_free() {
            self.nodes[mp] = Node {
                key,
                val: value,
                next: None,
            };
            self.used += 1;
            return Ok(());
        }

        let Some(free) = self.take_free() else {
            return Err((key, value));
        };

        let colliding_mp = self.main_position(&self.nodes[mp].key);
        if colliding_mp != mp {
            // Evict the squatter: relink its predecessor to the free node.
            let mut prev = colliding_mp;
            while let Some(next) = self.nodes[prev].next {
                if next == mp {
                    break;
                }
                prev = next;
            }
            self.nodes[prev].next = Some(free);
            self.nodes[free] = std::mem::take(&mut self.nodes[mp]);
            self.nodes[mp] = Node {
                key,
                val: value,
                next: None,
            };
        } else {
            self.nodes[free] = Node {
                key,
                val: value,
                next: self.nodes[mp].next,
            };
            self.nodes[mp].next = Some(free);
        }
        self.used += 1;
        Ok(())
    }

    fn take_free(&mut self) -> Option<usize> {
        while self.first_free > 0 {
            self.first_free -= 1;
            if self.nodes[self.first_free].is_free() {
                return Some(self.first_free);
            }
        }
        None
    }

    fn rehash(&mut self, size: usize) {
        let size = size.max(MIN_TABLE_SIZE);
        let old = std::mem::replace(&mut self.nodes, Self::alloc(size));
        self.first_free = size;
        self.used = 0;
        for node in old {
            if !node.is_free() {
                let _ = self.insert_new(node.key, node.val);
            }
        }
        tracing::trace!(size, used = self.used, "table rehashed");
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        if key.is_null() {
            return None;
        }
        let mut prev: Option<usize> = None;
        let mut cursor = Some(self.main_position(key));
        while let Some(idx) = cursor {
            if self.nodes[idx].key.key_eq(key) {
                let removed = match (prev, self.nodes[idx].next) {
                    (Some(p), next) => {
                        self.nodes[p].next = next;
                        std::mem::take(&mut self.nodes[idx])
                    }
                    (None, Some(next)) => {
                        let successor = std::mem::take(&mut self.nodes[next]);
                        std::mem::replace(&mut self.nodes[idx], successor)
                    }
                    (None, None) => std::mem::take(&mut self.nodes[idx]),
                };
                self.used -= 1;
                if self.nodes.len() > MIN_TABLE_SIZE && self.used <= self.nodes.len() / 4 {
                    self.rehash(self.nodes.len() / 2);
                }
                return Some(removed.val);
            }
            prev = Some(idx);
            cursor = self.nodes[idx].next;
        }
        None
    }

    /// Drop every entry, keeping the delegate
    pub fn clear(&mut self) {
        let size = self.nodes.len();
        self.nodes = Self::alloc(size);
        self.first_free = size;
        self.used = 0;
    }

    // ===== Iteration =====

    /// Entry at or after node `cursor`, with the cursor to continue from
    pub fn next(&self, cursor: usize) -> Option<(Value, Value, usize)> {
        self.nodes
            .iter()
            .enumerate()
            .skip(cursor)
            .find(|(_, node)| !node.is_free())
            .map(|(idx, node)| (node.key.clone(), node.val.clone(), idx + 1))
    }

    /// Snapshot of all entries in node order
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.nodes
            .iter()
            .filter(|n| !n.is_free())
            .map(|n| (n.key.clone(), n.val.clone()))
            .collect()
    }

    /// Keys and values held by this table, for the collector
    pub(crate) fn for_each_value(&self, mut visit: impl FnMut(&Value)) {
        for node in self.nodes.iter().filter(|n| !n.is_free()) {
            visit(&node.key);
            visit(&node.val);
        }
    }

    /// Move every entry and the delegate out of the table
    pub(crate) fn drain_into(&mut self, garbage: &mut Vec<Value>) {
        let size = self.nodes.len();
        for node in std::mem::replace(&mut self.nodes, Self::alloc(size)) {
            garbage.push(node.key);
            garbage.push(node.val);
        }
        self.first_free = size;
        self.used = 0;
        if let Some(delegate) = self.delegate.take() {
            garbage.push(Value::Table(delegate));
        }
    }

    // ===== Delegation =====

    /// Current delegate
    pub fn delegate(&self) -> Option<TableRef> {
        self.delegate.clone()
    }

    /// Set or clear the delegate of `table`, refusing cycles
    ///
    /// On error the table is left unchanged.
    pub fn set_delegate(table: &TableRef, delegate: Option<TableRef>) -> VmResult<()> {
        let mut cursor = delegate.clone();
        while let Some(candidate) = cursor {
            if Rc::ptr_eq(&candidate, table) {
                return Err(VmError::StructuralError(
                    "delegate chain would contain the table itself".into(),
                ));
            }
            cursor = candidate.borrow().delegate.clone();
        }
        table.borrow_mut().delegate = delegate;
        Ok(())
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn int(i: i64) -> Value {
        Value::Integer(i)
    }

    #[test]
    fn test_insert_get_remove() {
        let mut table = Table::new();
        for i in 0..100 {
            table.new_slot(int(i), int(i * 10)).unwrap();
        }
        assert_eq!(table.len(), 100);
        assert_eq!(table.count_used(), 100);
        for i in 0..100 {
            assert_eq!(table.raw_get(&int(i)), Some(int(i * 10)));
        }

        for i in (0..100).step_by(2) {
            assert_eq!(table.remove(&int(i)), Some(int(i * 10)));
        }
        assert_eq!(table.len(), 50);
        assert_eq!(table.count_used(), 50);
        for i in 0..100 {
            let expected = if i % 2 == 0 { None } else { Some(int(i * 10)) };
            assert_eq!(table.raw_get(&int(i)), expected);
        }
    }

    #[test]
    fn test_remove_keeps_remaining_keys_reachable() {
        let mut table = Table::with_capacity(2);
        let keys: Vec<Value> = (0..3).map(int).collect();
        for k in &keys {
            table.new_slot(k.clone(), k.clone()).unwrap();
        }
        for k in &keys {
            assert!(table.remove(k).is_some());
            for rest in keys.iter().skip_while(|x| !x.key_eq(k)).skip(1) {
                assert_eq!(table.raw_get(rest), Some(rest.clone()));
            }
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_set_only_overwrites() {
        let mut table = Table::new();
        assert!(!table.set(&int(1), int(2)));
        table.new_slot(int(1), int(2)).unwrap();
        assert!(table.set(&int(1), int(3)));
        assert_eq!(table.raw_get(&int(1)), Some(int(3)));
    }

    #[test]
    fn test_invalid_keys() {
        let mut table = Table::new();
        assert!(table.new_slot(Value::Null, int(1)).is_err());
        assert!(table.new_slot(Value::Float(f64::NAN), int(1)).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_integer_and_float_keys_are_distinct() {
        let mut table = Table::new();
        table.new_slot(int(1), int(10)).unwrap();
        table.new_slot(Value::Float(1.0), int(20)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.raw_get(&int(1)), Some(int(10)));
        assert_eq!(table.raw_get(&Value::Float(1.0)), Some(int(20)));
    }

    #[test]
    fn test_signed_zero_keys_share_a_slot() {
        let mut table = Table::new();
        table.new_slot(Value::Float(0.0), int(1)).unwrap();
        table.new_slot(Value::Float(-0.0), int(2)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.raw_get(&Value::Float(0.0)), Some(int(2)));
    }

    #[test]
    fn test_grow_and_shrink() {
        let mut table = Table::new();
        for i in 0..64 {
            table.new_slot(int(i), int(i)).unwrap();
        }
        let grown = table.capacity();
        assert!(grown >= 64);
        for i in 0..60 {
            table.remove(&int(i));
        }
        assert!(table.capacity() < grown);
        assert_eq!(table.count_used(), 4);
    }

    #[test]
    fn test_next_visits_every_entry_once() {
        let mut table = Table::new();
        for i in 0..20 {
            table.new_slot(int(i), int(-i)).unwrap();
        }
        let mut seen = Vec::new();
        let mut cursor = 0;
        while let Some((key, value, next)) = table.next(cursor) {
            assert_eq!(value, int(-key.as_integer().unwrap()));
            seen.push(key.as_integer().unwrap());
            cursor = next;
        }
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_delegate_lookup_and_cycles() {
        let a: TableRef = Rc::new(RefCell::new(Table::new()));
        let b: TableRef = Rc::new(RefCell::new(Table::new()));
        b.borrow_mut().new_slot(int(1), int(100)).unwrap();

        Table::set_delegate(&a, Some(b.clone())).unwrap();
        assert_eq!(a.borrow().get(&int(1)), Some(int(100)));
        assert_eq!(a.borrow().raw_get(&int(1)), None);

        assert!(Table::set_delegate(&b, Some(a.clone())).is_err());
        assert!(b.borrow().delegate().is_none());
        assert!(Table::set_delegate(&a, Some(a.clone())).is_err());
        assert!(a.borrow().delegate().is_some());
    }
}
