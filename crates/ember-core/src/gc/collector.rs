//! Cycle collector

use rustc_hash::FxHashMap;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use super::Collectable;
use crate::value::Value;
use crate::vm::defaults::DEFAULT_GC_PRUNE_THRESHOLD;

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed by collections
    pub objects_freed: usize,

    /// Objects freed by the last collection
    pub last_freed: usize,

    /// Total pause time
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,
}

/// Registry of collectable objects plus the cycle pass
pub struct GarbageCollector {
    /// Every registered object; dead entries are pruned lazily
    nodes: Vec<Weak<dyn Collectable>>,

    /// Registry length that triggers pruning of dead entries
    prune_threshold: usize,

    /// Statistics
    stats: GcStats,
}

impl GarbageCollector {
    /// Create a collector
    pub fn new() -> Self {
        Self::with_prune_threshold(DEFAULT_GC_PRUNE_THRESHOLD)
    }

    /// Create a collector that prunes its registry past `threshold` entries
    pub fn with_prune_threshold(threshold: usize) -> Self {
        Self {
            nodes: Vec::new(),
            prune_threshold: threshold.max(16),
            stats: GcStats::default(),
        }
    }

    /// Track a new object
    pub fn register<T: Collectable + 'static>(&mut self, object: &Rc<T>) {
        if self.nodes.len() >= self.prune_threshold {
            self.prune();
        }
        let weak: Weak<dyn Collectable> = Rc::downgrade(object) as Weak<dyn Collectable>;
        self.nodes.push(weak);
    }

    fn prune(&mut self) {
        self.nodes.retain(|node| node.strong_count() > 0);
        self.prune_threshold = (self.nodes.len() * 2).max(self.prune_threshold);
    }

    /// Number of registered objects still alive
    pub fn live_objects(&self) -> usize {
        self.nodes.iter().filter(|n| n.strong_count() > 0).count()
    }

    /// Reclaim unreachable cycles, returning the number of objects freed
    pub fn collect(&mut self) -> usize {
        let start = Instant::now();
        self.nodes.retain(|node| node.strong_count() > 0);

        let live: Vec<Rc<dyn Collectable>> = self.nodes.iter().filter_map(Weak::upgrade).collect();
        let index: FxHashMap<usize, usize> = live
            .iter()
            .enumerate()
            .map(|(i, node)| (super::address_of(node), i))
            .collect();

        // Subtract internal references; our own upgrade accounts for one.
        let mut gc_refs: Vec<isize> = live
            .iter()
            .map(|node| Rc::strong_count(node) as isize - 1)
            .collect();
        let mut busy = vec![false; live.len()];
        for (i, node) in live.iter().enumerate() {
            let traced = node.trace(&mut |child| {
                if let Some(&j) = index.get(&child) {
                    gc_refs[j] -= 1;
                }
            });
            busy[i] = !traced;
        }

        // Mark everything reachable from externally referenced objects.
        let mut reachable = vec![false; live.len()];
        let mut work: Vec<usize> = (0..live.len())
            .filter(|&i| gc_refs[i] > 0 || busy[i])
            .collect();
        for &i in &work {
            reachable[i] = true;
        }
        while let Some(i) = work.pop() {
            live[i].trace(&mut |child| {
                if let Some(&j) = index.get(&child) {
                    if !reachable[j] {
                        reachable[j] = true;
                        work.push(j);
                    }
                }
            });
        }

        let mut garbage: Vec<Value> = Vec::new();
        let mut freed = 0;
        for (node, _) in live.iter().zip(&reachable).filter(|(_, r)| !**r) {
            node.clear(&mut garbage);
            freed += 1;
        }
        drop(live);
        drop(garbage);
        self.nodes.retain(|node| node.strong_count() > 0);

        let duration = start.elapsed();
        self.stats.collections += 1;
        self.stats.objects_freed += freed;
        self.stats.last_freed = freed;
        self.stats.last_pause_time = duration;
        self.stats.total_pause_time += duration;
        tracing::debug!(
            freed,
            live = self.nodes.len(),
            pause_us = duration.as_micros() as u64,
            "cycle collection finished"
        );
        freed
    }

    /// Get GC statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Array, Table};
    use std::cell::RefCell;

    #[test]
    fn test_unreachable_cycle_is_reclaimed() {
        let mut gc = GarbageCollector::new();
        let a = Rc::new(RefCell::new(Table::new()));
        let b = Rc::new(RefCell::new(Table::new()));
        gc.register(&a);
        gc.register(&b);
        a.borrow_mut()
            .new_slot(Value::Integer(1), Value::Table(b.clone()))
            .unwrap();
        b.borrow_mut()
            .new_slot(Value::Integer(1), Value::Table(a.clone()))
            .unwrap();

        let weak_a = Rc::downgrade(&a);
        let weak_b = Rc::downgrade(&b);
        drop(a);
        drop(b);
        assert!(weak_a.upgrade().is_some());

        assert_eq!(gc.collect(), 2);
        assert!(weak_a.upgrade().is_none());
        assert!(weak_b.upgrade().is_none());
        assert_eq!(gc.stats().objects_freed, 2);
    }

    #[test]
    fn test_externally_held_cycle_survives() {
        let mut gc = GarbageCollector::new();
        let table = Rc::new(RefCell::new(Table::new()));
        let array = Rc::new(RefCell::new(Array::new()));
        gc.register(&table);
        gc.register(&array);
        array.borrow_mut().push(Value::Table(table.clone()));
        table
            .borrow_mut()
            .new_slot(Value::Integer(0), Value::Array(array.clone()))
            .unwrap();
        drop(table);

        assert_eq!(gc.collect(), 0);
        assert_eq!(array.borrow().len(), 1);
        assert_eq!(gc.live_objects(), 2);
    }

    #[test]
    fn test_borrowed_object_is_a_root() {
        let mut gc = GarbageCollector::new();
        let a = Rc::new(RefCell::new(Table::new()));
        gc.register(&a);
        a.borrow_mut()
            .new_slot(Value::Integer(0), Value::Table(a.clone()))
            .unwrap();
        let weak = Rc::downgrade(&a);
        let guard = a.clone();
        drop(a);

        {
            let _borrow = guard.borrow_mut();
            assert_eq!(gc.collect(), 0);
        }
        drop(guard);
        assert_eq!(gc.collect(), 1);
        assert!(weak.upgrade().is_none());
    }
}
