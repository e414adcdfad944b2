//! Interned strings
//!
//! Every script string lives in exactly one [`StringInterner`]: two strings
//! with equal bytes are the same allocation, so equality and table hashing
//! only need the pointer and the cached hash. The interner holds weak
//! entries; a string unlinks itself when its last strong reference drops.

use rustc_hash::FxHasher;
use std::cell::RefCell;
use std::fmt;
use std::hash::Hasher;
use std::rc::{Rc, Weak};

use crate::vm::defaults::DEFAULT_STRING_BUCKETS;

/// Immutable interned byte string
pub struct ScriptString {
    bytes: Box<[u8]>,
    hash: u64,
    table: Weak<RefCell<StringTable>>,
}

impl ScriptString {
    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// UTF-8 view, if the bytes are valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Lossy UTF-8 conversion for diagnostics
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the string is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Cached hash of the bytes
    pub fn hash_code(&self) -> u64 {
        self.hash
    }
}

impl Drop for ScriptString {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        // A string dropped while the table is mid-lookup is pruned lazily.
        if let Ok(mut table) = table.try_borrow_mut() {
            table.unlink(self.hash, self as *const ScriptString);
        };
    }
}

impl fmt::Debug for ScriptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.bytes))
    }
}

impl fmt::Display for ScriptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

/// Hash used for interning and table keys
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.write_usize(bytes.len());
    hasher.finish()
}

/// Bucket storage behind a [`StringInterner`]
pub struct StringTable {
    buckets: Vec<Vec<Weak<ScriptString>>>,
    count: usize,
}

impl StringTable {
    fn new(buckets: usize) -> Self {
        let size = buckets.max(1).next_power_of_two();
        Self {
            buckets: (0..size).map(|_| Vec::new()).collect(),
            count: 0,
        }
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn find(&mut self, hash: u64, bytes: &[u8]) -> Option<Rc<ScriptString>> {
        let idx = self.bucket_of(hash);
        let bucket = &mut self.buckets[idx];
        let before = bucket.len();
        bucket.retain(|entry| entry.strong_count() > 0);
        self.count -= before - bucket.len();

        bucket
            .iter()
            .filter_map(Weak::upgrade)
            .find(|s| s.hash == hash && &*s.bytes == bytes)
    }

    fn insert(&mut self, string: &Rc<ScriptString>) {
        let idx = self.bucket_of(string.hash);
        self.buckets[idx].push(Rc::downgrade(string));
        self.count += 1;
        if self.count > self.buckets.len() {
            self.resize(self.buckets.len() * 2);
        }
    }

    fn resize(&mut self, size: usize) {
        let old = std::mem::replace(&mut self.buckets, (0..size).map(|_| Vec::new()).collect());
        self.count = 0;
        for entry in old.into_iter().flatten() {
            if let Some(string) = entry.upgrade() {
                let idx = self.bucket_of(string.hash);
                self.buckets[idx].push(entry);
                self.count += 1;
            }
        }
        tracing::trace!(buckets = size, strings = self.count, "string table resized");
    }

    fn unlink(&mut self, hash: u64, ptr: *const ScriptString) {
        let idx = self.bucket_of(hash);
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.iter().position(|entry| Weak::as_ptr(entry) == ptr) {
            bucket.swap_remove(pos);
            self.count -= 1;
        }
    }
}

/// Shared string interner
#[derive(Clone)]
pub struct StringInterner {
    table: Rc<RefCell<StringTable>>,
}

impl StringInterner {
    /// Create an interner with the default bucket count
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_STRING_BUCKETS)
    }

    /// Create an interner with an initial bucket count (rounded to a power of two)
    pub fn with_buckets(buckets: usize) -> Self {
        Self {
            table: Rc::new(RefCell::new(StringTable::new(buckets))),
        }
    }

    /// Return the unique string for `text`
    pub fn intern(&self, text: &str) -> Rc<ScriptString> {
        self.intern_bytes(text.as_bytes())
    }

    /// Return the unique string for `bytes`
    pub fn intern_bytes(&self, bytes: &[u8]) -> Rc<ScriptString> {
        let hash = hash_bytes(bytes);
        let mut table = self.table.borrow_mut();
        if let Some(existing) = table.find(hash, bytes) {
            return existing;
        }
        let string = Rc::new(ScriptString {
            bytes: bytes.into(),
            hash,
            table: Rc::downgrade(&self.table),
        });
        table.insert(&string);
        string
    }

    /// Number of live strings
    pub fn len(&self) -> usize {
        self.table
            .borrow()
            .buckets
            .iter()
            .flatten()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    /// Check if no strings are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current bucket count
    pub fn bucket_count(&self) -> usize {
        self.table.borrow().buckets.len()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
