//! Dynamic arrays

use std::cmp::Ordering;

use crate::value::Value;
use crate::{VmError, VmResult};

const MIN_SHRINK_CAPACITY: usize = 8;

/// Pop from an empty array
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("array is empty")]
pub struct EmptyError;

/// Index outside `0..len`
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("index {index} out of range for array of length {len}")]
pub struct IndexError {
    /// Requested index
    pub index: i64,
    /// Array length at the time
    pub len: usize,
}

impl From<EmptyError> for VmError {
    fn from(err: EmptyError) -> Self {
        VmError::IndexError(err.to_string())
    }
}

impl From<IndexError> for VmError {
    fn from(err: IndexError) -> Self {
        VmError::IndexError(err.to_string())
    }
}

/// Growable array of values
#[derive(Clone, Default)]
pub struct Array {
    values: Vec<Value>,
}

impl Array {
    /// Create an empty array
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Create an empty array with room for `capacity` values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    /// Wrap existing values
    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the array is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Allocated capacity
    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    /// Contents as a slice
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn index(&self, index: i64) -> Result<usize, IndexError> {
        usize::try_from(index)
            .ok()
            .filter(|i| *i < self.values.len())
            .ok_or(IndexError {
                index,
                len: self.values.len(),
            })
    }

    /// Value at `index`
    pub fn get(&self, index: i64) -> Result<Value, IndexError> {
        self.index(index).map(|i| self.values[i].clone())
    }

    /// Replace the value at `index`
    pub fn set(&mut self, index: i64, value: Value) -> Result<(), IndexError> {
        let i = self.index(index)?;
        self.values[i] = value;
        Ok(())
    }

    /// Append a value
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Remove and return the last value
    pub fn pop(&mut self) -> Result<Value, EmptyError> {
        let value = self.values.pop().ok_or(EmptyError)?;
        self.shrink_if_sparse();
        Ok(value)
    }

    /// Last value
    pub fn top(&self) -> Result<Value, EmptyError> {
        self.values.last().cloned().ok_or(EmptyError)
    }

    /// Insert before `index`; `index == len` appends
    pub fn insert(&mut self, index: i64, value: Value) -> Result<(), IndexError> {
        let len = self.values.len();
        let i = usize::try_from(index)
            .ok()
            .filter(|i| *i <= len)
            .ok_or(IndexError { index, len })?;
        self.values.insert(i, value);
        Ok(())
    }

    /// Remove the value at `index`
    pub fn remove(&mut self, index: i64) -> Result<Value, IndexError> {
        let i = self.index(index)?;
        let value = self.values.remove(i);
        self.shrink_if_sparse();
        Ok(value)
    }

    /// Truncate or extend to `len`, filling new slots with `fill`
    pub fn resize(&mut self, len: usize, fill: Value) {
        self.values.resize(len, fill);
        self.shrink_if_sparse();
    }

    /// Reverse in place
    pub fn reverse(&mut self) {
        self.values.reverse();
    }

    /// Sort with the default number/string ordering
    pub fn sort(&mut self) -> VmResult<()> {
        quicksort(&mut self.values, &mut |a: &Value, b: &Value| a.default_order(b))
    }

    /// Move the contents out, leaving the array empty
    pub fn take_values(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.values)
    }

    /// Put back contents taken with [`Array::take_values`]
    pub fn restore_values(&mut self, values: Vec<Value>) {
        self.values = values;
    }

    fn shrink_if_sparse(&mut self) {
        let cap = self.values.capacity();
        if cap > MIN_SHRINK_CAPACITY && self.values.len() <= cap / 4 {
            self.values.shrink_to(cap / 2);
        }
    }
}

/// In-place quicksort with a fallible comparator
///
/// The first comparator error aborts the sort and is returned; the slice is
/// left permuted but holds the same values.
pub fn quicksort<E, F>(values: &mut [Value], compare: &mut F) -> Result<(), E>
where
    F: FnMut(&Value, &Value) -> Result<Ordering, E>,
{
    let mut slice = values;
    while slice.len() > 1 {
        let pivot = partition(slice, compare)?;
        let (left, right) = std::mem::take(&mut slice).split_at_mut(pivot);
        let right = &mut right[1..];
        // Recurse into the smaller half to bound the depth.
        if left.len() < right.len() {
            quicksort(left, compare)?;
            slice = right;
        } else {
            quicksort(right, compare)?;
            slice = left;
        }
    }
    Ok(())
}

fn partition<E, F>(values: &mut [Value], compare: &mut F) -> Result<usize, E>
where
    F: FnMut(&Value, &Value) -> Result<Ordering, E>,
{
    let last = values.len() - 1;
    values.swap(values.len() / 2, last);
    let mut store = 0;
    for i in 0..last {
        if compare(&values[i], &values[last])? == Ordering::Less {
            values.swap(i, store);
            store += 1;
        }
    }
    values.swap(store, last);
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Array {
        Array::from_values(values.iter().map(|i| Value::Integer(*i)).collect())
    }

    fn as_ints(array: &Array) -> Vec<i64> {
        array.values().iter().map(|v| v.as_integer().unwrap()).collect()
    }

    #[test]
    fn test_pop_empty() {
        let mut array = Array::new();
        assert_eq!(array.pop().unwrap_err(), EmptyError);
        array.push(Value::Integer(1));
        assert_eq!(array.pop().unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_index_errors() {
        let mut array = ints(&[1, 2, 3]);
        assert_eq!(array.get(3).unwrap_err(), IndexError { index: 3, len: 3 });
        assert!(array.get(-1).is_err());
        assert!(array.remove(5).is_err());
        assert!(array.insert(4, Value::Null).is_err());
        array.insert(3, Value::Integer(4)).unwrap();
        assert_eq!(as_ints(&array), vec![1, 2, 3, 4]);
        assert_eq!(array.remove(0).unwrap(), Value::Integer(1));
        assert_eq!(as_ints(&array), vec![2, 3, 4]);
    }

    #[test]
    fn test_resize_fills() {
        let mut array = ints(&[1]);
        array.resize(3, Value::Integer(0));
        assert_eq!(as_ints(&array), vec![1, 0, 0]);
        array.resize(1, Value::Null);
        assert_eq!(as_ints(&array), vec![1]);
    }

    #[test]
    fn test_shrinks_when_sparse() {
        let mut array = Array::with_capacity(64);
        for i in 0..64 {
            array.push(Value::Integer(i));
        }
        while array.len() > 4 {
            array.pop().unwrap();
        }
        assert!(array.capacity() < 64);
    }

    #[test]
    fn test_sort_mixed_numbers() {
        let mut array = Array::from_values(vec![
            Value::Integer(3),
            Value::Float(1.5),
            Value::Integer(-2),
            Value::Integer(10),
            Value::Float(2.0),
        ]);
        array.sort().unwrap();
        let sorted: Vec<f64> = array.values().iter().map(|v| v.as_float().unwrap()).collect();
        assert_eq!(sorted, vec![-2.0, 1.5, 2.0, 3.0, 10.0]);
    }

    #[test]
    fn test_sort_comparator_error_propagates() {
        let mut values: Vec<Value> = (0..10).map(Value::Integer).collect();
        let mut calls = 0;
        let result: Result<(), &str> = quicksort(&mut values, &mut |_: &Value, _: &Value| {
            calls += 1;
            if calls > 3 {
                Err("stop")
            } else {
                Ok(Ordering::Less)
            }
        });
        assert_eq!(result, Err("stop"));
        assert_eq!(values.len(), 10);
    }

    #[test]
    fn test_sort_incomparable_fails() {
        let mut array = Array::from_values(vec![Value::Integer(1), Value::Null, Value::Integer(0)]);
        assert!(array.sort().is_err());
    }
}
