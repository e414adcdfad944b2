//! Host data exposed to scripts

use std::any::Any;

use crate::value::TableRef;

/// Opaque host payload with a type tag and an optional delegate table
///
/// Member lookups on user data go to the delegate, which is how hosts
/// attach methods and metamethods.
pub struct UserData {
    type_tag: u64,
    delegate: Option<TableRef>,
    data: Box<dyn Any>,
}

impl UserData {
    /// Wrap a host value
    pub fn new<T: Any>(type_tag: u64, data: T) -> Self {
        Self {
            type_tag,
            delegate: None,
            data: Box::new(data),
        }
    }

    /// Host-defined type tag
    pub fn type_tag(&self) -> u64 {
        self.type_tag
    }

    /// Delegate table
    pub fn delegate(&self) -> Option<TableRef> {
        self.delegate.clone()
    }

    /// Replace the delegate table
    pub fn set_delegate(&mut self, delegate: Option<TableRef>) {
        self.delegate = delegate;
    }

    /// Borrow the payload as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    /// Mutably borrow the payload as `T`
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut()
    }

    pub(crate) fn delegate_ref(&self) -> Option<&TableRef> {
        self.delegate.as_ref()
    }

    pub(crate) fn take_delegate(&mut self) -> Option<TableRef> {
        self.delegate.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let mut data = UserData::new(7, vec![1u8, 2, 3]);
        assert_eq!(data.type_tag(), 7);
        assert!(data.downcast_ref::<String>().is_none());
        data.downcast_mut::<Vec<u8>>().unwrap().push(4);
        assert_eq!(data.downcast_ref::<Vec<u8>>().unwrap().len(), 4);
    }
}
