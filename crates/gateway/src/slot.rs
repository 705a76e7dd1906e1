//! A hot-swappable `Arc<T>` cell (§9 "Hot reload without cyclic references").
//! The supervisor owns each slot and replaces its contents wholesale on
//! reload; every dependent component holds a clone of the slot handle
//! (`Arc<Slot<T>>`) rather than the value itself, so a reload only needs one
//! write to fan out everywhere the slot is read.

use std::sync::Arc;

use parking_lot::RwLock;

pub struct Slot<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> Slot<T> {
    pub fn new(value: T) -> Self {
        Slot { inner: RwLock::new(Arc::new(value)) }
    }

    pub fn get(&self) -> Arc<T> {
        self.inner.read().clone()
    }

    pub fn set(&self, value: T) {
        *self.inner.write() = Arc::new(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_observed_value() {
        let slot = Slot::new(1);
        assert_eq!(*slot.get(), 1);
        slot.set(2);
        assert_eq!(*slot.get(), 2);
    }
}
