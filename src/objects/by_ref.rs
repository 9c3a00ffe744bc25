use crate::error::Result;
use crate::memory::{NativeScalar, Pointer};
use parking_lot::Mutex;
use std::fmt;

/// A caller-owned box whose value is passed to native code by address
pub trait ByReference: Send + Sync + fmt::Debug {
    /// Bytes of temporary native memory the value needs
    fn native_size(&self) -> usize;

    /// Write the current value into `memory` before the call
    fn to_native(&self, memory: &Pointer) -> Result<()>;

    /// Reload the value from `memory` after the call
    fn from_native(&self, memory: &Pointer) -> Result<()>;
}

pub struct ScalarByReference<T: NativeScalar> {
    value: Mutex<T>,
}

pub type IntByReference = ScalarByReference<i32>;
pub type LongLongByReference = ScalarByReference<i64>;
pub type AddressByReference = ScalarByReference<usize>;

impl<T: NativeScalar> ScalarByReference<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn get(&self) -> T {
        *self.value.lock()
    }

    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }
}

impl<T: NativeScalar> Default for ScalarByReference<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: NativeScalar> fmt::Debug for ScalarByReference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByReference({:?})", self.get())
    }
}

impl<T: NativeScalar> ByReference for ScalarByReference<T> {
    fn native_size(&self) -> usize {
        T::SIZE
    }

    fn to_native(&self, memory: &Pointer) -> Result<()> {
        memory.put(0, self.get())
    }

    fn from_native(&self, memory: &Pointer) -> Result<()> {
        self.set(memory.get(0)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_memory() {
        let r = IntByReference::new(41);
        let mem = Pointer::allocate(r.native_size()).unwrap();
        r.to_native(&mem).unwrap();
        assert_eq!(mem.get::<i32>(0).unwrap(), 41);

        mem.put::<i32>(0, 42).unwrap();
        r.from_native(&mem).unwrap();
        assert_eq!(r.get(), 42);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(LongLongByReference::default().native_size(), 8);
        assert_eq!(AddressByReference::default().native_size(), std::mem::size_of::<usize>());
    }
}
