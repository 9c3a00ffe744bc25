// Call Buffer
//
// Encoded argument slots for one native call, filled in parameter order.
// Reference arguments are copied into temporary native memory owned by the
// buffer; arrays marked OUT are copied back into the caller's vector by
// `sync_out` once the call has returned.

use super::descriptor::{CallDescriptor, NativeType};
use crate::error::{FfiError, Result};
use crate::memory::{NativeScalar, Pointer};
use crate::types::ParamFlags;
use crate::value::{dispatch_array, ArrayRef, Shared};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Address(usize),
}

impl Slot {
    pub fn native_type(&self) -> NativeType {
        match self {
            Slot::Int8(_) => NativeType::SInt8,
            Slot::Int16(_) => NativeType::SInt16,
            Slot::Int32(_) => NativeType::SInt32,
            Slot::Int64(_) => NativeType::SInt64,
            Slot::Float(_) => NativeType::Float,
            Slot::Double(_) => NativeType::Double,
            Slot::Address(_) => NativeType::Address,
        }
    }
}

enum CopyBack {
    Array {
        memory: Pointer,
        target: ArrayRef,
        start: usize,
        len: usize,
    },
    Bytes {
        memory: Pointer,
        target: Shared<Vec<u8>>,
        start: usize,
        len: usize,
    },
}

pub struct CallBuffer {
    slots: SmallVec<[Slot; 6]>,
    /// Temporary native memory passed by address, keyed by slot index
    regions: SmallVec<[(usize, Pointer); 4]>,
    copy_backs: SmallVec<[CopyBack; 2]>,
}

fn copy_in<T: NativeScalar>(memory: &Pointer, src: &Shared<Vec<T>>, start: usize, len: usize) -> Result<()> {
    let src = src.lock();
    let slice = src
        .get(start..start + len)
        .ok_or_else(|| FfiError::invalid_argument(0, format!("range {}..{} out of bounds", start, start + len)))?;
    memory.put_array(0, slice)
}

fn copy_out<T: NativeScalar>(memory: &Pointer, dst: &Shared<Vec<T>>, start: usize, len: usize) -> Result<()> {
    let mut dst = dst.lock();
    let slice = dst
        .get_mut(start..start + len)
        .ok_or_else(|| FfiError::Memory(format!("caller array shrank below {} elements", start + len)))?;
    memory.get_array(0, slice)
}

impl CallBuffer {
    pub fn new(function: &CallDescriptor) -> Self {
        Self {
            slots: SmallVec::with_capacity(function.arity()),
            regions: SmallVec::new(),
            copy_backs: SmallVec::new(),
        }
    }

    pub fn put_i8(&mut self, value: i8) {
        self.slots.push(Slot::Int8(value));
    }

    pub fn put_i16(&mut self, value: i16) {
        self.slots.push(Slot::Int16(value));
    }

    pub fn put_i32(&mut self, value: i32) {
        self.slots.push(Slot::Int32(value));
    }

    pub fn put_i64(&mut self, value: i64) {
        self.slots.push(Slot::Int64(value));
    }

    pub fn put_f32(&mut self, value: f32) {
        self.slots.push(Slot::Float(value));
    }

    pub fn put_f64(&mut self, value: f64) {
        self.slots.push(Slot::Double(value));
    }

    pub fn put_address(&mut self, address: usize) {
        self.slots.push(Slot::Address(address));
    }

    /// Pass `memory` by address, keeping it alive until the buffer is dropped
    pub fn put_memory(&mut self, memory: Pointer) {
        self.regions.push((self.slots.len(), memory.clone()));
        self.slots.push(Slot::Address(memory.address()));
    }

    /// Pass elements `[start, start + len)` of a caller array through a native copy.
    ///
    /// IN copies the elements in, NUL_TERMINATE reserves one zeroed element past
    /// the end, OUT copies the native elements back in `sync_out`.
    pub fn put_array(&mut self, array: &ArrayRef, start: usize, len: usize, flags: ParamFlags) -> Result<()> {
        let extra = usize::from(flags.is_nul_terminate());
        let memory = Pointer::allocate((len + extra) * array.element_type().size())?;

        if flags.is_in() {
            dispatch_array!(array, a => copy_in(&memory, a, start, len))?;
        } else if start + len > array.len() {
            return Err(FfiError::invalid_argument(0, "array range out of bounds"));
        }

        if flags.is_out() {
            self.copy_backs.push(CopyBack::Array {
                memory: memory.clone(),
                target: array.clone(),
                start,
                len,
            });
        }
        self.put_memory(memory);
        Ok(())
    }

    /// Pass `len` bytes of a shared byte vector through a native copy
    pub fn put_bytes(&mut self, bytes: &Shared<Vec<u8>>, start: usize, len: usize, flags: ParamFlags) -> Result<()> {
        let extra = usize::from(flags.is_nul_terminate());
        let memory = Pointer::allocate(len + extra)?;

        if flags.is_in() {
            copy_in(&memory, bytes, start, len)?;
        } else if start + len > bytes.lock().len() {
            return Err(FfiError::invalid_argument(0, "byte range out of bounds"));
        }
        if flags.is_out() {
            self.copy_backs.push(CopyBack::Bytes {
                memory: memory.clone(),
                target: bytes.clone(),
                start,
                len,
            });
        }
        self.put_memory(memory);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Temporary native memory behind the slot at `index`, if any
    pub fn region(&self, index: usize) -> Option<&Pointer> {
        self.regions.iter().find(|(i, _)| *i == index).map(|(_, p)| p)
    }

    /// Copy OUT arrays back into their caller vectors
    pub fn sync_out(&self) -> Result<()> {
        for copy_back in &self.copy_backs {
            match copy_back {
                CopyBack::Array { memory, target, start, len } => {
                    dispatch_array!(target, a => copy_out(memory, a, *start, *len))?
                }
                CopyBack::Bytes { memory, target, start, len } => copy_out(memory, target, *start, *len)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallingConvention;
    use crate::value::{shared, Value};

    fn descriptor() -> CallDescriptor {
        CallDescriptor::new(0x1000, NativeType::Void, [], CallingConvention::Default, false)
    }

    #[test]
    fn test_scalar_slots_in_order() {
        let mut buf = CallBuffer::new(&descriptor());
        buf.put_i32(5);
        buf.put_f64(1.5);
        buf.put_address(0);
        assert_eq!(buf.slots(), &[Slot::Int32(5), Slot::Double(1.5), Slot::Address(0)]);
    }

    #[test]
    fn test_array_in_out_copies_back() {
        let (value, arr) = Value::int_array(vec![1, 2, 3]);
        let Value::Array(array) = value else { unreachable!() };

        let mut buf = CallBuffer::new(&descriptor());
        buf.put_array(&array, 0, 3, ParamFlags::IN | ParamFlags::OUT).unwrap();

        let native = buf.region(0).unwrap();
        assert_eq!(native.get::<i32>(4).unwrap(), 2);
        native.put_array(0, &[9i32, 9, 9]).unwrap();

        assert_eq!(*arr.lock(), vec![1, 2, 3]);
        buf.sync_out().unwrap();
        assert_eq!(*arr.lock(), vec![9, 9, 9]);
    }

    #[test]
    fn test_array_in_only_leaves_caller_untouched() {
        let (value, arr) = Value::int_array(vec![1, 2]);
        let Value::Array(array) = value else { unreachable!() };

        let mut buf = CallBuffer::new(&descriptor());
        buf.put_array(&array, 0, 2, ParamFlags::IN).unwrap();
        buf.region(0).unwrap().put::<i32>(0, 7).unwrap();
        buf.sync_out().unwrap();
        assert_eq!(*arr.lock(), vec![1, 2]);
    }

    #[test]
    fn test_out_only_array_starts_zeroed() {
        let (value, _) = Value::int_array(vec![4, 4]);
        let Value::Array(array) = value else { unreachable!() };

        let mut buf = CallBuffer::new(&descriptor());
        buf.put_array(&array, 0, 2, ParamFlags::OUT).unwrap();
        assert_eq!(buf.region(0).unwrap().get::<i32>(0).unwrap(), 0);
    }

    #[test]
    fn test_nul_terminated_byte_array() {
        let (value, _) = Value::byte_array(vec![0x61, 0x62]);
        let Value::Array(array) = value else { unreachable!() };

        let mut buf = CallBuffer::new(&descriptor());
        buf.put_array(&array, 0, 2, ParamFlags::IN | ParamFlags::NUL_TERMINATE).unwrap();
        let native = buf.region(0).unwrap();
        assert_eq!(native.size(), Some(3));
        assert_eq!(native.get_string(0).unwrap(), "ab");
    }

    #[test]
    fn test_out_of_range_window_rejected() {
        let (value, _) = Value::int_array(vec![1]);
        let Value::Array(array) = value else { unreachable!() };

        let mut buf = CallBuffer::new(&descriptor());
        assert!(buf.put_array(&array, 0, 4, ParamFlags::IN).is_err());
        assert!(buf.put_array(&array, 0, 4, ParamFlags::OUT).is_err());

        let bytes = shared(vec![0u8; 2]);
        assert!(buf.put_bytes(&bytes, 1, 4, ParamFlags::OUT).is_err());
        assert!(buf.is_empty());
    }
}
