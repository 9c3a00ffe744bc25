// Native Memory Access
//
// A `Pointer` is either a direct view over memory owned by native code, or a
// heap allocation owned by Rust and kept alive for as long as any `Pointer`
// slice of it exists. Every typed access is null- and bounds-checked where the
// extent is known; direct pointers without a size trust the native side.

use crate::error::{FfiError, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ffi::CStr;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

const HEAP_ALIGN: usize = 16;

// ==================== Scalars ====================

/// Plain values that can be read from and written to native memory bit-for-bit
pub trait NativeScalar: Copy + Default + Send + Sync + fmt::Debug + 'static {
    const SIZE: usize = std::mem::size_of::<Self>();
}

macro_rules! impl_native_scalar {
    ($($type:ty),*) => {
        $(impl NativeScalar for $type {})*
    };
}

impl_native_scalar!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, usize);

// ==================== Heap Allocation ====================

struct HeapAllocation {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The allocation is only reached through raw pointer reads and writes.
unsafe impl Send for HeapAllocation {}
unsafe impl Sync for HeapAllocation {}

impl HeapAllocation {
    fn new(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size.max(1), HEAP_ALIGN)
            .map_err(|e| FfiError::Memory(format!("invalid layout for {} bytes: {}", size, e)))?;
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| FfiError::Memory(format!("allocation of {} bytes failed", size)))?;
        Ok(Self { ptr, layout })
    }
}

impl Drop for HeapAllocation {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// ==================== Pointer ====================

#[derive(Clone)]
pub struct Pointer {
    address: usize,
    size: Option<usize>,
    owner: Option<Arc<HeapAllocation>>,
}

impl Pointer {
    /// Wrap a native address of unknown extent
    pub fn direct(address: usize) -> Self {
        Self {
            address,
            size: None,
            owner: None,
        }
    }

    /// Wrap a native address whose extent is known
    pub fn direct_sized(address: usize, size: usize) -> Self {
        Self {
            address,
            size: Some(size),
            owner: None,
        }
    }

    /// Allocate `size` zeroed bytes on the heap
    pub fn allocate(size: usize) -> Result<Self> {
        let heap = HeapAllocation::new(size)?;
        Ok(Self {
            address: heap.ptr.as_ptr() as usize,
            size: Some(size),
            owner: Some(Arc::new(heap)),
        })
    }

    /// Allocate room for `len` values of `T` and copy `values` in
    pub fn allocate_array<T: NativeScalar>(values: &[T], len: usize) -> Result<Self> {
        let memory = Self::allocate(len * T::SIZE)?;
        memory.put_array(0, &values[..values.len().min(len)])?;
        Ok(memory)
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn size(&self) -> Option<usize> {
        self.size
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// True when the memory was allocated (and is owned) by this process
    pub fn is_heap(&self) -> bool {
        self.owner.is_some()
    }

    pub fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        if self.is_null() {
            return Err(FfiError::Memory("null pointer access".to_string()));
        }
        if let Some(size) = self.size {
            let end = offset
                .checked_add(len)
                .ok_or_else(|| FfiError::Memory("offset overflow".to_string()))?;
            if end > size {
                return Err(FfiError::Memory(format!(
                    "access of {} bytes at offset {} exceeds size {}",
                    len, offset, size
                )));
            }
        }
        Ok(())
    }

    pub fn get<T: NativeScalar>(&self, offset: usize) -> Result<T> {
        self.check_bounds(offset, T::SIZE)?;
        Ok(unsafe { ptr::read_unaligned((self.address + offset) as *const T) })
    }

    pub fn put<T: NativeScalar>(&self, offset: usize, value: T) -> Result<()> {
        self.check_bounds(offset, T::SIZE)?;
        unsafe { ptr::write_unaligned((self.address + offset) as *mut T, value) };
        Ok(())
    }

    pub fn get_address(&self, offset: usize) -> Result<usize> {
        self.get::<usize>(offset)
    }

    pub fn put_address(&self, offset: usize, value: usize) -> Result<()> {
        self.put::<usize>(offset, value)
    }

    /// Bulk read into `dst`
    pub fn get_array<T: NativeScalar>(&self, offset: usize, dst: &mut [T]) -> Result<()> {
        let len = std::mem::size_of_val(dst);
        if len == 0 {
            return Ok(());
        }
        self.check_bounds(offset, len)?;
        unsafe {
            ptr::copy_nonoverlapping(
                (self.address + offset) as *const u8,
                dst.as_mut_ptr() as *mut u8,
                len,
            );
        }
        Ok(())
    }

    /// Bulk write from `src`
    pub fn put_array<T: NativeScalar>(&self, offset: usize, src: &[T]) -> Result<()> {
        let len = std::mem::size_of_val(src);
        if len == 0 {
            return Ok(());
        }
        self.check_bounds(offset, len)?;
        unsafe {
            ptr::copy_nonoverlapping(
                src.as_ptr() as *const u8,
                (self.address + offset) as *mut u8,
                len,
            );
        }
        Ok(())
    }

    /// Read a NUL-terminated byte sequence, without the terminator
    pub fn get_cstring(&self, offset: usize) -> Result<Vec<u8>> {
        self.check_bounds(offset, 0)?;
        match self.size {
            Some(size) => {
                let max_len = size.saturating_sub(offset);
                let len = self.index_of(offset, 0, max_len)?.unwrap_or(max_len);
                let mut bytes = vec![0u8; len];
                self.get_array(offset, &mut bytes)?;
                Ok(bytes)
            }
            None => {
                let s = unsafe { CStr::from_ptr((self.address + offset) as *const std::os::raw::c_char) };
                Ok(s.to_bytes().to_vec())
            }
        }
    }

    pub fn get_string(&self, offset: usize) -> Result<String> {
        let bytes = self.get_cstring(offset)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write `s` followed by a NUL byte
    pub fn put_string(&self, offset: usize, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0) {
            return Err(FfiError::Memory("string contains an interior NUL byte".to_string()));
        }
        self.put_array(offset, s.as_bytes())?;
        self.put::<u8>(offset + s.len(), 0)
    }

    /// Position of the first `value` byte in `[offset, offset + max_len)`
    pub fn index_of(&self, offset: usize, value: u8, max_len: usize) -> Result<Option<usize>> {
        self.check_bounds(offset, max_len)?;
        for i in 0..max_len {
            let b = unsafe { ptr::read((self.address + offset + i) as *const u8) };
            if b == value {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    pub fn set_memory(&self, offset: usize, size: usize, value: u8) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        self.check_bounds(offset, size)?;
        unsafe { ptr::write_bytes((self.address + offset) as *mut u8, value, size) };
        Ok(())
    }

    pub fn transfer_to(&self, offset: usize, dst: &Pointer, dst_offset: usize, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.check_bounds(offset, count)?;
        dst.check_bounds(dst_offset, count)?;
        unsafe {
            ptr::copy(
                (self.address + offset) as *const u8,
                (dst.address + dst_offset) as *mut u8,
                count,
            );
        }
        Ok(())
    }

    /// A view starting `offset` bytes in, sharing ownership of the allocation
    pub fn slice(&self, offset: usize) -> Result<Pointer> {
        self.check_bounds(offset, 0)?;
        Ok(Pointer {
            address: self.address + offset,
            size: self.size.map(|s| s - offset),
            owner: self.owner.clone(),
        })
    }

    pub fn slice_sized(&self, offset: usize, size: usize) -> Result<Pointer> {
        self.check_bounds(offset, size)?;
        Ok(Pointer {
            address: self.address + offset,
            size: Some(size),
            owner: self.owner.clone(),
        })
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "Pointer({:#x}, {} bytes)", self.address, size),
            None => write!(f, "Pointer({:#x})", self.address),
        }
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.size == other.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_zeroed() {
        let mem = Pointer::allocate(16).unwrap();
        assert!(mem.is_heap());
        assert_eq!(mem.get::<i64>(0).unwrap(), 0);
        assert_eq!(mem.get::<i64>(8).unwrap(), 0);
    }

    #[test]
    fn test_put_get_scalars() {
        let mem = Pointer::allocate(32).unwrap();
        mem.put::<i32>(0, -7).unwrap();
        mem.put::<f64>(8, 2.5).unwrap();
        mem.put_address(16, 0xdead).unwrap();
        assert_eq!(mem.get::<i32>(0).unwrap(), -7);
        assert_eq!(mem.get::<f64>(8).unwrap(), 2.5);
        assert_eq!(mem.get_address(16).unwrap(), 0xdead);
    }

    #[test]
    fn test_bounds_checked() {
        let mem = Pointer::allocate(4).unwrap();
        assert!(mem.get::<i64>(0).is_err());
        assert!(mem.put::<i32>(1, 5).is_err());
        assert!(Pointer::direct(0).get::<i8>(0).is_err());
    }

    #[test]
    fn test_arrays() {
        let mem = Pointer::allocate_array(&[1i32, 2, 3], 4).unwrap();
        let mut out = [0i32; 4];
        mem.get_array(0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 0]);
    }

    #[test]
    fn test_strings() {
        let mem = Pointer::allocate(8).unwrap();
        mem.put_string(0, "ok").unwrap();
        assert_eq!(mem.get_cstring(0).unwrap(), b"ok".to_vec());
        assert_eq!(mem.get_string(0).unwrap(), "ok");
        assert!(mem.put_string(0, "a\0b").is_err());

        let unterminated = Pointer::allocate(3).unwrap();
        unterminated.put_array(0, b"abc").unwrap();
        assert_eq!(unterminated.get_string(0).unwrap(), "abc");
    }

    #[test]
    fn test_direct_string_read() {
        let text = b"hello\0";
        let direct = Pointer::direct(text.as_ptr() as usize);
        assert_eq!(direct.get_string(0).unwrap(), "hello");
        assert_eq!(direct.get_string(3).unwrap(), "lo");
    }

    #[test]
    fn test_slice_keeps_allocation_alive() {
        let slice = {
            let mem = Pointer::allocate(8).unwrap();
            mem.put::<i32>(4, 99).unwrap();
            mem.slice(4).unwrap()
        };
        assert_eq!(slice.size(), Some(4));
        assert_eq!(slice.get::<i32>(0).unwrap(), 99);
    }

    #[test]
    fn test_set_memory_and_transfer() {
        let a = Pointer::allocate(4).unwrap();
        let b = Pointer::allocate(4).unwrap();
        a.set_memory(0, 4, 0x11).unwrap();
        a.transfer_to(0, &b, 0, 4).unwrap();
        assert_eq!(b.get::<u32>(0).unwrap(), 0x1111_1111);
        assert_eq!(b.index_of(0, 0x11, 4).unwrap(), Some(0));
        assert_eq!(b.index_of(0, 0x22, 4).unwrap(), None);
    }
}
