// Struct views
// Field layout lives elsewhere; the marshalling core only needs to know where a
// struct's bytes are and how large it is.

use crate::error::{FfiError, Result};
use crate::memory::Pointer;
use crate::value::{shared, Shared};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub enum StructMemory {
    /// Native memory the struct is a view over
    Direct(Pointer),
    /// Rust-owned bytes; several structs may share one backing vector
    Heap { bytes: Shared<Vec<u8>>, offset: usize },
}

impl fmt::Debug for StructMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructMemory::Direct(ptr) => write!(f, "Direct({:?})", ptr),
            StructMemory::Heap { bytes, offset } => {
                write!(f, "Heap({} bytes, offset {})", bytes.lock().len(), offset)
            }
        }
    }
}

pub trait Struct: Send + Sync + fmt::Debug {
    fn size(&self) -> usize;
    fn memory(&self) -> StructMemory;
}

/// Describes a struct type well enough to view native memory as one
pub trait StructType: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> usize;
    fn wrap(&self, memory: Pointer) -> Result<Arc<dyn Struct>>;
}

/// A struct with no field knowledge, just a sized block of bytes
#[derive(Debug, Clone)]
pub struct RawStruct {
    size: usize,
    memory: StructMemory,
}

impl RawStruct {
    pub fn heap(size: usize) -> Self {
        Self {
            size,
            memory: StructMemory::Heap {
                bytes: shared(vec![0u8; size]),
                offset: 0,
            },
        }
    }

    pub fn direct(memory: Pointer, size: usize) -> Self {
        Self {
            size,
            memory: StructMemory::Direct(memory),
        }
    }

    /// `count` structs laid out back to back in one shared heap block
    pub fn heap_array(size: usize, count: usize) -> Vec<Arc<dyn Struct>> {
        let bytes = shared(vec![0u8; size * count]);
        (0..count)
            .map(|i| {
                Arc::new(RawStruct {
                    size,
                    memory: StructMemory::Heap {
                        bytes: bytes.clone(),
                        offset: i * size,
                    },
                }) as Arc<dyn Struct>
            })
            .collect()
    }

    /// `count` structs laid out back to back in one native allocation
    pub fn direct_array(size: usize, count: usize) -> Result<Vec<Arc<dyn Struct>>> {
        let block = Pointer::allocate(size * count)?;
        (0..count)
            .map(|i| Ok(Arc::new(RawStruct::direct(block.slice_sized(i * size, size)?, size)) as Arc<dyn Struct>))
            .collect()
    }

    /// Copy of the struct's current bytes
    pub fn bytes(&self) -> Result<Vec<u8>> {
        match &self.memory {
            StructMemory::Direct(ptr) => {
                let mut out = vec![0u8; self.size];
                ptr.get_array(0, &mut out)?;
                Ok(out)
            }
            StructMemory::Heap { bytes, offset } => {
                let bytes = bytes.lock();
                bytes
                    .get(*offset..*offset + self.size)
                    .map(|b| b.to_vec())
                    .ok_or_else(|| FfiError::Memory("struct extends past its backing bytes".to_string()))
            }
        }
    }
}

impl Struct for RawStruct {
    fn size(&self) -> usize {
        self.size
    }

    fn memory(&self) -> StructMemory {
        self.memory.clone()
    }
}

#[derive(Debug, Clone)]
pub struct RawStructType {
    name: String,
    size: usize,
}

impl RawStructType {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

impl StructType for RawStructType {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.size
    }

    fn wrap(&self, memory: Pointer) -> Result<Arc<dyn Struct>> {
        let sized = Pointer::direct_sized(memory.address(), self.size);
        Ok(Arc::new(RawStruct::direct(sized, self.size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_array_shares_backing() {
        let items = RawStruct::heap_array(8, 3);
        let offsets: Vec<usize> = items
            .iter()
            .map(|s| match s.memory() {
                StructMemory::Heap { offset, .. } => offset,
                StructMemory::Direct(_) => unreachable!(),
            })
            .collect();
        assert_eq!(offsets, vec![0, 8, 16]);
    }

    #[test]
    fn test_direct_array_is_contiguous() {
        let items = RawStruct::direct_array(4, 2).unwrap();
        let addrs: Vec<usize> = items
            .iter()
            .map(|s| match s.memory() {
                StructMemory::Direct(p) => p.address(),
                StructMemory::Heap { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(addrs[1] - addrs[0], 4);
    }

    #[test]
    fn test_wrap_reads_native_bytes() {
        let block = Pointer::allocate(4).unwrap();
        block.put::<i32>(0, 0x0102_0304).unwrap();
        let ty = RawStructType::new("Pair", 4);
        let view = ty.wrap(Pointer::direct(block.address())).unwrap();
        assert_eq!(view.size(), 4);
        match view.memory() {
            StructMemory::Direct(p) => assert_eq!(p.get::<i32>(0).unwrap(), 0x0102_0304),
            StructMemory::Heap { .. } => panic!("expected direct memory"),
        }
    }
}
