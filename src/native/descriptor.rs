use crate::types::CallingConvention;
use smallvec::SmallVec;
use std::fmt;

/// ABI-level type of a parameter slot or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Void,
    SInt8,
    SInt16,
    SInt32,
    SInt64,
    Float,
    Double,
    Address,
}

impl NativeType {
    pub fn size(&self) -> usize {
        match self {
            NativeType::Void => 0,
            NativeType::SInt8 => 1,
            NativeType::SInt16 => 2,
            NativeType::SInt32 | NativeType::Float => 4,
            NativeType::SInt64 | NativeType::Double => 8,
            NativeType::Address => std::mem::size_of::<usize>(),
        }
    }
}

/// Everything the native primitive needs to know about a function, fixed at
/// construction and shared by every call through the owning invoker.
#[derive(Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    address: usize,
    return_type: NativeType,
    param_types: SmallVec<[NativeType; 6]>,
    convention: CallingConvention,
    save_errno: bool,
}

impl CallDescriptor {
    pub fn new(
        address: usize,
        return_type: NativeType,
        param_types: impl IntoIterator<Item = NativeType>,
        convention: CallingConvention,
        save_errno: bool,
    ) -> Self {
        Self {
            address,
            return_type,
            param_types: param_types.into_iter().collect(),
            convention,
            save_errno,
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn return_type(&self) -> NativeType {
        self.return_type
    }

    pub fn param_types(&self) -> &[NativeType] {
        &self.param_types
    }

    pub fn arity(&self) -> usize {
        self.param_types.len()
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    pub fn save_errno(&self) -> bool {
        self.save_errno
    }
}

impl fmt::Debug for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CallDescriptor({:#x}, {:?} -> {:?}, {:?}{})",
            self.address,
            self.param_types.as_slice(),
            self.return_type,
            self.convention,
            if self.save_errno { ", errno" } else { "" }
        )
    }
}
