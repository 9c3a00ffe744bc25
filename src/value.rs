// Caller-side values
//
// Arguments and results of native calls. Scalars are held inline; anything
// native code may write into is shared (`Arc<Mutex<..>>`) so that the caller
// still sees the contents after an invocation copies them back.

use crate::memory::Pointer;
use crate::objects::{ByReference, Struct};
use crate::types::ElementType;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

// ==================== Arrays & Buffers ====================

/// Run `$body` with `$v` bound to the shared vector inside any `ArrayRef`
macro_rules! dispatch_array {
    ($array:expr, $v:ident => $body:expr) => {
        match $array {
            ArrayRef::Int8($v) => $body,
            ArrayRef::Int16($v) => $body,
            ArrayRef::Int32($v) => $body,
            ArrayRef::Long($v) => $body,
            ArrayRef::Float32($v) => $body,
            ArrayRef::Float64($v) => $body,
        }
    };
}

pub(crate) use dispatch_array;

#[derive(Clone)]
pub enum ArrayRef {
    Int8(Shared<Vec<i8>>),
    Int16(Shared<Vec<i16>>),
    Int32(Shared<Vec<i32>>),
    Long(Shared<Vec<i64>>),
    Float32(Shared<Vec<f32>>),
    Float64(Shared<Vec<f64>>),
}

impl ArrayRef {
    pub fn element_type(&self) -> ElementType {
        match self {
            ArrayRef::Int8(_) => ElementType::Int8,
            ArrayRef::Int16(_) => ElementType::Int16,
            ArrayRef::Int32(_) => ElementType::Int32,
            ArrayRef::Long(_) => ElementType::Long,
            ArrayRef::Float32(_) => ElementType::Float32,
            ArrayRef::Float64(_) => ElementType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        dispatch_array!(self, a => a.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch_array!(self, a => write!(f, "{:?}", a.lock()))
    }
}

#[derive(Debug, Clone)]
pub enum BufferStorage {
    /// Backed by a caller array
    Heap(ArrayRef),
    /// Backed by native memory holding elements of the given type
    Direct(Pointer, ElementType),
}

/// A window `[position, limit)` over array-backed or native element storage
#[derive(Debug, Clone)]
pub struct BufferRef {
    pub storage: BufferStorage,
    pub position: usize,
    pub limit: usize,
}

impl BufferRef {
    pub fn wrap(array: ArrayRef) -> Self {
        let limit = array.len();
        Self {
            storage: BufferStorage::Heap(array),
            position: 0,
            limit,
        }
    }

    pub fn direct(memory: Pointer, element: ElementType, len: usize) -> Self {
        Self {
            storage: BufferStorage::Direct(memory, element),
            position: 0,
            limit: len,
        }
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = position.min(self.limit);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self.position = self.position.min(limit);
        self
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.position)
    }

    pub fn element_type(&self) -> ElementType {
        match &self.storage {
            BufferStorage::Heap(array) => array.element_type(),
            BufferStorage::Direct(_, element) => *element,
        }
    }
}

// ==================== Value ====================

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    NativeLong(i64),
    Float32(f32),
    Float64(f64),
    /// Enum constant name
    Enum(Arc<str>),
    Pointer(Pointer),
    Address(usize),
    String(Arc<str>),
    StringBuffer(Shared<String>),
    StringArray(Shared<Vec<Option<String>>>),
    Array(ArrayRef),
    Buffer(BufferRef),
    Struct(Arc<dyn Struct>),
    StructArray(Arc<[Arc<dyn Struct>]>),
    PointerArray(Shared<Vec<Option<Pointer>>>),
    ByReference(Arc<dyn ByReference>),
    /// Application value only a converter understands
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int8(_) => "Int8",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::NativeLong(_) => "NativeLong",
            Value::Float32(_) => "Float32",
            Value::Float64(_) => "Float64",
            Value::Enum(_) => "Enum",
            Value::Pointer(_) => "Pointer",
            Value::Address(_) => "Address",
            Value::String(_) => "String",
            Value::StringBuffer(_) => "StringBuffer",
            Value::StringArray(_) => "StringArray",
            Value::Array(_) => "Array",
            Value::Buffer(_) => "Buffer",
            Value::Struct(_) => "Struct",
            Value::StructArray(_) => "StructArray",
            Value::PointerArray(_) => "PointerArray",
            Value::ByReference(_) => "ByReference",
            Value::Opaque(_) => "Opaque",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Any integer value, widened
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(n) => Some(*n as i64),
            Value::Int16(n) => Some(*n as i64),
            Value::Int32(n) => Some(*n as i64),
            Value::Int64(n) | Value::NativeLong(n) => Some(*n),
            _ => None,
        }
    }

    /// Any numeric value, converted
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(n) => Some(*n as f64),
            Value::Float64(n) => Some(*n),
            _ => self.as_i64().map(|n| n as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    pub fn string_buffer(s: &str) -> (Self, Shared<String>) {
        let buf = shared(s.to_string());
        (Value::StringBuffer(buf.clone()), buf)
    }

    pub fn int_array(values: Vec<i32>) -> (Self, Shared<Vec<i32>>) {
        let arr = shared(values);
        (Value::Array(ArrayRef::Int32(arr.clone())), arr)
    }

    pub fn long_array(values: Vec<i64>) -> (Self, Shared<Vec<i64>>) {
        let arr = shared(values);
        (Value::Array(ArrayRef::Long(arr.clone())), arr)
    }

    pub fn byte_array(values: Vec<i8>) -> (Self, Shared<Vec<i8>>) {
        let arr = shared(values);
        (Value::Array(ArrayRef::Int8(arr.clone())), arr)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int8(n) => write!(f, "Int8({})", n),
            Value::Int16(n) => write!(f, "Int16({})", n),
            Value::Int32(n) => write!(f, "Int32({})", n),
            Value::Int64(n) => write!(f, "Int64({})", n),
            Value::NativeLong(n) => write!(f, "NativeLong({})", n),
            Value::Float32(n) => write!(f, "Float32({})", n),
            Value::Float64(n) => write!(f, "Float64({})", n),
            Value::Enum(name) => write!(f, "Enum({})", name),
            Value::Pointer(p) => write!(f, "{:?}", p),
            Value::Address(a) => write!(f, "Address({:#x})", a),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::StringBuffer(s) => write!(f, "StringBuffer({:?})", s.lock()),
            Value::StringArray(a) => write!(f, "StringArray({:?})", a.lock()),
            Value::Array(a) => write!(f, "Array({:?})", a),
            Value::Buffer(b) => write!(f, "Buffer({:?})", b),
            Value::Struct(s) => write!(f, "Struct({:?})", s),
            Value::StructArray(a) => write!(f, "StructArray({} items)", a.len()),
            Value::PointerArray(a) => write!(f, "PointerArray({:?})", a.lock()),
            Value::ByReference(r) => write!(f, "{:?}", r),
            Value::Opaque(_) => write!(f, "Opaque"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int8(a), Value::Int8(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::NativeLong(a), Value::NativeLong(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Address(a), Value::Address(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::StringBuffer(a), Value::StringBuffer(b)) => Arc::ptr_eq(a, b),
            (Value::StringArray(a), Value::StringArray(b)) => Arc::ptr_eq(a, b),
            (Value::PointerArray(a), Value::PointerArray(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
