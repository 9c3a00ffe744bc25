// Signature Description
//
// The closed set of semantic types a native function signature can be
// described with, plus per-parameter direction flags. Everything here is
// immutable once built and only consumed while an invoker is constructed.

use crate::objects::{EnumMapper, StructType};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// ==================== Direction Flags ====================

bitflags! {
    /// Direction and termination flags for reference-like parameters.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParamFlags: u8 {
        /// Caller data is copied into native memory before the call
        const IN = 0b0001;
        /// Native memory is copied back into caller data after the call
        const OUT = 0b0010;
        /// A NUL element is appended after the copied-in data
        const NUL_TERMINATE = 0b0100;
    }
}

impl ParamFlags {
    /// Flags with no direction mean "both ways"
    pub fn normalized(self) -> Self {
        if self.intersects(ParamFlags::IN | ParamFlags::OUT) {
            self
        } else {
            self | ParamFlags::IN | ParamFlags::OUT
        }
    }

    pub fn is_in(self) -> bool {
        self.contains(ParamFlags::IN)
    }

    pub fn is_out(self) -> bool {
        self.contains(ParamFlags::OUT)
    }

    pub fn is_nul_terminate(self) -> bool {
        self.contains(ParamFlags::NUL_TERMINATE)
    }

    /// NUL termination added automatically for string-like data passed in
    pub fn with_auto_nul(self) -> Self {
        if self.is_in() {
            self | ParamFlags::NUL_TERMINATE
        } else {
            self
        }
    }
}

impl Default for ParamFlags {
    fn default() -> Self {
        ParamFlags::empty()
    }
}

// ==================== Semantic Types ====================

/// Element kinds of primitive arrays and buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int8,
    Int16,
    Int32,
    /// Caller-side 64-bit elements whose native width follows the platform `long`
    Long,
    Float32,
    Float64,
}

impl ElementType {
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Int8 => "i8",
            ElementType::Int16 => "i16",
            ElementType::Int32 => "i32",
            ElementType::Long => "long",
            ElementType::Float32 => "f32",
            ElementType::Float64 => "f64",
        }
    }

    /// Caller-side element size in bytes
    pub fn size(&self) -> usize {
        match self {
            ElementType::Int8 => 1,
            ElementType::Int16 => 2,
            ElementType::Int32 | ElementType::Float32 => 4,
            ElementType::Long | ElementType::Float64 => 8,
        }
    }
}

#[derive(Clone)]
pub enum SemanticType {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    /// 64-bit on the caller side; native width is the platform `long`
    /// unless the `long_long` override is set
    Long,
    /// Always the platform `long` width
    NativeLong,
    Float32,
    Float64,
    Enum(Arc<EnumMapper>),
    Pointer,
    Address,
    String,
    /// Growable, caller-visible text buffer
    StringBuffer,
    StringArray,
    Array(ElementType),
    Buffer(ElementType),
    Struct(Arc<dyn StructType>),
    StructArray(Arc<dyn StructType>),
    PointerArray,
    ByReference,
    /// Application type that only a `TypeMapper` converter can map
    Custom(Arc<str>),
}

impl SemanticType {
    pub fn name(&self) -> String {
        match self {
            SemanticType::Void => "void".to_string(),
            SemanticType::Bool => "bool".to_string(),
            SemanticType::Int8 => "i8".to_string(),
            SemanticType::Int16 => "i16".to_string(),
            SemanticType::Int32 => "i32".to_string(),
            SemanticType::Long => "long".to_string(),
            SemanticType::NativeLong => "native_long".to_string(),
            SemanticType::Float32 => "f32".to_string(),
            SemanticType::Float64 => "f64".to_string(),
            SemanticType::Enum(mapper) => format!("enum {}", mapper.name()),
            SemanticType::Pointer => "ptr".to_string(),
            SemanticType::Address => "address".to_string(),
            SemanticType::String => "string".to_string(),
            SemanticType::StringBuffer => "string_buffer".to_string(),
            SemanticType::StringArray => "string[]".to_string(),
            SemanticType::Array(elem) => format!("{}[]", elem.name()),
            SemanticType::Buffer(elem) => format!("buffer<{}>", elem.name()),
            SemanticType::Struct(ty) => format!("struct {}", ty.name()),
            SemanticType::StructArray(ty) => format!("struct {}[]", ty.name()),
            SemanticType::PointerArray => "ptr[]".to_string(),
            SemanticType::ByReference => "by_ref".to_string(),
            SemanticType::Custom(name) => name.to_string(),
        }
    }
}

impl fmt::Debug for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SemanticType({})", self.name())
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn arc_addr<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

// Mapper and struct types compare by identity.
impl PartialEq for SemanticType {
    fn eq(&self, other: &Self) -> bool {
        use SemanticType::*;
        match (self, other) {
            (Enum(a), Enum(b)) => Arc::ptr_eq(a, b),
            (Struct(a), Struct(b)) | (StructArray(a), StructArray(b)) => arc_addr(a) == arc_addr(b),
            (Array(a), Array(b)) | (Buffer(a), Buffer(b)) => a == b,
            (Custom(a), Custom(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Eq for SemanticType {}

impl Hash for SemanticType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            SemanticType::Enum(mapper) => arc_addr(mapper).hash(state),
            SemanticType::Struct(ty) | SemanticType::StructArray(ty) => arc_addr(ty).hash(state),
            SemanticType::Array(elem) | SemanticType::Buffer(elem) => elem.hash(state),
            SemanticType::Custom(name) => name.hash(state),
            _ => {}
        }
    }
}

// ==================== Signatures ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallingConvention {
    #[default]
    Default,
    Stdcall,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterSpec {
    pub ty: SemanticType,
    pub flags: ParamFlags,
    /// Force 64-bit treatment of `Long` values regardless of platform
    pub long_long: bool,
}

impl ParameterSpec {
    pub fn new(ty: SemanticType) -> Self {
        Self {
            ty,
            flags: ParamFlags::empty(),
            long_long: false,
        }
    }

    pub fn with_flags(mut self, flags: ParamFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn long_long(mut self) -> Self {
        self.long_long = true;
        self
    }

    pub fn input(ty: SemanticType) -> Self {
        Self::new(ty).with_flags(ParamFlags::IN)
    }

    pub fn output(ty: SemanticType) -> Self {
        Self::new(ty).with_flags(ParamFlags::OUT)
    }

    pub fn in_out(ty: SemanticType) -> Self {
        Self::new(ty).with_flags(ParamFlags::IN | ParamFlags::OUT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReturnSpec {
    pub ty: SemanticType,
    pub long_long: bool,
}

impl ReturnSpec {
    pub fn new(ty: SemanticType) -> Self {
        Self { ty, long_long: false }
    }

    pub fn long_long(mut self) -> Self {
        self.long_long = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CallOptions {
    /// Overrides the library-wide convention when set
    pub convention: Option<CallingConvention>,
    pub save_errno: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureDescriptor {
    pub params: SmallVec<[ParameterSpec; 6]>,
    pub ret: ReturnSpec,
    pub options: CallOptions,
}

impl SignatureDescriptor {
    pub fn new(ret: SemanticType) -> Self {
        Self {
            params: SmallVec::new(),
            ret: ReturnSpec::new(ret),
            options: CallOptions::default(),
        }
    }

    pub fn returning(ret: ReturnSpec) -> Self {
        Self {
            params: SmallVec::new(),
            ret,
            options: CallOptions::default(),
        }
    }

    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn stdcall(mut self) -> Self {
        self.options.convention = Some(CallingConvention::Stdcall);
        self
    }

    pub fn save_errno(mut self) -> Self {
        self.options.save_errno = true;
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_flags_default_to_both_directions() {
        assert_eq!(ParamFlags::empty().normalized(), ParamFlags::IN | ParamFlags::OUT);
        assert_eq!(ParamFlags::OUT.normalized(), ParamFlags::OUT);
        assert_eq!(
            ParamFlags::NUL_TERMINATE.normalized(),
            ParamFlags::IN | ParamFlags::OUT | ParamFlags::NUL_TERMINATE
        );
    }

    #[test]
    fn test_auto_nul_only_when_in() {
        assert!(ParamFlags::IN.with_auto_nul().is_nul_terminate());
        assert!(!ParamFlags::OUT.with_auto_nul().is_nul_terminate());
    }

    #[test]
    fn test_semantic_type_identity() {
        let a = Arc::new(EnumMapper::new("Color", [("Red", 0), ("Green", 1)]).unwrap());
        let b = Arc::new(EnumMapper::new("Color", [("Red", 0), ("Green", 1)]).unwrap());
        assert_eq!(SemanticType::Enum(a.clone()), SemanticType::Enum(a.clone()));
        assert_ne!(SemanticType::Enum(a), SemanticType::Enum(b));
        assert_eq!(SemanticType::Array(ElementType::Int32), SemanticType::Array(ElementType::Int32));
        assert_ne!(SemanticType::Array(ElementType::Int32), SemanticType::Buffer(ElementType::Int32));
        assert_ne!(SemanticType::Int32, SemanticType::Long);
    }

    #[test]
    fn test_signatures_hash_by_shape() {
        let sig = || {
            SignatureDescriptor::new(SemanticType::Bool)
                .param(ParameterSpec::input(SemanticType::Int32))
                .param(ParameterSpec::in_out(SemanticType::Array(ElementType::Int32)))
        };
        let mut set = FxHashSet::default();
        set.insert(sig());
        assert!(set.contains(&sig()));
        assert!(!set.contains(&sig().save_errno()));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(SemanticType::Array(ElementType::Long).to_string(), "long[]");
        assert_eq!(SemanticType::Custom(Arc::from("Handle")).to_string(), "Handle");
    }
}
