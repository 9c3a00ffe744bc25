// Application-level converters
// A converter lets a signature use a type the core does not know by mapping it
// onto one it does.

use crate::error::Result;
use crate::types::SemanticType;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub trait ToNativeConverter: Send + Sync {
    /// The directly supported type values are converted into
    fn native_type(&self) -> SemanticType;
    fn to_native(&self, value: &Value) -> Result<Value>;
}

/// What a result converter knows about the call it is converting for
#[derive(Debug, Clone)]
pub struct ResultContext {
    pub function_address: usize,
    pub declared_type: SemanticType,
}

pub trait FromNativeConverter: Send + Sync {
    fn native_type(&self) -> SemanticType;
    fn from_native(&self, value: Value, context: &ResultContext) -> Result<Value>;
}

pub trait TypeMapper: Send + Sync {
    fn to_native_converter(&self, ty: &SemanticType) -> Option<Arc<dyn ToNativeConverter>>;
    fn from_native_converter(&self, ty: &SemanticType) -> Option<Arc<dyn FromNativeConverter>>;
}

/// Lookup-table type mapper
#[derive(Default, Clone)]
pub struct SimpleTypeMapper {
    to_native: FxHashMap<SemanticType, Arc<dyn ToNativeConverter>>,
    from_native: FxHashMap<SemanticType, Arc<dyn FromNativeConverter>>,
}

impl SimpleTypeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_to_native(mut self, ty: SemanticType, converter: Arc<dyn ToNativeConverter>) -> Self {
        self.to_native.insert(ty, converter);
        self
    }

    pub fn with_from_native(mut self, ty: SemanticType, converter: Arc<dyn FromNativeConverter>) -> Self {
        self.from_native.insert(ty, converter);
        self
    }
}

impl TypeMapper for SimpleTypeMapper {
    fn to_native_converter(&self, ty: &SemanticType) -> Option<Arc<dyn ToNativeConverter>> {
        self.to_native.get(ty).cloned()
    }

    fn from_native_converter(&self, ty: &SemanticType) -> Option<Arc<dyn FromNativeConverter>> {
        self.from_native.get(ty).cloned()
    }
}
