// Library Options
//
// Per-library defaults applied to every invoker built for that library. The
// plain settings round-trip through JSON; mappers are attached in code.

use crate::error::{FfiError, Result};
use crate::native::FunctionMapper;
use crate::objects::TypeMapper;
use crate::platform::{Platform, WordSize};
use crate::types::{CallOptions, CallingConvention};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LibraryOptions {
    #[serde(default)]
    pub calling_convention: CallingConvention,
    #[serde(default)]
    pub save_errno: bool,
    /// Overrides the host's native `long` width
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_size: Option<WordSize>,
    #[serde(skip)]
    pub type_mapper: Option<Arc<dyn TypeMapper>>,
    #[serde(skip)]
    pub function_mapper: Option<Arc<dyn FunctionMapper>>,
}

impl LibraryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FfiError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| FfiError::Config(e.to_string()))
    }

    pub fn with_calling_convention(mut self, convention: CallingConvention) -> Self {
        self.calling_convention = convention;
        self
    }

    pub fn with_save_errno(mut self, save_errno: bool) -> Self {
        self.save_errno = save_errno;
        self
    }

    pub fn with_long_size(mut self, long_size: WordSize) -> Self {
        self.long_size = Some(long_size);
        self
    }

    pub fn with_type_mapper(mut self, mapper: Arc<dyn TypeMapper>) -> Self {
        self.type_mapper = Some(mapper);
        self
    }

    pub fn with_function_mapper(mut self, mapper: Arc<dyn FunctionMapper>) -> Self {
        self.function_mapper = Some(mapper);
        self
    }

    /// `base` with the configured `long` width applied
    pub fn platform(&self, base: Platform) -> Platform {
        match self.long_size {
            Some(long_size) => base.with_long_size(long_size),
            None => base,
        }
    }

    pub fn convention_for(&self, options: &CallOptions) -> CallingConvention {
        options.convention.unwrap_or(self.calling_convention)
    }

    pub fn save_errno_for(&self, options: &CallOptions) -> bool {
        self.save_errno || options.save_errno
    }

    pub fn symbol_name(&self, name: &str) -> String {
        match &self.function_mapper {
            Some(mapper) => mapper.map_function_name(name),
            None => name.to_string(),
        }
    }

    pub fn type_mapper(&self) -> Option<&dyn TypeMapper> {
        self.type_mapper.as_deref()
    }
}

impl fmt::Debug for LibraryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryOptions")
            .field("calling_convention", &self.calling_convention)
            .field("save_errno", &self.save_errno)
            .field("long_size", &self.long_size)
            .field("type_mapper", &self.type_mapper.is_some())
            .field("function_mapper", &self.function_mapper.is_some())
            .finish()
    }
}
