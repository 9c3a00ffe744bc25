// Sald FFI Error Handling
// Construction-time failures abort invoker creation; everything else is per call.

use crate::types::SemanticType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FfiError>;

#[derive(Debug, Clone, Error)]
pub enum FfiError {
    /// A parameter type outside the supported set (raised while building an invoker)
    #[error("unsupported parameter type at index {index}: {ty}")]
    UnsupportedParameterType { index: usize, ty: SemanticType },

    /// A return type outside the supported set (raised while building an invoker)
    #[error("unsupported return type: {ty}")]
    UnsupportedReturnType { ty: SemanticType },

    #[error("invalid argument at index {index}: {message}")]
    InvalidArgument { index: usize, message: String },

    #[error("wrong number of arguments: expected {expected}, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("cannot decode native result: {0}")]
    DecodeFailure(String),

    /// Reported by the native call primitive and passed through untouched
    #[error("native call failed: {0}")]
    NativeFailure(String),

    #[error("invocation failed: {0}")]
    Invocation(String),

    #[error("cannot marshal {0} without an invocation session")]
    SessionRequired(&'static str),

    #[error("memory access error: {0}")]
    Memory(String),

    #[error("failed to load library: {0}")]
    Library(String),

    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FfiError {
    pub fn invalid_argument(index: usize, message: impl Into<String>) -> Self {
        FfiError::InvalidArgument {
            index,
            message: message.into(),
        }
    }

    /// True for failures that are raised while building an invoker rather than calling it
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            FfiError::UnsupportedParameterType { .. } | FfiError::UnsupportedReturnType { .. }
        )
    }

    /// Re-tag a per-parameter error with the slot it was raised for.
    /// Marshallers report index 0; the invoker and factory know the real position.
    pub(crate) fn at_index(self, index: usize) -> Self {
        match self {
            FfiError::InvalidArgument { message, .. } => FfiError::InvalidArgument { index, message },
            FfiError::UnsupportedParameterType { ty, .. } => FfiError::UnsupportedParameterType { index, ty },
            other => other,
        }
    }
}
