// Sald FFI
// Dynamic foreign-function marshalling: describe a native signature once, get
// back a reusable invoker that encodes arguments, dispatches through libffi and
// decodes the result, copying OUT data back into caller objects.

pub mod config;
pub mod error;
pub mod invoke;
pub mod marshal;
pub mod memory;
pub mod native;
pub mod objects;
pub mod platform;
pub mod types;
pub mod value;

pub use config::LibraryOptions;
pub use error::{FfiError, Result};
pub use invoke::{Invoker, InvokerFactory};
pub use memory::Pointer;
pub use native::{last_error, NativeLibrary};
pub use platform::{Platform, WordSize};
pub use types::{
    CallingConvention, ElementType, ParamFlags, ParameterSpec, ReturnSpec, SemanticType, SignatureDescriptor,
};
pub use value::{shared, ArrayRef, BufferRef, Shared, Value};

use std::sync::Arc;

/// Build an invoker for the function at `address` with the process-wide factory
pub fn build_invoker(address: usize, signature: &SignatureDescriptor) -> Result<Arc<dyn Invoker>> {
    InvokerFactory::global().build_invoker(address, signature)
}
