// Native call layer: descriptors, argument buffers and the call primitive.

mod buffer;
mod call;
mod descriptor;
mod ffi;
pub mod last_error;
mod library;

pub use buffer::{CallBuffer, Slot};
pub use call::{NativeInvoker, RawValue};
pub use descriptor::{CallDescriptor, NativeType};
pub use ffi::LibffiInvoker;
pub use last_error::{last_error, set_last_error};
pub use library::{with_library_extension, FunctionMapper, IdentityFunctionMapper, NativeLibrary};
