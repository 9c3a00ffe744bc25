use super::buffer::CallBuffer;
use super::descriptor::{CallDescriptor, NativeType};
use crate::error::Result;

/// Raw scalar produced by a native call, before decoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Void,
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Address(usize),
}

/// The ABI-level call primitive: runs `function` with a filled buffer.
///
/// Implementations must be callable from any number of threads at once.
pub trait NativeInvoker: Send + Sync {
    fn invoke_int(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<i32>;
    fn invoke_long(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<i64>;
    fn invoke_float(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<f32>;
    fn invoke_double(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<f64>;
    fn invoke_address(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<usize>;

    /// Dispatch to the width-specific form matching the descriptor's return type
    fn invoke(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<RawValue> {
        Ok(match function.return_type() {
            NativeType::Void => {
                self.invoke_int(function, buffer)?;
                RawValue::Void
            }
            NativeType::SInt8 | NativeType::SInt16 | NativeType::SInt32 => {
                RawValue::Int32(self.invoke_int(function, buffer)?)
            }
            NativeType::SInt64 => RawValue::Int64(self.invoke_long(function, buffer)?),
            NativeType::Float => RawValue::Float(self.invoke_float(function, buffer)?),
            NativeType::Double => RawValue::Double(self.invoke_double(function, buffer)?),
            NativeType::Address => RawValue::Address(self.invoke_address(function, buffer)?),
        })
    }
}
