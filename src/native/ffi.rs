// libffi call primitive
// Builds a Cif from the descriptor and dispatches the filled call buffer.

use super::buffer::{CallBuffer, Slot};
use super::call::NativeInvoker;
use super::descriptor::{CallDescriptor, NativeType};
use super::last_error;
use crate::error::{FfiError, Result};
use crate::types::CallingConvention;
use libffi::middle::{Arg, Cif, CodePtr, Type as FfiType};
use std::ffi::c_void;

fn to_ffi_type(ty: NativeType) -> FfiType {
    match ty {
        NativeType::Void => FfiType::void(),
        NativeType::SInt8 => FfiType::i8(),
        NativeType::SInt16 => FfiType::i16(),
        NativeType::SInt32 => FfiType::i32(),
        NativeType::SInt64 => FfiType::i64(),
        NativeType::Float => FfiType::f32(),
        NativeType::Double => FfiType::f64(),
        NativeType::Address => FfiType::pointer(),
    }
}

fn slot_arg(slot: &Slot) -> Arg {
    match slot {
        Slot::Int8(v) => Arg::new(v),
        Slot::Int16(v) => Arg::new(v),
        Slot::Int32(v) => Arg::new(v),
        Slot::Int64(v) => Arg::new(v),
        Slot::Float(v) => Arg::new(v),
        Slot::Double(v) => Arg::new(v),
        Slot::Address(v) => Arg::new(v),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LibffiInvoker;

impl LibffiInvoker {
    pub fn new() -> Self {
        Self
    }

    fn cif(&self, function: &CallDescriptor) -> Cif {
        #[allow(unused_mut)]
        let mut cif = Cif::new(
            function.param_types().iter().map(|t| to_ffi_type(*t)),
            to_ffi_type(function.return_type()),
        );

        if function.convention() == CallingConvention::Stdcall {
            #[cfg(all(target_arch = "x86", target_os = "windows"))]
            cif.set_abi(libffi::raw::ffi_abi_FFI_STDCALL);

            #[cfg(not(all(target_arch = "x86", target_os = "windows")))]
            log::warn!(
                "stdcall requested for {:#x} but this target has one calling convention; using default",
                function.address()
            );
        }
        cif
    }

    fn check(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<()> {
        if function.address() == 0 {
            return Err(FfiError::NativeFailure("call through null function address".to_string()));
        }
        if buffer.len() != function.arity() {
            return Err(FfiError::NativeFailure(format!(
                "call buffer holds {} slots, function takes {}",
                buffer.len(),
                function.arity()
            )));
        }
        for (i, (slot, expected)) in buffer.slots().iter().zip(function.param_types()).enumerate() {
            if slot.native_type() != *expected {
                return Err(FfiError::NativeFailure(format!(
                    "slot {} is {:?}, function expects {:?}",
                    i,
                    slot.native_type(),
                    expected
                )));
            }
        }
        Ok(())
    }

    fn call<R>(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<R> {
        self.check(function, buffer)?;
        let cif = self.cif(function);
        let args: Vec<Arg> = buffer.slots().iter().map(slot_arg).collect();
        let code_ptr = CodePtr::from_ptr(function.address() as *const c_void);

        log::trace!("dispatching {:?}", function);
        let result = unsafe { cif.call::<R>(code_ptr, &args) };

        if function.save_errno() {
            last_error::capture();
        }
        Ok(result)
    }
}

impl NativeInvoker for LibffiInvoker {
    fn invoke_int(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<i32> {
        match function.return_type() {
            NativeType::Void => self.call::<()>(function, buffer).map(|_| 0),
            NativeType::SInt8 => self.call::<i8>(function, buffer).map(i32::from),
            NativeType::SInt16 => self.call::<i16>(function, buffer).map(i32::from),
            NativeType::SInt32 => self.call::<i32>(function, buffer),
            other => Err(FfiError::NativeFailure(format!("{:?} result requested as int", other))),
        }
    }

    fn invoke_long(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<i64> {
        match function.return_type() {
            NativeType::SInt64 => self.call::<i64>(function, buffer),
            other => Err(FfiError::NativeFailure(format!("{:?} result requested as long", other))),
        }
    }

    fn invoke_float(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<f32> {
        match function.return_type() {
            NativeType::Float => self.call::<f32>(function, buffer),
            other => Err(FfiError::NativeFailure(format!("{:?} result requested as float", other))),
        }
    }

    fn invoke_double(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<f64> {
        match function.return_type() {
            NativeType::Double => self.call::<f64>(function, buffer),
            other => Err(FfiError::NativeFailure(format!("{:?} result requested as double", other))),
        }
    }

    fn invoke_address(&self, function: &CallDescriptor, buffer: &CallBuffer) -> Result<usize> {
        match function.return_type() {
            NativeType::Address => self.call::<usize>(function, buffer),
            other => Err(FfiError::NativeFailure(format!("{:?} result requested as address", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::call::RawValue;

    extern "C" fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    extern "C" fn scale(x: f64, by: f32) -> f64 {
        x * by as f64
    }

    extern "C" fn negate_byte(x: i8) -> i8 {
        -x
    }

    fn descriptor(address: usize, ret: NativeType, params: &[NativeType]) -> CallDescriptor {
        CallDescriptor::new(address, ret, params.iter().copied(), CallingConvention::Default, false)
    }

    #[test]
    fn test_calls_int_function() {
        let f = descriptor(add as usize, NativeType::SInt32, &[NativeType::SInt32, NativeType::SInt32]);
        let mut buf = CallBuffer::new(&f);
        buf.put_i32(40);
        buf.put_i32(2);
        assert_eq!(LibffiInvoker.invoke(&f, &buf).unwrap(), RawValue::Int32(42));
    }

    #[test]
    fn test_calls_mixed_float_function() {
        let f = descriptor(scale as usize, NativeType::Double, &[NativeType::Double, NativeType::Float]);
        let mut buf = CallBuffer::new(&f);
        buf.put_f64(1.5);
        buf.put_f32(2.0);
        assert_eq!(LibffiInvoker.invoke_double(&f, &buf).unwrap(), 3.0);
    }

    #[test]
    fn test_small_int_return_sign_extends() {
        let f = descriptor(negate_byte as usize, NativeType::SInt8, &[NativeType::SInt8]);
        let mut buf = CallBuffer::new(&f);
        buf.put_i8(5);
        assert_eq!(LibffiInvoker.invoke_int(&f, &buf).unwrap(), -5);
    }

    #[test]
    fn test_rejects_mismatched_buffer() {
        let f = descriptor(add as usize, NativeType::SInt32, &[NativeType::SInt32, NativeType::SInt32]);
        let mut buf = CallBuffer::new(&f);
        buf.put_i32(1);
        assert!(matches!(LibffiInvoker.invoke(&f, &buf), Err(FfiError::NativeFailure(_))));

        buf.put_f32(1.0);
        assert!(matches!(LibffiInvoker.invoke(&f, &buf), Err(FfiError::NativeFailure(_))));
    }

    #[test]
    fn test_rejects_null_function() {
        let f = descriptor(0, NativeType::Void, &[]);
        let buf = CallBuffer::new(&f);
        assert!(LibffiInvoker.invoke(&f, &buf).is_err());
    }
}
