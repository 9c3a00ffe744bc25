// Result Decoders
//
// Turns the raw scalar a native call returned into a caller `Value`. Like the
// marshallers, decoders are resolved once per signature and never change.

use crate::error::{FfiError, Result};
use crate::memory::Pointer;
use crate::native::{NativeType, RawValue};
use crate::objects::{EnumMapper, FromNativeConverter, ResultContext, StructType, TypeMapper};
use crate::platform::Platform;
use crate::types::{ReturnSpec, SemanticType};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub enum ResultDecoder {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    /// `Long` on a 32-bit `long` platform, widened to 64 bits
    Long32,
    NativeLong32,
    NativeLong64,
    Float32,
    Float64,
    Pointer,
    Address,
    Enum(Arc<EnumMapper>),
    Struct(Arc<dyn StructType>),
    String,
    Converted {
        converter: Arc<dyn FromNativeConverter>,
        context: ResultContext,
        inner: Box<ResultDecoder>,
    },
}

impl ResultDecoder {
    pub fn resolve(
        ret: &ReturnSpec,
        platform: Platform,
        type_mapper: Option<&dyn TypeMapper>,
        function_address: usize,
    ) -> Result<Self> {
        if let Some(converter) = type_mapper.and_then(|m| m.from_native_converter(&ret.ty)) {
            let native = ReturnSpec {
                ty: converter.native_type(),
                long_long: ret.long_long,
            };
            let inner = Self::resolve_direct(&native, platform)?;
            return Ok(ResultDecoder::Converted {
                converter,
                context: ResultContext {
                    function_address,
                    declared_type: ret.ty.clone(),
                },
                inner: Box::new(inner),
            });
        }
        Self::resolve_direct(ret, platform)
    }

    fn resolve_direct(ret: &ReturnSpec, platform: Platform) -> Result<Self> {
        let long32 = platform.is_long32();
        Ok(match &ret.ty {
            SemanticType::Void => ResultDecoder::Void,
            SemanticType::Bool => ResultDecoder::Bool,
            SemanticType::Enum(mapper) => ResultDecoder::Enum(mapper.clone()),
            SemanticType::Int8 => ResultDecoder::Int8,
            SemanticType::Int16 => ResultDecoder::Int16,
            SemanticType::Int32 => ResultDecoder::Int32,
            SemanticType::Long if long32 && !ret.long_long => ResultDecoder::Long32,
            SemanticType::Long => ResultDecoder::Int64,
            SemanticType::NativeLong if long32 => ResultDecoder::NativeLong32,
            SemanticType::NativeLong => ResultDecoder::NativeLong64,
            SemanticType::Float32 => ResultDecoder::Float32,
            SemanticType::Float64 => ResultDecoder::Float64,
            SemanticType::Pointer => ResultDecoder::Pointer,
            SemanticType::Address => ResultDecoder::Address,
            SemanticType::Struct(ty) => ResultDecoder::Struct(ty.clone()),
            SemanticType::String => ResultDecoder::String,
            _ => return Err(FfiError::UnsupportedReturnType { ty: ret.ty.clone() }),
        })
    }

    /// ABI type the native call must return
    pub fn native_type(&self) -> NativeType {
        match self {
            ResultDecoder::Void => NativeType::Void,
            ResultDecoder::Int8 => NativeType::SInt8,
            ResultDecoder::Int16 => NativeType::SInt16,
            ResultDecoder::Bool
            | ResultDecoder::Int32
            | ResultDecoder::Long32
            | ResultDecoder::NativeLong32
            | ResultDecoder::Enum(_) => NativeType::SInt32,
            ResultDecoder::Int64 | ResultDecoder::NativeLong64 => NativeType::SInt64,
            ResultDecoder::Float32 => NativeType::Float,
            ResultDecoder::Float64 => NativeType::Double,
            ResultDecoder::Pointer | ResultDecoder::Address | ResultDecoder::Struct(_) | ResultDecoder::String => {
                NativeType::Address
            }
            ResultDecoder::Converted { inner, .. } => inner.native_type(),
        }
    }

    pub fn decode(&self, raw: RawValue) -> Result<Value> {
        Ok(match self {
            ResultDecoder::Void => Value::Null,
            ResultDecoder::Bool => Value::Bool(raw_int(raw)? as i32 != 0),
            ResultDecoder::Int8 => Value::Int8(raw_int(raw)? as i8),
            ResultDecoder::Int16 => Value::Int16(raw_int(raw)? as i16),
            ResultDecoder::Int32 => Value::Int32(raw_int(raw)? as i32),
            ResultDecoder::Int64 => Value::Int64(raw_int(raw)?),
            ResultDecoder::Long32 => Value::Int64(i64::from(raw_int(raw)? as i32)),
            ResultDecoder::NativeLong32 => Value::NativeLong(i64::from(raw_int(raw)? as i32)),
            ResultDecoder::NativeLong64 => Value::NativeLong(raw_int(raw)?),
            ResultDecoder::Float32 => match raw {
                RawValue::Float(f) => Value::Float32(f),
                other => return Err(width_mismatch("float", other)),
            },
            ResultDecoder::Float64 => match raw {
                RawValue::Double(d) => Value::Float64(d),
                RawValue::Float(f) => Value::Float64(f as f64),
                other => return Err(width_mismatch("double", other)),
            },
            ResultDecoder::Pointer => match raw_address(raw)? {
                0 => Value::Null,
                address => Value::Pointer(Pointer::direct(address)),
            },
            ResultDecoder::Address => Value::Address(raw_address(raw)?),
            ResultDecoder::Enum(mapper) => {
                let n = raw_int(raw)? as i32;
                let constant = mapper.value_of(n).ok_or_else(|| {
                    FfiError::DecodeFailure(format!("{} is not a value of enum {}", n, mapper.name()))
                })?;
                Value::Enum(constant)
            }
            ResultDecoder::Struct(ty) => match raw_address(raw)? {
                0 => Value::Null,
                address => {
                    let view = ty.wrap(Pointer::direct(address)).map_err(|e| {
                        FfiError::Invocation(format!("cannot instantiate struct {}: {}", ty.name(), e))
                    })?;
                    Value::Struct(view)
                }
            },
            ResultDecoder::String => match raw_address(raw)? {
                0 => Value::Null,
                address => Value::String(Arc::from(Pointer::direct(address).get_string(0)?)),
            },
            ResultDecoder::Converted {
                converter,
                context,
                inner,
            } => converter.from_native(inner.decode(raw)?, context)?,
        })
    }
}

impl fmt::Debug for ResultDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultDecoder::Enum(mapper) => write!(f, "Enum({})", mapper.name()),
            ResultDecoder::Struct(ty) => write!(f, "Struct({})", ty.name()),
            ResultDecoder::Converted { inner, context, .. } => {
                write!(f, "Converted({} <- {:?})", context.declared_type, inner)
            }
            ResultDecoder::Void => f.write_str("Void"),
            ResultDecoder::Bool => f.write_str("Bool"),
            ResultDecoder::Long32 => f.write_str("Long32"),
            ResultDecoder::NativeLong32 => f.write_str("NativeLong32"),
            ResultDecoder::NativeLong64 => f.write_str("NativeLong64"),
            ResultDecoder::Pointer => f.write_str("Pointer"),
            ResultDecoder::Address => f.write_str("Address"),
            ResultDecoder::String => f.write_str("String"),
            other => write!(f, "{:?}", other.native_type()),
        }
    }
}

fn width_mismatch(expected: &str, raw: RawValue) -> FfiError {
    FfiError::DecodeFailure(format!("expected {} result, native call produced {:?}", expected, raw))
}

fn raw_int(raw: RawValue) -> Result<i64> {
    match raw {
        RawValue::Int32(n) => Ok(i64::from(n)),
        RawValue::Int64(n) => Ok(n),
        RawValue::Address(a) => Ok(a as i64),
        other => Err(width_mismatch("integer", other)),
    }
}

fn raw_address(raw: RawValue) -> Result<usize> {
    match raw {
        RawValue::Address(a) => Ok(a),
        RawValue::Int64(n) => Ok(n as usize),
        RawValue::Int32(n) => Ok(n as u32 as usize),
        other => Err(width_mismatch("address", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{RawStructType, SimpleTypeMapper, Struct, StructMemory};
    use crate::platform::WordSize;

    fn p32() -> Platform {
        Platform::new(WordSize::W32, WordSize::W32)
    }

    fn p64() -> Platform {
        Platform::new(WordSize::W64, WordSize::W64)
    }

    fn resolve(ty: SemanticType, platform: Platform) -> ResultDecoder {
        ResultDecoder::resolve(&ReturnSpec::new(ty), platform, None, 0x1000).unwrap()
    }

    #[test]
    fn test_bool_is_non_zero() {
        let d = resolve(SemanticType::Bool, p64());
        assert_eq!(d.decode(RawValue::Int32(1)).unwrap(), Value::Bool(true));
        assert_eq!(d.decode(RawValue::Int32(-4)).unwrap(), Value::Bool(true));
        assert_eq!(d.decode(RawValue::Int32(0)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_long_widths() {
        let d = resolve(SemanticType::Long, p32());
        assert!(matches!(d, ResultDecoder::Long32));
        assert_eq!(d.native_type(), NativeType::SInt32);
        assert_eq!(d.decode(RawValue::Int32(-1)).unwrap(), Value::Int64(-1));

        let forced = ResultDecoder::resolve(&ReturnSpec::new(SemanticType::Long).long_long(), p32(), None, 0).unwrap();
        assert_eq!(forced.native_type(), NativeType::SInt64);

        assert!(matches!(resolve(SemanticType::NativeLong, p32()), ResultDecoder::NativeLong32));
        let d = resolve(SemanticType::NativeLong, p64());
        assert_eq!(d.decode(RawValue::Int64(1 << 40)).unwrap(), Value::NativeLong(1 << 40));
    }

    #[test]
    fn test_null_struct_and_string_are_absent() {
        let ty = Arc::new(RawStructType::new("Point", 8));
        assert_eq!(resolve(SemanticType::Struct(ty), p64()).decode(RawValue::Address(0)).unwrap(), Value::Null);
        assert_eq!(resolve(SemanticType::String, p64()).decode(RawValue::Address(0)).unwrap(), Value::Null);
        assert_eq!(resolve(SemanticType::Pointer, p64()).decode(RawValue::Address(0)).unwrap(), Value::Null);
    }

    #[test]
    fn test_string_result() {
        let text = b"ok\0";
        let d = resolve(SemanticType::String, p64());
        let value = d.decode(RawValue::Address(text.as_ptr() as usize)).unwrap();
        assert_eq!(value, Value::string("ok"));
    }

    #[test]
    fn test_struct_result_wraps_address() {
        let block = Pointer::allocate(8).unwrap();
        let ty = Arc::new(RawStructType::new("Point", 8));
        let value = resolve(SemanticType::Struct(ty), p64())
            .decode(RawValue::Address(block.address()))
            .unwrap();
        let Value::Struct(view) = value else { panic!("expected struct") };
        assert_eq!(view.size(), 8);
        assert!(matches!(view.memory(), StructMemory::Direct(p) if p.address() == block.address()));
    }

    struct BrokenType;

    impl StructType for BrokenType {
        fn name(&self) -> &str {
            "Broken"
        }

        fn size(&self) -> usize {
            4
        }

        fn wrap(&self, _memory: Pointer) -> Result<Arc<dyn Struct>> {
            Err(FfiError::Memory("no layout".into()))
        }
    }

    #[test]
    fn test_struct_instantiation_failure_is_invocation_error() {
        let d = resolve(SemanticType::Struct(Arc::new(BrokenType)), p64());
        assert!(matches!(d.decode(RawValue::Address(0x10)), Err(FfiError::Invocation(_))));
    }

    #[test]
    fn test_unmapped_enum_fails() {
        let mapper = Arc::new(EnumMapper::new("Status", [("Ok", 0), ("Busy", 1)]).unwrap());
        let d = resolve(SemanticType::Enum(mapper), p64());
        assert_eq!(d.decode(RawValue::Int32(1)).unwrap(), Value::Enum(Arc::from("Busy")));
        assert!(matches!(d.decode(RawValue::Int32(7)), Err(FfiError::DecodeFailure(_))));
    }

    #[test]
    fn test_unsupported_returns() {
        for ty in [
            SemanticType::StringBuffer,
            SemanticType::ByReference,
            SemanticType::Array(crate::types::ElementType::Int32),
            SemanticType::Custom(Arc::from("Handle")),
        ] {
            let err = ResultDecoder::resolve(&ReturnSpec::new(ty), p64(), None, 0).unwrap_err();
            assert!(err.is_construction_error());
        }
    }

    struct Celsius;

    impl FromNativeConverter for Celsius {
        fn native_type(&self) -> SemanticType {
            SemanticType::Int32
        }

        fn from_native(&self, value: Value, context: &ResultContext) -> Result<Value> {
            assert_eq!(context.function_address, 0x1000);
            Ok(Value::Float64(value.as_f64().unwrap_or(0.0) / 10.0))
        }
    }

    #[test]
    fn test_converted_result() {
        let temp = SemanticType::Custom(Arc::from("Celsius"));
        let mapper = SimpleTypeMapper::new().with_from_native(temp.clone(), Arc::new(Celsius));
        let d = ResultDecoder::resolve(&ReturnSpec::new(temp), p64(), Some(&mapper), 0x1000).unwrap();
        assert_eq!(d.native_type(), NativeType::SInt32);
        assert_eq!(d.decode(RawValue::Int32(215)).unwrap(), Value::Float64(21.5));
    }
}
