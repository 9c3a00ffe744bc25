// Parameter Marshallers
//
// One immutable marshaller per declared parameter, resolved once when an
// invoker is built. Each encodes a caller `Value` into the next call buffer
// slot. Variants that hand native code a converted or re-packed copy of caller
// data register a post-invoke action on the session to copy it back; those
// report `requires_session`.

use super::session::InvocationSession;
use crate::error::{FfiError, Result};
use crate::memory::Pointer;
use crate::native::{CallBuffer, NativeType};
use crate::objects::{ByReference, EnumMapper, Struct, StructMemory, ToNativeConverter, TypeMapper};
use crate::platform::{Platform, WordSize};
use crate::types::{ElementType, ParamFlags, ParameterSpec, SemanticType};
use crate::value::{ArrayRef, BufferRef, BufferStorage, Shared, Value};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

const ADDRESS_SIZE: usize = std::mem::size_of::<usize>();

#[derive(Clone)]
pub enum Marshaller {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Enum(Arc<EnumMapper>),
    Pointer,
    Address,
    /// Immutable text, always copied in with a trailing NUL
    String,
    StringBuffer { flags: ParamFlags },
    StringArray { flags: ParamFlags },
    Array { element: ElementType, flags: ParamFlags },
    /// 64-bit caller elements passed as a 32-bit native `long` array
    Long32Array { flags: ParamFlags },
    Buffer { element: ElementType, flags: ParamFlags },
    Long32Buffer { flags: ParamFlags },
    Struct { flags: ParamFlags },
    StructArray { flags: ParamFlags },
    PointerArray { flags: ParamFlags },
    ByReference { flags: ParamFlags },
    Converted {
        converter: Arc<dyn ToNativeConverter>,
        inner: Box<Marshaller>,
    },
}

impl Marshaller {
    /// Pick the marshaller for one parameter.
    ///
    /// A converter registered for the declared type wins; the converter's native
    /// type is then resolved without consulting the mapper again.
    pub fn resolve(spec: &ParameterSpec, platform: Platform, type_mapper: Option<&dyn TypeMapper>) -> Result<Self> {
        if let Some(converter) = type_mapper.and_then(|m| m.to_native_converter(&spec.ty)) {
            let native = ParameterSpec {
                ty: converter.native_type(),
                ..spec.clone()
            };
            let inner = Self::resolve_direct(&native, platform)?;
            return Ok(Marshaller::Converted {
                converter,
                inner: Box::new(inner),
            });
        }
        Self::resolve_direct(spec, platform)
    }

    fn resolve_direct(spec: &ParameterSpec, platform: Platform) -> Result<Self> {
        let flags = spec.flags.normalized();
        let long32 = platform.is_long32();
        let wide_long = spec.long_long || !long32;

        Ok(match &spec.ty {
            SemanticType::Bool => Marshaller::Bool,
            SemanticType::Int8 => Marshaller::Int8,
            SemanticType::Int16 => Marshaller::Int16,
            SemanticType::Int32 => Marshaller::Int32,
            SemanticType::Long if wide_long => Marshaller::Int64,
            SemanticType::Long => Marshaller::Int32,
            SemanticType::NativeLong if long32 => Marshaller::Int32,
            SemanticType::NativeLong => Marshaller::Int64,
            SemanticType::Float32 => Marshaller::Float32,
            SemanticType::Float64 => Marshaller::Float64,
            SemanticType::Enum(mapper) => Marshaller::Enum(mapper.clone()),
            SemanticType::Pointer => Marshaller::Pointer,
            SemanticType::Address => Marshaller::Address,
            SemanticType::String => Marshaller::String,
            SemanticType::StringBuffer => Marshaller::StringBuffer {
                flags: flags.with_auto_nul(),
            },
            SemanticType::StringArray => Marshaller::StringArray {
                flags: flags.with_auto_nul(),
            },
            SemanticType::Array(ElementType::Int8) => Marshaller::Array {
                element: ElementType::Int8,
                flags: flags.with_auto_nul(),
            },
            SemanticType::Array(ElementType::Long) if !wide_long => Marshaller::Long32Array { flags },
            SemanticType::Array(element) => Marshaller::Array {
                element: *element,
                flags,
            },
            SemanticType::Buffer(ElementType::Int8) => Marshaller::Buffer {
                element: ElementType::Int8,
                flags: flags.with_auto_nul(),
            },
            SemanticType::Buffer(ElementType::Long) if !wide_long => Marshaller::Long32Buffer { flags },
            SemanticType::Buffer(element) => Marshaller::Buffer {
                element: *element,
                flags,
            },
            SemanticType::Struct(_) => Marshaller::Struct { flags },
            SemanticType::StructArray(_) => Marshaller::StructArray { flags },
            SemanticType::PointerArray => Marshaller::PointerArray { flags },
            SemanticType::ByReference => Marshaller::ByReference { flags },
            SemanticType::Void | SemanticType::Custom(_) => {
                return Err(FfiError::UnsupportedParameterType {
                    index: 0,
                    ty: spec.ty.clone(),
                })
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Marshaller::Bool => "bool",
            Marshaller::Int8 => "i8",
            Marshaller::Int16 => "i16",
            Marshaller::Int32 => "i32",
            Marshaller::Int64 => "i64",
            Marshaller::Float32 => "f32",
            Marshaller::Float64 => "f64",
            Marshaller::Enum(_) => "enum",
            Marshaller::Pointer => "pointer",
            Marshaller::Address => "address",
            Marshaller::String => "string",
            Marshaller::StringBuffer { .. } => "string buffer",
            Marshaller::StringArray { .. } => "string array",
            Marshaller::Array { .. } => "array",
            Marshaller::Long32Array { .. } => "long array",
            Marshaller::Buffer { .. } => "buffer",
            Marshaller::Long32Buffer { .. } => "long buffer",
            Marshaller::Struct { .. } => "struct",
            Marshaller::StructArray { .. } => "struct array",
            Marshaller::PointerArray { .. } => "pointer array",
            Marshaller::ByReference { .. } => "by-reference",
            Marshaller::Converted { .. } => "converted",
        }
    }

    /// Direction flags after defaulting and automatic NUL termination
    pub fn flags(&self) -> Option<ParamFlags> {
        match self {
            Marshaller::StringBuffer { flags }
            | Marshaller::StringArray { flags }
            | Marshaller::Array { flags, .. }
            | Marshaller::Long32Array { flags }
            | Marshaller::Buffer { flags, .. }
            | Marshaller::Long32Buffer { flags }
            | Marshaller::Struct { flags }
            | Marshaller::StructArray { flags }
            | Marshaller::PointerArray { flags }
            | Marshaller::ByReference { flags } => Some(*flags),
            Marshaller::String => Some(ParamFlags::IN | ParamFlags::NUL_TERMINATE),
            Marshaller::Converted { inner, .. } => inner.flags(),
            _ => None,
        }
    }

    /// True when marshalling registers post-invoke work
    pub fn requires_session(&self) -> bool {
        match self {
            Marshaller::StringBuffer { .. }
            | Marshaller::StringArray { .. }
            | Marshaller::Long32Array { .. }
            | Marshaller::Long32Buffer { .. }
            | Marshaller::PointerArray { .. }
            | Marshaller::ByReference { .. } => true,
            Marshaller::Converted { inner, .. } => inner.requires_session(),
            _ => false,
        }
    }

    /// ABI type of the slot this marshaller writes
    pub fn native_type(&self) -> NativeType {
        match self {
            Marshaller::Int8 => NativeType::SInt8,
            Marshaller::Int16 => NativeType::SInt16,
            Marshaller::Bool | Marshaller::Int32 | Marshaller::Enum(_) => NativeType::SInt32,
            Marshaller::Int64 => NativeType::SInt64,
            Marshaller::Float32 => NativeType::Float,
            Marshaller::Float64 => NativeType::Double,
            Marshaller::Converted { inner, .. } => inner.native_type(),
            _ => NativeType::Address,
        }
    }

    pub fn marshal(&self, buffer: &mut CallBuffer, value: &Value) -> Result<()> {
        self.encode(buffer, None, value)
    }

    pub fn marshal_with_session(
        &self,
        buffer: &mut CallBuffer,
        session: &mut InvocationSession,
        value: &Value,
    ) -> Result<()> {
        self.encode(buffer, Some(session), value)
    }

    fn encode(&self, buffer: &mut CallBuffer, session: Option<&mut InvocationSession>, value: &Value) -> Result<()> {
        // Every reference-like parameter accepts null as the null address
        if value.is_null() && self.native_type() == NativeType::Address && !matches!(self, Marshaller::Converted { .. }) {
            buffer.put_address(0);
            return Ok(());
        }

        match self {
            Marshaller::Bool => {
                let b = value.as_bool().ok_or_else(|| mismatch("Bool", value))?;
                buffer.put_i32(i32::from(b));
            }
            Marshaller::Int8 => buffer.put_i8(integer(value)? as i8),
            Marshaller::Int16 => buffer.put_i16(integer(value)? as i16),
            Marshaller::Int32 => buffer.put_i32(integer(value)? as i32),
            Marshaller::Int64 => buffer.put_i64(integer(value)?),
            Marshaller::Float32 => buffer.put_f32(float(value)? as f32),
            Marshaller::Float64 => buffer.put_f64(float(value)?),
            Marshaller::Enum(mapper) => {
                let Value::Enum(name) = value else {
                    return Err(mismatch("Enum", value));
                };
                let n = mapper.int_value(name).ok_or_else(|| {
                    FfiError::invalid_argument(0, format!("'{}' is not a constant of enum {}", name, mapper.name()))
                })?;
                buffer.put_i32(n);
            }
            Marshaller::Pointer | Marshaller::Address => match value {
                Value::Pointer(p) if p.is_heap() => buffer.put_memory(p.clone()),
                Value::Pointer(p) => buffer.put_address(p.address()),
                Value::Address(a) => buffer.put_address(*a),
                _ => return Err(mismatch("Pointer", value)),
            },
            Marshaller::String => {
                let s = value.as_str().ok_or_else(|| mismatch("String", value))?;
                let memory = Pointer::allocate_array(s.as_bytes(), s.len() + 1)?;
                buffer.put_memory(memory);
            }
            Marshaller::StringBuffer { flags } => {
                let Value::StringBuffer(text) = value else {
                    return Err(mismatch("StringBuffer", value));
                };
                marshal_string_buffer(buffer, session_for(self, session)?, text, *flags)?;
            }
            Marshaller::StringArray { flags } => {
                let Value::StringArray(strings) = value else {
                    return Err(mismatch("StringArray", value));
                };
                marshal_string_array(buffer, session_for(self, session)?, strings, *flags)?;
            }
            Marshaller::Array { element, flags } => {
                let array = array_of(value, *element)?;
                buffer.put_array(array, 0, array.len(), *flags)?;
            }
            Marshaller::Long32Array { flags } => {
                let ArrayRef::Long(longs) = array_of(value, ElementType::Long)? else {
                    return Err(mismatch("long array", value));
                };
                let len = longs.lock().len();
                marshal_long32(buffer, session_for(self, session)?, longs, 0, len, *flags)?;
            }
            Marshaller::Buffer { element, flags } => {
                let buf = buffer_of(value, *element)?;
                match &buf.storage {
                    BufferStorage::Heap(array) => buffer.put_array(array, buf.position, buf.remaining(), *flags)?,
                    BufferStorage::Direct(memory, _) => {
                        buffer.put_memory(direct_window(memory, buf, element.size())?)
                    }
                }
            }
            Marshaller::Long32Buffer { flags } => {
                let buf = buffer_of(value, ElementType::Long)?;
                match &buf.storage {
                    BufferStorage::Heap(ArrayRef::Long(longs)) => marshal_long32(
                        buffer,
                        session_for(self, session)?,
                        longs,
                        buf.position,
                        buf.remaining(),
                        *flags,
                    )?,
                    BufferStorage::Direct(memory, _) => {
                        buffer.put_memory(direct_window(memory, buf, WordSize::W32.bytes())?)
                    }
                    BufferStorage::Heap(_) => {
                        return Err(FfiError::invalid_argument(0, "long buffer is not backed by a long array"))
                    }
                }
            }
            Marshaller::Struct { flags } => {
                let Value::Struct(s) = value else {
                    return Err(mismatch("Struct", value));
                };
                marshal_struct(buffer, &**s, *flags)?;
            }
            Marshaller::StructArray { flags } => {
                let Value::StructArray(items) = value else {
                    return Err(mismatch("StructArray", value));
                };
                marshal_struct_array(buffer, items, *flags)?;
            }
            Marshaller::PointerArray { flags } => {
                let Value::PointerArray(pointers) = value else {
                    return Err(mismatch("PointerArray", value));
                };
                marshal_pointer_array(buffer, session_for(self, session)?, pointers, *flags)?;
            }
            Marshaller::ByReference { flags } => {
                let Value::ByReference(reference) = value else {
                    return Err(mismatch("ByReference", value));
                };
                marshal_by_reference(buffer, session_for(self, session)?, reference, *flags)?;
            }
            Marshaller::Converted { converter, inner } => {
                let converted = converter.to_native(value)?;
                inner.encode(buffer, session, &converted)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marshaller::Converted { inner, .. } => write!(f, "Converted({:?})", inner),
            Marshaller::Array { element, flags } | Marshaller::Buffer { element, flags } => {
                write!(f, "{}<{}>({:?})", self.name(), element.name(), flags)
            }
            other => match other.flags() {
                Some(flags) => write!(f, "{}({:?})", other.name(), flags),
                None => f.write_str(other.name()),
            },
        }
    }
}

// ==================== Argument Checks ====================

fn mismatch(expected: &str, value: &Value) -> FfiError {
    FfiError::invalid_argument(0, format!("expected {}, got {}", expected, value.type_name()))
}

fn integer(value: &Value) -> Result<i64> {
    match value {
        Value::Bool(b) => Ok(i64::from(*b)),
        _ => value.as_i64().ok_or_else(|| mismatch("integer", value)),
    }
}

fn float(value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| mismatch("number", value))
}

fn array_of(value: &Value, element: ElementType) -> Result<&ArrayRef> {
    match value {
        Value::Array(array) if array.element_type() == element => Ok(array),
        Value::Array(array) => Err(FfiError::invalid_argument(
            0,
            format!("expected {} array, got {} array", element.name(), array.element_type().name()),
        )),
        _ => Err(mismatch("Array", value)),
    }
}

fn buffer_of(value: &Value, element: ElementType) -> Result<&BufferRef> {
    match value {
        Value::Buffer(buf) if buf.element_type() == element => Ok(buf),
        Value::Buffer(buf) => Err(FfiError::invalid_argument(
            0,
            format!("expected {} buffer, got {} buffer", element.name(), buf.element_type().name()),
        )),
        _ => Err(mismatch("Buffer", value)),
    }
}

/// The `[position, limit)` window of a direct buffer, checked against the memory it views
fn direct_window(memory: &Pointer, buf: &BufferRef, element_size: usize) -> Result<Pointer> {
    memory
        .slice_sized(buf.position * element_size, buf.remaining() * element_size)
        .map_err(|e| FfiError::invalid_argument(0, format!("buffer window {}..{}: {}", buf.position, buf.limit, e)))
}

fn session_for<'s>(
    marshaller: &Marshaller,
    session: Option<&'s mut InvocationSession>,
) -> Result<&'s mut InvocationSession> {
    session.ok_or(FfiError::SessionRequired(marshaller.name()))
}

// ==================== Session Marshalling ====================

fn marshal_string_buffer(
    buffer: &mut CallBuffer,
    session: &mut InvocationSession,
    text: &Shared<String>,
    flags: ParamFlags,
) -> Result<()> {
    let memory = {
        let text = text.lock();
        let capacity = text.capacity().max(text.len()) + 1;
        let memory = Pointer::allocate(capacity)?;
        if flags.is_in() {
            memory.put_array(0, text.as_bytes())?;
        }
        memory
    };

    if flags.is_out() {
        let native = memory.clone();
        let target = text.clone();
        session.add_post_invoke(move || {
            let updated = native.get_string(0)?;
            let mut target = target.lock();
            target.clear();
            target.push_str(&updated);
            Ok(())
        });
    }
    buffer.put_memory(memory);
    Ok(())
}

fn marshal_string_array(
    buffer: &mut CallBuffer,
    session: &mut InvocationSession,
    strings: &Shared<Vec<Option<String>>>,
    flags: ParamFlags,
) -> Result<()> {
    let snapshot = strings.lock().clone();
    let count = snapshot.len();
    let table = Pointer::allocate((count + usize::from(flags.is_nul_terminate())) * ADDRESS_SIZE)?;

    let mut elements: SmallVec<[Pointer; 8]> = SmallVec::new();
    if flags.is_in() {
        for (i, s) in snapshot.iter().enumerate() {
            if let Some(s) = s {
                let element = Pointer::allocate_array(s.as_bytes(), s.len() + 1)?;
                table.put_address(i * ADDRESS_SIZE, element.address())?;
                elements.push(element);
            }
        }
    }

    if flags.is_out() {
        let native = table.clone();
        let target = strings.clone();
        session.add_post_invoke(move || {
            let _keep_alive = elements;
            let mut target = target.lock();
            for (i, slot) in target.iter_mut().take(count).enumerate() {
                let address = native.get_address(i * ADDRESS_SIZE)?;
                *slot = if address == 0 {
                    None
                } else {
                    Some(Pointer::direct(address).get_string(0)?)
                };
            }
            Ok(())
        });
    } else if !elements.is_empty() {
        session.add_post_invoke(move || {
            drop(elements);
            Ok(())
        });
    }
    buffer.put_memory(table);
    Ok(())
}

fn marshal_long32(
    buffer: &mut CallBuffer,
    session: &mut InvocationSession,
    longs: &Shared<Vec<i64>>,
    start: usize,
    len: usize,
    flags: ParamFlags,
) -> Result<()> {
    let out_of_bounds = || FfiError::invalid_argument(0, format!("range {}..{} out of bounds", start, start + len));
    if start + len > longs.lock().len() {
        return Err(out_of_bounds());
    }

    let element = WordSize::W32.bytes();
    let scratch = Pointer::allocate((len + usize::from(flags.is_nul_terminate())) * element)?;

    if flags.is_in() {
        let longs = longs.lock();
        let window = longs.get(start..start + len).ok_or_else(out_of_bounds)?;
        let narrowed: SmallVec<[i32; 16]> = window.iter().map(|&v| v as i32).collect();
        scratch.put_array(0, &narrowed)?;
    }

    if flags.is_out() {
        let native = scratch.clone();
        let target = longs.clone();
        session.add_post_invoke(move || {
            let mut narrowed = vec![0i32; len];
            native.get_array(0, &mut narrowed)?;
            let mut target = target.lock();
            let window = target
                .get_mut(start..start + len)
                .ok_or_else(|| FfiError::Memory(format!("caller array shrank below {} elements", start + len)))?;
            for (dst, src) in window.iter_mut().zip(narrowed) {
                *dst = i64::from(src);
            }
            Ok(())
        });
    }
    buffer.put_memory(scratch);
    Ok(())
}

fn marshal_pointer_array(
    buffer: &mut CallBuffer,
    session: &mut InvocationSession,
    pointers: &Shared<Vec<Option<Pointer>>>,
    flags: ParamFlags,
) -> Result<()> {
    let snapshot = pointers.lock().clone();
    let count = snapshot.len();
    let table = Pointer::allocate((count + usize::from(flags.is_nul_terminate())) * ADDRESS_SIZE)?;

    if flags.is_in() {
        for (i, p) in snapshot.iter().enumerate() {
            let address = p.as_ref().map_or(0, Pointer::address);
            table.put_address(i * ADDRESS_SIZE, address)?;
        }
    }

    if flags.is_out() {
        let native = table.clone();
        let target = pointers.clone();
        session.add_post_invoke(move || {
            let mut target = target.lock();
            for (i, slot) in target.iter_mut().take(count).enumerate() {
                let address = native.get_address(i * ADDRESS_SIZE)?;
                // Keep the caller's own pointer (and its allocation) when native code left it alone
                let unchanged = snapshot[i].as_ref().filter(|p| p.address() == address).cloned();
                *slot = match (address, unchanged) {
                    (0, _) => None,
                    (_, Some(p)) => Some(p),
                    (address, None) => Some(Pointer::direct(address)),
                };
            }
            Ok(())
        });
    }
    buffer.put_memory(table);
    Ok(())
}

fn marshal_by_reference(
    buffer: &mut CallBuffer,
    session: &mut InvocationSession,
    reference: &Arc<dyn ByReference>,
    flags: ParamFlags,
) -> Result<()> {
    let memory = Pointer::allocate(reference.native_size())?;
    if flags.is_in() {
        reference.to_native(&memory)?;
    }
    if flags.is_out() {
        let native = memory.clone();
        let target = reference.clone();
        session.add_post_invoke(move || target.from_native(&native));
    }
    buffer.put_memory(memory);
    Ok(())
}

// ==================== Struct Marshalling ====================

fn marshal_struct(buffer: &mut CallBuffer, s: &dyn Struct, flags: ParamFlags) -> Result<()> {
    match s.memory() {
        StructMemory::Direct(memory) => buffer.put_memory(memory),
        StructMemory::Heap { bytes, offset } => buffer.put_bytes(&bytes, offset, s.size(), flags)?,
    }
    Ok(())
}

/// Struct arrays are passed as one block, so every element must live in the
/// same backing memory, back to back, in order.
fn marshal_struct_array(buffer: &mut CallBuffer, items: &[Arc<dyn Struct>], flags: ParamFlags) -> Result<()> {
    let Some(first) = items.first() else {
        buffer.put_address(0);
        return Ok(());
    };
    let size = first.size();
    let not_contiguous = || FfiError::invalid_argument(0, "struct array elements are not contiguous");

    match first.memory() {
        StructMemory::Direct(memory) => {
            for (i, item) in items.iter().enumerate() {
                match item.memory() {
                    StructMemory::Direct(p) if p.address() == memory.address() + i * size => {}
                    _ => return Err(not_contiguous()),
                }
            }
            buffer.put_memory(memory);
        }
        StructMemory::Heap { bytes, offset } => {
            for (i, item) in items.iter().enumerate() {
                match item.memory() {
                    StructMemory::Heap { bytes: b, offset: o } if Arc::ptr_eq(&b, &bytes) && o == offset + i * size => {}
                    _ => return Err(not_contiguous()),
                }
            }
            buffer.put_bytes(&bytes, offset, size * items.len(), flags)?;
        }
    }
    Ok(())
}
