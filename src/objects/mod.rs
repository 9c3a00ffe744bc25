// Caller-side objects the marshalling core hands to native code:
// enum tables, struct views, by-reference boxes and application converters.

mod by_ref;
mod convert;
mod enums;
mod structs;

pub use by_ref::{AddressByReference, ByReference, IntByReference, LongLongByReference, ScalarByReference};
pub use convert::{FromNativeConverter, ResultContext, SimpleTypeMapper, ToNativeConverter, TypeMapper};
pub use enums::EnumMapper;
pub use structs::{RawStruct, RawStructType, Struct, StructMemory, StructType};
