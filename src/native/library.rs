// Native library loading and symbol lookup

use crate::error::{FfiError, Result};
use libloading::{Library, Symbol};
use std::ffi::{c_void, CString};
use std::fmt;

/// Maps a declared function name onto the exported symbol name
pub trait FunctionMapper: Send + Sync {
    fn map_function_name(&self, name: &str) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFunctionMapper;

impl FunctionMapper for IdentityFunctionMapper {
    fn map_function_name(&self, name: &str) -> String {
        name.to_string()
    }
}

pub struct NativeLibrary {
    library: Library,
    path: String,
}

/// Append the platform's shared-library extension when `path` has none
pub fn with_library_extension(path: &str) -> String {
    let ext = if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    };
    if path.contains('.') {
        path.to_string()
    } else {
        format!("{}.{}", path, ext)
    }
}

impl NativeLibrary {
    pub fn open(path: &str) -> Result<Self> {
        let full_path = with_library_extension(path);
        let library = unsafe {
            Library::new(&full_path).map_err(|e| FfiError::Library(format!("'{}': {}", full_path, e)))?
        };
        log::debug!("loaded native library {}", full_path);
        Ok(Self {
            library,
            path: full_path,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn find_symbol_address(&self, name: &str) -> Result<usize> {
        let name_c = CString::new(name).map_err(|_| FfiError::SymbolNotFound(name.to_string()))?;
        let symbol: Symbol<*const c_void> = unsafe {
            self.library
                .get(name_c.as_bytes_with_nul())
                .map_err(|_| FfiError::SymbolNotFound(name.to_string()))?
        };
        let address = *symbol as usize;
        if address == 0 {
            return Err(FfiError::SymbolNotFound(name.to_string()));
        }
        Ok(address)
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeLibrary({})", self.path)
    }
}
