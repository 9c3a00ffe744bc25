// Platform word sizes
// The "native long" width is passed explicitly into type resolution so that
// 32-bit behaviour can be selected on any host.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordSize {
    #[serde(rename = "32")]
    W32,
    #[serde(rename = "64")]
    W64,
}

impl WordSize {
    pub fn bits(self) -> u32 {
        match self {
            WordSize::W32 => 32,
            WordSize::W64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }
}

impl fmt::Display for WordSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    /// Width of C `long`
    pub long_size: WordSize,
    /// Width of a native address
    pub address_size: WordSize,
}

impl Platform {
    pub fn new(long_size: WordSize, address_size: WordSize) -> Self {
        Self {
            long_size,
            address_size,
        }
    }

    /// The platform this process runs on.
    /// Windows keeps `long` at 32 bits even on 64-bit targets.
    pub fn host() -> Self {
        let address_size = if cfg!(target_pointer_width = "64") {
            WordSize::W64
        } else {
            WordSize::W32
        };
        let long_size = if cfg!(target_os = "windows") {
            WordSize::W32
        } else {
            address_size
        };
        Self::new(long_size, address_size)
    }

    pub fn with_long_size(mut self, long_size: WordSize) -> Self {
        self.long_size = long_size;
        self
    }

    pub fn is_long32(&self) -> bool {
        self.long_size == WordSize::W32
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_address_size_matches_pointer() {
        let host = Platform::host();
        assert_eq!(host.address_size.bytes(), std::mem::size_of::<usize>());
    }

    #[test]
    fn test_with_long_size() {
        let p = Platform::host().with_long_size(WordSize::W32);
        assert!(p.is_long32());
        assert_eq!(p.long_size.bits(), 32);
    }

    #[test]
    fn test_word_size_serde() {
        let w: WordSize = serde_json::from_str("\"32\"").unwrap();
        assert_eq!(w, WordSize::W32);
        assert_eq!(serde_json::to_string(&WordSize::W64).unwrap(), "\"64\"");
    }
}
