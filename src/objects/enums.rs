use crate::error::{FfiError, Result};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Injective table between enum constant names and their native integers
#[derive(Debug)]
pub struct EnumMapper {
    name: Arc<str>,
    to_int: FxHashMap<Arc<str>, i32>,
    from_int: FxHashMap<i32, Arc<str>>,
}

impl EnumMapper {
    pub fn new<'a>(name: &str, constants: impl IntoIterator<Item = (&'a str, i32)>) -> Result<Self> {
        let mut to_int = FxHashMap::default();
        let mut from_int = FxHashMap::default();

        for (constant, value) in constants {
            let constant: Arc<str> = Arc::from(constant);
            if to_int.insert(constant.clone(), value).is_some() {
                return Err(FfiError::Config(format!(
                    "enum {} declares constant '{}' twice",
                    name, constant
                )));
            }
            if let Some(existing) = from_int.insert(value, constant.clone()) {
                return Err(FfiError::Config(format!(
                    "enum {} maps both '{}' and '{}' to {}",
                    name, existing, constant, value
                )));
            }
        }

        Ok(Self {
            name: Arc::from(name),
            to_int,
            from_int,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn int_value(&self, constant: &str) -> Option<i32> {
        self.to_int.get(constant).copied()
    }

    pub fn value_of(&self, value: i32) -> Option<Arc<str>> {
        self.from_int.get(&value).cloned()
    }

    pub fn len(&self) -> usize {
        self.to_int.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_int.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_both_ways() {
        let mapper = EnumMapper::new("Mode", [("Read", 1), ("Write", 2)]).unwrap();
        assert_eq!(mapper.int_value("Write"), Some(2));
        assert_eq!(mapper.value_of(1).as_deref(), Some("Read"));
        assert_eq!(mapper.value_of(3), None);
        assert_eq!(mapper.len(), 2);
    }

    #[test]
    fn test_rejects_non_injective_tables() {
        assert!(EnumMapper::new("Mode", [("Read", 1), ("Other", 1)]).is_err());
        assert!(EnumMapper::new("Mode", [("Read", 1), ("Read", 2)]).is_err());
    }
}
