//! Map access gateway
//!
//! Sandboxed programs never touch a map backend directly: every operation
//! goes through a gateway function that validates its preconditions in a
//! fixed order and only then forwards to the backend. Each failed
//! precondition has a distinct negative code so diagnostics can tell which
//! check tripped; lookup has no error channel beyond "no value" and reports
//! every failure as null.

use thiserror::Error;

/// The four map operations reachable from a filter program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapOp {
    /// Key -> value-or-null
    Lookup,
    /// Write value under existing or new key
    Update,
    /// Insert an item (backend-defined keying)
    Add,
    /// Remove a key
    Delete,
}

/// Capability interface every map backend implements
///
/// Storage strategy (hash table, array, ...) is the backend's business; this
/// subsystem only depends on the operation contract plus the key/value size
/// metadata the verifier resolves size placeholders against. A backend that
/// does not implement an operation reports it through [`supports`]; the
/// gateway treats that exactly like a missing function.
///
/// [`supports`]: MapBackend::supports
pub trait MapBackend: Send + Sync {
    /// Key size in bytes
    fn key_size(&self) -> usize;

    /// Value size in bytes
    fn value_size(&self) -> usize;

    /// Whether the backend implements `op`
    fn supports(&self, op: MapOp) -> bool;

    /// Copy of the value under `key`, or `None` when absent
    fn lookup(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Store `value` under `key`; 0 = success convention
    fn update(&self, key: &[u8], value: &[u8]) -> i64;

    /// Insert `value` with backend-defined keying; 0 = success convention
    fn add(&self, value: &[u8]) -> i64;

    /// Remove `key`; 0 = success convention
    fn delete(&self, key: &[u8]) -> i64;
}

/// Gateway precondition failure
///
/// Variants are ordered the way the gateway checks them; the first failed
/// check is the one reported.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOpError {
    /// No map reference was passed
    #[error("no map reference")]
    NoMap,
    /// The backend does not implement the requested operation
    #[error("operation not implemented by map backend")]
    NoOp,
    /// No key was passed
    #[error("no key")]
    NoKey,
    /// No item was passed
    #[error("no item")]
    NoItem,
}

impl MapOpError {
    /// Raw code for the helper calling convention
    pub const fn code(self) -> i64 {
        match self {
            MapOpError::NoMap => -1,
            MapOpError::NoOp => -2,
            MapOpError::NoKey => -3,
            MapOpError::NoItem => -4,
        }
    }
}

/// Look up `key` in `map`.
///
/// Null for any failure: missing map, unimplemented lookup, missing key, or
/// key simply not present. Callers cannot distinguish these; that is the
/// contract.
pub fn map_lookup(map: Option<&dyn MapBackend>, key: Option<&[u8]>) -> Option<Vec<u8>> {
    let map = map?;
    if !map.supports(MapOp::Lookup) {
        return None;
    }
    let key = key?;
    map.lookup(key)
}

/// Store `item` under `key` in `map`.
///
/// Backend status passes through unchanged on success.
pub fn map_update(
    map: Option<&dyn MapBackend>,
    key: Option<&[u8]>,
    item: Option<&[u8]>,
) -> Result<i64, MapOpError> {
    let map = map.ok_or(MapOpError::NoMap)?;
    if !map.supports(MapOp::Update) {
        return Err(MapOpError::NoOp);
    }
    let key = key.ok_or(MapOpError::NoKey)?;
    let item = item.ok_or(MapOpError::NoItem)?;
    Ok(map.update(key, item))
}

/// Insert `item` into `map` with backend-defined keying.
pub fn map_add(map: Option<&dyn MapBackend>, item: Option<&[u8]>) -> Result<i64, MapOpError> {
    let map = map.ok_or(MapOpError::NoMap)?;
    if !map.supports(MapOp::Add) {
        return Err(MapOpError::NoOp);
    }
    let item = item.ok_or(MapOpError::NoItem)?;
    Ok(map.add(item))
}

/// Remove `key` from `map`.
pub fn map_delete(map: Option<&dyn MapBackend>, key: Option<&[u8]>) -> Result<i64, MapOpError> {
    let map = map.ok_or(MapOpError::NoMap)?;
    if !map.supports(MapOp::Delete) {
        return Err(MapOpError::NoOp);
    }
    let key = key.ok_or(MapOpError::NoKey)?;
    Ok(map.delete(key))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Hash-table backend for tests, with a configurable operation mask.
    pub struct TestMap {
        entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
        key_size: usize,
        value_size: usize,
        unsupported: Vec<MapOp>,
    }

    impl TestMap {
        pub fn new(key_size: usize, value_size: usize) -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
                key_size,
                value_size,
                unsupported: Vec::new(),
            }
        }

        pub fn without(mut self, op: MapOp) -> Self {
            self.unsupported.push(op);
            self
        }
    }

    impl MapBackend for TestMap {
        fn key_size(&self) -> usize {
            self.key_size
        }

        fn value_size(&self) -> usize {
            self.value_size
        }

        fn supports(&self, op: MapOp) -> bool {
            !self.unsupported.contains(&op)
        }

        fn lookup(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.entries.lock().get(key).cloned()
        }

        fn update(&self, key: &[u8], value: &[u8]) -> i64 {
            self.entries.lock().insert(key.to_vec(), value.to_vec());
            0
        }

        fn add(&self, value: &[u8]) -> i64 {
            // Keyed by insertion count, like an array map appending slots
            let mut entries = self.entries.lock();
            let key = (entries.len() as u32).to_le_bytes().to_vec();
            entries.insert(key, value.to_vec());
            0
        }

        fn delete(&self, key: &[u8]) -> i64 {
            match self.entries.lock().remove(key) {
                Some(_) => 0,
                None => -5,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::TestMap;
    use super::*;

    #[test]
    fn test_lookup_missing_key_is_null() {
        let map = TestMap::new(4, 8);
        assert_eq!(map_lookup(Some(&map), Some(&[0, 0, 0, 7])), None);
    }

    #[test]
    fn test_lookup_after_update() {
        let map = TestMap::new(4, 8);
        let key = [0u8, 0, 0, 7];
        let value = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(map_update(Some(&map), Some(&key), Some(&value)), Ok(0));
        assert_eq!(map_lookup(Some(&map), Some(&key)), Some(value.to_vec()));
    }

    #[test]
    fn test_lookup_failures_are_uniformly_null() {
        let map = TestMap::new(4, 8);
        let no_lookup = TestMap::new(4, 8).without(MapOp::Lookup);
        assert_eq!(map_lookup(None, Some(&[1, 2, 3, 4])), None);
        assert_eq!(map_lookup(Some(&no_lookup), Some(&[1, 2, 3, 4])), None);
        assert_eq!(map_lookup(Some(&map), None), None);
    }

    #[test]
    fn test_update_precondition_order() {
        let map = TestMap::new(4, 8);
        let no_update = TestMap::new(4, 8).without(MapOp::Update);

        // First failed check wins, even when later arguments are also bad.
        assert_eq!(map_update(None, None, None), Err(MapOpError::NoMap));
        assert_eq!(
            map_update(Some(&no_update), None, None),
            Err(MapOpError::NoOp)
        );
        assert_eq!(
            map_update(Some(&map), None, None),
            Err(MapOpError::NoKey)
        );
        assert_eq!(
            map_update(Some(&map), Some(&[1, 2, 3, 4]), None),
            Err(MapOpError::NoItem)
        );
    }

    #[test]
    fn test_add_and_delete_preconditions() {
        let map = TestMap::new(4, 8);
        let no_add = TestMap::new(4, 8).without(MapOp::Add);
        let no_delete = TestMap::new(4, 8).without(MapOp::Delete);

        assert_eq!(map_add(None, None), Err(MapOpError::NoMap));
        assert_eq!(map_add(Some(&no_add), None), Err(MapOpError::NoOp));
        assert_eq!(map_add(Some(&map), None), Err(MapOpError::NoItem));

        assert_eq!(map_delete(None, None), Err(MapOpError::NoMap));
        assert_eq!(map_delete(Some(&no_delete), None), Err(MapOpError::NoOp));
        assert_eq!(map_delete(Some(&map), None), Err(MapOpError::NoKey));
    }

    #[test]
    fn test_backend_status_passes_through() {
        let map = TestMap::new(4, 8);
        // TestMap reports -5 for deleting an absent key.
        assert_eq!(map_delete(Some(&map), Some(&[9, 9, 9, 9])), Ok(-5));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(MapOpError::NoMap.code(), -1);
        assert_eq!(MapOpError::NoOp.code(), -2);
        assert_eq!(MapOpError::NoKey.code(), -3);
        assert_eq!(MapOpError::NoItem.code(), -4);
    }
}
