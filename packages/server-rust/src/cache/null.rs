//! [`CacheStore`] that retains nothing.

use super::store::{CacheStore, WriteOptions};

/// Accepts every write and forgets it. Every read misses, so `fetch`
/// always computes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl NullStore {
    pub const NAME: &'static str = "null_store";
}

impl CacheStore for NullStore {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn read_entry(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn write_entry(&self, _key: &str, _payload: Vec<u8>, _options: &WriteOptions) -> bool {
        true
    }

    fn delete_entry(&self, _key: &str) -> bool {
        false
    }

    fn exists(&self, _key: &str) -> bool {
        false
    }

    fn clear(&self) {}
}
