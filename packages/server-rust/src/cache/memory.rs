//! In-process [`CacheStore`] backed by [`DashMap`].
//!
//! Expired entries read as absent and are dropped on the access that
//! notices them, or in bulk by [`MemoryStore::purge_expired`].

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use super::store::{CacheStore, Entry, WriteOptions};

/// Concurrent in-memory store with an optional default TTL and key prefix.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    default_expires_in: Option<Duration>,
    namespace: Option<String>,
}

impl MemoryStore {
    pub const NAME: &'static str = "memory_store";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime applied to writes that do not set their own.
    #[must_use]
    pub fn with_default_expires_in(mut self, ttl: Duration) -> Self {
        self.default_expires_in = Some(ttl);
        self
    }

    /// Prefix every key with `namespace:`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn full_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_string(),
        }
    }
}

impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn read_entry(&self, key: &str) -> Option<Vec<u8>> {
        let key = self.full_key(key);
        let now = Instant::now();
        // Guard must drop before the removal below.
        let hit = self.entries.get(&key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.payload.clone())
            }
        });
        match hit {
            Some(Some(payload)) => Some(payload),
            Some(None) => {
                self.entries.remove_if(&key, |_, entry| entry.is_expired(now));
                None
            }
            None => None,
        }
    }

    fn write_entry(&self, key: &str, payload: Vec<u8>, options: &WriteOptions) -> bool {
        let entry = Entry::new(payload, options.expires_in.or(self.default_expires_in));
        match self.entries.entry(self.full_key(key)) {
            MapEntry::Occupied(mut slot) => {
                if options.unless_exist && !slot.get().is_expired(Instant::now()) {
                    return false;
                }
                slot.insert(entry);
                true
            }
            MapEntry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    fn delete_entry(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(&self.full_key(key))
            .is_some_and(|(_, entry)| !entry.is_expired(now))
    }

    fn exists(&self, key: &str) -> bool {
        self.read_entry(key).is_some()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let store = MemoryStore::new();
        assert!(store.write_entry("k", vec![1, 2], &WriteOptions::default()));
        assert_eq!(store.read_entry("k"), Some(vec![1, 2]));
        assert!(store.exists("k"));
        assert!(!store.exists("other"));
    }

    #[test]
    fn unless_exist_keeps_live_entry() {
        let store = MemoryStore::new();
        store.write_entry("k", vec![1], &WriteOptions::default());
        assert!(!store.write_entry("k", vec![2], &WriteOptions::unless_exist()));
        assert_eq!(store.read_entry("k"), Some(vec![1]));
    }

    #[test]
    fn huge_default_ttl_does_not_overflow() {
        let store = MemoryStore::new().with_default_expires_in(Duration::MAX);
        assert!(store.write_entry("k", vec![1], &WriteOptions::default()));
        assert_eq!(store.read_entry("k"), Some(vec![1]));
    }

    #[test]
    fn expired_entry_reads_as_absent_and_is_dropped() {
        let store = MemoryStore::new();
        store.write_entry("k", vec![1], &WriteOptions::expires_in(Duration::ZERO));
        assert_eq!(store.len(), 1);
        assert_eq!(store.read_entry("k"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn unless_exist_replaces_expired_entry() {
        let store = MemoryStore::new();
        store.write_entry("k", vec![1], &WriteOptions::expires_in(Duration::ZERO));
        assert!(store.write_entry("k", vec![2], &WriteOptions::unless_exist()));
        assert_eq!(store.read_entry("k"), Some(vec![2]));
    }

    #[test]
    fn default_ttl_applies_when_write_sets_none() {
        let store = MemoryStore::new().with_default_expires_in(Duration::ZERO);
        store.write_entry("a", vec![1], &WriteOptions::default());
        store.write_entry("b", vec![1], &WriteOptions::expires_in(Duration::from_secs(60)));
        assert_eq!(store.purge_expired(), 1);
        assert!(store.exists("b"));
    }

    #[test]
    fn namespace_prefixes_keys() {
        let store = MemoryStore::new().with_namespace("app");
        store.write_entry("k", vec![7], &WriteOptions::default());
        assert!(store.entries.contains_key("app:k"));
        assert_eq!(store.read_entry("k"), Some(vec![7]));
    }

    #[test]
    fn delete_and_clear() {
        let store = MemoryStore::new();
        store.write_entry("a", vec![1], &WriteOptions::default());
        store.write_entry("b", vec![1], &WriteOptions::default());
        assert!(store.delete_entry("a"));
        assert!(!store.delete_entry("a"));
        store.clear();
        assert!(store.is_empty());
    }
}
