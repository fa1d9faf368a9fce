//! Backend contract for the cache facade.

use std::fmt;
use std::time::{Duration, Instant};

/// Options for a single write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Entry lifetime. `None` falls back to the backend default, if any.
    pub expires_in: Option<Duration>,
    /// Skip the write when a live entry already exists.
    pub unless_exist: bool,
}

impl WriteOptions {
    #[must_use]
    pub fn expires_in(duration: Duration) -> Self {
        Self {
            expires_in: Some(duration),
            unless_exist: false,
        }
    }

    #[must_use]
    pub fn unless_exist() -> Self {
        Self {
            expires_in: None,
            unless_exist: true,
        }
    }
}

/// Options for `Cache::fetch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Recompute and overwrite even on a hit.
    pub force: bool,
    /// Lifetime of a freshly computed entry.
    pub expires_in: Option<Duration>,
}

/// Stored payload plus optional deadline.
#[derive(Debug, Clone)]
pub struct Entry {
    pub payload: Vec<u8>,
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// A lifetime too large to represent as a deadline never expires.
    #[must_use]
    pub fn new(payload: Vec<u8>, expires_in: Option<Duration>) -> Self {
        Self {
            payload,
            expires_at: expires_in.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// A cache backend. Keys arrive already canonicalized; payloads are opaque
/// bytes encoded by the facade.
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Registered backend name, e.g. `"memory_store"`.
    fn name(&self) -> &'static str;

    /// Live payload for `key`, if any.
    fn read_entry(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `payload`. Returns `false` only when `unless_exist` is set and
    /// a live entry was present.
    fn write_entry(&self, key: &str, payload: Vec<u8>, options: &WriteOptions) -> bool;

    /// Removes `key`. Returns whether a live entry was removed.
    fn delete_entry(&self, key: &str) -> bool;

    /// Whether a live entry exists for `key`.
    fn exists(&self, key: &str) -> bool;

    /// Removes every entry.
    fn clear(&self);
}
