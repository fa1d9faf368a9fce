//! Process cache: backend selection and the typed facade over it.
//!
//! Values are any `serde` payload, stored as `MsgPack`. A cached `None`
//! (written as `Option<T>`) is a hit that decodes to `Some(None)`, which is
//! distinct from a missing key.

pub mod key;
pub mod memory;
pub mod null;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CacheStoreSpec;

pub use key::{CacheKey, Symbol};
pub use memory::MemoryStore;
pub use null::NullStore;
pub use store::{CacheStore, Entry, FetchOptions, WriteOptions};

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("unknown cache backend `{name}`")]
    UnknownBackend { name: String },
    #[error("invalid option `{option}` for cache backend `{backend}`: {reason}")]
    InvalidOption {
        backend: String,
        option: String,
        reason: String,
    },
    #[error("failed to encode cache value")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode cache value")]
    Decode(#[from] rmp_serde::decode::Error),
}

// ---------------------------------------------------------------------------
// Backend lookup
// ---------------------------------------------------------------------------

/// Instantiates the backend named by `spec.backend`.
///
/// # Errors
///
/// Returns `CacheError::UnknownBackend` for an unregistered name and
/// `CacheError::InvalidOption` for an option value that does not parse.
pub fn lookup_store(spec: &CacheStoreSpec) -> Result<Arc<dyn CacheStore>, CacheError> {
    if !spec.args.is_empty() {
        tracing::warn!(backend = %spec.backend, args = ?spec.args, "cache backend ignores positional arguments");
    }
    match spec.backend.as_str() {
        MemoryStore::NAME => {
            let mut store = MemoryStore::new();
            for (option, value) in &spec.options {
                match option.as_str() {
                    "expires_in" => {
                        let invalid = |reason: String| CacheError::InvalidOption {
                            backend: spec.backend.clone(),
                            option: option.clone(),
                            reason,
                        };
                        let secs: u64 = value
                            .parse()
                            .map_err(|_| invalid(format!("expected whole seconds, got `{value}`")))?;
                        let ttl = Duration::from_secs(secs);
                        if Instant::now().checked_add(ttl).is_none() {
                            return Err(invalid(format!("{secs} seconds is out of range")));
                        }
                        store = store.with_default_expires_in(ttl);
                    }
                    "namespace" => store = store.with_namespace(value.clone()),
                    other => {
                        tracing::warn!(backend = %spec.backend, option = other, "ignoring unknown cache option");
                    }
                }
            }
            Ok(Arc::new(store))
        }
        NullStore::NAME => Ok(Arc::new(NullStore)),
        other => Err(CacheError::UnknownBackend {
            name: other.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Cheap-to-clone handle to the process cache.
#[derive(Debug, Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Resolves the backend from configuration.
    ///
    /// # Errors
    ///
    /// See [`lookup_store`].
    pub fn from_spec(spec: &CacheStoreSpec) -> Result<Self, CacheError> {
        lookup_store(spec).map(Self::new)
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Reads and decodes the value stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Decode` if the stored bytes do not decode as `T`.
    pub fn read<T: DeserializeOwned>(&self, key: impl CacheKey) -> Result<Option<T>, CacheError> {
        let key = key.cache_key();
        let Some(payload) = self.store.read_entry(&key) else {
            tracing::trace!(key = %key, hit = false, "cache read");
            return Ok(None);
        };
        tracing::trace!(key = %key, hit = true, "cache read");
        Ok(Some(rmp_serde::from_slice(&payload)?))
    }

    /// Encodes and stores `value`. Returns `false` when `unless_exist` is
    /// set and the key already holds a live entry.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Encode` if `value` cannot be serialized.
    pub fn write<T: Serialize + ?Sized>(
        &self,
        key: impl CacheKey,
        value: &T,
        options: &WriteOptions,
    ) -> Result<bool, CacheError> {
        let key = key.cache_key();
        let payload = rmp_serde::to_vec_named(value)?;
        let written = self.store.write_entry(&key, payload, options);
        tracing::trace!(key = %key, written, "cache write");
        Ok(written)
    }

    /// Removes `key`. Returns whether a live entry was removed.
    ///
    /// # Errors
    ///
    /// Never fails with the built-in backends.
    pub fn delete(&self, key: impl CacheKey) -> Result<bool, CacheError> {
        Ok(self.store.delete_entry(&key.cache_key()))
    }

    /// # Errors
    ///
    /// Never fails with the built-in backends.
    pub fn exists(&self, key: impl CacheKey) -> Result<bool, CacheError> {
        Ok(self.store.exists(&key.cache_key()))
    }

    /// Returns the cached value on a hit; otherwise computes, stores and
    /// returns it. `force` skips the read. Concurrent misses may each
    /// compute.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the cached bytes do not decode or the
    /// computed value does not encode.
    pub fn fetch<T, F>(
        &self,
        key: impl CacheKey,
        options: &FetchOptions,
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        let key = key.cache_key();
        if !options.force {
            if let Some(hit) = self.read::<T>(key.as_str())? {
                return Ok(hit);
            }
        }
        let value = compute();
        let write = WriteOptions {
            expires_in: options.expires_in,
            unless_exist: false,
        };
        self.write(key.as_str(), &value, &write)?;
        Ok(value)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.store.clear();
    }
}
