//! Canonical string form of cache keys.
//!
//! Strings and symbols with the same text produce the same key. Sequences
//! join their elements with `/`. Maps sort by canonical key and join
//! `key=value` pairs with `/`, so insertion order never matters.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Anything usable as a cache key.
pub trait CacheKey {
    /// Returns the canonical, case-sensitive key string.
    fn cache_key(&self) -> String;
}

/// Interned-style name. Keys identically to a string with the same text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl CacheKey for str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl CacheKey for Symbol {
    fn cache_key(&self) -> String {
        self.0.clone()
    }
}

impl<T: CacheKey + ?Sized> CacheKey for &T {
    fn cache_key(&self) -> String {
        (**self).cache_key()
    }
}

macro_rules! display_key {
    ($($ty:ty),*) => {
        $(impl CacheKey for $ty {
            fn cache_key(&self) -> String {
                self.to_string()
            }
        })*
    };
}

display_key!(bool, i32, i64, u32, u64, usize);

impl<T: CacheKey> CacheKey for [T] {
    fn cache_key(&self) -> String {
        self.iter()
            .map(CacheKey::cache_key)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl<T: CacheKey> CacheKey for Vec<T> {
    fn cache_key(&self) -> String {
        self.as_slice().cache_key()
    }
}

impl<T: CacheKey, const N: usize> CacheKey for [T; N] {
    fn cache_key(&self) -> String {
        self.as_slice().cache_key()
    }
}

fn join_pairs<'a, K, V, I>(pairs: I) -> String
where
    K: CacheKey + 'a,
    V: CacheKey + 'a,
    I: Iterator<Item = (&'a K, &'a V)>,
{
    let mut rendered: Vec<(String, String)> = pairs
        .map(|(k, v)| (k.cache_key(), v.cache_key()))
        .collect();
    rendered.sort();
    rendered
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("/")
}

impl<K: CacheKey, V: CacheKey> CacheKey for BTreeMap<K, V> {
    fn cache_key(&self) -> String {
        join_pairs(self.iter())
    }
}

impl<K: CacheKey, V: CacheKey, S> CacheKey for HashMap<K, V, S> {
    fn cache_key(&self) -> String {
        join_pairs(self.iter())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn symbol_matches_string(s in "[a-zA-Z0-9_:/-]{0,24}") {
            prop_assert_eq!(Symbol::new(s.clone()).cache_key(), s.cache_key());
        }

        #[test]
        fn sequence_is_joined_elements(parts in proptest::collection::vec("[a-z0-9]{1,8}", 0..6)) {
            prop_assert_eq!(parts.cache_key(), parts.join("/"));
        }

        #[test]
        fn map_key_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..8)
        ) {
            let forward: HashMap<_, _> = entries.iter().collect();
            let reversed: HashMap<_, _> = entries.iter().rev().collect();
            prop_assert_eq!(forward.cache_key(), reversed.cache_key());
            prop_assert_eq!(forward.cache_key(), entries.cache_key());
        }
    }
}
