//! Tracks autoload directories and which definitions have been loaded from
//! them, so a reload can forget everything and start over.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;

/// Hook invoked by bootstrap (path registration) and reload (invalidation).
pub trait Autoloader: Send + Sync + fmt::Debug {
    /// Adds search directories. Already-registered paths are ignored.
    fn register_paths(&self, paths: &[PathBuf]);

    /// Records that the definition `name` is now loaded. Called for each
    /// service whenever a facade is built.
    fn mark_loaded(&self, name: &str);

    /// Forgets every loaded definition so the next lookup reloads it.
    fn invalidate_loaded_definitions(&self);

    /// Bumped on every invalidation.
    fn generation(&self) -> u64;
}

/// Default [`Autoloader`]: an ordered path list plus a record of loaded
/// definition names tagged with the generation they were loaded in.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    paths: RwLock<Vec<PathBuf>>,
    loaded: DashMap<String, u64>,
    generation: AtomicU64,
}

impl DefinitionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered directories in registration order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.read().clone()
    }

    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

impl Autoloader for DefinitionRegistry {
    fn register_paths(&self, paths: &[PathBuf]) {
        let mut registered = self.paths.write();
        for path in paths {
            if !registered.contains(path) {
                tracing::debug!(path = %path.display(), "registered autoload path");
                registered.push(path.clone());
            }
        }
    }

    fn mark_loaded(&self, name: &str) {
        self.loaded
            .insert(name.to_string(), self.generation.load(Ordering::Acquire));
    }

    fn invalidate_loaded_definitions(&self) {
        let cleared = self.loaded.len();
        self.loaded.clear();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(cleared, generation, "invalidated loaded definitions");
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_register_once_in_order() {
        let registry = DefinitionRegistry::new();
        registry.register_paths(&[PathBuf::from("a"), PathBuf::from("b")]);
        registry.register_paths(&[PathBuf::from("a"), PathBuf::from("c")]);
        assert_eq!(
            registry.paths(),
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
    }

    #[test]
    fn invalidation_clears_and_bumps_generation() {
        let registry = DefinitionRegistry::new();
        registry.mark_loaded("UsersService");
        assert!(registry.is_loaded("UsersService"));
        assert_eq!(registry.generation(), 0);

        registry.invalidate_loaded_definitions();
        assert!(!registry.is_loaded("UsersService"));
        assert_eq!(registry.loaded_count(), 0);
        assert_eq!(registry.generation(), 1);
    }
}
