//! Shared database handles keyed by location.

use crate::database::{resolve_location, Database};
use crate::error::Result;
use crate::options::DatabaseOptions;
use kvlayer_engine::Engine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hands out one [`Database`] per location.
///
/// Engines generally refuse a second open of the same location, so
/// components that would otherwise construct their own handle can share
/// one through a registry instead. Locations are compared after being made
/// absolute.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<PathBuf, Database>>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the database registered at `location`, creating it with the
    /// engine built by `make_engine` if there is none.
    ///
    /// `make_engine` and `options` are only used when a new database is
    /// created.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidArgument`] for an empty location, or
    /// any error from [`Database::with_options`].
    pub fn get_or_create<E, F>(
        &self,
        location: impl AsRef<Path>,
        make_engine: F,
        options: DatabaseOptions,
    ) -> Result<Database>
    where
        E: Engine + 'static,
        F: FnOnce() -> E,
    {
        let location = resolve_location(location.as_ref())?;
        let mut instances = self.instances.lock();
        if let Some(db) = instances.get(&location) {
            return Ok(db.clone());
        }
        let db = Database::with_options(&location, make_engine(), options)?;
        debug!(location = %location.display(), "registered database");
        instances.insert(location, db.clone());
        Ok(db)
    }

    /// Returns the database registered at `location`, if any.
    #[must_use]
    pub fn get(&self, location: impl AsRef<Path>) -> Option<Database> {
        let location = resolve_location(location.as_ref()).ok()?;
        self.instances.lock().get(&location).cloned()
    }

    /// Forgets the database at `location` and returns it. The database is
    /// not closed.
    pub fn remove(&self, location: impl AsRef<Path>) -> Option<Database> {
        let location = resolve_location(location.as_ref()).ok()?;
        self.instances.lock().remove(&location)
    }

    /// Forgets every database.
    pub fn clear(&self) {
        self.instances.lock().clear();
    }

    /// Returns the number of registered databases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    /// Returns whether no database is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvlayer_engine::MemoryEngine;

    #[test]
    fn same_location_same_instance() {
        let registry = InstanceRegistry::new();
        let a = registry
            .get_or_create("shared", MemoryEngine::new, DatabaseOptions::default())
            .unwrap();
        let absolute = std::env::current_dir().unwrap().join("shared");
        let b = registry
            .get_or_create(&absolute, MemoryEngine::new, DatabaseOptions::default())
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(a.location(), b.location());
        assert!(registry.get("shared").is_some());
    }

    #[tokio::test]
    async fn instances_share_state() {
        let registry = InstanceRegistry::new();
        let a = registry
            .get_or_create("shared", MemoryEngine::new, DatabaseOptions::default())
            .unwrap();
        let b = registry
            .get_or_create("shared", MemoryEngine::new, DatabaseOptions::default())
            .unwrap();
        a.put("k", "v").await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), Some(kvlayer_codec::Value::from(b"v".as_slice())));
    }

    #[test]
    fn remove_and_clear() {
        let registry = InstanceRegistry::new();
        for name in ["a", "b"] {
            registry
                .get_or_create(name, MemoryEngine::new, DatabaseOptions::default())
                .unwrap();
        }
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_location_is_rejected() {
        let registry = InstanceRegistry::new();
        assert!(registry
            .get_or_create("", MemoryEngine::new, DatabaseOptions::default())
            .is_err());
        assert!(registry.get("").is_none());
    }
}
