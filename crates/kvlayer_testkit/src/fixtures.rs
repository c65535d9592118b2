//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use crate::scripted::ScriptedEngine;
use kvlayer_core::{Database, DatabaseOptions};
use kvlayer_engine::{FileEngine, MemoryEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A test database with automatic cleanup.
///
/// Databases built here use the `utf8` encoding for keys and values, so
/// tests can read and write plain strings.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    engine: Option<Arc<ScriptedEngine>>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a database over a fresh [`MemoryEngine`].
    pub fn memory() -> Self {
        let db = Database::with_options("memory-test-db", MemoryEngine::new(), utf8())
            .expect("Failed to create in-memory database");
        Self {
            db,
            engine: None,
            temp_dir: None,
        }
    }

    /// Creates a database over `engine`, keeping a handle so tests can
    /// inspect the calls it saw.
    pub fn scripted(engine: ScriptedEngine) -> Self {
        Self::scripted_with(engine, utf8())
    }

    /// Creates a database over `engine` with explicit options.
    pub fn scripted_with(engine: ScriptedEngine, options: DatabaseOptions) -> Self {
        let engine = Arc::new(engine);
        let db = Database::from_engine("scripted-test-db", engine.clone(), options)
            .expect("Failed to create scripted database");
        Self {
            db,
            engine: Some(engine),
            temp_dir: None,
        }
    }

    /// Creates a database over a [`FileEngine`] in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::with_options(temp_dir.path().join("db"), FileEngine::new(), utf8())
            .expect("Failed to create file database");
        Self {
            db,
            engine: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the scripted engine, if this database was built with one.
    pub fn engine(&self) -> Option<&ScriptedEngine> {
        self.engine.as_deref()
    }

    /// Returns the database path if file-based, None otherwise.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("db"))
    }

    /// Writes `entries` with one batch.
    pub async fn seed<'a>(&self, entries: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let ops = entries
            .into_iter()
            .map(|(k, v)| kvlayer_core::BatchOperation::put(k, v))
            .collect();
        self.db.batch(ops).await.expect("Failed to seed database");
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Default options for test databases: `utf8` keys and values.
pub fn utf8() -> DatabaseOptions {
    DatabaseOptions::new().encoding("utf8")
}

/// Installs a `tracing` subscriber that honours `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a memory database holding `count` entries, `key000` to
    /// `keyNNN`, whose values are the entry's index.
    pub async fn populated_database(count: usize) -> TestDatabase {
        let test_db = TestDatabase::memory();
        let ops = (0..count)
            .map(|i| kvlayer_core::BatchOperation::put(format!("key{i:03}"), i.to_string()))
            .collect();
        test_db.db.batch(ops).await.expect("Failed to populate database");
        test_db
    }
}
