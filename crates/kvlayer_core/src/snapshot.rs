//! Explicit snapshots.

use crate::database::Database;
use crate::error::{EngineOp, Error, Result};
use crate::resource::{Resource, ResourceId};
use async_trait::async_trait;
use kvlayer_engine::SnapshotId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// A pinned, read-only view of a database.
///
/// Pass it to reads, iterators or `clear` through their options. Clones
/// share the same engine snapshot, which is released by [`Snapshot::close`],
/// by closing the database, or when the last clone is dropped.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
    db: Database,
    id: SnapshotId,
    closed: AtomicBool,
    resource: Mutex<Option<ResourceId>>,
}

impl Snapshot {
    pub(crate) fn register(db: &Database, id: SnapshotId) -> Result<Self> {
        let inner = Arc::new(SnapshotInner {
            db: db.clone(),
            id,
            closed: AtomicBool::new(false),
            resource: Mutex::new(None),
        });
        let weak = Arc::downgrade(&inner) as Weak<dyn Resource>;
        // On failure the engine snapshot is released by drop
        let resource = db.register(|resources| resources.register(weak))?;
        *inner.resource.lock() = Some(resource);
        debug!(snapshot = id.0, "snapshot created");
        Ok(Self { inner })
    }

    /// Returns the engine id, checking that this snapshot may be used
    /// with `db`.
    pub(crate) fn id_for(&self, db: &Database) -> Result<SnapshotId> {
        if !self.inner.db.same_as(db) {
            return Err(Error::invalid_argument(
                "snapshot belongs to a different database",
            ));
        }
        if self.is_closed() {
            return Err(Error::SnapshotNotOpen);
        }
        Ok(self.inner.id)
    }

    /// Returns whether this snapshot was created by `db`.
    #[must_use]
    pub fn belongs_to(&self, db: &Database) -> bool {
        self.inner.db.same_as(db)
    }

    /// Returns whether the snapshot has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Releases the snapshot. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure to release it.
    pub async fn close(&self) -> Result<()> {
        self.inner.close_now()
    }
}

impl SnapshotInner {
    fn close_now(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let resource = self.resource.lock().take();
        if let Some(resource) = resource {
            self.db.resources().lock().remove(resource);
        }
        debug!(snapshot = self.id.0, "snapshot closed");
        self.db
            .engine()
            .snapshot_close(self.id)
            .map_err(|e| Error::engine(EngineOp::SnapshotClose, e))
    }
}

#[async_trait]
impl Resource for SnapshotInner {
    async fn release(&self) -> Result<()> {
        self.close_now()
    }
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        if let Err(e) = self.close_now() {
            debug!(error = %e, snapshot = self.id.0, "dropped snapshot could not be released");
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.inner.id.0)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DatabaseOptions, Error, ReadOptions};
    use kvlayer_codec::Value;
    use kvlayer_engine::MemoryEngine;
    use std::sync::Arc;

    fn db_with(engine: Arc<MemoryEngine>) -> Database {
        Database::from_engine("snap-db", engine, DatabaseOptions::new().encoding("utf8")).unwrap()
    }

    #[tokio::test]
    async fn reads_see_pinned_state() {
        let engine = Arc::new(MemoryEngine::new());
        let db = db_with(Arc::clone(&engine));
        db.put("k", "old").await.unwrap();

        let snapshot = db.snapshot().await.unwrap();
        db.put("k", "new").await.unwrap();

        let pinned = db
            .get_with("k", ReadOptions::new().snapshot(&snapshot))
            .await
            .unwrap();
        assert_eq!(pinned, Some(Value::from("old")));
        assert_eq!(db.get("k").await.unwrap(), Some(Value::from("new")));

        snapshot.close().await.unwrap();
        snapshot.close().await.unwrap();
        assert_eq!(engine.live_snapshots(), 0);

        let err = db
            .get_with("k", ReadOptions::new().snapshot(&snapshot))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SnapshotNotOpen));
    }

    #[tokio::test]
    async fn dropping_last_clone_releases() {
        let engine = Arc::new(MemoryEngine::new());
        let db = db_with(Arc::clone(&engine));
        db.open().await.unwrap();

        let snapshot = db.snapshot().await.unwrap();
        let clone = snapshot.clone();
        drop(snapshot);
        assert_eq!(engine.live_snapshots(), 1);
        drop(clone);
        assert_eq!(engine.live_snapshots(), 0);
    }

    #[tokio::test]
    async fn closing_database_releases_snapshots() {
        let engine = Arc::new(MemoryEngine::new());
        let db = db_with(Arc::clone(&engine));
        let snapshot = db.snapshot().await.unwrap();
        db.close().await.unwrap();
        assert!(snapshot.is_closed());
    }

    #[tokio::test]
    async fn foreign_snapshot_is_rejected() {
        let a = db_with(Arc::new(MemoryEngine::new()));
        let b = db_with(Arc::new(MemoryEngine::new()));
        let snapshot = a.snapshot().await.unwrap();
        assert!(snapshot.belongs_to(&a));
        assert!(!snapshot.belongs_to(&b));

        let err = b
            .get_with("k", ReadOptions::new().snapshot(&snapshot))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LEVEL_INVALID_ARGUMENT");
    }
}
