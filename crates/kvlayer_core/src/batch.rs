//! Atomic batches.

use crate::database::Database;
use crate::error::{Error, Result};
use crate::keyspace::{Codecs, Keyspace};
use crate::options::WriteOptions;
use crate::resource::{Resource, ResourceId};
use async_trait::async_trait;
use kvlayer_codec::Value;
use kvlayer_engine::{BatchOp, EngineWriteOptions};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// One mutation passed to [`Database::batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    /// Insert or overwrite a key.
    Put {
        /// The key.
        key: Value,
        /// The value.
        value: Value,
    },
    /// Remove a key.
    Del {
        /// The key.
        key: Value,
    },
}

impl BatchOperation {
    /// Creates a put.
    pub fn put(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a delete.
    pub fn del(key: impl Into<Value>) -> Self {
        Self::Del { key: key.into() }
    }

    pub(crate) fn encode(&self, codecs: &Codecs) -> Result<BatchOp> {
        Ok(match self {
            Self::Put { key, value } => BatchOp::Put {
                key: codecs.encode_key(key)?,
                value: codecs.encode_value(value)?,
            },
            Self::Del { key } => BatchOp::Del {
                key: codecs.encode_key(key)?,
            },
        })
    }
}

/// A batch built up one operation at a time and written atomically.
///
/// Operations are encoded as they are added, so encoding errors surface
/// immediately. Once written or closed the batch rejects further use with
/// [`Error::BatchNotOpen`]. Closing the database discards any batch that
/// was not written.
///
/// ```rust
/// use kvlayer_core::{Database, DatabaseOptions};
/// use kvlayer_engine::MemoryEngine;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> kvlayer_core::Result<()> {
/// let db = Database::with_options("db", MemoryEngine::new(), DatabaseOptions::new().encoding("utf8"))?;
/// let mut batch = db.chained_batch()?;
/// batch.put("a", "1")?.put("b", "2")?.del("a")?;
/// assert_eq!(batch.len(), 3);
/// batch.write().await?;
/// assert_eq!(db.get("b").await?, Some("2".into()));
/// # Ok(())
/// # }
/// ```
pub struct ChainedBatch {
    db: Database,
    space: Keyspace,
    core: Arc<BatchCore>,
}

struct BatchCore {
    ops: Mutex<Option<Vec<BatchOp>>>,
    resource: Mutex<Option<ResourceId>>,
}

impl ChainedBatch {
    pub(crate) fn new(db: Database, space: Keyspace) -> Result<Self> {
        let core = Arc::new(BatchCore {
            ops: Mutex::new(Some(Vec::new())),
            resource: Mutex::new(None),
        });
        let weak = Arc::downgrade(&core) as Weak<dyn Resource>;
        let resource = db.register(|resources| resources.register(weak))?;
        *core.resource.lock() = Some(resource);
        Ok(Self { db, space, core })
    }

    /// Queues a put.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchNotOpen`] after write or close, or an encoding
    /// error.
    pub fn put(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Result<&mut Self> {
        self.put_with(key, value, &WriteOptions::default())
    }

    /// Queues a put with explicit encodings.
    ///
    /// # Errors
    ///
    /// Same as [`ChainedBatch::put`].
    pub fn put_with(
        &mut self,
        key: impl Into<Value>,
        value: impl Into<Value>,
        options: &WriteOptions,
    ) -> Result<&mut Self> {
        let op = BatchOperation::put(key, value).encode(&self.codecs(options)?)?;
        self.push(op, "put")
    }

    /// Queues a delete.
    ///
    /// # Errors
    ///
    /// Same as [`ChainedBatch::put`].
    pub fn del(&mut self, key: impl Into<Value>) -> Result<&mut Self> {
        self.del_with(key, &WriteOptions::default())
    }

    /// Queues a delete with an explicit key encoding.
    ///
    /// # Errors
    ///
    /// Same as [`ChainedBatch::put`].
    pub fn del_with(&mut self, key: impl Into<Value>, options: &WriteOptions) -> Result<&mut Self> {
        let op = BatchOperation::del(key).encode(&self.codecs(options)?)?;
        self.push(op, "del")
    }

    /// Drops every queued operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchNotOpen`] after write or close.
    pub fn clear(&mut self) -> Result<&mut Self> {
        match self.core.ops.lock().as_mut() {
            Some(ops) => ops.clear(),
            None => return Err(Error::BatchNotOpen { op: "clear" }),
        }
        Ok(self)
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.ops.lock().as_ref().map_or(0, Vec::len)
    }

    /// Returns whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the batch was written or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.ops.lock().is_none()
    }

    /// Writes every queued operation atomically and closes the batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchNotOpen`] if already written or closed, or the
    /// engine error, in which case nothing was written.
    pub async fn write(&mut self) -> Result<()> {
        self.write_with(WriteOptions::default()).await
    }

    /// Writes with explicit options. Only `sync` applies here.
    ///
    /// # Errors
    ///
    /// Same as [`ChainedBatch::write`].
    pub async fn write_with(&mut self, options: WriteOptions) -> Result<()> {
        let ops = self.core.take().ok_or(Error::BatchNotOpen { op: "write" })?;
        self.core.forget(&self.db);
        self.db
            .write_batch(ops, EngineWriteOptions { sync: options.sync })
            .await
    }

    /// Discards the batch without writing it. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for symmetry with other resources.
    pub async fn close(&mut self) -> Result<()> {
        self.core.take();
        self.core.forget(&self.db);
        Ok(())
    }

    fn codecs(&self, options: &WriteOptions) -> Result<Codecs> {
        self.db.codecs(
            &self.space,
            options.key_encoding.as_deref(),
            options.value_encoding.as_deref(),
        )
    }

    fn push(&mut self, op: BatchOp, name: &'static str) -> Result<&mut Self> {
        match self.core.ops.lock().as_mut() {
            Some(ops) => ops.push(op),
            None => return Err(Error::BatchNotOpen { op: name }),
        }
        Ok(self)
    }
}

impl BatchCore {
    fn take(&self) -> Option<Vec<BatchOp>> {
        self.ops.lock().take()
    }

    fn forget(&self, db: &Database) {
        let resource = self.resource.lock().take();
        if let Some(resource) = resource {
            db.resources().lock().remove(resource);
        }
    }
}

#[async_trait]
impl Resource for BatchCore {
    async fn release(&self) -> Result<()> {
        self.take();
        Ok(())
    }
}

impl Drop for ChainedBatch {
    fn drop(&mut self) {
        self.core.forget(&self.db);
    }
}

impl fmt::Debug for ChainedBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedBatch")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabaseOptions;
    use kvlayer_engine::MemoryEngine;

    fn db() -> Database {
        Database::with_options(
            "batch-db",
            MemoryEngine::new(),
            DatabaseOptions::new().encoding("utf8"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn write_applies_in_order() {
        let db = db();
        db.put("gone", "x").await.unwrap();

        let mut batch = db.chained_batch().unwrap();
        batch.put("a", "1").unwrap().del("gone").unwrap().put("a", "2").unwrap();
        batch.write().await.unwrap();

        assert_eq!(db.get("a").await.unwrap(), Some(Value::from("2")));
        assert_eq!(db.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unusable_after_write() {
        let db = db();
        let mut batch = db.chained_batch().unwrap();
        batch.put("a", "1").unwrap();
        batch.write().await.unwrap();

        assert!(batch.is_closed());
        assert!(matches!(batch.put("b", "2"), Err(Error::BatchNotOpen { op: "put" })));
        assert!(matches!(batch.del("b"), Err(Error::BatchNotOpen { op: "del" })));
        let err = batch.write().await.unwrap_err();
        assert_eq!(err.code(), "LEVEL_BATCH_NOT_OPEN");
        batch.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_discards() {
        let db = db();
        let mut batch = db.chained_batch().unwrap();
        batch.put("a", "1").unwrap();
        batch.close().await.unwrap();
        assert_eq!(batch.len(), 0);
        assert_eq!(db.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_empties_queue() {
        let db = db();
        let mut batch = db.chained_batch().unwrap();
        batch.put("a", "1").unwrap().put("b", "2").unwrap();
        batch.clear().unwrap();
        assert!(batch.is_empty());
        batch.write().await.unwrap();
        assert_eq!(db.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn database_close_discards_open_batches() {
        let db = db();
        db.open().await.unwrap();
        let mut batch = db.chained_batch().unwrap();
        batch.put("a", "1").unwrap();
        db.close().await.unwrap();

        assert!(batch.is_closed());
        assert!(matches!(db.chained_batch(), Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn encoding_errors_surface_when_queued() {
        let db = db();
        let mut batch = db.chained_batch().unwrap();
        let err = batch
            .put_with("k", vec![0xff, 0xfe], &WriteOptions::new().value_encoding("json"))
            .unwrap_err();
        assert_eq!(err.code(), "LEVEL_ENCODE_ERROR");
        assert!(batch.is_empty());
    }
}
