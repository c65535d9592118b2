//! Prefixed namespaces inside a database.

use crate::batch::{BatchOperation, ChainedBatch};
use crate::database::Database;
use crate::error::Result;
use crate::iterator::{EntryIterator, KeyIterator, ValueIterator};
use crate::keyspace::Keyspace;
use crate::options::{ClearOptions, IteratorOptions, ReadOptions, SublevelOptions, WriteOptions};
use bytes::Bytes;
use kvlayer_codec::Value;
use std::fmt;
use std::sync::Arc;

/// A namespace whose keys are stored under `!name!` in the parent.
///
/// A sublevel shares its database's lifecycle, engine and snapshots, and
/// has its own default encodings. Keys read back through a sublevel have
/// the prefix removed; iteration and `clear` never leave the namespace.
///
/// ```rust
/// use kvlayer_core::{Database, DatabaseOptions, SublevelOptions};
/// use kvlayer_engine::MemoryEngine;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> kvlayer_core::Result<()> {
/// let db = Database::with_options("db", MemoryEngine::new(), DatabaseOptions::new().encoding("utf8"))?;
/// let users = db.sublevel("users", SublevelOptions::new().value_encoding("json"))?;
///
/// users.put("alice", serde_json::json!({"age": 30})).await?;
/// assert_eq!(db.get("!users!alice").await?, Some(r#"{"age":30}"#.into()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Sublevel {
    db: Database,
    space: Arc<Keyspace>,
}

impl Sublevel {
    pub(crate) fn create(
        db: Database,
        parent: &Keyspace,
        name: &str,
        options: SublevelOptions,
    ) -> Result<Self> {
        let space = parent.child(name, options.key_encoding, options.value_encoding)?;
        db.codecs(&space, None, None)?;
        Ok(Self {
            db,
            space: Arc::new(space),
        })
    }

    /// Returns the database this sublevel belongs to.
    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Returns the raw key prefix, e.g. `!a!!b!` for `b` nested in `a`.
    #[must_use]
    pub fn prefix(&self) -> &Bytes {
        self.space.prefix()
    }

    /// Opens a nested sublevel.
    ///
    /// # Errors
    ///
    /// Same as [`Database::sublevel`].
    pub fn sublevel(&self, name: &str, options: SublevelOptions) -> Result<Self> {
        Self::create(self.db.clone(), &self.space, name, options)
    }

    /// Reads a value. See [`Database::get`].
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        self.get_with(key, ReadOptions::default()).await
    }

    /// Reads a value with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn get_with(&self, key: impl Into<Value>, options: ReadOptions) -> Result<Option<Value>> {
        self.db.get_in(&self.space, key.into(), options).await
    }

    /// Reads several values.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn get_many<K: Into<Value>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<Vec<Option<Value>>> {
        self.get_many_with(keys, ReadOptions::default()).await
    }

    /// Reads several values with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn get_many_with<K: Into<Value>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        options: ReadOptions,
    ) -> Result<Vec<Option<Value>>> {
        let keys = keys.into_iter().map(Into::into).collect();
        self.db.get_many_in(&self.space, keys, options).await
    }

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn put(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        self.put_with(key, value, WriteOptions::default()).await
    }

    /// Writes a value with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn put_with(
        &self,
        key: impl Into<Value>,
        value: impl Into<Value>,
        options: WriteOptions,
    ) -> Result<()> {
        self.db
            .put_in(&self.space, key.into(), value.into(), options)
            .await
    }

    /// Deletes a key.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn del(&self, key: impl Into<Value>) -> Result<()> {
        self.del_with(key, WriteOptions::default()).await
    }

    /// Deletes a key with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn del_with(&self, key: impl Into<Value>, options: WriteOptions) -> Result<()> {
        self.db.del_in(&self.space, key.into(), options).await
    }

    /// Applies operations atomically.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn batch(&self, operations: Vec<BatchOperation>) -> Result<()> {
        self.batch_with(operations, WriteOptions::default()).await
    }

    /// Applies operations atomically, with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn batch_with(
        &self,
        operations: Vec<BatchOperation>,
        options: WriteOptions,
    ) -> Result<()> {
        self.db.batch_in(&self.space, operations, options).await
    }

    /// Starts a chained batch whose keys land in this sublevel.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotOpen`] while closing or closed.
    pub fn chained_batch(&self) -> Result<ChainedBatch> {
        ChainedBatch::new(self.db.clone(), Keyspace::clone(&self.space))
    }

    /// Deletes every key in this sublevel.
    ///
    /// # Errors
    ///
    /// Returns an engine error.
    pub async fn clear(&self) -> Result<()> {
        self.clear_with(ClearOptions::default()).await
    }

    /// Deletes the keys in a range of this sublevel.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn clear_with(&self, options: ClearOptions) -> Result<()> {
        self.db.clear_in(&self.space, options).await
    }

    /// Creates an iterator over entries in this sublevel.
    ///
    /// # Errors
    ///
    /// Same as [`Database::iterator`].
    pub fn iterator(&self, options: IteratorOptions) -> Result<EntryIterator> {
        EntryIterator::create(self.db.clone(), &self.space, options)
    }

    /// Creates an iterator over keys in this sublevel.
    ///
    /// # Errors
    ///
    /// Same as [`Database::iterator`].
    pub fn keys(&self, options: IteratorOptions) -> Result<KeyIterator> {
        KeyIterator::create(self.db.clone(), &self.space, options)
    }

    /// Creates an iterator over values in this sublevel.
    ///
    /// # Errors
    ///
    /// Same as [`Database::iterator`].
    pub fn values(&self, options: IteratorOptions) -> Result<ValueIterator> {
        ValueIterator::create(self.db.clone(), &self.space, options)
    }
}

impl fmt::Debug for Sublevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sublevel")
            .field("prefix", &String::from_utf8_lossy(self.space.prefix()))
            .field("db", &self.db)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DatabaseOptions, Error, RangeOptions};
    use kvlayer_engine::MemoryEngine;

    fn db() -> Database {
        Database::with_options(
            "sub-db",
            MemoryEngine::new(),
            DatabaseOptions::new().encoding("utf8"),
        )
        .unwrap()
    }

    fn v(s: &str) -> Value {
        Value::from(s)
    }

    #[tokio::test]
    async fn keys_are_prefixed_in_parent() {
        let db = db();
        let sub = db.sublevel("s", SublevelOptions::new()).unwrap();
        sub.put("k", "v").await.unwrap();

        assert_eq!(db.get("!s!k").await.unwrap(), Some(v("v")));
        assert_eq!(sub.get("k").await.unwrap(), Some(v("v")));
        assert_eq!(db.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn iteration_stays_inside() {
        let db = db();
        db.put("a", "outside").await.unwrap();
        db.put("z", "outside").await.unwrap();
        let sub = db.sublevel("s", SublevelOptions::new()).unwrap();
        sub.batch(vec![BatchOperation::put("1", "one"), BatchOperation::put("2", "two")])
            .await
            .unwrap();

        let entries = sub.iterator(IteratorOptions::new()).unwrap().all().await.unwrap();
        assert_eq!(entries, vec![(v("1"), v("one")), (v("2"), v("two"))]);

        let keys = sub
            .keys(IteratorOptions::new().reverse(true))
            .unwrap()
            .all()
            .await
            .unwrap();
        assert_eq!(keys, vec![v("2"), v("1")]);
    }

    #[tokio::test]
    async fn clear_stays_inside() {
        let db = db();
        db.put("a", "outside").await.unwrap();
        let sub = db.sublevel("s", SublevelOptions::new()).unwrap();
        sub.put("1", "one").await.unwrap();
        sub.put("2", "two").await.unwrap();

        sub.clear_with(ClearOptions::new().range(RangeOptions::new().lt("2")))
            .await
            .unwrap();
        assert_eq!(sub.get_many(["1", "2"]).await.unwrap(), vec![None, Some(v("two"))]);

        sub.clear().await.unwrap();
        assert_eq!(sub.get("2").await.unwrap(), None);
        assert_eq!(db.get("a").await.unwrap(), Some(v("outside")));
    }

    #[tokio::test]
    async fn nested_sublevels() {
        let db = db();
        let a = db.sublevel("a", SublevelOptions::new()).unwrap();
        let b = a.sublevel("b", SublevelOptions::new()).unwrap();
        assert_eq!(b.prefix().as_ref(), b"!a!!b!");

        b.put("k", "v").await.unwrap();
        assert_eq!(db.get("!a!!b!k").await.unwrap(), Some(v("v")));
        let outer = a.keys(IteratorOptions::new()).unwrap().all().await.unwrap();
        assert_eq!(outer, vec![v("!b!k")]);
    }

    #[tokio::test]
    async fn own_encodings() {
        let db = db();
        let docs = db
            .sublevel("docs", SublevelOptions::new().value_encoding("json"))
            .unwrap();
        docs.put("d", serde_json::json!([1, 2])).await.unwrap();
        assert_eq!(docs.get("d").await.unwrap(), Some(Value::from(serde_json::json!([1, 2]))));
        assert_eq!(db.get("!docs!d").await.unwrap(), Some(v("[1,2]")));
    }

    #[tokio::test]
    async fn chained_batch_in_sublevel() {
        let db = db();
        let sub = db.sublevel("s", SublevelOptions::new()).unwrap();
        let mut batch = sub.chained_batch().unwrap();
        batch.put("k", "v").unwrap();
        batch.write().await.unwrap();
        assert_eq!(db.get("!s!k").await.unwrap(), Some(v("v")));
    }

    #[test]
    fn invalid_names_and_encodings() {
        let db = db();
        assert!(matches!(
            db.sublevel("a!b", SublevelOptions::new()),
            Err(Error::InvalidArgument { .. })
        ));
        let err = db
            .sublevel("a", SublevelOptions::new().key_encoding("nope"))
            .unwrap_err();
        assert_eq!(err.code(), "LEVEL_ENCODING_NOT_FOUND");
    }
}
