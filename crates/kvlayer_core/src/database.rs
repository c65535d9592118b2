//! Database handle and lifecycle.

use crate::batch::{BatchOperation, ChainedBatch};
use crate::error::{EngineOp, Error, Result};
use crate::iterator::{EntryIterator, KeyIterator, ValueIterator};
use crate::keyspace::{Codecs, Keyspace};
use crate::lifecycle::{
    deferred_result, settle, settle_channel, Lifecycle, Settle, Settled, State, Status,
};
use crate::options::{ClearOptions, DatabaseOptions, OpenOptions, ReadOptions, WriteOptions};
use crate::resource::Resources;
use crate::snapshot::Snapshot;
use crate::sublevel::Sublevel;
use kvlayer_codec::{EncodingRegistry, Value};
use kvlayer_engine::{
    BatchOp, Capabilities, Engine, EngineReadOptions, EngineWriteOptions, SnapshotId,
};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A key-value database in front of a pluggable [`Engine`].
///
/// `Database` is a cheap handle; clones share the same state.
///
/// # Lifecycle
///
/// A database starts out [`Status::New`]. Operations may be issued at any
/// time before it is open: while it is opening they are queued and run in
/// the order they were issued once the engine is ready, and an operation
/// issued on a new database opens it with the default [`OpenOptions`].
///
/// Operations issued after `close()` has started fail with
/// [`Error::NotOpen`].
///
/// # Example
///
/// ```rust
/// use kvlayer_core::{Database, DatabaseOptions};
/// use kvlayer_engine::MemoryEngine;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> kvlayer_core::Result<()> {
/// let db = Database::with_options("my_db", MemoryEngine::new(), DatabaseOptions::new().encoding("utf8"))?;
///
/// // No need to wait for open
/// db.put("greeting", "hello").await?;
/// assert_eq!(db.get("greeting").await?, Some("hello".into()));
///
/// db.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    engine: Arc<dyn Engine>,
    location: PathBuf,
    options: DatabaseOptions,
    root: Keyspace,
    lifecycle: Mutex<Lifecycle>,
    resources: Mutex<Resources>,
}

/// Either an engine result available now, or one that will be produced
/// once the database finishes opening.
pub(crate) enum Binding<T> {
    Ready(T),
    Pending(oneshot::Receiver<Result<T>>),
}

enum Wait {
    Open(Settle),
    Close(Settle),
}

enum Gate<F, T> {
    Now(F),
    Deferred(oneshot::Receiver<Result<T>>),
}

/// Resolves a caller-supplied location to an absolute path without touching
/// the filesystem.
pub(crate) fn resolve_location(location: &Path) -> Result<PathBuf> {
    if location.as_os_str().is_empty() {
        return Err(Error::invalid_argument("location must not be empty"));
    }
    std::path::absolute(location).map_err(|e| {
        Error::invalid_argument(format!(
            "cannot resolve location {}: {e}",
            location.display()
        ))
    })
}

impl Database {
    /// Creates a database at `location` with default options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the location is empty.
    pub fn new(location: impl AsRef<Path>, engine: impl Engine + 'static) -> Result<Self> {
        Self::with_options(location, engine, DatabaseOptions::default())
    }

    /// Creates a database at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the location is empty, and a
    /// codec error if a default encoding is not registered.
    pub fn with_options(
        location: impl AsRef<Path>,
        engine: impl Engine + 'static,
        options: DatabaseOptions,
    ) -> Result<Self> {
        Self::from_engine(location, Arc::new(engine), options)
    }

    /// Creates a database over a shared engine handle.
    ///
    /// # Errors
    ///
    /// Same as [`Database::with_options`].
    pub fn from_engine(
        location: impl AsRef<Path>,
        engine: Arc<dyn Engine>,
        options: DatabaseOptions,
    ) -> Result<Self> {
        let location = resolve_location(location.as_ref())?;
        let root = Keyspace::root(options.key_encoding.clone(), options.value_encoding.clone());
        root.codecs(&options.encodings, None, None)?;

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                engine,
                location,
                options,
                root,
                lifecycle: Mutex::new(Lifecycle::new()),
                resources: Mutex::new(Resources::default()),
            }),
        })
    }

    /// Returns the absolute location.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.inner.location
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.lifecycle.lock().state.status()
    }

    /// Returns the options this database was created with.
    #[must_use]
    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    /// Returns the encodings available to this database.
    #[must_use]
    pub fn encodings(&self) -> &EncodingRegistry {
        &self.inner.options.encodings
    }

    /// Returns what the engine supports.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.inner.engine.capabilities()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the database with its default open options.
    ///
    /// # Errors
    ///
    /// Returns the engine's open failure.
    pub async fn open(&self) -> Result<()> {
        self.open_with(self.inner.options.open).await
    }

    /// Opens the database.
    ///
    /// Calls made while an open is in flight wait for it and share its
    /// outcome. A call made while closing waits for the close first.
    ///
    /// # Errors
    ///
    /// Returns the engine's open failure. A passive open fails with
    /// [`Error::NotOpen`] if no open is in flight and with
    /// [`Error::AlreadyClosing`] while closing.
    pub async fn open_with(&self, options: OpenOptions) -> Result<()> {
        loop {
            let wait = {
                let mut lifecycle = self.inner.lifecycle.lock();
                match &lifecycle.state {
                    State::Open => return Ok(()),
                    State::Opening(rx) => Wait::Open(rx.clone()),
                    State::Closing(_) if options.passive => return Err(Error::AlreadyClosing),
                    State::Closing(rx) => Wait::Close(rx.clone()),
                    State::New | State::Closed if options.passive => return Err(Error::NotOpen),
                    State::New | State::Closed => {
                        Wait::Open(self.start_open(&mut lifecycle, options)?)
                    }
                }
            };
            match wait {
                Wait::Open(rx) => return settle(rx).await,
                // Whatever the close outcome, look at the status again
                Wait::Close(rx) => {
                    let _ = settle(rx).await;
                }
            }
        }
    }

    /// Closes the database.
    ///
    /// Waits for an in-flight open to settle first. Every live iterator,
    /// chained batch and snapshot is released before the engine is closed.
    ///
    /// # Errors
    ///
    /// Returns the engine's close failure, in which case the database stays
    /// open.
    pub async fn close(&self) -> Result<()> {
        loop {
            let wait = {
                let mut lifecycle = self.inner.lifecycle.lock();
                match &lifecycle.state {
                    State::New => {
                        lifecycle.state = State::Closed;
                        return Ok(());
                    }
                    State::Closed => return Ok(()),
                    State::Opening(rx) => Wait::Open(rx.clone()),
                    State::Closing(rx) => Wait::Close(rx.clone()),
                    State::Open => Wait::Close(self.start_close(&mut lifecycle)?),
                }
            };
            match wait {
                Wait::Open(rx) => {
                    let _ = settle(rx).await;
                }
                Wait::Close(rx) => return settle(rx).await,
            }
        }
    }

    fn start_open(&self, lifecycle: &mut Lifecycle, options: OpenOptions) -> Result<Settle> {
        let runtime = Handle::try_current().map_err(|_| Error::NotOpen)?;
        let (tx, rx) = settle_channel();
        lifecycle.state = State::Opening(rx.clone());
        debug!(location = %self.inner.location.display(), "opening database");
        runtime.spawn(DatabaseInner::drive_open(
            Arc::clone(&self.inner),
            options,
            tx,
        ));
        Ok(rx)
    }

    fn start_close(&self, lifecycle: &mut Lifecycle) -> Result<Settle> {
        let runtime = Handle::try_current().map_err(|_| Error::NotOpen)?;
        let (tx, rx) = settle_channel();
        lifecycle.state = State::Closing(rx.clone());
        debug!(location = %self.inner.location.display(), "closing database");
        runtime.spawn(DatabaseInner::drive_close(Arc::clone(&self.inner), tx));
        Ok(rx)
    }

    // =========================================================================
    // Gating
    // =========================================================================

    fn gate<T, F, Fut>(&self, op: F) -> Result<Gate<F, T>>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn Engine>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state.status() {
            Status::Open => Ok(Gate::Now(op)),
            Status::Opening => {
                let engine = Arc::clone(&self.inner.engine);
                Ok(Gate::Deferred(lifecycle.defer(move || op(engine))))
            }
            Status::New => {
                self.start_open(&mut lifecycle, self.inner.options.open)?;
                let engine = Arc::clone(&self.inner.engine);
                Ok(Gate::Deferred(lifecycle.defer(move || op(engine))))
            }
            Status::Closing | Status::Closed => Err(Error::NotOpen),
        }
    }

    /// Runs `op` against the engine now if open, or queues it behind the
    /// open in flight.
    pub(crate) async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn Engine>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match self.gate(op)? {
            Gate::Now(op) => op(Arc::clone(&self.inner.engine)).await,
            Gate::Deferred(rx) => deferred_result(rx).await,
        }
    }

    /// Synchronously creates engine state, or arranges for it to be created
    /// once the database is open, then hands it to `install` together with
    /// the resource set. Both happen under the lifecycle lock so a close
    /// that starts afterwards sees the new resource.
    pub(crate) fn bind<T, R>(
        &self,
        create: impl FnOnce(&dyn Engine) -> Result<T> + Send + 'static,
        install: impl FnOnce(Binding<T>, &mut Resources) -> R,
    ) -> Result<R>
    where
        T: Send + 'static,
    {
        let mut lifecycle = self.inner.lifecycle.lock();
        let binding = match lifecycle.state.status() {
            Status::Open => Binding::Ready(create(self.inner.engine.as_ref())?),
            Status::Opening => Binding::Pending(self.defer_create(&mut lifecycle, create)),
            Status::New => {
                self.start_open(&mut lifecycle, self.inner.options.open)?;
                Binding::Pending(self.defer_create(&mut lifecycle, create))
            }
            Status::Closing | Status::Closed => return Err(Error::NotOpen),
        };
        let mut resources = self.inner.resources.lock();
        Ok(install(binding, &mut resources))
    }

    fn defer_create<T>(
        &self,
        lifecycle: &mut Lifecycle,
        create: impl FnOnce(&dyn Engine) -> Result<T> + Send + 'static,
    ) -> oneshot::Receiver<Result<T>>
    where
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.inner.engine);
        lifecycle.defer(move || std::future::ready(create(engine.as_ref())))
    }

    /// Registers a resource if the database is not closing or closed.
    pub(crate) fn register<R>(&self, install: impl FnOnce(&mut Resources) -> R) -> Result<R> {
        let lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state.status() {
            Status::Closing | Status::Closed => Err(Error::NotOpen),
            Status::New | Status::Opening | Status::Open => {
                Ok(install(&mut self.inner.resources.lock()))
            }
        }
    }

    pub(crate) fn resources(&self) -> &Mutex<Resources> {
        &self.inner.resources
    }

    pub(crate) fn engine(&self) -> &Arc<dyn Engine> {
        &self.inner.engine
    }

    pub(crate) fn codecs(
        &self,
        space: &Keyspace,
        key_encoding: Option<&str>,
        value_encoding: Option<&str>,
    ) -> Result<Codecs> {
        space.codecs(&self.inner.options.encodings, key_encoding, value_encoding)
    }

    pub(crate) fn same_as(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the engine id of `snapshot`, checking that it belongs here.
    pub(crate) fn snapshot_id(&self, snapshot: Option<&Snapshot>) -> Result<Option<SnapshotId>> {
        snapshot.map(|s| s.id_for(self)).transpose()
    }

    // =========================================================================
    // Reads and writes
    // =========================================================================

    /// Reads a value.
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
        self.get_in(&self.inner.root, key.into(), options).await
    }

    pub(crate) async fn get_in(
        &self,
        space: &Keyspace,
        key: Value,
        options: ReadOptions,
    ) -> Result<Option<Value>> {
        let codecs = self.codecs(
            space,
            options.key_encoding.as_deref(),
            options.value_encoding.as_deref(),
        )?;
        let key = codecs.encode_key(&key)?;
        let read = self.engine_read_options(&options, &codecs)?;

        let value = self
            .run(move |engine| async move {
                engine
                    .get(key, &read)
                    .await
                    .map_err(|e| Error::engine(EngineOp::Get, e))
            })
            .await?;
        value.map(|v| codecs.decode_value(Some(v))).transpose()
    }

    /// Reads several values. The result has one slot per key.
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
        self.get_many_in(&self.inner.root, keys, options).await
    }

    pub(crate) async fn get_many_in(
        &self,
        space: &Keyspace,
        keys: Vec<Value>,
        options: ReadOptions,
    ) -> Result<Vec<Option<Value>>> {
        let codecs = self.codecs(
            space,
            options.key_encoding.as_deref(),
            options.value_encoding.as_deref(),
        )?;
        let keys = keys
            .iter()
            .map(|k| codecs.encode_key(k))
            .collect::<Result<Vec<_>>>()?;
        let read = self.engine_read_options(&options, &codecs)?;

        let values = self
            .run(move |engine| async move {
                engine
                    .get_many(keys, &read)
                    .await
                    .map_err(|e| Error::engine(EngineOp::GetMany, e))
            })
            .await?;
        values
            .into_iter()
            .map(|v| v.map(|v| codecs.decode_value(Some(v))).transpose())
            .collect()
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
        self.put_in(&self.inner.root, key.into(), value.into(), options)
            .await
    }

    pub(crate) async fn put_in(
        &self,
        space: &Keyspace,
        key: Value,
        value: Value,
        options: WriteOptions,
    ) -> Result<()> {
        let codecs = self.codecs(
            space,
            options.key_encoding.as_deref(),
            options.value_encoding.as_deref(),
        )?;
        let key = codecs.encode_key(&key)?;
        let value = codecs.encode_value(&value)?;
        let write = EngineWriteOptions { sync: options.sync };

        self.run(move |engine| async move {
            engine
                .put(key, value, &write)
                .await
                .map_err(|e| Error::engine(EngineOp::Put, e))
        })
        .await
    }

    /// Deletes a key. Deleting a missing key is not an error.
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
        self.del_in(&self.inner.root, key.into(), options).await
    }

    pub(crate) async fn del_in(
        &self,
        space: &Keyspace,
        key: Value,
        options: WriteOptions,
    ) -> Result<()> {
        let codecs = self.codecs(space, options.key_encoding.as_deref(), None)?;
        let key = codecs.encode_key(&key)?;
        let write = EngineWriteOptions { sync: options.sync };

        self.run(move |engine| async move {
            engine
                .del(key, &write)
                .await
                .map_err(|e| Error::engine(EngineOp::Del, e))
        })
        .await
    }

    /// Applies puts and deletes atomically.
    ///
    /// # Errors
    ///
    /// Returns an encoding error before anything is written, or the engine
    /// error, in which case nothing is written.
    pub async fn batch(&self, operations: Vec<BatchOperation>) -> Result<()> {
        self.batch_with(operations, WriteOptions::default()).await
    }

    /// Applies puts and deletes atomically, with explicit options.
    ///
    /// # Errors
    ///
    /// Same as [`Database::batch`].
    pub async fn batch_with(
        &self,
        operations: Vec<BatchOperation>,
        options: WriteOptions,
    ) -> Result<()> {
        self.batch_in(&self.inner.root, operations, options).await
    }

    pub(crate) async fn batch_in(
        &self,
        space: &Keyspace,
        operations: Vec<BatchOperation>,
        options: WriteOptions,
    ) -> Result<()> {
        let codecs = self.codecs(
            space,
            options.key_encoding.as_deref(),
            options.value_encoding.as_deref(),
        )?;
        let ops = operations
            .iter()
            .map(|op| op.encode(&codecs))
            .collect::<Result<Vec<_>>>()?;
        self.write_batch(ops, EngineWriteOptions { sync: options.sync })
            .await
    }

    pub(crate) async fn write_batch(
        &self,
        ops: Vec<BatchOp>,
        write: EngineWriteOptions,
    ) -> Result<()> {
        self.run(move |engine| async move {
            engine
                .batch(ops, &write)
                .await
                .map_err(|e| Error::engine(EngineOp::Batch, e))
        })
        .await
    }

    /// Starts a chained batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] while closing or closed.
    pub fn chained_batch(&self) -> Result<ChainedBatch> {
        ChainedBatch::new(self.clone(), self.inner.root.clone())
    }

    /// Deletes every key.
    ///
    /// # Errors
    ///
    /// Returns an engine error.
    pub async fn clear(&self) -> Result<()> {
        self.clear_with(ClearOptions::default()).await
    }

    /// Deletes the keys in a range.
    ///
    /// # Errors
    ///
    /// Returns an encoding or engine error.
    pub async fn clear_with(&self, options: ClearOptions) -> Result<()> {
        self.clear_in(&self.inner.root, options).await
    }

    pub(crate) async fn clear_in(&self, space: &Keyspace, options: ClearOptions) -> Result<()> {
        let codecs = self.codecs(space, options.key_encoding.as_deref(), None)?;
        let range = codecs.engine_range(&options.range)?;
        let snapshot = self.snapshot_id(options.snapshot.as_ref())?;

        self.run(move |engine| async move {
            engine
                .clear(&range, snapshot)
                .await
                .map_err(|e| Error::engine(EngineOp::Clear, e))
        })
        .await
    }

    // =========================================================================
    // Iteration, snapshots and sublevels
    // =========================================================================

    /// Creates an iterator over entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] while closing or closed, or an encoding
    /// error for the range bounds.
    pub fn iterator(&self, options: crate::IteratorOptions) -> Result<EntryIterator> {
        EntryIterator::create(self.clone(), &self.inner.root, options)
    }

    /// Creates an iterator over keys only.
    ///
    /// # Errors
    ///
    /// Same as [`Database::iterator`].
    pub fn keys(&self, options: crate::IteratorOptions) -> Result<KeyIterator> {
        KeyIterator::create(self.clone(), &self.inner.root, options)
    }

    /// Creates an iterator over values only.
    ///
    /// # Errors
    ///
    /// Same as [`Database::iterator`].
    pub fn values(&self, options: crate::IteratorOptions) -> Result<ValueIterator> {
        ValueIterator::create(self.clone(), &self.inner.root, options)
    }

    /// Pins the current state for consistent reads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the engine has no explicit
    /// snapshots.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        if !self.capabilities().explicit_snapshots {
            return Err(Error::NotSupported {
                operation: "snapshot",
            });
        }
        let id = self
            .run(|engine| async move {
                engine
                    .snapshot_create()
                    .map_err(|e| Error::engine(EngineOp::SnapshotInit, e))
            })
            .await?;
        Snapshot::register(self, id)
    }

    /// Opens a prefixed namespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `name` contains `!`, or a codec
    /// error if a configured encoding is not registered.
    pub fn sublevel(&self, name: &str, options: crate::SublevelOptions) -> Result<Sublevel> {
        Sublevel::create(self.clone(), &self.inner.root, name, options)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Estimates the storage used by keys in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the engine cannot estimate sizes.
    pub async fn approximate_size(
        &self,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Result<u64> {
        if !self.capabilities().approximate_size {
            return Err(Error::NotSupported {
                operation: "approximate_size",
            });
        }
        let codecs = self.codecs(&self.inner.root, None, None)?;
        let start = codecs.encode_key(&start.into())?;
        let end = codecs.encode_key(&end.into())?;

        self.run(move |engine| async move {
            engine
                .approximate_size(start, end)
                .await
                .map_err(|e| Error::engine(EngineOp::ApproximateSize, e))
        })
        .await
    }

    /// Compacts storage for keys in `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the engine cannot compact.
    pub async fn compact_range(&self, start: impl Into<Value>, end: impl Into<Value>) -> Result<()> {
        if !self.capabilities().compact_range {
            return Err(Error::NotSupported {
                operation: "compact_range",
            });
        }
        let codecs = self.codecs(&self.inner.root, None, None)?;
        let start = codecs.encode_key(&start.into())?;
        let end = codecs.encode_key(&end.into())?;

        self.run(move |engine| async move {
            engine
                .compact_range(start, end)
                .await
                .map_err(|e| Error::engine(EngineOp::CompactRange, e))
        })
        .await
    }

    /// Reads an engine property.
    ///
    /// Unlike other operations this never waits for an open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] unless the database is open.
    pub fn get_property(&self, name: &str) -> Result<Option<String>> {
        if self.status() != Status::Open {
            return Err(Error::NotOpen);
        }
        self.inner
            .engine
            .get_property(name)
            .map_err(|e| Error::engine(EngineOp::GetProperty, e))
    }

    /// Removes all data at this database's location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyOpen`] unless the database is new or closed.
    pub async fn destroy(&self) -> Result<()> {
        self.ensure_offline()?;
        self.inner
            .engine
            .destroy(&self.inner.location)
            .await
            .map_err(|e| Error::engine(EngineOp::Destroy, e))
    }

    /// Attempts to recover damaged data at this database's location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyOpen`] unless the database is new or closed.
    pub async fn repair(&self) -> Result<()> {
        self.ensure_offline()?;
        self.inner
            .engine
            .repair(&self.inner.location)
            .await
            .map_err(|e| Error::engine(EngineOp::Repair, e))
    }

    fn ensure_offline(&self) -> Result<()> {
        match self.status() {
            Status::New | Status::Closed => Ok(()),
            Status::Opening | Status::Open | Status::Closing => Err(Error::AlreadyOpen),
        }
    }

    fn engine_read_options(&self, options: &ReadOptions, codecs: &Codecs) -> Result<EngineReadOptions> {
        Ok(EngineReadOptions {
            fill_cache: options.fill_cache,
            format: codecs.value_format(),
            snapshot: self.snapshot_id(options.snapshot.as_ref())?,
        })
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.inner.location)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl DatabaseInner {
    async fn drive_open(self: Arc<Self>, options: OpenOptions, tx: Settled) {
        let opened = self
            .engine
            .open(&self.location, &options.to_engine())
            .await
            .map_err(|e| Error::engine(EngineOp::Open, e));

        match &opened {
            Ok(()) => self.drain_deferred().await,
            Err(e) => {
                debug!(error = %e, location = %self.location.display(), "open failed");
                self.reject_deferred(e).await;
            }
        }
        tx.send_replace(Some(opened));
    }

    /// Runs queued operations in order. Operations queued meanwhile run in
    /// later rounds; the database only becomes open once nothing is left.
    async fn drain_deferred(&self) {
        loop {
            let batch = {
                let mut lifecycle = self.lifecycle.lock();
                if !lifecycle.has_deferred() {
                    lifecycle.state = State::Open;
                    break;
                }
                lifecycle.take_deferred()
            };
            debug!(count = batch.len(), "running deferred operations");
            for op in batch {
                op(Ok(())).await;
            }
        }
        debug!(location = %self.location.display(), "database open");
    }

    async fn reject_deferred(&self, error: &Error) {
        let batch = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = State::Closed;
            lifecycle.take_deferred()
        };
        if !batch.is_empty() {
            debug!(count = batch.len(), "rejecting deferred operations");
        }
        for op in batch {
            op(Err(error.clone())).await;
        }
    }

    async fn drive_close(self: Arc<Self>, tx: Settled) {
        let resources = self.resources.lock().drain();
        if !resources.is_empty() {
            debug!(count = resources.len(), "releasing resources");
        }
        for resource in resources {
            if let Err(e) = resource.release().await {
                warn!(error = %e, "failed to release resource while closing");
            }
        }

        let closed = self
            .engine
            .close()
            .await
            .map_err(|e| Error::engine(EngineOp::Close, e));

        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = if closed.is_ok() {
                State::Closed
            } else {
                State::Open
            };
        }
        match &closed {
            Ok(()) => debug!(location = %self.location.display(), "database closed"),
            Err(e) => warn!(error = %e, "engine close failed, database stays open"),
        }
        tx.send_replace(Some(closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvlayer_engine::MemoryEngine;

    fn utf8_db() -> Database {
        Database::with_options(
            "test-db",
            MemoryEngine::new(),
            DatabaseOptions::new().encoding("utf8"),
        )
        .unwrap()
    }

    #[test]
    fn empty_location_is_rejected() {
        let err = Database::new("", MemoryEngine::new()).unwrap_err();
        assert_eq!(err.code(), "LEVEL_INVALID_ARGUMENT");
    }

    #[test]
    fn location_is_absolute() {
        let db = Database::new("relative/path", MemoryEngine::new()).unwrap();
        assert!(db.location().is_absolute());
        assert!(db.location().ends_with("relative/path"));
    }

    #[test]
    fn unknown_default_encoding_is_rejected() {
        let err = Database::with_options(
            "db",
            MemoryEngine::new(),
            DatabaseOptions::new().key_encoding("nope"),
        )
        .unwrap_err();
        assert_eq!(err.code(), "LEVEL_ENCODING_NOT_FOUND");
    }

    #[tokio::test]
    async fn open_and_close_transitions() {
        let db = utf8_db();
        assert_eq!(db.status(), Status::New);
        db.open().await.unwrap();
        assert_eq!(db.status(), Status::Open);
        db.close().await.unwrap();
        assert_eq!(db.status(), Status::Closed);
        // Closing again is a no-op
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn operations_on_new_database_open_it() {
        let db = utf8_db();
        db.put("a", "1").await.unwrap();
        assert_eq!(db.status(), Status::Open);
        assert_eq!(db.get("a").await.unwrap(), Some(Value::from("1")));
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let db = utf8_db();
        db.open().await.unwrap();
        db.close().await.unwrap();
        let err = db.get("a").await.unwrap_err();
        assert!(matches!(err, Error::NotOpen));
    }

    #[tokio::test]
    async fn passive_open() {
        let db = utf8_db();
        let err = db.open_with(OpenOptions::new().passive(true)).await.unwrap_err();
        assert!(matches!(err, Error::NotOpen));

        db.open().await.unwrap();
        db.open_with(OpenOptions::new().passive(true)).await.unwrap();
    }

    #[tokio::test]
    async fn get_property_requires_open() {
        let db = utf8_db();
        assert!(matches!(db.get_property("kvlayer.stats"), Err(Error::NotOpen)));
        db.open().await.unwrap();
        assert!(db.get_property("kvlayer.stats").unwrap().is_some());
    }

    #[tokio::test]
    async fn destroy_requires_offline() {
        let db = utf8_db();
        db.open().await.unwrap();
        assert!(matches!(db.destroy().await, Err(Error::AlreadyOpen)));
        db.close().await.unwrap();
        db.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn batch_and_get_many() {
        let db = utf8_db();
        db.batch(vec![
            BatchOperation::put("a", "1"),
            BatchOperation::put("b", "2"),
            BatchOperation::del("a"),
        ])
        .await
        .unwrap();
        let values = db.get_many(["a", "b"]).await.unwrap();
        assert_eq!(values, vec![None, Some(Value::from("2"))]);
    }

    #[tokio::test]
    async fn per_call_encoding_overrides_default() {
        let db = utf8_db();
        db.put_with("doc", serde_json::json!({"n": 1}), WriteOptions::new().value_encoding("json"))
            .await
            .unwrap();
        let raw = db.get("doc").await.unwrap();
        assert_eq!(raw, Some(Value::from(r#"{"n":1}"#)));
        let doc = db
            .get_with("doc", ReadOptions::new().value_encoding("json"))
            .await
            .unwrap();
        assert_eq!(doc, Some(Value::from(serde_json::json!({"n": 1}))));
    }

    #[tokio::test]
    async fn clear_range() {
        let db = utf8_db();
        for k in ["a", "b", "c"] {
            db.put(k, k).await.unwrap();
        }
        db.clear_with(ClearOptions::new().range(crate::RangeOptions::new().gte("b")))
            .await
            .unwrap();
        assert_eq!(db.get_many(["a", "b", "c"]).await.unwrap(), vec![Some(Value::from("a")), None, None]);
    }

    #[tokio::test]
    async fn approximate_size_and_compact() {
        let db = utf8_db();
        db.put("ab", "cd").await.unwrap();
        assert_eq!(db.approximate_size("a", "z").await.unwrap(), 4);
        db.compact_range("a", "z").await.unwrap();
    }
}
