//! Iterators over entries, keys or values.
//!
//! An iterator is bound to an engine cursor. It is created synchronously;
//! if the database is still opening, the cursor is bound once the open
//! completes and the first advance waits for it.
//!
//! Only one `next`, `nextv` or `seek` may be in flight per iterator. A call
//! made while another is running fails with [`Error::IteratorBusy`].
//!
//! The helpers that consume an iterator ([`DbIterator::all`],
//! [`DbIterator::for_each`], [`DbIterator::try_for_each`] and
//! [`DbIterator::into_stream`]) always close it, whether iteration ran to
//! completion, stopped early or failed.

use crate::database::{Binding, Database};
use crate::error::{EngineOp, Error, Result};
use crate::keyspace::{Codecs, Keyspace};
use crate::options::{IteratorOptions, Limit, SeekOptions};
use crate::resource::{Resource, ResourceId};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use kvlayer_codec::{CodecError, Value};
use kvlayer_engine::{CursorEntry, EngineCursor, EngineIteratorOptions};
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, Notify, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Entries fetched per engine call by [`DbIterator::all`].
const ALL_CHUNK: usize = 1000;

mod sealed {
    pub trait Sealed {}
}

/// What an iterator yields.
pub trait Mode: sealed::Sealed + Send + Sync + 'static {
    /// The yielded item.
    type Item: Send + 'static;

    #[doc(hidden)]
    const KEYS: bool;

    #[doc(hidden)]
    const VALUES: bool;

    #[doc(hidden)]
    fn assemble(key: Option<Value>, value: Option<Value>) -> Option<Self::Item>;
}

/// Yields `(key, value)` pairs.
#[derive(Debug)]
pub enum Entries {}

/// Yields keys.
#[derive(Debug)]
pub enum Keys {}

/// Yields values.
#[derive(Debug)]
pub enum Values {}

impl sealed::Sealed for Entries {}
impl sealed::Sealed for Keys {}
impl sealed::Sealed for Values {}

impl Mode for Entries {
    type Item = (Value, Value);
    const KEYS: bool = true;
    const VALUES: bool = true;

    fn assemble(key: Option<Value>, value: Option<Value>) -> Option<Self::Item> {
        Some((key?, value?))
    }
}

impl Mode for Keys {
    type Item = Value;
    const KEYS: bool = true;
    const VALUES: bool = false;

    fn assemble(key: Option<Value>, _value: Option<Value>) -> Option<Self::Item> {
        key
    }
}

impl Mode for Values {
    type Item = Value;
    const KEYS: bool = false;
    const VALUES: bool = true;

    fn assemble(_key: Option<Value>, value: Option<Value>) -> Option<Self::Item> {
        value
    }
}

/// Iterator over `(key, value)` pairs.
pub type EntryIterator = DbIterator<Entries>;

/// Iterator over keys.
pub type KeyIterator = DbIterator<Keys>;

/// Iterator over values.
pub type ValueIterator = DbIterator<Values>;

/// An iterator over a range of a database or sublevel.
///
/// Dropping an iterator that was not closed closes it in the background.
///
/// # Example
///
/// ```rust
/// use kvlayer_core::{Database, DatabaseOptions, IteratorOptions};
/// use kvlayer_engine::MemoryEngine;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> kvlayer_core::Result<()> {
/// let db = Database::with_options("db", MemoryEngine::new(), DatabaseOptions::new().encoding("utf8"))?;
/// db.put("a", "1").await?;
/// db.put("b", "2").await?;
///
/// let it = db.keys(IteratorOptions::new().reverse(true))?;
/// assert_eq!(it.all().await?, vec!["b".into(), "a".into()]);
/// # Ok(())
/// # }
/// ```
pub struct DbIterator<M: Mode> {
    core: Arc<IteratorCore>,
    _mode: PhantomData<fn() -> M>,
}

struct IteratorCore {
    db: Database,
    space: Keyspace,
    codecs: Codecs,
    limit: Option<usize>,
    signal: Option<CancellationToken>,
    state: Mutex<IterState>,
    idle: Notify,
    closed: OnceCell<Result<()>>,
    resource: Mutex<Option<ResourceId>>,
}

#[derive(Default)]
struct IterState {
    cursor: Option<Box<dyn EngineCursor>>,
    pending: Option<oneshot::Receiver<Result<Box<dyn EngineCursor>>>>,
    failure: Option<Error>,
    seek: Option<Bytes>,
    count: usize,
    busy: bool,
    ended: bool,
    closing: bool,
    deferred: bool,
}

/// Marks an advance in flight. Dropping it hands the cursor back and wakes
/// a waiting close, even if the advance was cancelled.
struct Advance<'a> {
    core: &'a IteratorCore,
    cursor: Option<Box<dyn EngineCursor>>,
    pending: Option<oneshot::Receiver<Result<Box<dyn EngineCursor>>>>,
}

impl Drop for Advance<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.core.state.lock();
            if let Some(cursor) = self.cursor.take() {
                state.cursor = Some(cursor);
            }
            if let Some(pending) = self.pending.take() {
                state.pending = Some(pending);
            }
            state.busy = false;
        }
        self.core.idle.notify_waiters();
    }
}

impl<M: Mode> DbIterator<M> {
    pub(crate) fn create(db: Database, space: &Keyspace, options: IteratorOptions) -> Result<Self> {
        let codecs = db.codecs(
            space,
            options.key_encoding.as_deref(),
            options.value_encoding.as_deref(),
        )?;
        let engine_options = EngineIteratorOptions {
            range: codecs.engine_range(&options.range)?,
            keys: M::KEYS,
            values: M::VALUES,
            fill_cache: options.fill_cache,
            key_format: codecs.key_format(),
            value_format: codecs.value_format(),
            snapshot: db.snapshot_id(options.snapshot.as_ref())?,
        };

        let core = Arc::new(IteratorCore {
            db: db.clone(),
            space: space.clone(),
            codecs,
            limit: options.range.limit.as_option(),
            signal: options.signal,
            state: Mutex::new(IterState::default()),
            idle: Notify::new(),
            closed: OnceCell::new(),
            resource: Mutex::new(None),
        });

        let installed = Arc::clone(&core);
        let weak = Arc::downgrade(&core) as Weak<dyn Resource>;
        db.bind(
            move |engine| {
                engine
                    .iterator(engine_options)
                    .map_err(|e| Error::engine(EngineOp::IteratorInit, e))
            },
            move |binding, resources| {
                {
                    let mut state = installed.state.lock();
                    match binding {
                        Binding::Ready(cursor) => {
                            trace!("iterator bound to engine cursor");
                            state.cursor = Some(cursor);
                        }
                        Binding::Pending(rx) => {
                            trace!("iterator waits for database open");
                            state.pending = Some(rx);
                            state.deferred = true;
                        }
                    }
                }
                *installed.resource.lock() = Some(resources.register(weak));
            },
        )?;

        Ok(Self {
            core,
            _mode: PhantomData,
        })
    }

    /// Advances one step.
    ///
    /// Returns `None` once the range (or the limit) is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IteratorNotOpen`] after close, [`Error::IteratorBusy`]
    /// if another call is in flight, [`Error::Aborted`] if the signal fired,
    /// or the engine's error.
    pub async fn next(&self) -> Result<Option<M::Item>> {
        Ok(self.core.advance::<M>(1, "next").await?.into_iter().next())
    }

    /// Advances up to `size` steps. A size of zero is treated as one. An
    /// empty result means the iterator is exhausted.
    ///
    /// # Errors
    ///
    /// Same as [`DbIterator::next`].
    pub async fn nextv(&self, size: usize) -> Result<Vec<M::Item>> {
        self.advance_items(size, "nextv").await
    }

    /// Reads everything that is left, then closes the iterator.
    ///
    /// # Errors
    ///
    /// Returns the iteration error, the close error, or both combined.
    pub async fn all(&self) -> Result<Vec<M::Item>> {
        let mut items = Vec::new();
        let drained = loop {
            match self.advance_items(ALL_CHUNK, "all").await {
                Ok(batch) if batch.is_empty() => break Ok(()),
                Ok(batch) => items.extend(batch),
                Err(e) => break Err(e),
            }
        };
        merge(drained, self.close().await).map(|()| items)
    }

    /// Feeds every remaining item to `f` until it breaks, then closes the
    /// iterator.
    ///
    /// # Errors
    ///
    /// Returns the iteration error, the close error, or both combined.
    pub async fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(M::Item) -> ControlFlow<()>,
    {
        let walked = loop {
            match self.next().await {
                Ok(Some(item)) => {
                    if f(item).is_break() {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        merge(walked, self.close().await)
    }

    /// Like [`DbIterator::for_each`] with a fallible consumer.
    ///
    /// A consumer error is returned as is; a failure to close afterwards is
    /// only logged.
    ///
    /// # Errors
    ///
    /// Returns the consumer's error, or the iteration and close errors.
    pub async fn try_for_each<E, F>(&self, mut f: F) -> std::result::Result<(), E>
    where
        E: From<Error>,
        F: FnMut(M::Item) -> std::result::Result<ControlFlow<()>, E>,
    {
        loop {
            let item = match self.next().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => return Err(E::from(after_close(e, self.close().await))),
            };
            match f(item) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break,
                Err(consumer) => {
                    if let Err(e) = self.close().await {
                        warn!(error = %e, "failed to close iterator after consumer error");
                    }
                    return Err(consumer);
                }
            }
        }
        self.close().await.map_err(E::from)
    }

    /// Turns the iterator into a stream. The stream closes the iterator when
    /// it ends or fails.
    pub fn into_stream(self) -> impl Stream<Item = Result<M::Item>> + Send {
        async_stream::stream! {
            loop {
                match self.next().await {
                    Ok(Some(item)) => yield Ok(item),
                    Ok(None) => {
                        if let Err(e) = self.close().await {
                            yield Err(e);
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(after_close(e, self.close().await));
                        break;
                    }
                }
            }
        }
    }

    /// Moves the iterator so the next advance yields the first key at or
    /// after `target` (at or before it when reversed).
    ///
    /// # Errors
    ///
    /// Same as [`DbIterator::seek_with`].
    pub fn seek(&self, target: impl Into<Value>) -> Result<()> {
        self.seek_with(target, SeekOptions::default())
    }

    /// Moves the iterator, encoding `target` with the given options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IteratorNotOpen`] after close, [`Error::IteratorBusy`]
    /// while an advance is in flight, or [`Error::NotSupported`] if the
    /// engine cannot seek.
    pub fn seek_with(&self, target: impl Into<Value>, options: SeekOptions) -> Result<()> {
        self.core.seek(&target.into(), &options)
    }

    /// Closes the iterator. Later calls return `Ok` without doing anything.
    ///
    /// Waits for an advance in flight to finish first.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure to close the cursor.
    pub async fn close(&self) -> Result<()> {
        self.core.close().await
    }

    /// Returns how many entries have been yielded so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.core.state.lock().count
    }

    /// Returns the configured limit.
    #[must_use]
    pub fn limit(&self) -> Limit {
        self.core.limit.map_or(Limit::Infinite, Limit::Bounded)
    }

    /// Returns whether the iterator was created before the database was
    /// open, and so was bound to its cursor later.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.core.state.lock().deferred
    }

    /// Returns whether close has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.state.lock().closing
    }

    async fn advance_items(&self, size: usize, op: &'static str) -> Result<Vec<M::Item>> {
        self.core.advance::<M>(size, op).await
    }
}

/// Merges the outcome of a walk with the outcome of the close that follows.
fn merge(walked: Result<()>, closed: Result<()>) -> Result<()> {
    match (walked, closed) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(first), Err(second)) => Err(first.followed_by(second)),
    }
}

fn after_close(error: Error, closed: Result<()>) -> Error {
    match closed {
        Ok(()) => error,
        Err(e) => error.followed_by(e),
    }
}

impl IteratorCore {
    /// Runs one engine advance and decodes what it returns. Only entries
    /// that decode count towards the limit.
    async fn advance<M: Mode>(&self, size: usize, op: &'static str) -> Result<Vec<M::Item>> {
        let (n, seek, mut guard) = {
            let mut state = self.state.lock();
            if state.closing {
                return Err(Error::IteratorNotOpen { op });
            }
            if state.busy {
                return Err(Error::IteratorBusy);
            }
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }
            let remaining = self
                .limit
                .map_or(usize::MAX, |limit| limit.saturating_sub(state.count));
            if state.ended || remaining == 0 {
                return Ok(Vec::new());
            }
            state.busy = true;
            let guard = Advance {
                core: self,
                cursor: state.cursor.take(),
                pending: state.pending.take(),
            };
            (size.clamp(1, remaining), state.seek.take(), guard)
        };

        if self.signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
            drop(guard);
            return Err(self.abort().await);
        }

        // Bound after the open completed
        if let Some(rx) = guard.pending.as_mut() {
            let bound = match &self.signal {
                Some(token) => tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    bound = rx => Some(bound),
                },
                None => Some(rx.await),
            };
            let Some(bound) = bound else {
                drop(guard);
                return Err(self.abort().await);
            };
            guard.pending = None;
            match bound.unwrap_or(Err(Error::NotOpen)) {
                Ok(cursor) => guard.cursor = Some(cursor),
                Err(e) => {
                    self.state.lock().failure = Some(e.clone());
                    return Err(e);
                }
            }
        }

        let Some(cursor) = guard.cursor.as_mut() else {
            return Err(Error::IteratorNotOpen { op });
        };
        if let Some(target) = seek {
            cursor.seek(&target);
        }

        let call = async move {
            if n == 1 {
                cursor.next().await.map(|entry| entry.into_iter().collect())
            } else {
                cursor.nextv(n).await
            }
        };
        let outcome = match &self.signal {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => None,
                result = call => Some(result),
            },
            None => Some(call.await),
        };
        let Some(result) = outcome else {
            drop(guard);
            return Err(self.abort().await);
        };

        let entries: Vec<CursorEntry> =
            result.map_err(|e| Error::engine(EngineOp::IteratorNext, e))?;
        let ended = entries.is_empty();
        let items = entries
            .into_iter()
            .map(|entry| self.decode::<M>(entry))
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.state.lock();
        state.count += items.len();
        state.ended |= ended;
        drop(state);
        drop(guard);
        Ok(items)
    }

    async fn abort(&self) -> Error {
        debug!("iterator aborted");
        after_close(Error::Aborted, self.close().await)
    }

    fn decode<M: Mode>(&self, entry: CursorEntry) -> Result<M::Item> {
        let key = if M::KEYS {
            Some(self.codecs.decode_key(entry.key)?)
        } else {
            None
        };
        let value = if M::VALUES {
            Some(self.codecs.decode_value(entry.value)?)
        } else {
            None
        };
        M::assemble(key, value).ok_or_else(|| {
            CodecError::decode(self.codecs.key.name(), "engine entry is incomplete").into()
        })
    }

    fn seek(&self, target: &Value, options: &SeekOptions) -> Result<()> {
        {
            let state = self.state.lock();
            if state.closing {
                return Err(Error::IteratorNotOpen { op: "seek" });
            }
            if state.busy {
                return Err(Error::IteratorBusy);
            }
        }
        if !self.db.capabilities().seek {
            return Err(Error::NotSupported { operation: "seek" });
        }
        let target = match options.key_encoding.as_deref() {
            Some(name) => self
                .db
                .codecs(&self.space, Some(name), None)?
                .encode_key(target)?,
            None => self.codecs.encode_key(target)?,
        };

        let mut state = self.state.lock();
        state.seek = Some(target);
        state.ended = false;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut ran = false;
        let outcome = self
            .closed
            .get_or_init(|| {
                ran = true;
                self.shutdown()
            })
            .await;
        if ran {
            outcome.clone()
        } else {
            Ok(())
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.state.lock().closing = true;
        self.wait_idle().await;

        let (cursor, pending) = {
            let mut state = self.state.lock();
            (state.cursor.take(), state.pending.take())
        };
        let cursor = match (cursor, pending) {
            (Some(cursor), _) => Some(cursor),
            (None, Some(mut rx)) => match rx.try_recv() {
                // A cursor that failed to bind has nothing to release
                Ok(bound) => bound.ok(),
                Err(TryRecvError::Closed) => None,
                // Still opening: release the cursor once it is bound
                Err(TryRecvError::Empty) => match Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(release_when_bound(rx));
                        None
                    }
                    Err(_) => rx.await.ok().and_then(Result::ok),
                },
            },
            (None, None) => None,
        };

        let closed = match cursor {
            Some(mut cursor) => cursor
                .close()
                .await
                .map_err(|e| Error::engine(EngineOp::IteratorClose, e)),
            None => Ok(()),
        };

        let resource = self.resource.lock().take();
        if let Some(resource) = resource {
            self.db.resources().lock().remove(resource);
        }
        closed
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let busy = self.state.lock().busy;
            if !busy {
                return;
            }
            notified.await;
        }
    }
}

async fn release_when_bound(rx: oneshot::Receiver<Result<Box<dyn EngineCursor>>>) {
    if let Ok(Ok(mut cursor)) = rx.await {
        if let Err(e) = cursor.close().await {
            warn!(error = %e, "failed to release cursor bound after close");
        }
    }
}

#[async_trait]
impl Resource for IteratorCore {
    async fn release(&self) -> Result<()> {
        self.close().await
    }
}

impl<M: Mode> Drop for DbIterator<M> {
    fn drop(&mut self) {
        if self.core.closed.initialized() || self.core.state.lock().closing {
            return;
        }
        if let Ok(runtime) = Handle::try_current() {
            let core = Arc::clone(&self.core);
            runtime.spawn(async move {
                if let Err(e) = core.close().await {
                    warn!(error = %e, "dropped iterator failed to close");
                }
            });
        }
    }
}

impl<M: Mode> fmt::Debug for DbIterator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("DbIterator")
            .field("count", &state.count)
            .field("limit", &self.core.limit)
            .field("closed", &state.closing)
            .finish()
    }
}
