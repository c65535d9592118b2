//! An engine with scripted faults and delays.
//!
//! [`ScriptedEngine`] wraps a [`MemoryEngine`] and fails or stalls chosen
//! calls, so tests can drive the database through failed opens, iterator
//! errors, failed closes and in-flight advances. It also counts the calls
//! it sees.

use async_trait::async_trait;
use bytes::Bytes;
use kvlayer_engine::{
    BatchOp, Capabilities, CursorEntry, Engine, EngineCursor, EngineError, EngineIteratorOptions,
    EngineOpenOptions, EngineRange, EngineReadOptions, EngineResult, EngineWriteOptions,
    MemoryEngine, SnapshotId,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Faults and delays applied by a [`ScriptedEngine`].
#[derive(Debug, Clone, Default)]
struct Script {
    open_delay: Option<Duration>,
    open_error: Option<String>,
    close_error: Option<String>,
    batch_error: Option<String>,
    next_delay: Option<Duration>,
    next_error: Option<String>,
    cursor_close_error: Option<String>,
    no_snapshots: bool,
    no_seek: bool,
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    batches: AtomicUsize,
    cursors_opened: AtomicUsize,
    cursors_closed: AtomicUsize,
    advances: AtomicUsize,
}

/// Calls observed by a [`ScriptedEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCalls {
    /// `open` calls.
    pub opens: usize,
    /// `close` calls.
    pub closes: usize,
    /// `batch` calls.
    pub batches: usize,
    /// Cursors created.
    pub cursors_opened: usize,
    /// Cursor `close` calls.
    pub cursors_closed: usize,
    /// Cursor `next` and `nextv` calls.
    pub advances: usize,
}

/// A [`MemoryEngine`] with scripted faults.
///
/// ```rust
/// use kvlayer_testkit::ScriptedEngine;
/// use std::time::Duration;
///
/// let engine = ScriptedEngine::new()
///     .delay_open(Duration::from_millis(10))
///     .fail_next("next error");
/// assert_eq!(engine.calls().opens, 0);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    memory: MemoryEngine,
    script: Script,
    counters: Arc<Counters>,
}

impl ScriptedEngine {
    /// Creates an engine that behaves like a plain [`MemoryEngine`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open` wait before doing anything.
    #[must_use]
    pub fn delay_open(mut self, delay: Duration) -> Self {
        self.script.open_delay = Some(delay);
        self
    }

    /// Makes `open` fail with `message`.
    #[must_use]
    pub fn fail_open(mut self, message: impl Into<String>) -> Self {
        self.script.open_error = Some(message.into());
        self
    }

    /// Makes `close` fail with `message`, leaving the engine open.
    #[must_use]
    pub fn fail_close(mut self, message: impl Into<String>) -> Self {
        self.script.close_error = Some(message.into());
        self
    }

    /// Makes `batch` fail with `message` without applying anything.
    #[must_use]
    pub fn fail_batch(mut self, message: impl Into<String>) -> Self {
        self.script.batch_error = Some(message.into());
        self
    }

    /// Makes every cursor advance wait before doing anything.
    #[must_use]
    pub fn delay_next(mut self, delay: Duration) -> Self {
        self.script.next_delay = Some(delay);
        self
    }

    /// Makes every cursor advance fail with `message`.
    #[must_use]
    pub fn fail_next(mut self, message: impl Into<String>) -> Self {
        self.script.next_error = Some(message.into());
        self
    }

    /// Makes cursor `close` fail with `message` after releasing the cursor.
    #[must_use]
    pub fn fail_cursor_close(mut self, message: impl Into<String>) -> Self {
        self.script.cursor_close_error = Some(message.into());
        self
    }

    /// Reports no explicit snapshot support.
    #[must_use]
    pub fn without_snapshots(mut self) -> Self {
        self.script.no_snapshots = true;
        self
    }

    /// Reports no seek support.
    #[must_use]
    pub fn without_seek(mut self) -> Self {
        self.script.no_seek = true;
        self
    }

    /// Seeds the underlying store.
    #[must_use]
    pub fn with_entries(mut self, entries: impl IntoIterator<Item = (Bytes, Bytes)>) -> Self {
        self.memory = MemoryEngine::with_entries(entries);
        self
    }

    /// Returns the wrapped engine.
    #[must_use]
    pub fn memory(&self) -> &MemoryEngine {
        &self.memory
    }

    /// Returns the calls seen so far.
    #[must_use]
    pub fn calls(&self) -> EngineCalls {
        let c = &self.counters;
        EngineCalls {
            opens: c.opens.load(Ordering::SeqCst),
            closes: c.closes.load(Ordering::SeqCst),
            batches: c.batches.load(Ordering::SeqCst),
            cursors_opened: c.cursors_opened.load(Ordering::SeqCst),
            cursors_closed: c.cursors_closed.load(Ordering::SeqCst),
            advances: c.advances.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn open(&self, location: &Path, options: &EngineOpenOptions) -> EngineResult<()> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.script.open_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.script.open_error {
            return Err(EngineError::custom(message.clone()));
        }
        self.memory.open(location, options).await
    }

    async fn close(&self) -> EngineResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.script.close_error {
            return Err(EngineError::custom(message.clone()));
        }
        self.memory.close().await
    }

    async fn get(&self, key: Bytes, options: &EngineReadOptions) -> EngineResult<Option<Bytes>> {
        self.memory.get(key, options).await
    }

    async fn get_many(
        &self,
        keys: Vec<Bytes>,
        options: &EngineReadOptions,
    ) -> EngineResult<Vec<Option<Bytes>>> {
        self.memory.get_many(keys, options).await
    }

    async fn put(
        &self,
        key: Bytes,
        value: Bytes,
        options: &EngineWriteOptions,
    ) -> EngineResult<()> {
        self.memory.put(key, value, options).await
    }

    async fn del(&self, key: Bytes, options: &EngineWriteOptions) -> EngineResult<()> {
        self.memory.del(key, options).await
    }

    async fn clear(&self, range: &EngineRange, snapshot: Option<SnapshotId>) -> EngineResult<()> {
        self.memory.clear(range, snapshot).await
    }

    async fn batch(&self, ops: Vec<BatchOp>, options: &EngineWriteOptions) -> EngineResult<()> {
        self.counters.batches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.script.batch_error {
            return Err(EngineError::custom(message.clone()));
        }
        self.memory.batch(ops, options).await
    }

    fn iterator(&self, options: EngineIteratorOptions) -> EngineResult<Box<dyn EngineCursor>> {
        let inner = self.memory.iterator(options)?;
        self.counters.cursors_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCursor {
            inner,
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn approximate_size(&self, start: Bytes, end: Bytes) -> EngineResult<u64> {
        self.memory.approximate_size(start, end).await
    }

    async fn compact_range(&self, start: Bytes, end: Bytes) -> EngineResult<()> {
        self.memory.compact_range(start, end).await
    }

    fn get_property(&self, name: &str) -> EngineResult<Option<String>> {
        self.memory.get_property(name)
    }

    fn snapshot_create(&self) -> EngineResult<SnapshotId> {
        self.memory.snapshot_create()
    }

    fn snapshot_close(&self, snapshot: SnapshotId) -> EngineResult<()> {
        self.memory.snapshot_close(snapshot)
    }

    async fn destroy(&self, location: &Path) -> EngineResult<()> {
        self.memory.destroy(location).await
    }

    async fn repair(&self, location: &Path) -> EngineResult<()> {
        self.memory.repair(location).await
    }

    fn capabilities(&self) -> Capabilities {
        let mut capabilities = self.memory.capabilities();
        if self.script.no_snapshots {
            capabilities.explicit_snapshots = false;
        }
        if self.script.no_seek {
            capabilities.seek = false;
        }
        capabilities
    }
}

struct ScriptedCursor {
    inner: Box<dyn EngineCursor>,
    script: Script,
    counters: Arc<Counters>,
}

impl ScriptedCursor {
    async fn before_advance(&mut self) -> EngineResult<()> {
        self.counters.advances.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.script.next_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script.next_error {
            Some(message) => Err(EngineError::custom(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EngineCursor for ScriptedCursor {
    async fn next(&mut self) -> EngineResult<Option<CursorEntry>> {
        self.before_advance().await?;
        self.inner.next().await
    }

    async fn nextv(&mut self, size: usize) -> EngineResult<Vec<CursorEntry>> {
        self.before_advance().await?;
        self.inner.nextv(size).await
    }

    fn seek(&mut self, target: &[u8]) {
        self.inner.seek(target);
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.counters.cursors_closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await?;
        match &self.script.cursor_close_error {
            Some(message) => Err(EngineError::custom(message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_and_faults() {
        let engine = ScriptedEngine::new().fail_batch("disk full");
        let location = Path::new("/scripted");
        engine.open(location, &EngineOpenOptions::default()).await.unwrap();

        let err = engine
            .batch(
                vec![BatchOp::Put {
                    key: Bytes::from_static(b"k"),
                    value: Bytes::from_static(b"v"),
                }],
                &EngineWriteOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert!(engine.memory().entries().is_empty());

        let mut cursor = engine.iterator(EngineIteratorOptions::default()).unwrap();
        assert!(cursor.next().await.unwrap().is_none());
        cursor.close().await.unwrap();

        let calls = engine.calls();
        assert_eq!(calls.opens, 1);
        assert_eq!(calls.batches, 1);
        assert_eq!(calls.cursors_opened, 1);
        assert_eq!(calls.cursors_closed, 1);
        assert_eq!(calls.advances, 1);
    }

    #[test]
    fn capabilities_can_be_withdrawn() {
        let engine = ScriptedEngine::new().without_snapshots().without_seek();
        let capabilities = engine.capabilities();
        assert!(!capabilities.explicit_snapshots);
        assert!(!capabilities.seek);
    }
}
