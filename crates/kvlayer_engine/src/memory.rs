//! In-memory engine for testing and ephemeral databases.

use crate::engine::{
    BatchOp, Capabilities, CursorEntry, Engine, EngineCursor, EngineIteratorOptions,
    EngineOpenOptions, EngineRange, EngineReadOptions, EngineWriteOptions, SnapshotId,
};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

pub(crate) type Map = BTreeMap<Bytes, Bytes>;

/// An in-memory engine.
///
/// Data lives in a copy-on-write `BTreeMap`: snapshots and cursors hold a
/// reference to the map as it was when they were created, and the next write
/// clones it only if such a reference is still alive. Data survives a
/// close/open cycle of the same engine value but not the value itself.
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use kvlayer_engine::{Engine, EngineOpenOptions, EngineReadOptions, EngineWriteOptions, MemoryEngine};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let engine = MemoryEngine::new();
/// engine.open(Path::new("/mem"), &EngineOpenOptions::default()).await.unwrap();
/// engine.put(Bytes::from("a"), Bytes::from("1"), &EngineWriteOptions::default()).await.unwrap();
/// let value = engine.get(Bytes::from("a"), &EngineReadOptions::default()).await.unwrap();
/// assert_eq!(value, Some(Bytes::from("1")));
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    open: bool,
    created: bool,
    compression: bool,
    data: Arc<Map>,
    snapshots: HashMap<u64, Arc<Map>>,
    next_snapshot: u64,
}

impl MemoryState {
    fn ensure_open(&self) -> EngineResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(EngineError::NotOpen)
        }
    }

    fn view(&self, snapshot: Option<SnapshotId>) -> EngineResult<Arc<Map>> {
        match snapshot {
            None => Ok(Arc::clone(&self.data)),
            Some(id) => self
                .snapshots
                .get(&id.0)
                .cloned()
                .ok_or(EngineError::UnknownSnapshot(id.0)),
        }
    }

    /// Keys of `view` that fall in `range`.
    fn keys_in(view: Arc<Map>, range: &EngineRange) -> Vec<Bytes> {
        let mut cursor = MemoryCursor::new(
            view,
            EngineIteratorOptions {
                range: range.clone(),
                values: false,
                ..EngineIteratorOptions::default()
            },
        );
        let mut keys = Vec::new();
        while let Some(entry) = cursor.advance() {
            if let Some(key) = entry.key {
                keys.push(key);
            }
        }
        keys
    }
}

fn apply_ops(data: &mut Map, ops: impl IntoIterator<Item = BatchOp>) {
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                data.insert(key, value);
            }
            BatchOp::Del { key } => {
                data.remove(&key);
            }
        }
    }
}

impl MemoryEngine {
    /// Creates a new, empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine pre-populated with `entries`, as if it had been
    /// opened and written to before.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = (Bytes, Bytes)>) -> Self {
        let engine = Self::new();
        {
            let mut state = engine.state.write();
            state.data = Arc::new(entries.into_iter().collect());
            state.created = true;
        }
        engine
    }

    /// Returns a copy of every stored entry, in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Bytes, Bytes)> {
        self.state
            .read()
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replaces all stored entries.
    pub fn replace_entries(&self, entries: impl IntoIterator<Item = (Bytes, Bytes)>) {
        let mut state = self.state.write();
        state.data = Arc::new(entries.into_iter().collect());
        state.created = true;
    }

    /// Returns true between a successful `open` and the following `close`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.read().open
    }

    /// Returns the number of snapshots that have not been released.
    #[must_use]
    pub fn live_snapshots(&self) -> usize {
        self.state.read().snapshots.len()
    }

    pub(crate) fn compression(&self) -> bool {
        self.state.read().compression
    }

    /// The live map.
    pub(crate) fn current(&self) -> EngineResult<Arc<Map>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(Arc::clone(&state.data))
    }

    /// Returns the map `ops` would produce, leaving the live map untouched.
    pub(crate) fn stage_batch(&self, ops: Vec<BatchOp>) -> EngineResult<Arc<Map>> {
        let mut next = self.current()?;
        apply_ops(Arc::make_mut(&mut next), ops);
        Ok(next)
    }

    /// Returns the map a `clear` of `range` would produce, leaving the live
    /// map untouched.
    pub(crate) fn stage_clear(
        &self,
        range: &EngineRange,
        snapshot: Option<SnapshotId>,
    ) -> EngineResult<Arc<Map>> {
        let (mut next, view) = {
            let state = self.state.read();
            state.ensure_open()?;
            (Arc::clone(&state.data), state.view(snapshot)?)
        };
        let doomed = MemoryState::keys_in(view, range);
        let data = Arc::make_mut(&mut next);
        for key in doomed {
            data.remove(&key);
        }
        Ok(next)
    }

    /// Makes a staged map the live one.
    pub(crate) fn install(&self, data: Arc<Map>) {
        self.state.write().data = data;
    }

    fn approximate_memory_usage(data: &Map) -> u64 {
        data.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn open(&self, location: &Path, options: &EngineOpenOptions) -> EngineResult<()> {
        let mut state = self.state.write();
        if state.open {
            return Err(EngineError::AlreadyOpen);
        }
        if state.created && options.error_if_exists {
            return Err(EngineError::AlreadyExists {
                location: location.to_path_buf(),
            });
        }
        if !state.created && !options.create_if_missing {
            return Err(EngineError::DoesNotExist {
                location: location.to_path_buf(),
            });
        }
        state.open = true;
        state.created = true;
        state.compression = options.compression;
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.open = false;
        state.snapshots.clear();
        Ok(())
    }

    async fn get(&self, key: Bytes, options: &EngineReadOptions) -> EngineResult<Option<Bytes>> {
        let state = self.state.read();
        state.ensure_open()?;
        let view = state.view(options.snapshot)?;
        Ok(view.get(&key).cloned())
    }

    async fn get_many(
        &self,
        keys: Vec<Bytes>,
        options: &EngineReadOptions,
    ) -> EngineResult<Vec<Option<Bytes>>> {
        let state = self.state.read();
        state.ensure_open()?;
        let view = state.view(options.snapshot)?;
        Ok(keys.iter().map(|key| view.get(key).cloned()).collect())
    }

    async fn put(
        &self,
        key: Bytes,
        value: Bytes,
        _options: &EngineWriteOptions,
    ) -> EngineResult<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        Arc::make_mut(&mut state.data).insert(key, value);
        Ok(())
    }

    async fn del(&self, key: Bytes, _options: &EngineWriteOptions) -> EngineResult<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        Arc::make_mut(&mut state.data).remove(&key);
        Ok(())
    }

    async fn clear(&self, range: &EngineRange, snapshot: Option<SnapshotId>) -> EngineResult<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        let view = state.view(snapshot)?;
        let doomed = MemoryState::keys_in(view, range);

        let data = Arc::make_mut(&mut state.data);
        for key in doomed {
            data.remove(&key);
        }
        Ok(())
    }

    async fn batch(&self, ops: Vec<BatchOp>, _options: &EngineWriteOptions) -> EngineResult<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        apply_ops(Arc::make_mut(&mut state.data), ops);
        Ok(())
    }

    fn iterator(&self, options: EngineIteratorOptions) -> EngineResult<Box<dyn EngineCursor>> {
        let state = self.state.read();
        state.ensure_open()?;
        let view = state.view(options.snapshot)?;
        Ok(Box::new(MemoryCursor::new(view, options)))
    }

    async fn approximate_size(&self, start: Bytes, end: Bytes) -> EngineResult<u64> {
        let state = self.state.read();
        state.ensure_open()?;
        if start >= end {
            return Ok(0);
        }
        Ok(state
            .data
            .range::<Bytes, _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum())
    }

    async fn compact_range(&self, _start: Bytes, _end: Bytes) -> EngineResult<()> {
        // Nothing to compact in memory
        self.state.read().ensure_open()
    }

    fn get_property(&self, name: &str) -> EngineResult<Option<String>> {
        let state = self.state.read();
        state.ensure_open()?;
        let value = match name {
            "kvlayer.stats" => Some(format!(
                "entries: {}\nsnapshots: {}\nbytes: {}",
                state.data.len(),
                state.snapshots.len(),
                Self::approximate_memory_usage(&state.data)
            )),
            "kvlayer.approximate-memory-usage" => {
                Some(Self::approximate_memory_usage(&state.data).to_string())
            }
            "kvlayer.compression" => Some(state.compression.to_string()),
            _ => None,
        };
        Ok(value)
    }

    fn snapshot_create(&self) -> EngineResult<SnapshotId> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.next_snapshot += 1;
        let id = state.next_snapshot;
        let pinned = Arc::clone(&state.data);
        state.snapshots.insert(id, pinned);
        Ok(SnapshotId(id))
    }

    fn snapshot_close(&self, snapshot: SnapshotId) -> EngineResult<()> {
        let mut state = self.state.write();
        state
            .snapshots
            .remove(&snapshot.0)
            .map(|_| ())
            .ok_or(EngineError::UnknownSnapshot(snapshot.0))
    }

    async fn destroy(&self, location: &Path) -> EngineResult<()> {
        let mut state = self.state.write();
        if state.open {
            return Err(EngineError::Locked {
                location: location.to_path_buf(),
            });
        }
        state.data = Arc::new(Map::new());
        state.created = false;
        Ok(())
    }

    async fn repair(&self, _location: &Path) -> EngineResult<()> {
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            permanence: false,
            implicit_snapshots: true,
            explicit_snapshots: true,
            seek: true,
            approximate_size: true,
            compact_range: true,
        }
    }
}

/// A cursor over a pinned copy of a [`MemoryEngine`]'s map.
#[derive(Debug)]
pub struct MemoryCursor {
    data: Arc<Map>,
    range: EngineRange,
    keys: bool,
    values: bool,
    /// Forward: lowest key still to visit. Reverse: highest.
    position: Bound<Bytes>,
    yielded: usize,
    closed: bool,
}

impl MemoryCursor {
    fn new(data: Arc<Map>, options: EngineIteratorOptions) -> Self {
        let position = if options.range.reverse {
            options.range.upper.clone()
        } else {
            options.range.lower.clone()
        };
        Self {
            data,
            range: options.range,
            keys: options.keys,
            values: options.values,
            position,
            yielded: 0,
            closed: false,
        }
    }

    fn advance(&mut self) -> Option<CursorEntry> {
        if self.range.limit.is_some_and(|limit| self.yielded >= limit) {
            return None;
        }

        let range = &self.range;
        let found = if range.reverse {
            self.data
                .range::<Bytes, _>((Bound::Unbounded, self.position.clone()))
                .rev()
                .take_while(|(k, _)| range.above_lower(k))
                .find(|(k, _)| range.below_upper(k))
                .map(|(k, v)| (k.clone(), v.clone()))
        } else {
            self.data
                .range::<Bytes, _>((self.position.clone(), Bound::Unbounded))
                .take_while(|(k, _)| range.below_upper(k))
                .find(|(k, _)| range.above_lower(k))
                .map(|(k, v)| (k.clone(), v.clone()))
        };

        let (key, value) = found?;
        self.position = Bound::Excluded(key.clone());
        self.yielded += 1;
        Some(CursorEntry {
            key: self.keys.then_some(key),
            value: self.values.then_some(value),
        })
    }
}

#[async_trait]
impl EngineCursor for MemoryCursor {
    async fn next(&mut self) -> EngineResult<Option<CursorEntry>> {
        if self.closed {
            return Err(EngineError::NotOpen);
        }
        Ok(self.advance())
    }

    async fn nextv(&mut self, size: usize) -> EngineResult<Vec<CursorEntry>> {
        if self.closed {
            return Err(EngineError::NotOpen);
        }
        let mut entries = Vec::with_capacity(size.min(1024));
        while entries.len() < size {
            match self.advance() {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        Ok(entries)
    }

    fn seek(&mut self, target: &[u8]) {
        self.position = Bound::Included(Bytes::copy_from_slice(target));
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.closed = true;
        self.data = Arc::new(Map::new());
        Ok(())
    }
}
