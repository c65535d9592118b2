//! Engine binding contract.

use crate::error::EngineResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Bound;
use std::path::Path;

/// Engine-level representation requested for returned values.
///
/// Engines always hand back raw bytes; the tag is a hint that lets an engine
/// skip work (for example UTF-8 validation) when it knows the caller's
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueFormat {
    /// Opaque byte buffer.
    #[default]
    Buffer,
    /// UTF-8 text.
    Utf8,
    /// Byte view (typed-array style).
    View,
}

/// An opaque handle to a point-in-time view pinned inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub u64);

/// Options passed to [`Engine::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOpenOptions {
    /// Create the backing storage if it does not exist.
    pub create_if_missing: bool,
    /// Fail if the backing storage already exists.
    pub error_if_exists: bool,
    /// Compress values at rest.
    pub compression: bool,
    /// Snapshots are created explicitly by the caller.
    pub explicit_snapshots: bool,
}

impl Default for EngineOpenOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            compression: true,
            explicit_snapshots: true,
        }
    }
}

/// Options for point reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineReadOptions {
    /// Populate the engine's block cache with what is read.
    pub fill_cache: bool,
    /// Representation hint for returned values.
    pub format: ValueFormat,
    /// Read from this snapshot instead of the latest state.
    pub snapshot: Option<SnapshotId>,
}

impl Default for EngineReadOptions {
    fn default() -> Self {
        Self {
            fill_cache: true,
            format: ValueFormat::Buffer,
            snapshot: None,
        }
    }
}

/// Options for writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineWriteOptions {
    /// Wait for the write to be durable before returning.
    pub sync: bool,
}

/// A key range with direction and an optional cap on yielded entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRange {
    /// Lower key bound.
    pub lower: Bound<Bytes>,
    /// Upper key bound.
    pub upper: Bound<Bytes>,
    /// Iterate from the upper end towards the lower end.
    pub reverse: bool,
    /// Maximum number of entries; `None` means unbounded.
    pub limit: Option<usize>,
}

impl Default for EngineRange {
    fn default() -> Self {
        Self::all()
    }
}

impl EngineRange {
    /// The unbounded forward range.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            reverse: false,
            limit: None,
        }
    }

    /// Returns true if `key` is at or above the lower bound.
    #[must_use]
    pub fn above_lower(&self, key: &[u8]) -> bool {
        match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(k) => key >= k.as_ref(),
            Bound::Excluded(k) => key > k.as_ref(),
        }
    }

    /// Returns true if `key` is at or below the upper bound.
    #[must_use]
    pub fn below_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(k) => key <= k.as_ref(),
            Bound::Excluded(k) => key < k.as_ref(),
        }
    }

    /// Returns true if `key` falls inside both bounds.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.above_lower(key) && self.below_upper(key)
    }
}

/// Options for [`Engine::iterator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineIteratorOptions {
    /// Range, direction and limit.
    pub range: EngineRange,
    /// Yield keys.
    pub keys: bool,
    /// Yield values.
    pub values: bool,
    /// Populate the engine's block cache while scanning.
    pub fill_cache: bool,
    /// Representation hint for keys.
    pub key_format: ValueFormat,
    /// Representation hint for values.
    pub value_format: ValueFormat,
    /// Scan this snapshot instead of an implicit one.
    pub snapshot: Option<SnapshotId>,
}

impl Default for EngineIteratorOptions {
    fn default() -> Self {
        Self {
            range: EngineRange::all(),
            keys: true,
            values: true,
            fill_cache: true,
            key_format: ValueFormat::Buffer,
            value_format: ValueFormat::Buffer,
            snapshot: None,
        }
    }
}

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put {
        /// Encoded key.
        key: Bytes,
        /// Encoded value.
        value: Bytes,
    },
    /// Remove a key. No-op if absent.
    Del {
        /// Encoded key.
        key: Bytes,
    },
}

impl BatchOp {
    /// Returns the key this operation touches.
    #[must_use]
    pub fn key(&self) -> &Bytes {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Del { key } => key,
        }
    }
}

/// An entry yielded by a cursor. Fields the caller did not ask for are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorEntry {
    /// The entry's key, if requested.
    pub key: Option<Bytes>,
    /// The entry's value, if requested.
    pub value: Option<Bytes>,
}

/// What an engine can do beyond the mandatory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Data survives a close/open cycle.
    pub permanence: bool,
    /// Iterators and reads see a consistent implicit snapshot.
    pub implicit_snapshots: bool,
    /// [`Engine::snapshot_create`] is available.
    pub explicit_snapshots: bool,
    /// [`EngineCursor::seek`] is available.
    pub seek: bool,
    /// [`Engine::approximate_size`] is available.
    pub approximate_size: bool,
    /// [`Engine::compact_range`] is available.
    pub compact_range: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            permanence: false,
            implicit_snapshots: true,
            explicit_snapshots: false,
            seek: true,
            approximate_size: false,
            compact_range: false,
        }
    }
}

/// A forward-only cursor over an engine's key space.
///
/// # Invariants
///
/// - Entries are yielded in key order (descending if the range is reversed)
/// - `seek` only affects subsequent advances
/// - After `close` every advance fails with [`crate::EngineError::NotOpen`]
#[async_trait]
pub trait EngineCursor: Send {
    /// Advances one entry. Returns `None` once the range is exhausted.
    async fn next(&mut self) -> EngineResult<Option<CursorEntry>>;

    /// Advances up to `size` entries. An empty result means exhausted.
    async fn nextv(&mut self, size: usize) -> EngineResult<Vec<CursorEntry>> {
        let mut entries = Vec::with_capacity(size.min(1024));
        while entries.len() < size {
            match self.next().await? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        Ok(entries)
    }

    /// Repositions the cursor so that the next advance yields the first key
    /// at or after `target` (at or before it when reversed).
    fn seek(&mut self, target: &[u8]);

    /// Releases the cursor's engine resources.
    async fn close(&mut self) -> EngineResult<()>;
}

/// The narrow call surface of a key-value storage engine.
///
/// A value implementing this trait is an initialized engine handle. The
/// abstraction layer owns it exclusively and never assumes a concrete type.
///
/// # Implementors
///
/// - [`super::MemoryEngine`] - For testing and ephemeral databases
/// - [`super::FileEngine`] - For databases that survive restarts
#[async_trait]
pub trait Engine: Send + Sync {
    /// Opens the engine at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be opened with `options`.
    async fn open(&self, location: &Path, options: &EngineOpenOptions) -> EngineResult<()>;

    /// Closes the engine, releasing all engine state.
    async fn close(&self) -> EngineResult<()>;

    /// Reads a single key.
    async fn get(&self, key: Bytes, options: &EngineReadOptions) -> EngineResult<Option<Bytes>>;

    /// Reads several keys. The result has one slot per requested key.
    async fn get_many(
        &self,
        keys: Vec<Bytes>,
        options: &EngineReadOptions,
    ) -> EngineResult<Vec<Option<Bytes>>>;

    /// Writes a single key.
    async fn put(&self, key: Bytes, value: Bytes, options: &EngineWriteOptions)
        -> EngineResult<()>;

    /// Removes a single key.
    async fn del(&self, key: Bytes, options: &EngineWriteOptions) -> EngineResult<()>;

    /// Removes every key in `range`, as seen by `snapshot` if given.
    async fn clear(&self, range: &EngineRange, snapshot: Option<SnapshotId>) -> EngineResult<()>;

    /// Applies `ops` atomically, in order.
    async fn batch(&self, ops: Vec<BatchOp>, options: &EngineWriteOptions) -> EngineResult<()>;

    /// Creates a cursor over the engine's key space.
    fn iterator(&self, options: EngineIteratorOptions) -> EngineResult<Box<dyn EngineCursor>>;

    /// Estimates the bytes used by keys in `[start, end)`.
    async fn approximate_size(&self, start: Bytes, end: Bytes) -> EngineResult<u64>;

    /// Compacts the underlying storage for keys in `[start, end]`.
    async fn compact_range(&self, start: Bytes, end: Bytes) -> EngineResult<()>;

    /// Returns an engine-specific property, or `None` if unknown.
    fn get_property(&self, name: &str) -> EngineResult<Option<String>>;

    /// Pins the current state.
    fn snapshot_create(&self) -> EngineResult<SnapshotId>;

    /// Releases a pinned state.
    fn snapshot_close(&self, snapshot: SnapshotId) -> EngineResult<()>;

    /// Removes all data stored at `location`.
    async fn destroy(&self, location: &Path) -> EngineResult<()>;

    /// Attempts to recover a damaged database at `location`.
    async fn repair(&self, location: &Path) -> EngineResult<()>;

    /// Reports optional features.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn unbounded_range_contains_everything() {
        let range = EngineRange::all();
        assert!(range.contains(b""));
        assert!(range.contains(b"\xff\xff"));
    }

    #[test]
    fn inclusive_and_exclusive_bounds() {
        let range = EngineRange {
            lower: Bound::Excluded(key("b")),
            upper: Bound::Included(key("d")),
            ..EngineRange::all()
        };
        assert!(!range.contains(b"b"));
        assert!(range.contains(b"c"));
        assert!(range.contains(b"d"));
        assert!(!range.contains(b"da"));
    }

    #[test]
    fn batch_op_key() {
        let put = BatchOp::Put {
            key: key("a"),
            value: key("1"),
        };
        let del = BatchOp::Del { key: key("b") };
        assert_eq!(put.key(), &key("a"));
        assert_eq!(del.key(), &key("b"));
    }

    #[test]
    fn default_open_options() {
        let options = EngineOpenOptions::default();
        assert!(options.create_if_missing);
        assert!(!options.error_if_exists);
        assert!(options.compression);
    }
}
