//! Database and per-operation options.

use crate::snapshot::Snapshot;
use kvlayer_codec::{EncodingRegistry, Value};
use kvlayer_engine::EngineOpenOptions;
use tokio_util::sync::CancellationToken;

/// Options fixed when a [`crate::Database`] is constructed.
#[derive(Debug, Clone, Default)]
pub struct DatabaseOptions {
    /// Default key encoding. `None` means `buffer`.
    pub key_encoding: Option<String>,

    /// Default value encoding. `None` means `buffer`.
    pub value_encoding: Option<String>,

    /// Encodings available to this database.
    pub encodings: EncodingRegistry,

    /// Options used by `open()` and by implicit opens.
    pub open: OpenOptions,
}

impl DatabaseOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default key encoding.
    #[must_use]
    pub fn key_encoding(mut self, name: impl Into<String>) -> Self {
        self.key_encoding = Some(name.into());
        self
    }

    /// Sets the default value encoding.
    #[must_use]
    pub fn value_encoding(mut self, name: impl Into<String>) -> Self {
        self.value_encoding = Some(name.into());
        self
    }

    /// Sets both default encodings.
    #[must_use]
    pub fn encoding(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.key_encoding(name.clone()).value_encoding(name)
    }

    /// Replaces the encoding registry.
    #[must_use]
    pub fn encodings(mut self, registry: EncodingRegistry) -> Self {
        self.encodings = registry;
        self
    }

    /// Sets the default open options.
    #[must_use]
    pub fn open_options(mut self, open: OpenOptions) -> Self {
        self.open = open;
        self
    }
}

/// Options for opening a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Fail if the database already exists.
    pub error_if_exists: bool,

    /// Ask the engine to compress stored data.
    pub compression: bool,

    /// Snapshots are created explicitly with `Database::snapshot`.
    pub explicit_snapshots: bool,

    /// Wait for an open already in flight instead of starting one.
    pub passive: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            compression: true,
            explicit_snapshots: true,
            passive: false,
        }
    }
}

impl OpenOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether the engine compresses data.
    #[must_use]
    pub const fn compression(mut self, value: bool) -> Self {
        self.compression = value;
        self
    }

    /// Sets whether snapshots are explicit.
    #[must_use]
    pub const fn explicit_snapshots(mut self, value: bool) -> Self {
        self.explicit_snapshots = value;
        self
    }

    /// Sets whether the open is passive.
    #[must_use]
    pub const fn passive(mut self, value: bool) -> Self {
        self.passive = value;
        self
    }

    pub(crate) fn to_engine(self) -> EngineOpenOptions {
        EngineOpenOptions {
            create_if_missing: self.create_if_missing,
            error_if_exists: self.error_if_exists,
            compression: self.compression,
            explicit_snapshots: self.explicit_snapshots,
        }
    }
}

/// Options for `get` and `get_many`.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Key encoding for this call.
    pub key_encoding: Option<String>,

    /// Value encoding for this call.
    pub value_encoding: Option<String>,

    /// Let the engine cache what is read.
    pub fill_cache: bool,

    /// Read from this snapshot.
    pub snapshot: Option<Snapshot>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            key_encoding: None,
            value_encoding: None,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl ReadOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key encoding.
    #[must_use]
    pub fn key_encoding(mut self, name: impl Into<String>) -> Self {
        self.key_encoding = Some(name.into());
        self
    }

    /// Sets the value encoding.
    #[must_use]
    pub fn value_encoding(mut self, name: impl Into<String>) -> Self {
        self.value_encoding = Some(name.into());
        self
    }

    /// Sets whether to fill the engine cache.
    #[must_use]
    pub fn fill_cache(mut self, value: bool) -> Self {
        self.fill_cache = value;
        self
    }

    /// Reads from `snapshot`.
    #[must_use]
    pub fn snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self
    }
}

/// Options for writes: `put`, `del`, `batch` and chained batch entries.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Key encoding for this call.
    pub key_encoding: Option<String>,

    /// Value encoding for this call.
    pub value_encoding: Option<String>,

    /// Ask the engine to make the write durable before returning.
    pub sync: bool,
}

impl WriteOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key encoding.
    #[must_use]
    pub fn key_encoding(mut self, name: impl Into<String>) -> Self {
        self.key_encoding = Some(name.into());
        self
    }

    /// Sets the value encoding.
    #[must_use]
    pub fn value_encoding(mut self, name: impl Into<String>) -> Self {
        self.value_encoding = Some(name.into());
        self
    }

    /// Sets whether the write is synchronous.
    #[must_use]
    pub fn sync(mut self, value: bool) -> Self {
        self.sync = value;
        self
    }
}

/// Maximum number of entries an iterator or clear may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Limit {
    /// At most this many.
    Bounded(usize),
    /// No limit.
    #[default]
    Infinite,
}

impl Limit {
    /// Returns the bound, if any.
    #[must_use]
    pub const fn as_option(self) -> Option<usize> {
        match self {
            Self::Bounded(n) => Some(n),
            Self::Infinite => None,
        }
    }
}

/// Key range, direction and limit.
///
/// `gte` takes precedence over `gt`, and `lte` over `lt`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeOptions {
    /// Keys strictly greater than this.
    pub gt: Option<Value>,
    /// Keys greater than or equal to this.
    pub gte: Option<Value>,
    /// Keys strictly less than this.
    pub lt: Option<Value>,
    /// Keys less than or equal to this.
    pub lte: Option<Value>,
    /// Visit keys in descending order.
    pub reverse: bool,
    /// Maximum number of entries.
    pub limit: Limit,
}

impl RangeOptions {
    /// Creates an unbounded forward range.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the exclusive lower bound.
    #[must_use]
    pub fn gt(mut self, key: impl Into<Value>) -> Self {
        self.gt = Some(key.into());
        self
    }

    /// Sets the inclusive lower bound.
    #[must_use]
    pub fn gte(mut self, key: impl Into<Value>) -> Self {
        self.gte = Some(key.into());
        self
    }

    /// Sets the exclusive upper bound.
    #[must_use]
    pub fn lt(mut self, key: impl Into<Value>) -> Self {
        self.lt = Some(key.into());
        self
    }

    /// Sets the inclusive upper bound.
    #[must_use]
    pub fn lte(mut self, key: impl Into<Value>) -> Self {
        self.lte = Some(key.into());
        self
    }

    /// Sets the direction.
    #[must_use]
    pub fn reverse(mut self, value: bool) -> Self {
        self.reverse = value;
        self
    }

    /// Caps the number of entries.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Limit::Bounded(n);
        self
    }
}

/// Options for `iterator`, `keys` and `values`.
#[derive(Debug, Clone)]
pub struct IteratorOptions {
    /// Range, direction and limit.
    pub range: RangeOptions,

    /// Key encoding for this iterator.
    pub key_encoding: Option<String>,

    /// Value encoding for this iterator.
    pub value_encoding: Option<String>,

    /// Let the engine cache what is scanned.
    pub fill_cache: bool,

    /// Iterate over this snapshot.
    pub snapshot: Option<Snapshot>,

    /// Cancelling this token aborts the iterator.
    pub signal: Option<CancellationToken>,
}

impl Default for IteratorOptions {
    fn default() -> Self {
        Self {
            range: RangeOptions::default(),
            key_encoding: None,
            value_encoding: None,
            fill_cache: true,
            snapshot: None,
            signal: None,
        }
    }
}

impl IteratorOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the range.
    #[must_use]
    pub fn range(mut self, range: RangeOptions) -> Self {
        self.range = range;
        self
    }

    /// Sets the exclusive lower bound.
    #[must_use]
    pub fn gt(mut self, key: impl Into<Value>) -> Self {
        self.range = self.range.gt(key);
        self
    }

    /// Sets the inclusive lower bound.
    #[must_use]
    pub fn gte(mut self, key: impl Into<Value>) -> Self {
        self.range = self.range.gte(key);
        self
    }

    /// Sets the exclusive upper bound.
    #[must_use]
    pub fn lt(mut self, key: impl Into<Value>) -> Self {
        self.range = self.range.lt(key);
        self
    }

    /// Sets the inclusive upper bound.
    #[must_use]
    pub fn lte(mut self, key: impl Into<Value>) -> Self {
        self.range = self.range.lte(key);
        self
    }

    /// Sets the direction.
    #[must_use]
    pub fn reverse(mut self, value: bool) -> Self {
        self.range = self.range.reverse(value);
        self
    }

    /// Caps the number of entries.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.range = self.range.limit(n);
        self
    }

    /// Sets the key encoding.
    #[must_use]
    pub fn key_encoding(mut self, name: impl Into<String>) -> Self {
        self.key_encoding = Some(name.into());
        self
    }

    /// Sets the value encoding.
    #[must_use]
    pub fn value_encoding(mut self, name: impl Into<String>) -> Self {
        self.value_encoding = Some(name.into());
        self
    }

    /// Sets whether to fill the engine cache.
    #[must_use]
    pub fn fill_cache(mut self, value: bool) -> Self {
        self.fill_cache = value;
        self
    }

    /// Iterates over `snapshot`.
    #[must_use]
    pub fn snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self
    }

    /// Attaches an abort signal.
    #[must_use]
    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.signal = Some(token);
        self
    }
}

/// Options for `clear`.
#[derive(Debug, Clone, Default)]
pub struct ClearOptions {
    /// Range, direction and limit.
    pub range: RangeOptions,

    /// Key encoding for the range bounds.
    pub key_encoding: Option<String>,

    /// Decide what to delete as seen by this snapshot.
    pub snapshot: Option<Snapshot>,
}

impl ClearOptions {
    /// Creates options that clear everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the range.
    #[must_use]
    pub fn range(mut self, range: RangeOptions) -> Self {
        self.range = range;
        self
    }

    /// Sets the key encoding.
    #[must_use]
    pub fn key_encoding(mut self, name: impl Into<String>) -> Self {
        self.key_encoding = Some(name.into());
        self
    }

    /// Clears keys as seen by `snapshot`.
    #[must_use]
    pub fn snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self
    }
}

/// Options for `Database::sublevel`.
#[derive(Debug, Clone, Default)]
pub struct SublevelOptions {
    /// Default key encoding inside the sublevel.
    pub key_encoding: Option<String>,

    /// Default value encoding inside the sublevel.
    pub value_encoding: Option<String>,
}

impl SublevelOptions {
    /// Creates options that inherit the parent's encodings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key encoding.
    #[must_use]
    pub fn key_encoding(mut self, name: impl Into<String>) -> Self {
        self.key_encoding = Some(name.into());
        self
    }

    /// Sets the value encoding.
    #[must_use]
    pub fn value_encoding(mut self, name: impl Into<String>) -> Self {
        self.value_encoding = Some(name.into());
        self
    }
}

/// Options for `seek_with`.
#[derive(Debug, Clone, Default)]
pub struct SeekOptions {
    /// Key encoding for the target.
    pub key_encoding: Option<String>,
}

impl SeekOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key encoding.
    #[must_use]
    pub fn key_encoding(mut self, name: impl Into<String>) -> Self {
        self.key_encoding = Some(name.into());
        self
    }
}
