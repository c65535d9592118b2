//! # kvlayer Core
//!
//! The database abstraction layer of kvlayer.
//!
//! This crate sits between callers and a pluggable [`kvlayer_engine::Engine`]:
//!
//! - Lifecycle state machine: open, close, passive open, implicit open
//! - Deferred operations: calls issued while opening run in order once open
//! - Encodings: keys, values, range bounds and seek targets go through
//!   [`kvlayer_codec`] encodings chosen per call, per sublevel or per database
//! - Iterators with exactly-once close, abort signals and stream adapters
//! - Chained batches, explicit snapshots and prefixed sublevels
//!
//! ## Example
//!
//! ```rust
//! use kvlayer_core::{Database, DatabaseOptions, IteratorOptions};
//! use kvlayer_engine::MemoryEngine;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> kvlayer_core::Result<()> {
//! let db = Database::with_options("example", MemoryEngine::new(), DatabaseOptions::new().encoding("utf8"))?;
//!
//! db.put("1", "1").await?;
//! db.put("2", "2").await?;
//!
//! let entries = db.iterator(IteratorOptions::new())?.all().await?;
//! assert_eq!(entries, vec![("1".into(), "1".into()), ("2".into(), "2".into())]);
//!
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod database;
mod error;
mod iterator;
mod keyspace;
mod lifecycle;
mod options;
mod registry;
mod resource;
mod snapshot;
mod sublevel;

pub use batch::{BatchOperation, ChainedBatch};
pub use database::Database;
pub use error::{combine, CombinedError, EngineOp, Error, Result};
pub use iterator::{
    DbIterator, Entries, EntryIterator, KeyIterator, Keys, Mode, ValueIterator, Values,
};
pub use lifecycle::Status;
pub use options::{
    ClearOptions, DatabaseOptions, IteratorOptions, Limit, OpenOptions, RangeOptions,
    ReadOptions, SeekOptions, SublevelOptions, WriteOptions,
};
pub use registry::InstanceRegistry;
pub use snapshot::Snapshot;
pub use sublevel::Sublevel;

pub use kvlayer_codec::{EncodingRegistry, Value};
pub use tokio_util::sync::CancellationToken;
