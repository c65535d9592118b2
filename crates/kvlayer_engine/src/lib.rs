//! # kvlayer Engine
//!
//! The storage-engine contract for kvlayer, plus two reference engines.
//!
//! This crate is the lowest layer of kvlayer. Engines are **byte stores**:
//! they see encoded keys and values only and know nothing about encodings,
//! lifecycle queuing, or sublevels. Everything above that lives in
//! `kvlayer_core`.
//!
//! ## Design Principles
//!
//! - Engines are narrow: open, close, point reads/writes, atomic batches,
//!   cursors and snapshots
//! - Must be `Send + Sync` so one handle can serve concurrent callers
//! - Errors are cloneable so one failure can be reported to many waiters
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - For testing and ephemeral databases
//! - [`FileEngine`] - For databases that survive restarts

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod file;
mod memory;

pub use engine::{
    BatchOp, Capabilities, CursorEntry, Engine, EngineCursor, EngineIteratorOptions,
    EngineOpenOptions, EngineRange, EngineReadOptions, EngineWriteOptions, SnapshotId,
    ValueFormat,
};
pub use error::{EngineError, EngineResult};
pub use file::FileEngine;
pub use memory::{MemoryCursor, MemoryEngine};
