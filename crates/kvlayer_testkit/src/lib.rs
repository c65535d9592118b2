//! # kvlayer Testkit
//!
//! Test utilities for kvlayer.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - [`ScriptedEngine`], an engine with injected faults and delays
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use kvlayer_testkit::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let db = TestDatabase::memory();
//! db.seed([("a", "1")]).await;
//! assert_eq!(db.get("a").await.unwrap(), Some("1".into()));
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod scripted;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::scripted::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use scripted::*;
pub use stress::*;
