//! Error types for engine operations.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by an engine binding.
///
/// Errors are cheap to clone so that a single failure (for example a failed
/// open) can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The engine has not been opened, or has been closed.
    #[error("engine is not open")]
    NotOpen,

    /// The engine is already open.
    #[error("engine is already open")]
    AlreadyOpen,

    /// The location does not exist and `create_if_missing` was false.
    #[error("database does not exist: {}", location.display())]
    DoesNotExist {
        /// The resolved location.
        location: PathBuf,
    },

    /// The location exists and `error_if_exists` was true.
    #[error("database already exists: {}", location.display())]
    AlreadyExists {
        /// The resolved location.
        location: PathBuf,
    },

    /// Another handle holds the location's lock.
    #[error("database locked: another process has exclusive access to {}", location.display())]
    Locked {
        /// The resolved location.
        location: PathBuf,
    },

    /// A snapshot id was not issued by this engine or was already released.
    #[error("unknown snapshot {0}")]
    UnknownSnapshot(u64),

    /// Stored data could not be read back.
    #[error("data corrupted: {0}")]
    Corrupted(String),

    /// The engine does not implement the requested capability.
    #[error("operation not supported by engine: {0}")]
    Unsupported(&'static str),

    /// Any other failure, reported verbatim.
    #[error("{message}")]
    Custom {
        /// The failure message.
        message: String,
    },
}

impl EngineError {
    /// Creates an error carrying an arbitrary message.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
