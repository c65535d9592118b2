//! Error types for kvlayer core.

use kvlayer_codec::CodecError;
use kvlayer_engine::EngineError;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The engine call that produced an [`Error::Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    /// `Engine::open`.
    Open,
    /// `Engine::close`.
    Close,
    /// `Engine::get`.
    Get,
    /// `Engine::get_many`.
    GetMany,
    /// `Engine::put`.
    Put,
    /// `Engine::del`.
    Del,
    /// `Engine::clear`.
    Clear,
    /// `Engine::batch`.
    Batch,
    /// `Engine::iterator`.
    IteratorInit,
    /// `EngineCursor::next` / `nextv`.
    IteratorNext,
    /// `EngineCursor::close`.
    IteratorClose,
    /// `Engine::approximate_size`.
    ApproximateSize,
    /// `Engine::compact_range`.
    CompactRange,
    /// `Engine::get_property`.
    GetProperty,
    /// `Engine::snapshot_create`.
    SnapshotInit,
    /// `Engine::snapshot_close`.
    SnapshotClose,
    /// `Engine::destroy`.
    Destroy,
    /// `Engine::repair`.
    Repair,
}

impl EngineOp {
    /// Returns the stable code reported for failures of this call.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Open => "LEVEL_DATABASE_OPEN_FAILED",
            Self::Close => "LEVEL_DATABASE_CLOSE_FAILED",
            Self::Get => "LEVEL_DATABASE_GET_FAILED",
            Self::GetMany => "LEVEL_DATABASE_GET_MANY_FAILED",
            Self::Put => "LEVEL_DATABASE_PUT_FAILED",
            Self::Del => "LEVEL_DATABASE_DELETE_FAILED",
            Self::Clear => "LEVEL_DATABASE_CLEAR_FAILED",
            Self::Batch => "LEVEL_DATABASE_BATCH_FAILED",
            Self::IteratorInit => "LEVEL_ITERATOR_INIT_FAILED",
            Self::IteratorNext => "LEVEL_ITERATOR_NEXT_FAILED",
            Self::IteratorClose => "LEVEL_ITERATOR_CLOSE_FAILED",
            Self::ApproximateSize => "LEVEL_DATABASE_APPROXIMATE_SIZE_FAILED",
            Self::CompactRange => "LEVEL_DATABASE_COMPACT_FAILED",
            Self::GetProperty => "LEVEL_DATABASE_GET_PROPERTY_FAILED",
            Self::SnapshotInit => "LEVEL_SNAPSHOT_INIT_FAILED",
            Self::SnapshotClose => "LEVEL_SNAPSHOT_CLOSE_FAILED",
            Self::Destroy => "LEVEL_DATABASE_DESTROY_FAILED",
            Self::Repair => "LEVEL_DATABASE_REPAIR_FAILED",
        }
    }
}

/// Errors that can occur in kvlayer operations.
///
/// Cloneable so that one failure (a failed open, say) can be delivered to
/// every operation that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The database is not open and the operation cannot wait for it.
    #[error("database is not open")]
    NotOpen,

    /// The operation requires a database that is not open.
    #[error("database is already open")]
    AlreadyOpen,

    /// A passive open found the database closing.
    #[error("database is closing")]
    AlreadyClosing,

    /// The iterator has been closed.
    #[error("iterator is not open: cannot call {op}() after close()")]
    IteratorNotOpen {
        /// The rejected call.
        op: &'static str,
    },

    /// Another call on the same iterator is still in flight.
    #[error("iterator is busy: cannot call next() or seek() until the previous call has completed")]
    IteratorBusy,

    /// The chained batch has been written or closed.
    #[error("batch is not open: cannot call {op}() after write() or close()")]
    BatchNotOpen {
        /// The rejected call.
        op: &'static str,
    },

    /// The snapshot has been closed.
    #[error("snapshot is not open")]
    SnapshotNotOpen,

    /// The operation was cancelled through its abort signal.
    #[error("operation was aborted")]
    Aborted,

    /// Encoding lookup, encode or decode failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The engine rejected a call.
    #[error("{source}")]
    Engine {
        /// The failing call.
        op: EngineOp,
        /// The engine's error.
        #[source]
        source: EngineError,
    },

    /// Several failures on one path, in the order they happened.
    #[error(transparent)]
    Combined(#[from] CombinedError),

    /// A caller-supplied argument is invalid.
    #[error("{message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The engine does not offer this operation.
    #[error("{operation}() is not supported by this engine")]
    NotSupported {
        /// The unsupported operation.
        operation: &'static str,
    },
}

impl Error {
    /// Wraps an engine failure.
    ///
    /// An engine that reports itself closed maps to [`Error::NotOpen`].
    pub fn engine(op: EngineOp, source: EngineError) -> Self {
        match source {
            EngineError::NotOpen => Self::NotOpen,
            source => Self::Engine { op, source },
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Reports `self` together with a later failure on the same path.
    pub(crate) fn followed_by(self, next: Self) -> Self {
        let mut errors = Vec::new();
        for err in [self, next] {
            match err {
                Self::Combined(inner) => errors.extend(inner.errors),
                other => errors.push(other),
            }
        }
        Self::Combined(CombinedError { errors })
    }

    /// Returns the stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotOpen => "LEVEL_DATABASE_NOT_OPEN",
            Self::AlreadyOpen => "LEVEL_DATABASE_ALREADY_OPEN",
            Self::AlreadyClosing => "LEVEL_DATABASE_CLOSING",
            Self::IteratorNotOpen { .. } => "LEVEL_ITERATOR_NOT_OPEN",
            Self::IteratorBusy => "LEVEL_ITERATOR_BUSY",
            Self::BatchNotOpen { .. } => "LEVEL_BATCH_NOT_OPEN",
            Self::SnapshotNotOpen => "LEVEL_SNAPSHOT_NOT_OPEN",
            Self::Aborted => "LEVEL_ABORTED",
            Self::Codec(e) => e.code(),
            Self::Engine { op, .. } => op.code(),
            Self::Combined(_) => "LEVEL_COMBINED_ERROR",
            Self::InvalidArgument { .. } => "LEVEL_INVALID_ARGUMENT",
            Self::NotSupported { .. } => "LEVEL_NOT_SUPPORTED",
        }
    }
}

/// Several errors reported together, e.g. an iteration failure followed by
/// a failure to close the iterator.
#[derive(Debug, Clone)]
pub struct CombinedError {
    errors: Vec<Error>,
}

impl CombinedError {
    /// Returns the errors in the order they occurred.
    #[must_use]
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }
}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CombinedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Merges the failures of one path into a single result.
///
/// Nested combined errors are flattened. No errors yields `Ok`; one error is
/// returned as is.
pub fn combine(errors: impl IntoIterator<Item = Error>) -> Result<()> {
    let mut flat = Vec::new();
    for err in errors {
        match err {
            Error::Combined(inner) => flat.extend(inner.errors),
            other => flat.push(other),
        }
    }
    match flat.len() {
        0 => Ok(()),
        1 => Err(flat.remove(0)),
        _ => Err(Error::Combined(CombinedError { errors: flat })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_display_verbatim() {
        let err = Error::engine(EngineOp::IteratorNext, EngineError::custom("next error"));
        assert_eq!(err.to_string(), "next error");
        assert_eq!(err.code(), "LEVEL_ITERATOR_NEXT_FAILED");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn engine_not_open_maps_to_not_open() {
        let err = Error::engine(EngineOp::Get, EngineError::NotOpen);
        assert!(matches!(err, Error::NotOpen));
        assert_eq!(err.code(), "LEVEL_DATABASE_NOT_OPEN");
    }

    #[test]
    fn combine_orders_and_flattens() {
        let first = Error::engine(EngineOp::IteratorNext, EngineError::custom("a"));
        let second = Error::engine(EngineOp::IteratorClose, EngineError::custom("b"));
        let third = Error::engine(EngineOp::IteratorClose, EngineError::custom("c"));

        let nested = combine([first, second]).unwrap_err();
        let err = combine([nested, third]).unwrap_err();
        assert_eq!(err.to_string(), "a; b; c");
        assert_eq!(err.code(), "LEVEL_COMBINED_ERROR");
        match err {
            Error::Combined(c) => assert_eq!(c.errors().len(), 3),
            other => panic!("expected combined, got {other:?}"),
        }
    }

    #[test]
    fn combine_single_and_empty() {
        assert!(combine(Vec::new()).is_ok());
        let err = combine([Error::Aborted]).unwrap_err();
        assert!(matches!(err, Error::Aborted));
    }

    #[test]
    fn codec_codes_pass_through() {
        let err = Error::from(CodecError::not_found("nope"));
        assert_eq!(err.code(), "LEVEL_ENCODING_NOT_FOUND");
    }
}
