//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while resolving, encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No encoding is registered under the requested name.
    #[error("encoding not found: {name}")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// An encoding is already registered under this name.
    #[error("encoding already registered: {name}")]
    Exists {
        /// The conflicting name.
        name: String,
    },

    /// A value could not be encoded.
    #[error("{encoding} encoding failed: {message}")]
    Encode {
        /// Name of the encoding.
        encoding: String,
        /// Description of the failure.
        message: String,
    },

    /// Stored bytes could not be decoded.
    #[error("{encoding} decoding failed: {message}")]
    Decode {
        /// Name of the encoding.
        encoding: String,
        /// Description of the failure.
        message: String,
    },
}

impl CodecError {
    /// Create a not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create an encode error.
    pub fn encode(encoding: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            encoding: encoding.into(),
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(encoding: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            encoding: encoding.into(),
            message: message.into(),
        }
    }

    /// Returns the stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "LEVEL_ENCODING_NOT_FOUND",
            Self::Exists { .. } => "LEVEL_ENCODING_EXISTS",
            Self::Encode { .. } => "LEVEL_ENCODE_ERROR",
            Self::Decode { .. } => "LEVEL_DECODE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(CodecError::not_found("x").code(), "LEVEL_ENCODING_NOT_FOUND");
        assert_eq!(CodecError::decode("utf8", "bad").code(), "LEVEL_DECODE_ERROR");
    }

    #[test]
    fn messages_name_the_encoding() {
        let err = CodecError::decode("json", "expected value");
        assert_eq!(err.to_string(), "json decoding failed: expected value");
    }
}
