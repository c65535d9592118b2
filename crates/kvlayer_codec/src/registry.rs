//! Name-to-encoding lookup.

use crate::encoding::{
    BufferEncoding, CborEncoding, Encoding, JsonEncoding, Utf8Encoding, ViewEncoding,
};
use crate::error::{CodecError, CodecResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the encoding used when nothing else is configured.
pub const DEFAULT_ENCODING: &str = "buffer";

/// A set of encodings addressable by name.
///
/// [`EncodingRegistry::new`] starts with the built-ins: `buffer`, `view`,
/// `utf8`, `json` and `cbor`.
///
/// # Example
///
/// ```rust
/// use kvlayer_codec::{EncodingRegistry, Value};
///
/// let registry = EncodingRegistry::new();
/// let utf8 = registry.resolve(&[None, Some("utf8")]).unwrap();
/// let bytes = utf8.encode(&Value::from("hello")).unwrap();
/// assert_eq!(utf8.decode(bytes).unwrap(), Value::from("hello"));
/// ```
#[derive(Debug, Clone)]
pub struct EncodingRegistry {
    encodings: HashMap<String, Arc<dyn Encoding>>,
}

impl Default for EncodingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodingRegistry {
    /// Creates a registry holding the built-in encodings.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        let builtins: [Arc<dyn Encoding>; 5] = [
            Arc::new(BufferEncoding),
            Arc::new(ViewEncoding),
            Arc::new(Utf8Encoding),
            Arc::new(JsonEncoding),
            Arc::new(CborEncoding),
        ];
        for encoding in builtins {
            registry
                .encodings
                .insert(encoding.name().to_owned(), encoding);
        }
        registry
    }

    /// Creates a registry with no encodings at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            encodings: HashMap::new(),
        }
    }

    /// Adds an encoding.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Exists`] if the name is taken.
    pub fn register(&mut self, encoding: Arc<dyn Encoding>) -> CodecResult<()> {
        let name = encoding.name().to_owned();
        if self.encodings.contains_key(&name) {
            return Err(CodecError::Exists { name });
        }
        self.encodings.insert(name, encoding);
        Ok(())
    }

    /// Looks up an encoding by name.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotFound`] for unknown names.
    pub fn get(&self, name: &str) -> CodecResult<Arc<dyn Encoding>> {
        self.encodings
            .get(name)
            .cloned()
            .ok_or_else(|| CodecError::not_found(name))
    }

    /// Returns the first configured name in `candidates`, most specific
    /// first, falling back to [`DEFAULT_ENCODING`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotFound`] if the chosen name is unknown. A
    /// more general candidate is never tried in its place.
    pub fn resolve(&self, candidates: &[Option<&str>]) -> CodecResult<Arc<dyn Encoding>> {
        let name = candidates
            .iter()
            .flatten()
            .next()
            .copied()
            .unwrap_or(DEFAULT_ENCODING);
        self.get(name)
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.encodings.contains_key(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.encodings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodingKind;
    use crate::value::Value;
    use bytes::Bytes;

    #[derive(Debug)]
    struct Upper;

    impl Encoding for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn kind(&self) -> EncodingKind {
            EncodingKind::Text
        }

        fn encode(&self, value: &Value) -> CodecResult<Bytes> {
            match value {
                Value::Text(s) => Ok(Bytes::from(s.to_uppercase())),
                other => Err(CodecError::encode("upper", other.type_name())),
            }
        }

        fn decode(&self, bytes: Bytes) -> CodecResult<Value> {
            String::from_utf8(bytes.to_vec())
                .map(|s| Value::Text(s.to_lowercase()))
                .map_err(|e| CodecError::decode("upper", e.to_string()))
        }
    }

    #[test]
    fn builtins_are_present() {
        let registry = EncodingRegistry::new();
        assert_eq!(registry.names(), vec!["buffer", "cbor", "json", "utf8", "view"]);
    }

    #[test]
    fn resolve_prefers_most_specific() {
        let registry = EncodingRegistry::new();
        let chosen = registry
            .resolve(&[Some("json"), Some("utf8"), None])
            .unwrap();
        assert_eq!(chosen.name(), "json");

        let chosen = registry.resolve(&[None, None, Some("utf8")]).unwrap();
        assert_eq!(chosen.name(), "utf8");

        let chosen = registry.resolve(&[None, None]).unwrap();
        assert_eq!(chosen.name(), "buffer");
    }

    #[test]
    fn resolve_does_not_fall_through_unknown_names() {
        let registry = EncodingRegistry::new();
        let err = registry.resolve(&[Some("nope"), Some("utf8")]).unwrap_err();
        assert_eq!(err, CodecError::not_found("nope"));
    }

    #[test]
    fn register_custom_and_reject_duplicates() {
        let mut registry = EncodingRegistry::new();
        registry.register(Arc::new(Upper)).unwrap();
        assert!(registry.contains("upper"));

        let err = registry.register(Arc::new(Upper)).unwrap_err();
        assert_eq!(err.code(), "LEVEL_ENCODING_EXISTS");
        let err = registry.register(Arc::new(BufferEncoding)).unwrap_err();
        assert_eq!(err.code(), "LEVEL_ENCODING_EXISTS");
    }

    #[test]
    fn empty_registry_has_no_default() {
        let registry = EncodingRegistry::empty();
        assert!(registry.resolve(&[]).is_err());
    }
}
