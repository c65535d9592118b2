//! Key prefixes and the encodings in force for one database or sublevel.

use crate::error::{Error, Result};
use crate::options::RangeOptions;
use bytes::{Bytes, BytesMut};
use kvlayer_codec::{CodecError, Encoding, EncodingRegistry, Format, Value};
use kvlayer_engine::{EngineRange, ValueFormat};
use std::ops::Bound;
use std::sync::Arc;

/// Separator wrapped around sublevel names.
pub(crate) const SEPARATOR: u8 = b'!';

/// The namespace operations run in: the whole database, or a sublevel.
#[derive(Debug, Clone, Default)]
pub(crate) struct Keyspace {
    prefix: Bytes,
    key_encoding: Option<String>,
    value_encoding: Option<String>,
}

impl Keyspace {
    /// The unprefixed keyspace of a database.
    pub(crate) fn root(key_encoding: Option<String>, value_encoding: Option<String>) -> Self {
        Self {
            prefix: Bytes::new(),
            key_encoding,
            value_encoding,
        }
    }

    /// A nested keyspace. Unset encodings are inherited.
    pub(crate) fn child(
        &self,
        name: &str,
        key_encoding: Option<String>,
        value_encoding: Option<String>,
    ) -> Result<Self> {
        if name.as_bytes().contains(&SEPARATOR) {
            return Err(Error::invalid_argument(format!(
                "sublevel name must not contain '{}': {name:?}",
                SEPARATOR as char
            )));
        }
        let mut prefix = BytesMut::with_capacity(self.prefix.len() + name.len() + 2);
        prefix.extend_from_slice(&self.prefix);
        prefix.extend_from_slice(&[SEPARATOR]);
        prefix.extend_from_slice(name.as_bytes());
        prefix.extend_from_slice(&[SEPARATOR]);
        Ok(Self {
            prefix: prefix.freeze(),
            key_encoding: key_encoding.or_else(|| self.key_encoding.clone()),
            value_encoding: value_encoding.or_else(|| self.value_encoding.clone()),
        })
    }

    pub(crate) fn prefix(&self) -> &Bytes {
        &self.prefix
    }

    /// Resolves the encodings for one call.
    pub(crate) fn codecs(
        &self,
        registry: &EncodingRegistry,
        key_encoding: Option<&str>,
        value_encoding: Option<&str>,
    ) -> Result<Codecs> {
        Ok(Codecs {
            key: registry.resolve(&[key_encoding, self.key_encoding.as_deref()])?,
            value: registry.resolve(&[value_encoding, self.value_encoding.as_deref()])?,
            prefix: self.prefix.clone(),
        })
    }
}

/// Encodings and prefix resolved for one operation.
#[derive(Debug, Clone)]
pub(crate) struct Codecs {
    pub(crate) key: Arc<dyn Encoding>,
    pub(crate) value: Arc<dyn Encoding>,
    prefix: Bytes,
}

impl Codecs {
    pub(crate) fn encode_key(&self, key: &Value) -> Result<Bytes> {
        let encoded = self.key.encode(key)?;
        Ok(self.prefixed(&encoded))
    }

    pub(crate) fn encode_value(&self, value: &Value) -> Result<Bytes> {
        Ok(self.value.encode(value)?)
    }

    pub(crate) fn decode_key(&self, key: Option<Bytes>) -> Result<Value> {
        let key = key.ok_or_else(|| CodecError::decode(self.key.name(), "engine yielded no key"))?;
        let stripped = if key.starts_with(&self.prefix) {
            key.slice(self.prefix.len()..)
        } else {
            key
        };
        Ok(self.key.decode(stripped)?)
    }

    pub(crate) fn decode_value(&self, value: Option<Bytes>) -> Result<Value> {
        let value =
            value.ok_or_else(|| CodecError::decode(self.value.name(), "engine yielded no value"))?;
        Ok(self.value.decode(value)?)
    }

    pub(crate) fn key_format(&self) -> ValueFormat {
        engine_format(self.key.format())
    }

    pub(crate) fn value_format(&self) -> ValueFormat {
        engine_format(self.value.format())
    }

    /// Translates caller bounds into an engine range confined to the prefix.
    pub(crate) fn engine_range(&self, range: &RangeOptions) -> Result<EngineRange> {
        let lower = match (&range.gte, &range.gt) {
            (Some(k), _) => Bound::Included(self.encode_key(k)?),
            (None, Some(k)) => Bound::Excluded(self.encode_key(k)?),
            (None, None) if self.prefix.is_empty() => Bound::Unbounded,
            (None, None) => Bound::Included(self.prefix.clone()),
        };
        let upper = match (&range.lte, &range.lt) {
            (Some(k), _) => Bound::Included(self.encode_key(k)?),
            (None, Some(k)) => Bound::Excluded(self.encode_key(k)?),
            (None, None) => match prefix_end(&self.prefix) {
                Some(end) => Bound::Excluded(end),
                None => Bound::Unbounded,
            },
        };
        Ok(EngineRange {
            lower,
            upper,
            reverse: range.reverse,
            limit: range.limit.as_option(),
        })
    }

    fn prefixed(&self, encoded: &Bytes) -> Bytes {
        if self.prefix.is_empty() {
            return encoded.clone();
        }
        let mut buf = BytesMut::with_capacity(self.prefix.len() + encoded.len());
        buf.extend_from_slice(&self.prefix);
        buf.extend_from_slice(encoded);
        buf.freeze()
    }
}

/// The smallest key greater than every key starting with `prefix`.
fn prefix_end(prefix: &[u8]) -> Option<Bytes> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(Bytes::from(end));
        }
    }
    None
}

const fn engine_format(format: Format) -> ValueFormat {
    match format {
        Format::Buffer => ValueFormat::Buffer,
        Format::Utf8 => ValueFormat::Utf8,
        Format::View => ValueFormat::View,
    }
}
