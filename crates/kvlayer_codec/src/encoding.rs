//! The encoding contract and built-in encodings.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use bytes::Bytes;
use std::fmt;

/// What an encoding's decoded values look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingKind {
    /// Decodes to [`Value::Bytes`].
    Buffer,
    /// Decodes to [`Value::Text`].
    Text,
    /// Decodes to [`Value::Json`].
    Structured,
}

/// The engine-level representation an encoding works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Opaque byte buffer.
    Buffer,
    /// UTF-8 text.
    Utf8,
    /// Byte view.
    View,
}

/// Converts between caller values and stored bytes.
///
/// # Invariants
///
/// - `decode(encode(v)) == v` for every `v` of the encoding's kind
/// - Implementations are immutable once registered
pub trait Encoding: Send + Sync + fmt::Debug {
    /// Registry name, e.g. `"utf8"`.
    fn name(&self) -> &str;

    /// Shape of decoded values.
    fn kind(&self) -> EncodingKind;

    /// Engine-level representation tag.
    fn format(&self) -> Format {
        match self.kind() {
            EncodingKind::Text => Format::Utf8,
            EncodingKind::Buffer | EncodingKind::Structured => Format::Buffer,
        }
    }

    /// Encodes a caller value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value cannot be represented.
    fn encode(&self, value: &Value) -> CodecResult<Bytes>;

    /// Decodes stored bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are malformed.
    fn decode(&self, bytes: Bytes) -> CodecResult<Value>;
}

fn bytes_of(encoding: &str, value: &Value) -> CodecResult<Bytes> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
        Value::Json(_) => Err(CodecError::encode(
            encoding,
            "structured values need a structured encoding",
        )),
    }
}

/// Bytes in, bytes out.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferEncoding;

impl Encoding for BufferEncoding {
    fn name(&self) -> &str {
        "buffer"
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::Buffer
    }

    fn encode(&self, value: &Value) -> CodecResult<Bytes> {
        bytes_of(self.name(), value)
    }

    fn decode(&self, bytes: Bytes) -> CodecResult<Value> {
        Ok(Value::Bytes(bytes))
    }
}

/// Like [`BufferEncoding`] but tagged as a byte view.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewEncoding;

impl Encoding for ViewEncoding {
    fn name(&self) -> &str {
        "view"
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::Buffer
    }

    fn format(&self) -> Format {
        Format::View
    }

    fn encode(&self, value: &Value) -> CodecResult<Bytes> {
        bytes_of(self.name(), value)
    }

    fn decode(&self, bytes: Bytes) -> CodecResult<Value> {
        Ok(Value::Bytes(bytes))
    }
}

/// UTF-8 text. Decoding rejects invalid UTF-8.
///
/// Structured values are stored as their JSON text, except JSON strings,
/// which are stored unquoted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Encoding;

impl Encoding for Utf8Encoding {
    fn name(&self) -> &str {
        "utf8"
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::Text
    }

    fn encode(&self, value: &Value) -> CodecResult<Bytes> {
        match value {
            Value::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(_) => Ok(b.clone()),
                Err(e) => Err(CodecError::encode(self.name(), e.to_string())),
            },
            Value::Json(serde_json::Value::String(s)) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Value::Json(v) => Ok(Bytes::from(v.to_string())),
        }
    }

    fn decode(&self, bytes: Bytes) -> CodecResult<Value> {
        String::from_utf8(bytes.to_vec())
            .map(Value::Text)
            .map_err(|e| CodecError::decode(self.name(), e.to_string()))
    }
}

/// JSON documents via `serde_json`. Text is stored as a JSON string.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoding;

impl Encoding for JsonEncoding {
    fn name(&self) -> &str {
        "json"
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::Structured
    }

    fn format(&self) -> Format {
        Format::Utf8
    }

    fn encode(&self, value: &Value) -> CodecResult<Bytes> {
        let encoded = match value {
            Value::Json(v) => serde_json::to_vec(v),
            Value::Text(s) => serde_json::to_vec(s),
            Value::Bytes(_) => {
                return Err(CodecError::encode(self.name(), "cannot encode raw bytes"))
            }
        };
        encoded
            .map(Bytes::from)
            .map_err(|e| CodecError::encode(self.name(), e.to_string()))
    }

    fn decode(&self, bytes: Bytes) -> CodecResult<Value> {
        serde_json::from_slice(&bytes)
            .map(Value::Json)
            .map_err(|e| CodecError::decode(self.name(), e.to_string()))
    }
}

/// CBOR documents via `ciborium`.
///
/// Top-level byte strings decode to [`Value::Bytes`]; everything else
/// decodes to [`Value::Json`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CborEncoding;

impl Encoding for CborEncoding {
    fn name(&self) -> &str {
        "cbor"
    }

    fn kind(&self) -> EncodingKind {
        EncodingKind::Structured
    }

    fn encode(&self, value: &Value) -> CodecResult<Bytes> {
        let mut buf = Vec::new();
        let written = match value {
            Value::Json(v) => ciborium::ser::into_writer(v, &mut buf),
            Value::Text(s) => ciborium::ser::into_writer(s, &mut buf),
            Value::Bytes(b) => {
                ciborium::ser::into_writer(&ciborium::Value::Bytes(b.to_vec()), &mut buf)
            }
        };
        written.map_err(|e| CodecError::encode(self.name(), e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    fn decode(&self, bytes: Bytes) -> CodecResult<Value> {
        let raw: ciborium::Value = ciborium::de::from_reader(bytes.as_ref())
            .map_err(|e| CodecError::decode(self.name(), e.to_string()))?;
        match raw {
            ciborium::Value::Bytes(b) => Ok(Value::Bytes(Bytes::from(b))),
            other => other
                .deserialized::<serde_json::Value>()
                .map(Value::Json)
                .map_err(|e| CodecError::decode(self.name(), e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn buffer_passes_bytes_through() {
        let encoded = BufferEncoding.encode(&Value::from(b"\x00\xff")).unwrap();
        assert_eq!(encoded.as_ref(), b"\x00\xff");
        assert_eq!(
            BufferEncoding.decode(encoded).unwrap(),
            Value::from(b"\x00\xff")
        );
    }

    #[test]
    fn buffer_encodes_text_as_utf8() {
        assert_eq!(BufferEncoding.encode(&Value::from("é")).unwrap().as_ref(), "é".as_bytes());
    }

    #[test]
    fn buffer_rejects_structured_values() {
        let err = BufferEncoding.encode(&Value::from(json!([1]))).unwrap_err();
        assert_eq!(err.code(), "LEVEL_ENCODE_ERROR");
    }

    #[test]
    fn utf8_rejects_invalid_bytes_on_decode() {
        let err = Utf8Encoding.decode(Bytes::from_static(b"\xff\xfe")).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }

    #[test]
    fn utf8_stores_json_strings_unquoted() {
        let encoded = Utf8Encoding.encode(&Value::from(json!("hi"))).unwrap();
        assert_eq!(encoded.as_ref(), b"hi");
        let encoded = Utf8Encoding.encode(&Value::from(json!({"a": 1}))).unwrap();
        assert_eq!(encoded.as_ref(), br#"{"a":1}"#);
    }

    #[test]
    fn json_round_trip_and_text() {
        let doc = json!({"a": [1, 2, {"b": null}]});
        let encoded = JsonEncoding.encode(&Value::from(doc.clone())).unwrap();
        assert_eq!(JsonEncoding.decode(encoded).unwrap(), Value::Json(doc));

        let encoded = JsonEncoding.encode(&Value::from("x")).unwrap();
        assert_eq!(encoded.as_ref(), br#""x""#);
    }

    #[test]
    fn json_rejects_malformed_input() {
        let err = JsonEncoding.decode(Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.code(), "LEVEL_DECODE_ERROR");
    }

    #[test]
    fn cbor_keeps_byte_strings() {
        let encoded = CborEncoding.encode(&Value::from(b"ab")).unwrap();
        assert_eq!(CborEncoding.decode(encoded).unwrap(), Value::from(b"ab"));
    }

    #[test]
    fn formats() {
        assert_eq!(BufferEncoding.format(), Format::Buffer);
        assert_eq!(ViewEncoding.format(), Format::View);
        assert_eq!(Utf8Encoding.format(), Format::Utf8);
        assert_eq!(CborEncoding.format(), Format::Buffer);
    }
}
