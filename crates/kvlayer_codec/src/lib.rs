//! # kvlayer Codec
//!
//! Caller values and the encodings that turn them into engine bytes.
//!
//! Keys and values pass through an [`Encoding`] on the way into the engine
//! and back out. Encodings are looked up by name in an [`EncodingRegistry`];
//! the most specific configured name wins (per-call, then sublevel, then
//! database default, then `buffer`).
//!
//! ## Built-in encodings
//!
//! | Name     | Decodes to      | Notes |
//! |----------|-----------------|-------|
//! | `buffer` | `Value::Bytes`  | Text is stored as UTF-8 |
//! | `view`   | `Value::Bytes`  | Byte-view representation tag |
//! | `utf8`   | `Value::Text`   | Rejects invalid UTF-8 on decode |
//! | `json`   | `Value::Json`   | `serde_json` |
//! | `cbor`   | `Value::Json`   | `ciborium`; top-level byte strings stay bytes |

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod encoding;
mod error;
mod registry;
mod value;

pub use encoding::{
    BufferEncoding, CborEncoding, Encoding, EncodingKind, Format, JsonEncoding, Utf8Encoding,
    ViewEncoding,
};
pub use error::{CodecError, CodecResult};
pub use registry::{EncodingRegistry, DEFAULT_ENCODING};
pub use value::Value;

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn json_leaf() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::Bool),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-z0-9 ]{0,12}".prop_map(serde_json::Value::String),
        ]
    }

    fn json_doc() -> impl Strategy<Value = serde_json::Value> {
        json_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn buffer_round_trips(data in prop::collection::vec(any::<u8>(), 0..64)) {
            let value = Value::from(data);
            let encoded = BufferEncoding.encode(&value).unwrap();
            prop_assert_eq!(BufferEncoding.decode(encoded).unwrap(), value);
        }

        #[test]
        fn view_round_trips(data in prop::collection::vec(any::<u8>(), 0..64)) {
            let value = Value::from(data.clone());
            let encoded = ViewEncoding.encode(&value).unwrap();
            prop_assert_eq!(encoded.as_ref(), data.as_slice());
            prop_assert_eq!(ViewEncoding.decode(encoded).unwrap(), value);
        }

        #[test]
        fn utf8_round_trips(s in "\\PC{0,32}") {
            let value = Value::from(s);
            let encoded = Utf8Encoding.encode(&value).unwrap();
            prop_assert_eq!(Utf8Encoding.decode(encoded).unwrap(), value);
        }

        #[test]
        fn json_round_trips(doc in json_doc()) {
            let value = Value::Json(doc);
            let encoded = JsonEncoding.encode(&value).unwrap();
            prop_assert_eq!(JsonEncoding.decode(encoded).unwrap(), value);
        }

        #[test]
        fn cbor_round_trips(doc in json_doc()) {
            let value = Value::Json(doc);
            let encoded = CborEncoding.encode(&value).unwrap();
            prop_assert_eq!(CborEncoding.decode(encoded).unwrap(), value);
        }
    }
}
