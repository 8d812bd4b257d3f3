//! # itemtx codec
//!
//! Attribute values and their encodings.
//!
//! This crate provides:
//! - [`AttributeValue`], the closed set of value shapes an item attribute can hold
//! - A canonical CBOR encoding for attribute values, used for item images
//!   that must compare byte-for-byte
//! - Serde-based CBOR helpers (via `ciborium`) for structured records such as
//!   logged transaction requests
//!
//! ## Canonical rules
//!
//! - Map keys are sorted length-first, then bytewise
//! - Lengths use the shortest encoding
//! - No indefinite-length items, no floats, no bare integers
//!
//! ## Usage
//!
//! ```
//! use itemtx_codec::{decode_attribute, encode_attribute, AttributeValue};
//!
//! let value = AttributeValue::number(42);
//! let bytes = encode_attribute(&value).unwrap();
//! assert_eq!(decode_attribute(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::{decode_attribute, decode_attributes, CanonicalDecoder};
pub use encoder::{
    encode_attribute, encode_attributes, CanonicalEncoder, TAG_BINARY_SET, TAG_NUMBER,
    TAG_NUMBER_SET, TAG_STRING_SET,
};
pub use error::{CodecError, CodecResult};
pub use value::{attributes, AttributeValue, Attributes};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for types that can be encoded to canonical bytes.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from canonical bytes.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for AttributeValue {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        encode_attribute(self)
    }
}

impl Decode for AttributeValue {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_attribute(bytes)
    }
}

/// Serializes any serde value to CBOR bytes.
///
/// Unlike [`encode_attribute`] this is not canonical; use it for records that
/// are only ever read back, never compared.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Deserializes a serde value from CBOR bytes written by [`to_cbor`].
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes do not describe a `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn arb_attribute() -> impl Strategy<Value = AttributeValue> {
        let leaf = prop_oneof![
            Just(AttributeValue::Null),
            any::<bool>().prop_map(AttributeValue::Bool),
            "[a-z0-9]{0,12}".prop_map(AttributeValue::S),
            any::<i64>().prop_map(AttributeValue::number),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(AttributeValue::B),
            prop::collection::btree_set("[a-z]{1,4}", 1..4).prop_map(AttributeValue::Ss),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(AttributeValue::L),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(AttributeValue::M),
            ]
        })
    }

    proptest! {
        #[test]
        fn canonical_encoding_is_stable(value in arb_attribute()) {
            let bytes = encode_attribute(&value).unwrap();
            let decoded = decode_attribute(&bytes).unwrap();
            prop_assert_eq!(&decoded, &value);
            prop_assert_eq!(encode_attribute(&decoded).unwrap(), bytes);
        }
    }

    #[test]
    fn serde_helpers_keep_structure() {
        let mut item = BTreeMap::new();
        item.insert("pk".to_string(), AttributeValue::s("a"));
        item.insert("n".to_string(), AttributeValue::Ns(["1", "2"].iter().map(|s| s.to_string()).collect()));
        let bytes = to_cbor(&item).unwrap();
        let back: Attributes = from_cbor(&bytes).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn from_cbor_rejects_garbage() {
        assert!(from_cbor::<Attributes>(&[0xff, 0x00]).is_err());
    }
}
