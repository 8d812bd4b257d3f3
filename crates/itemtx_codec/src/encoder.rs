//! Canonical CBOR encoder for attribute values.

use crate::error::CodecResult;
use crate::value::{AttributeValue, Attributes};
use std::collections::BTreeMap;

/// CBOR tag wrapping a number's decimal string.
pub const TAG_NUMBER: u64 = 40_001;
/// CBOR tag wrapping a string set (array of text).
pub const TAG_STRING_SET: u64 = 40_002;
/// CBOR tag wrapping a number set (array of text).
pub const TAG_NUMBER_SET: u64 = 40_003;
/// CBOR tag wrapping a binary set (array of byte strings).
pub const TAG_BINARY_SET: u64 = 40_004;

/// Encode an attribute value to canonical CBOR bytes.
///
/// The mapping is:
/// - `S` → text string, `B` → byte string, `L` → array, `M` → map with text keys
/// - `N`, `SS`, `NS`, `BS` → tagged text / arrays (see the `TAG_*` constants)
/// - `NULL` and `BOOL` → CBOR simple values
///
/// Map keys are sorted length-first, then bytewise, so equal values always
/// produce identical bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be written as CBOR.
pub fn encode_attribute(value: &AttributeValue) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Encode a full item as a canonical CBOR map.
///
/// # Errors
///
/// See [`encode_attribute`].
pub fn encode_attributes(item: &Attributes) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode_map(item)?;
    Ok(encoder.into_bytes())
}

/// A canonical CBOR encoder.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &AttributeValue) -> CodecResult<()> {
        match value {
            AttributeValue::Null => self.buffer.push(0xf6),
            AttributeValue::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            AttributeValue::S(s) => self.encode_text(s),
            AttributeValue::B(b) => self.encode_bytes(b),
            AttributeValue::N(n) => {
                self.encode_unsigned(6, TAG_NUMBER);
                self.encode_text(n);
            }
            AttributeValue::Ss(set) => {
                self.encode_unsigned(6, TAG_STRING_SET);
                self.encode_unsigned(4, set.len() as u64);
                for s in set {
                    self.encode_text(s);
                }
            }
            AttributeValue::Ns(set) => {
                self.encode_unsigned(6, TAG_NUMBER_SET);
                self.encode_unsigned(4, set.len() as u64);
                for n in set {
                    self.encode_text(n);
                }
            }
            AttributeValue::Bs(set) => {
                self.encode_unsigned(6, TAG_BINARY_SET);
                self.encode_unsigned(4, set.len() as u64);
                for b in set {
                    self.encode_bytes(b);
                }
            }
            AttributeValue::L(items) => {
                self.encode_unsigned(4, items.len() as u64);
                for item in items {
                    self.encode(item)?;
                }
            }
            AttributeValue::M(map) => self.encode_map(map)?,
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_bytes(&mut self, bytes: &[u8]) {
        self.encode_unsigned(2, bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_map(&mut self, map: &BTreeMap<String, AttributeValue>) -> CodecResult<()> {
        // BTreeMap order is lexicographic; canonical CBOR wants length-first.
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort_by(|a, b| match a.len().cmp(&b.len()) {
            std::cmp::Ordering::Equal => a.as_bytes().cmp(b.as_bytes()),
            other => other,
        });

        self.encode_unsigned(5, map.len() as u64);
        for key in keys {
            self.encode_text(key);
            self.encode(&map[key])?;
        }
        Ok(())
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}
