//! Canonical CBOR decoder for attribute values.

use crate::encoder::{TAG_BINARY_SET, TAG_NUMBER, TAG_NUMBER_SET, TAG_STRING_SET};
use crate::error::{CodecError, CodecResult};
use crate::value::{AttributeValue, Attributes};
use std::collections::{BTreeMap, BTreeSet};

/// Decode an attribute value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid canonical CBOR, contain
/// constructs with no attribute-value meaning (integers, floats, unknown
/// tags), or have trailing data.
pub fn decode_attribute(bytes: &[u8]) -> CodecResult<AttributeValue> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    decoder.finish()?;
    Ok(value)
}

/// Decode a full item previously written by [`crate::encode_attributes`].
///
/// # Errors
///
/// Returns an error if the bytes do not decode to a map.
pub fn decode_attributes(bytes: &[u8]) -> CodecResult<Attributes> {
    match decode_attribute(bytes)? {
        AttributeValue::M(map) => Ok(map),
        other => Err(CodecError::invalid_structure(format!(
            "expected a map, found {}",
            other.type_name()
        ))),
    }
}

/// A canonical CBOR decoder.
///
/// Validates shortest-form lengths, sorted map keys and definite lengths.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Maximum allowed element count for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<AttributeValue> {
        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            0 | 1 => Err(CodecError::unsupported_type("integer")),
            2 => self.read_bytes_payload(additional_info).map(AttributeValue::B),
            3 => self.read_text_payload(additional_info).map(AttributeValue::S),
            4 => {
                let len = self.read_length(additional_info)?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode()?);
                }
                Ok(AttributeValue::L(items))
            }
            5 => self.decode_map(additional_info).map(AttributeValue::M),
            6 => {
                let tag = self.decode_unsigned(additional_info)?;
                self.decode_tagged(tag)
            }
            7 => self.decode_simple(additional_info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Fails if any bytes remain after the decoded value.
    pub fn finish(&self) -> CodecResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                remaining: self.data.len() - self.pos,
            })
        }
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn decode_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        let non_canonical =
            || CodecError::invalid_structure("non-canonical: value could be encoded in fewer bytes");
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => {
                let byte = self.read_byte()?;
                if byte < 24 {
                    return Err(non_canonical());
                }
                Ok(u64::from(byte))
            }
            25 => {
                let bytes = self.read_slice(2)?;
                let value = u16::from_be_bytes([bytes[0], bytes[1]]);
                if u8::try_from(value).is_ok() {
                    return Err(non_canonical());
                }
                Ok(u64::from(value))
            }
            26 => {
                let bytes = self.read_slice(4)?;
                let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if u16::try_from(value).is_ok() {
                    return Err(non_canonical());
                }
                Ok(u64::from(value))
            }
            27 => {
                let bytes = self.read_slice(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                let value = u64::from_be_bytes(raw);
                if u32::try_from(value).is_ok() {
                    return Err(non_canonical());
                }
                Ok(value)
            }
            31 => Err(CodecError::IndefiniteLengthForbidden),
            _ => Err(CodecError::invalid_structure("reserved additional info")),
        }
    }

    fn read_length(&mut self, additional_info: u8) -> CodecResult<usize> {
        let len = self.decode_unsigned(additional_info)?;
        if len > MAX_CONTAINER_ELEMENTS {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_CONTAINER_ELEMENTS,
            });
        }
        usize::try_from(len).map_err(|_| CodecError::IntegerOverflow)
    }

    fn read_bytes_payload(&mut self, additional_info: u8) -> CodecResult<Vec<u8>> {
        let len = self.decode_unsigned(additional_info)?;
        if len > MAX_BYTES_LENGTH {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_BYTES_LENGTH,
            });
        }
        let len = usize::try_from(len).map_err(|_| CodecError::IntegerOverflow)?;
        Ok(self.read_slice(len)?.to_vec())
    }

    fn read_text_payload(&mut self, additional_info: u8) -> CodecResult<String> {
        let bytes = self.read_bytes_payload(additional_info)?;
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    fn expect_major(&mut self, expected: u8) -> CodecResult<u8> {
        let initial_byte = self.read_byte()?;
        if initial_byte >> 5 != expected {
            return Err(CodecError::invalid_structure(format!(
                "expected major type {expected}, found {}",
                initial_byte >> 5
            )));
        }
        Ok(initial_byte & 0x1f)
    }

    fn decode_map(&mut self, additional_info: u8) -> CodecResult<BTreeMap<String, AttributeValue>> {
        let len = self.read_length(additional_info)?;
        let mut map = BTreeMap::new();
        let mut prev_key: Option<String> = None;

        for _ in 0..len {
            let info = self.expect_major(3)?;
            let key = self.read_text_payload(info)?;

            if let Some(prev) = &prev_key {
                let ordering = match prev.len().cmp(&key.len()) {
                    std::cmp::Ordering::Equal => prev.as_bytes().cmp(key.as_bytes()),
                    other => other,
                };
                if ordering != std::cmp::Ordering::Less {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: map keys not in sorted order",
                    ));
                }
            }

            let value = self.decode()?;
            prev_key = Some(key.clone());
            map.insert(key, value);
        }

        Ok(map)
    }

    fn decode_tagged(&mut self, tag: u64) -> CodecResult<AttributeValue> {
        match tag {
            TAG_NUMBER => {
                let info = self.expect_major(3)?;
                self.read_text_payload(info).map(AttributeValue::N)
            }
            TAG_STRING_SET | TAG_NUMBER_SET => {
                let info = self.expect_major(4)?;
                let len = self.read_length(info)?;
                let mut set = BTreeSet::new();
                for _ in 0..len {
                    let info = self.expect_major(3)?;
                    if !set.insert(self.read_text_payload(info)?) {
                        return Err(CodecError::invalid_structure("duplicate set member"));
                    }
                }
                Ok(if tag == TAG_STRING_SET {
                    AttributeValue::Ss(set)
                } else {
                    AttributeValue::Ns(set)
                })
            }
            TAG_BINARY_SET => {
                let info = self.expect_major(4)?;
                let len = self.read_length(info)?;
                let mut set = BTreeSet::new();
                for _ in 0..len {
                    let info = self.expect_major(2)?;
                    if !set.insert(self.read_bytes_payload(info)?) {
                        return Err(CodecError::invalid_structure("duplicate set member"));
                    }
                }
                Ok(AttributeValue::Bs(set))
            }
            other => Err(CodecError::UnknownTag { tag: other }),
        }
    }

    fn decode_simple(&mut self, additional_info: u8) -> CodecResult<AttributeValue> {
        match additional_info {
            20 => Ok(AttributeValue::Bool(false)),
            21 => Ok(AttributeValue::Bool(true)),
            22 => Ok(AttributeValue::Null),
            25..=27 => Err(CodecError::FloatForbidden),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            _ => Err(CodecError::unsupported_type(format!(
                "simple value {additional_info}"
            ))),
        }
    }
}
