//! Attribute value type.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A full item: attribute name to value.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single attribute value stored on an item.
///
/// This is a closed recursive type covering every shape the item store
/// accepts. Equality, ordering and hashing are structural, so values (and
/// maps of values) can be used directly as map keys.
///
/// Numbers are carried in their decimal string form; the store never does
/// arithmetic on them, so no precision is lost in transit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    /// UTF-8 string.
    S(String),
    /// Number in decimal string form.
    N(String),
    /// Binary blob.
    B(Vec<u8>),
    /// Set of strings.
    #[serde(rename = "SS")]
    Ss(BTreeSet<String>),
    /// Set of numbers.
    #[serde(rename = "NS")]
    Ns(BTreeSet<String>),
    /// Set of binary blobs.
    #[serde(rename = "BS")]
    Bs(BTreeSet<Vec<u8>>),
    /// Ordered list of values.
    L(Vec<AttributeValue>),
    /// Nested map of values.
    M(BTreeMap<String, AttributeValue>),
    /// Explicit null.
    #[serde(rename = "NULL")]
    Null,
    /// Boolean.
    #[serde(rename = "BOOL")]
    Bool(bool),
}

impl AttributeValue {
    /// Creates a string value.
    pub fn s(value: impl Into<String>) -> Self {
        Self::S(value.into())
    }

    /// Creates a number value from an integer.
    pub fn number(value: i64) -> Self {
        Self::N(value.to_string())
    }

    /// Returns the short type tag of this value (`"S"`, `"N"`, `"SS"`, ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::B(_) => "B",
            Self::Ss(_) => "SS",
            Self::Ns(_) => "NS",
            Self::Bs(_) => "BS",
            Self::L(_) => "L",
            Self::M(_) => "M",
            Self::Null => "NULL",
            Self::Bool(_) => "BOOL",
        }
    }

    /// Returns true if this is a scalar usable as a key attribute (S, N or B).
    pub fn is_key_type(&self) -> bool {
        matches!(self, Self::S(_) | Self::N(_) | Self::B(_))
    }

    /// Get this value as a string, if it is one.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a number string, if it is one.
    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(n) => Some(n),
            _ => None,
        }
    }

    /// Parse this number value as an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_n().and_then(|n| n.parse().ok())
    }

    /// Parse this number value as a `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_n().and_then(|n| n.parse().ok())
    }

    /// Get this value as bytes, if it is a binary value.
    pub fn as_b(&self) -> Option<&[u8]> {
        match self {
            Self::B(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            Self::L(items) => Some(items),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            Self::M(map) => Some(map),
            _ => None,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S(s) => write!(f, "{s:?}"),
            Self::N(n) => write!(f, "{n}"),
            Self::B(b) => write!(f, "<{} bytes>", b.len()),
            Self::Ss(set) => write!(f, "SS{set:?}"),
            Self::Ns(set) => write!(f, "NS{set:?}"),
            Self::Bs(set) => write!(f, "BS<{} blobs>", set.len()),
            Self::L(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::M(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        Self::number(n)
    }
}

impl From<u64> for AttributeValue {
    fn from(n: u64) -> Self {
        Self::N(n.to_string())
    }
}

impl From<i32> for AttributeValue {
    fn from(n: i32) -> Self {
        Self::number(i64::from(n))
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::S(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::S(s.to_string())
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(b: Vec<u8>) -> Self {
        Self::B(b)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(items: Vec<AttributeValue>) -> Self {
        Self::L(items)
    }
}

impl From<BTreeMap<String, AttributeValue>> for AttributeValue {
    fn from(map: BTreeMap<String, AttributeValue>) -> Self {
        Self::M(map)
    }
}

impl From<()> for AttributeValue {
    fn from((): ()) -> Self {
        Self::Null
    }
}

/// Builds an [`Attributes`] map from `(name, value)` pairs.
///
/// ```
/// use itemtx_codec::{attributes, AttributeValue};
///
/// let item = attributes([("pk", AttributeValue::s("a")), ("n", AttributeValue::number(1))]);
/// assert_eq!(item.len(), 2);
/// ```
pub fn attributes<K, I>(pairs: I) -> Attributes
where
    K: Into<String>,
    I: IntoIterator<Item = (K, AttributeValue)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
