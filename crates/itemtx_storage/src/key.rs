//! Table key schemas and item keys.

use crate::error::{StoreError, StoreResult};
use itemtx_codec::{AttributeValue, Attributes};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The key attributes of a table: a partition key and an optional sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySchema {
    /// Partition key attribute name.
    pub partition_key: String,
    /// Sort key attribute name, if the table has one.
    pub sort_key: Option<String>,
}

impl KeySchema {
    /// Creates a schema with only a partition key.
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    /// Adds a sort key.
    #[must_use]
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    /// Iterates the key attribute names, partition key first.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.as_str()).chain(self.sort_key.as_deref())
    }

    /// Returns true if `name` is one of this schema's key attributes.
    #[must_use]
    pub fn is_key_attribute(&self, name: &str) -> bool {
        self.attribute_names().any(|n| n == name)
    }

    /// Extracts the key attributes from a full item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if a key attribute is missing or is
    /// not a string, number or binary value.
    pub fn extract_key(&self, item: &Attributes) -> StoreResult<Attributes> {
        let mut key = Attributes::new();
        for name in self.attribute_names() {
            let value = item
                .get(name)
                .ok_or_else(|| StoreError::validation(format!("missing key attribute {name}")))?;
            if !value.is_key_type() {
                return Err(StoreError::validation(format!(
                    "key attribute {name} has type {}, expected S, N or B",
                    value.type_name()
                )));
            }
            key.insert(name.to_string(), value.clone());
        }
        Ok(key)
    }

    /// Checks that `key` names exactly this schema's key attributes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] on extra, missing or mistyped attributes.
    pub fn validate_key(&self, key: &Attributes) -> StoreResult<()> {
        let expected = usize::from(self.sort_key.is_some()) + 1;
        if key.len() != expected {
            return Err(StoreError::validation(format!(
                "key has {} attributes, schema expects {expected}",
                key.len()
            )));
        }
        self.extract_key(key).map(|_| ())
    }
}

/// Identifies one item: its table and its key attributes.
///
/// Equality, ordering and hashing are structural, so keys can index maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    /// Table name.
    pub table: String,
    /// Key attributes.
    pub key: Attributes,
}

impl ItemKey {
    /// Creates an item key.
    pub fn new(table: impl Into<String>, key: Attributes) -> Self {
        Self {
            table: table.into(),
            key,
        }
    }

    /// Creates a key for a table with a single string partition key.
    pub fn partition(table: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut key = Attributes::new();
        key.insert(name.into(), AttributeValue::S(value.into()));
        Self::new(table, key)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.table, AttributeValue::M(self.key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemtx_codec::attributes;
    use std::collections::HashMap;

    #[test]
    fn extract_key_with_sort_key() {
        let schema = KeySchema::new("pk").with_sort_key("sk");
        let item = attributes([
            ("pk", AttributeValue::s("a")),
            ("sk", AttributeValue::number(1)),
            ("data", AttributeValue::Bool(true)),
        ]);
        let key = schema.extract_key(&item).unwrap();
        assert_eq!(key.len(), 2);
        assert!(!key.contains_key("data"));
    }

    #[test]
    fn extract_key_missing_attribute() {
        let schema = KeySchema::new("pk");
        let item = attributes([("other", AttributeValue::s("a"))]);
        assert!(matches!(
            schema.extract_key(&item),
            Err(StoreError::Validation { .. })
        ));
    }

    #[test]
    fn extract_key_rejects_non_scalar() {
        let schema = KeySchema::new("pk");
        let item = attributes([("pk", AttributeValue::Bool(true))]);
        assert!(schema.extract_key(&item).is_err());
    }

    #[test]
    fn validate_key_rejects_extra_attributes() {
        let schema = KeySchema::new("pk");
        let key = attributes([("pk", AttributeValue::s("a")), ("x", AttributeValue::s("b"))]);
        assert!(schema.validate_key(&key).is_err());
        let key = attributes([("pk", AttributeValue::s("a"))]);
        assert!(schema.validate_key(&key).is_ok());
    }

    #[test]
    fn item_key_is_a_map_key() {
        let mut map = HashMap::new();
        map.insert(ItemKey::partition("t", "pk", "a"), 1);
        map.insert(ItemKey::partition("t", "pk", "a"), 2);
        map.insert(ItemKey::partition("u", "pk", "a"), 3);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&ItemKey::partition("t", "pk", "a")], 2);
    }

    #[test]
    fn display() {
        let key = ItemKey::partition("Users", "id", "u1");
        assert_eq!(key.to_string(), "Users{id: \"u1\"}");
    }
}
