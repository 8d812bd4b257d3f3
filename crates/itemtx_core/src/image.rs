//! Before-images of locked items, used to undo applied writes on rollback.
//!
//! One image record per mutating request, keyed `"{txid}_{request_id}"`.
//! The value is the canonical encoding of a list of
//! `{ "table": S, "key": M, "item": M }` maps, one per item the request
//! touched that existed before the transaction locked it. Items the
//! transaction created are left out; rollback deletes those instead.

use crate::error::{CoreError, CoreResult};
use crate::types::{TransactionId, ATTR_IMAGE_ID, ATTR_IMAGE_VALUE};
use itemtx_codec::{decode_attribute, encode_attribute, AttributeValue, Attributes};
use itemtx_storage::{
    Condition, DeleteItem, GetItem, ItemKey, ItemStore, PutItem, StoreError,
};
use std::sync::Arc;
use tracing::debug;

const FIELD_TABLE: &str = "table";
const FIELD_KEY: &str = "key";
const FIELD_ITEM: &str = "item";

/// A snapshot of one item, without lock attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    /// Which item.
    pub key: ItemKey,
    /// Its attributes at capture time.
    pub attributes: Attributes,
}

impl ItemRecord {
    fn to_value(&self) -> AttributeValue {
        let mut map = Attributes::new();
        map.insert(FIELD_TABLE.to_string(), AttributeValue::s(&self.key.table));
        map.insert(FIELD_KEY.to_string(), AttributeValue::M(self.key.key.clone()));
        map.insert(FIELD_ITEM.to_string(), AttributeValue::M(self.attributes.clone()));
        AttributeValue::M(map)
    }

    fn from_value(value: &AttributeValue) -> CoreResult<Self> {
        let map = value
            .as_map()
            .ok_or_else(|| CoreError::serialization("image entry is not a map"))?;
        let table = map
            .get(FIELD_TABLE)
            .and_then(AttributeValue::as_s)
            .ok_or_else(|| CoreError::serialization("image entry has no table"))?;
        let key = map
            .get(FIELD_KEY)
            .and_then(AttributeValue::as_map)
            .ok_or_else(|| CoreError::serialization("image entry has no key"))?;
        let attributes = map
            .get(FIELD_ITEM)
            .and_then(AttributeValue::as_map)
            .ok_or_else(|| CoreError::serialization("image entry has no item"))?;
        Ok(Self {
            key: ItemKey::new(table, key.clone()),
            attributes: attributes.clone(),
        })
    }
}

/// Key of the image record for one request.
#[must_use]
pub fn image_id(transaction_id: &TransactionId, request_id: u64) -> String {
    format!("{transaction_id}_{request_id}")
}

/// Reads and writes image records.
pub struct ItemImageStore {
    store: Arc<dyn ItemStore>,
    table: String,
}

impl ItemImageStore {
    /// Creates an image store over `table`.
    pub fn new(store: Arc<dyn ItemStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Name of the image table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Saves the images for one request. Images are written at most once.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ImageExists`] if this request already has an image.
    pub fn put(
        &self,
        transaction_id: &TransactionId,
        request_id: u64,
        records: &[ItemRecord],
    ) -> CoreResult<()> {
        let id = image_id(transaction_id, request_id);
        let value = AttributeValue::L(records.iter().map(ItemRecord::to_value).collect());

        let mut item = Attributes::new();
        item.insert(ATTR_IMAGE_ID.to_string(), AttributeValue::s(&id));
        item.insert(ATTR_IMAGE_VALUE.to_string(), AttributeValue::B(encode_attribute(&value)?));

        let put = PutItem::new(self.table.clone(), item)
            .with_condition(Condition::not_exists(ATTR_IMAGE_ID));
        match self.store.put_item(&put) {
            Ok(_) => {
                debug!(image_id = %id, items = records.len(), "image saved");
                Ok(())
            }
            Err(StoreError::ConditionalCheckFailed { .. }) => {
                Err(CoreError::ImageExists { image_id: id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the images for one request, or `None` if none were saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the image record is malformed.
    pub fn get(
        &self,
        transaction_id: &TransactionId,
        request_id: u64,
    ) -> CoreResult<Option<Vec<ItemRecord>>> {
        let Some(item) = self.store.get_item(&GetItem::new(
            self.table.clone(),
            image_key(&image_id(transaction_id, request_id)),
        ))?
        else {
            return Ok(None);
        };

        let bytes = item
            .get(ATTR_IMAGE_VALUE)
            .and_then(AttributeValue::as_b)
            .ok_or_else(|| CoreError::serialization("image record has no value"))?;
        match decode_attribute(bytes)? {
            AttributeValue::L(entries) => entries
                .iter()
                .map(ItemRecord::from_value)
                .collect::<CoreResult<Vec<_>>>()
                .map(Some),
            other => Err(CoreError::serialization(format!(
                "image value has type {}",
                other.type_name()
            ))),
        }
    }

    /// Deletes the images for one request. Deleting a missing image succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the delete.
    pub fn delete(&self, transaction_id: &TransactionId, request_id: u64) -> CoreResult<()> {
        self.store.delete_item(&DeleteItem::new(
            self.table.clone(),
            image_key(&image_id(transaction_id, request_id)),
        ))?;
        Ok(())
    }
}

fn image_key(id: &str) -> Attributes {
    let mut key = Attributes::new();
    key.insert(ATTR_IMAGE_ID.to_string(), AttributeValue::s(id));
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use itemtx_codec::attributes;
    use itemtx_storage::InMemoryItemStore;

    fn images() -> ItemImageStore {
        let store = Arc::new(InMemoryItemStore::new());
        Config::default().create_tables(&store).unwrap();
        ItemImageStore::new(store, "TransactionImages")
    }

    fn record(id: &str, balance: i64) -> ItemRecord {
        ItemRecord {
            key: ItemKey::partition("Accounts", "id", id),
            attributes: attributes([
                ("id", AttributeValue::s(id)),
                ("balance", AttributeValue::number(balance)),
            ]),
        }
    }

    #[test]
    fn image_id_format() {
        assert_eq!(image_id(&"abc".into(), 4), "abc_4");
    }

    #[test]
    fn put_then_get() {
        let images = images();
        let tx: TransactionId = "t1".into();
        let records = vec![record("a", 10), record("b", -3)];
        images.put(&tx, 2, &records).unwrap();
        assert_eq!(images.get(&tx, 2).unwrap(), Some(records));
        assert_eq!(images.get(&tx, 3).unwrap(), None);
    }

    #[test]
    fn empty_image_is_not_missing() {
        let images = images();
        let tx: TransactionId = "t1".into();
        images.put(&tx, 2, &[]).unwrap();
        assert_eq!(images.get(&tx, 2).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn images_are_write_once() {
        let images = images();
        let tx: TransactionId = "t1".into();
        images.put(&tx, 2, &[record("a", 1)]).unwrap();
        let err = images.put(&tx, 2, &[record("a", 99)]).unwrap_err();
        assert!(matches!(err, CoreError::ImageExists { ref image_id } if image_id == "t1_2"));
        assert_eq!(images.get(&tx, 2).unwrap(), Some(vec![record("a", 1)]));
    }

    #[test]
    fn delete_is_idempotent() {
        let images = images();
        let tx: TransactionId = "t1".into();
        images.put(&tx, 2, &[record("a", 1)]).unwrap();
        images.delete(&tx, 2).unwrap();
        images.delete(&tx, 2).unwrap();
        assert_eq!(images.get(&tx, 2).unwrap(), None);
    }
}
