//! In-memory item store.

use crate::error::{StoreError, StoreResult};
use crate::expression::{apply_updates, Condition, UpdateAction};
use crate::key::KeySchema;
use crate::request::{
    CancellationReason, DeleteItem, GetItem, PutItem, ReturnValues, TransactWriteItem, UpdateItem,
};
use crate::store::{ItemStore, KeySchemaSource, DEFAULT_MAX_TRANSACT_ITEMS};
use itemtx_codec::Attributes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// One table: its key schema and items indexed by key attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Table {
    pub(crate) schema: KeySchema,
    pub(crate) items: BTreeMap<Attributes, Attributes>,
}

impl Table {
    pub(crate) fn new(schema: KeySchema) -> Self {
        Self {
            schema,
            items: BTreeMap::new(),
        }
    }

    /// Resolves the key an action targets, validating its shape.
    fn target_key(&self, action: &TransactWriteItem) -> StoreResult<Attributes> {
        match action {
            TransactWriteItem::Put(put) => self.schema.extract_key(&put.item),
            TransactWriteItem::Update(update) => {
                self.check_update_actions(&update.actions)?;
                self.schema.validate_key(&update.key)?;
                Ok(update.key.clone())
            }
            TransactWriteItem::Delete(delete) => {
                self.schema.validate_key(&delete.key)?;
                Ok(delete.key.clone())
            }
            TransactWriteItem::ConditionCheck(check) => {
                self.schema.validate_key(&check.key)?;
                Ok(check.key.clone())
            }
        }
    }

    fn check_update_actions(&self, actions: &[UpdateAction]) -> StoreResult<()> {
        if let Some(action) = actions
            .iter()
            .find(|a| self.schema.is_key_attribute(a.attribute_name()))
        {
            return Err(StoreError::validation(format!(
                "cannot update key attribute {}",
                action.attribute_name()
            )));
        }
        Ok(())
    }

    fn updated_image(&self, key: &Attributes, actions: &[UpdateAction]) -> StoreResult<Attributes> {
        let mut next = self.items.get(key).cloned().unwrap_or_else(|| key.clone());
        apply_updates(&mut next, actions)?;
        Ok(next)
    }
}

fn check_condition(condition: Option<&Condition>, current: Option<&Attributes>) -> StoreResult<()> {
    match condition {
        Some(condition) if !condition.evaluate(current) => Err(StoreError::ConditionalCheckFailed {
            item: current.cloned(),
        }),
        _ => Ok(()),
    }
}

fn lookup<'a>(tables: &'a BTreeMap<String, Table>, name: &str) -> StoreResult<&'a Table> {
    tables.get(name).ok_or_else(|| StoreError::table_not_found(name))
}

fn lookup_mut<'a>(tables: &'a mut BTreeMap<String, Table>, name: &str) -> StoreResult<&'a mut Table> {
    tables.get_mut(name).ok_or_else(|| StoreError::table_not_found(name))
}

/// An in-memory item store.
///
/// This store keeps every table in memory and is suitable for:
/// - Unit and integration tests
/// - Embedding the protocol in a single process
///
/// # Thread Safety
///
/// Tables live behind one `RwLock`, so every call (including a multi-item
/// write) is linearizable.
///
/// # Example
///
/// ```rust
/// use itemtx_codec::{attributes, AttributeValue};
/// use itemtx_storage::{GetItem, InMemoryItemStore, ItemStore, KeySchema, PutItem};
///
/// let store = InMemoryItemStore::new();
/// store.create_table("Users", KeySchema::new("id")).unwrap();
/// let item = attributes([("id", AttributeValue::s("u1")), ("age", AttributeValue::number(30))]);
/// store.put_item(&PutItem::new("Users", item.clone())).unwrap();
/// let key = attributes([("id", AttributeValue::s("u1"))]);
/// assert_eq!(store.get_item(&GetItem::new("Users", key)).unwrap(), Some(item));
/// ```
#[derive(Debug)]
pub struct InMemoryItemStore {
    tables: RwLock<BTreeMap<String, Table>>,
    max_transact_items: usize,
}

impl Default for InMemoryItemStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            max_transact_items: DEFAULT_MAX_TRANSACT_ITEMS,
        }
    }
}

impl InMemoryItemStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-call item limit of `transact_get`/`transact_write`.
    #[must_use]
    pub fn with_max_transact_items(mut self, max: usize) -> Self {
        self.max_transact_items = max.max(1);
        self
    }

    pub(crate) fn from_tables(tables: BTreeMap<String, Table>) -> Self {
        Self {
            tables: RwLock::new(tables),
            ..Self::default()
        }
    }

    pub(crate) fn tables(&self) -> BTreeMap<String, Table> {
        self.tables.read().clone()
    }

    /// Creates a table. Creating an existing table with the same schema is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableExists`] if the table exists with another schema.
    pub fn create_table(&self, name: impl Into<String>, schema: KeySchema) -> StoreResult<()> {
        let name = name.into();
        let mut tables = self.tables.write();
        match tables.get(&name) {
            Some(existing) if existing.schema == schema => Ok(()),
            Some(_) => Err(StoreError::TableExists { table: name }),
            None => {
                tables.insert(name, Table::new(schema));
                Ok(())
            }
        }
    }

    /// Drops a table and all its items.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] if the table does not exist.
    pub fn delete_table(&self, name: &str) -> StoreResult<()> {
        self.tables
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::table_not_found(name))
    }

    /// Returns the names of all tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Returns the number of items in a table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] if the table does not exist.
    pub fn item_count(&self, table: &str) -> StoreResult<usize> {
        Ok(lookup(&self.tables.read(), table)?.items.len())
    }

    fn check_batch_size(&self, len: usize) -> StoreResult<()> {
        if len == 0 {
            return Err(StoreError::validation("batch must contain at least one item"));
        }
        if len > self.max_transact_items {
            return Err(StoreError::validation(format!(
                "batch of {len} items exceeds limit of {}",
                self.max_transact_items
            )));
        }
        Ok(())
    }
}

impl KeySchemaSource for InMemoryItemStore {
    fn key_schema(&self, table: &str) -> StoreResult<KeySchema> {
        Ok(lookup(&self.tables.read(), table)?.schema.clone())
    }
}

impl ItemStore for InMemoryItemStore {
    fn get_item(&self, request: &GetItem) -> StoreResult<Option<Attributes>> {
        let tables = self.tables.read();
        let table = lookup(&tables, &request.table)?;
        table.schema.validate_key(&request.key)?;
        Ok(table.items.get(&request.key).cloned())
    }

    fn put_item(&self, request: &PutItem) -> StoreResult<Option<Attributes>> {
        let mut tables = self.tables.write();
        let table = lookup_mut(&mut tables, &request.table)?;
        let key = table.schema.extract_key(&request.item)?;
        check_condition(request.condition.as_ref(), table.items.get(&key))?;
        let old = table.items.insert(key, request.item.clone());
        Ok(match request.return_values {
            ReturnValues::None => None,
            ReturnValues::AllOld => old,
            ReturnValues::AllNew => Some(request.item.clone()),
        })
    }

    fn update_item(&self, request: &UpdateItem) -> StoreResult<Option<Attributes>> {
        let mut tables = self.tables.write();
        let table = lookup_mut(&mut tables, &request.table)?;
        table.schema.validate_key(&request.key)?;
        table.check_update_actions(&request.actions)?;
        check_condition(request.condition.as_ref(), table.items.get(&request.key))?;
        let next = table.updated_image(&request.key, &request.actions)?;
        let old = table.items.insert(request.key.clone(), next.clone());
        Ok(match request.return_values {
            ReturnValues::None => None,
            ReturnValues::AllOld => old,
            ReturnValues::AllNew => Some(next),
        })
    }

    fn delete_item(&self, request: &DeleteItem) -> StoreResult<Option<Attributes>> {
        let mut tables = self.tables.write();
        let table = lookup_mut(&mut tables, &request.table)?;
        table.schema.validate_key(&request.key)?;
        check_condition(request.condition.as_ref(), table.items.get(&request.key))?;
        let old = table.items.remove(&request.key);
        Ok(match request.return_values {
            ReturnValues::AllOld => old,
            ReturnValues::None | ReturnValues::AllNew => None,
        })
    }

    fn transact_get(&self, requests: &[GetItem]) -> StoreResult<Vec<Option<Attributes>>> {
        self.check_batch_size(requests.len())?;
        let tables = self.tables.read();
        requests
            .iter()
            .map(|request| {
                let table = lookup(&tables, &request.table)?;
                table.schema.validate_key(&request.key)?;
                Ok(table.items.get(&request.key).cloned())
            })
            .collect()
    }

    fn transact_write(&self, items: &[TransactWriteItem]) -> StoreResult<()> {
        self.check_batch_size(items.len())?;
        let mut tables = self.tables.write();

        let mut keys = Vec::with_capacity(items.len());
        let mut seen = BTreeSet::new();
        for action in items {
            let key = lookup(&tables, action.table())?.target_key(action)?;
            if !seen.insert((action.table().to_string(), key.clone())) {
                return Err(StoreError::validation(
                    "batch targets the same item more than once",
                ));
            }
            keys.push(key);
        }

        let mut reasons = Vec::with_capacity(items.len());
        let mut writes = Vec::with_capacity(items.len());
        for (action, key) in items.iter().zip(&keys) {
            let table = lookup(&tables, action.table())?;
            let current = table.items.get(key);
            match action.condition() {
                Some(condition) if !condition.evaluate(current) => {
                    reasons.push(CancellationReason::condition_failed(current.cloned()));
                }
                _ => reasons.push(CancellationReason::none()),
            }
            let image = match action {
                TransactWriteItem::Put(put) => Some(Some(put.item.clone())),
                TransactWriteItem::Update(update) => {
                    Some(Some(table.updated_image(key, &update.actions)?))
                }
                TransactWriteItem::Delete(_) => Some(None),
                TransactWriteItem::ConditionCheck(_) => None,
            };
            writes.push(image);
        }

        if reasons.iter().any(CancellationReason::is_failure) {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        for ((action, key), image) in items.iter().zip(keys).zip(writes) {
            let table = lookup_mut(&mut tables, action.table())?;
            match image {
                Some(Some(item)) => {
                    table.items.insert(key, item);
                }
                Some(None) => {
                    table.items.remove(&key);
                }
                None => {}
            }
        }
        Ok(())
    }

    fn scan(&self, table: &str, limit: Option<usize>) -> StoreResult<Vec<Attributes>> {
        let tables = self.tables.read();
        let table = lookup(&tables, table)?;
        Ok(table
            .items
            .values()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn max_transact_items(&self) -> usize {
        self.max_transact_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CancellationCode, ConditionCheck};
    use itemtx_codec::{attributes, AttributeValue};
    use proptest::prelude::*;

    fn store() -> InMemoryItemStore {
        let store = InMemoryItemStore::new();
        store.create_table("t", KeySchema::new("pk")).unwrap();
        store
    }

    fn key(pk: &str) -> Attributes {
        attributes([("pk", AttributeValue::s(pk))])
    }

    fn item(pk: &str, n: i64) -> Attributes {
        attributes([("pk", AttributeValue::s(pk)), ("n", AttributeValue::number(n))])
    }

    #[test]
    fn memory_put_get_delete() {
        let store = store();
        store.put_item(&PutItem::new("t", item("a", 1))).unwrap();
        assert_eq!(
            store.get_item(&GetItem::new("t", key("a"))).unwrap(),
            Some(item("a", 1))
        );
        let old = store
            .delete_item(&DeleteItem::new("t", key("a")).with_return_values(ReturnValues::AllOld))
            .unwrap();
        assert_eq!(old, Some(item("a", 1)));
        assert_eq!(store.get_item(&GetItem::new("t", key("a"))).unwrap(), None);
    }

    #[test]
    fn memory_conditional_put_reports_current_item() {
        let store = store();
        store.put_item(&PutItem::new("t", item("a", 1))).unwrap();
        let err = store
            .put_item(&PutItem::new("t", item("a", 2)).with_condition(Condition::not_exists("pk")))
            .unwrap_err();
        match err {
            StoreError::ConditionalCheckFailed { item: current } => {
                assert_eq!(current, Some(item("a", 1)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn memory_update_creates_and_returns_images() {
        let store = store();
        let new = store
            .update_item(
                &UpdateItem::new("t", key("a"), vec![UpdateAction::set("n", 7i64)])
                    .with_return_values(ReturnValues::AllNew),
            )
            .unwrap();
        assert_eq!(new, Some(item("a", 7)));
        let old = store
            .update_item(
                &UpdateItem::new("t", key("a"), vec![UpdateAction::set("n", 8i64)])
                    .with_return_values(ReturnValues::AllOld),
            )
            .unwrap();
        assert_eq!(old, Some(item("a", 7)));
    }

    #[test]
    fn memory_update_cannot_touch_key() {
        let store = store();
        let result = store.update_item(&UpdateItem::new(
            "t",
            key("a"),
            vec![UpdateAction::set("pk", "b")],
        ));
        assert!(matches!(result, Err(StoreError::Validation { .. })));
    }

    #[test]
    fn memory_unknown_table() {
        let store = store();
        let result = store.get_item(&GetItem::new("missing", key("a")));
        assert!(matches!(result, Err(StoreError::TableNotFound { .. })));
    }

    #[test]
    fn memory_create_table_is_idempotent_for_same_schema() {
        let store = store();
        assert!(store.create_table("t", KeySchema::new("pk")).is_ok());
        assert!(matches!(
            store.create_table("t", KeySchema::new("other")),
            Err(StoreError::TableExists { .. })
        ));
    }

    #[test]
    fn memory_transact_write_is_all_or_nothing() {
        let store = store();
        store.put_item(&PutItem::new("t", item("a", 1))).unwrap();

        let err = store
            .transact_write(&[
                TransactWriteItem::Put(PutItem::new("t", item("b", 1))),
                TransactWriteItem::ConditionCheck(ConditionCheck::new(
                    "t",
                    key("a"),
                    Condition::equals("n", 2i64),
                )),
            ])
            .unwrap_err();

        match err {
            StoreError::TransactionCanceled { reasons } => {
                assert_eq!(reasons.len(), 2);
                assert_eq!(reasons[0].code, CancellationCode::None);
                assert_eq!(reasons[1].code, CancellationCode::ConditionalCheckFailed);
                assert_eq!(reasons[1].item, Some(item("a", 1)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get_item(&GetItem::new("t", key("b"))).unwrap(), None);
    }

    #[test]
    fn memory_transact_write_applies_everything() {
        let store = store();
        store.put_item(&PutItem::new("t", item("a", 1))).unwrap();
        store
            .transact_write(&[
                TransactWriteItem::Put(PutItem::new("t", item("b", 2))),
                TransactWriteItem::Update(UpdateItem::new(
                    "t",
                    key("a"),
                    vec![UpdateAction::set("n", 5i64)],
                )),
                TransactWriteItem::Delete(DeleteItem::new("t", key("c"))),
            ])
            .unwrap();
        assert_eq!(store.item_count("t").unwrap(), 2);
        assert_eq!(
            store.get_item(&GetItem::new("t", key("a"))).unwrap(),
            Some(item("a", 5))
        );
    }

    #[test]
    fn memory_transact_write_rejects_duplicates_and_oversize() {
        let store = InMemoryItemStore::new().with_max_transact_items(2);
        store.create_table("t", KeySchema::new("pk")).unwrap();

        let dup = store.transact_write(&[
            TransactWriteItem::Put(PutItem::new("t", item("a", 1))),
            TransactWriteItem::Delete(DeleteItem::new("t", key("a"))),
        ]);
        assert!(matches!(dup, Err(StoreError::Validation { .. })));

        let big = store.transact_write(&[
            TransactWriteItem::Put(PutItem::new("t", item("a", 1))),
            TransactWriteItem::Put(PutItem::new("t", item("b", 1))),
            TransactWriteItem::Put(PutItem::new("t", item("c", 1))),
        ]);
        assert!(matches!(big, Err(StoreError::Validation { .. })));
        assert!(matches!(store.transact_write(&[]), Err(StoreError::Validation { .. })));
        assert_eq!(store.max_transact_items(), 2);
    }

    #[test]
    fn memory_transact_get() {
        let store = store();
        store.put_item(&PutItem::new("t", item("a", 1))).unwrap();
        let items = store
            .transact_get(&[GetItem::new("t", key("a")), GetItem::new("t", key("z"))])
            .unwrap();
        assert_eq!(items, vec![Some(item("a", 1)), None]);
    }

    #[test]
    fn memory_scan_with_limit() {
        let store = store();
        for (i, pk) in ["a", "b", "c"].iter().enumerate() {
            store
                .put_item(&PutItem::new("t", item(pk, i as i64)))
                .unwrap();
        }
        assert_eq!(store.scan("t", None).unwrap().len(), 3);
        assert_eq!(store.scan("t", Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn memory_key_schema_source() {
        let store = store();
        assert_eq!(store.key_schema("t").unwrap(), KeySchema::new("pk"));
        assert!(store.key_schema("nope").is_err());
    }

    #[test]
    fn memory_delete_table() {
        let store = store();
        store.delete_table("t").unwrap();
        assert!(store.table_names().is_empty());
        assert!(store.delete_table("t").is_err());
    }

    proptest! {
        #[test]
        fn canceled_batch_changes_nothing(values in prop::collection::vec(0i64..100, 1..10)) {
            let store = store();
            store.put_item(&PutItem::new("t", item("guard", 0))).unwrap();
            let before = store.scan("t", None).unwrap();

            let mut batch: Vec<TransactWriteItem> = values
                .iter()
                .enumerate()
                .map(|(i, n)| TransactWriteItem::Put(PutItem::new("t", item(&format!("k{i}"), *n))))
                .collect();
            batch.push(TransactWriteItem::ConditionCheck(ConditionCheck::new(
                "t",
                key("guard"),
                Condition::equals("n", 1i64),
            )));

            prop_assert!(store.transact_write(&batch).is_err());
            prop_assert_eq!(store.scan("t", None).unwrap(), before);
        }
    }
}
