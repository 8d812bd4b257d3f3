//! Request classification and validation.
//!
//! Turns any request shape into one [`ClassifiedItem`] per item it touches,
//! and folds a transaction's logged requests into one lock per item.

use crate::error::{CoreError, CoreResult};
use crate::lock::item_state::{LockAction, LockedItemRequestAction};
use crate::request::Request;
use crate::transaction::Transaction;
use crate::types::is_lock_attribute;
use itemtx_codec::Attributes;
use itemtx_storage::{
    Condition, ItemKey, ItemStore, KeySchema, PutItem, StoreError, TransactWriteItem, UpdateItem,
};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One item touched by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedItem {
    /// The item.
    pub key: ItemKey,
    /// What the request does to it.
    pub action: LockAction,
    /// The caller's condition for this item, if any.
    pub condition: Option<Condition>,
    /// Key schema of the item's table.
    pub schema: KeySchema,
}

impl ClassifiedItem {
    /// Name of the partition key attribute.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.schema.partition_key
    }
}

/// Classifies requests and enforces the request shapes the protocol supports.
pub struct RequestClassifier {
    store: Arc<dyn ItemStore>,
    max_transact_items: usize,
    protocol_tables: Vec<String>,
}

impl RequestClassifier {
    /// Creates a classifier resolving key schemas through `store`.
    pub fn new(store: Arc<dyn ItemStore>, max_transact_items: usize) -> Self {
        Self {
            store,
            max_transact_items: max_transact_items.max(1),
            protocol_tables: Vec::new(),
        }
    }

    /// Tables callers may never address directly.
    #[must_use]
    pub fn with_protocol_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocol_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Per-request item limit.
    #[must_use]
    pub fn max_transact_items(&self) -> usize {
        self.max_transact_items
    }

    /// Lists the items a request touches, in request order.
    ///
    /// Put keys are extracted from the item through the table's key schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRequest`] for unknown tables or malformed keys.
    pub fn classify(&self, request: &Request) -> CoreResult<Vec<ClassifiedItem>> {
        match request {
            Request::Get(get) => Ok(vec![self.keyed(&get.table, &get.key, LockAction::Get, None)?]),
            Request::Put(put) => Ok(vec![self.put(put)?]),
            Request::Update(update) => Ok(vec![self.keyed(
                &update.table,
                &update.key,
                LockAction::Update,
                update.condition.clone(),
            )?]),
            Request::Delete(delete) => Ok(vec![self.keyed(
                &delete.table,
                &delete.key,
                LockAction::Delete,
                delete.condition.clone(),
            )?]),
            Request::TransactGet(gets) => gets
                .iter()
                .map(|get| self.keyed(&get.table, &get.key, LockAction::Get, None))
                .collect(),
            Request::TransactWrite(items) => {
                items.iter().map(|item| self.write_item(item)).collect()
            }
        }
    }

    /// Classifies a new request and rejects shapes the protocol cannot run.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidRequest`] for empty or oversized batches, bad
    ///   keys, and any use of a reserved attribute
    /// - [`CoreError::UnsupportedCondition`] for compound conditions, or a
    ///   Put/Update condition that is not an existence test
    /// - [`CoreError::DuplicateRequest`] if a batch names one item twice
    pub fn validate(&self, request: &Request) -> CoreResult<Vec<ClassifiedItem>> {
        match request {
            Request::TransactGet(gets) => self.check_batch_size(gets.len())?,
            Request::TransactWrite(items) => self.check_batch_size(items.len())?,
            _ => {}
        }

        let items = self.classify(request)?;

        for put in puts(request) {
            if let Some(name) = put.item.keys().find(|name| is_lock_attribute(name)) {
                return Err(CoreError::invalid_request(format!(
                    "item may not carry reserved attribute {name}"
                )));
            }
        }
        for update in updates(request) {
            let schema = self.schema(&update.table)?;
            for action in &update.actions {
                let name = action.attribute_name();
                if is_lock_attribute(name) {
                    return Err(CoreError::invalid_request(format!(
                        "update may not write reserved attribute {name}"
                    )));
                }
                if schema.is_key_attribute(name) {
                    return Err(CoreError::invalid_request(format!(
                        "update may not write key attribute {name}"
                    )));
                }
            }
        }

        {
            let mut seen = BTreeSet::new();
            for item in &items {
                validate_condition(item)?;
                if !seen.insert(&item.key) {
                    return Err(CoreError::DuplicateRequest {
                        key: item.key.clone(),
                    });
                }
            }
        }
        Ok(items)
    }

    /// Rejects a request that writes an item this transaction already writes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateRequest`] naming the item.
    pub fn validate_new_request(
        &self,
        transaction: &Transaction,
        items: &[ClassifiedItem],
    ) -> CoreResult<()> {
        let locks = self.aggregate_lock_actions(transaction)?;
        for item in items.iter().filter(|item| !item.action.is_read()) {
            if locks.get(&item.key).is_some_and(|lock| !lock.action.is_read()) {
                return Err(CoreError::DuplicateRequest {
                    key: item.key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Folds every logged request into one lock per item.
    ///
    /// A read never overrides an existing lock. A write upgrades a read and
    /// takes over its request id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] if one item carries two
    /// different write actions.
    pub fn aggregate_lock_actions(
        &self,
        transaction: &Transaction,
    ) -> CoreResult<BTreeMap<ItemKey, LockedItemRequestAction>> {
        let mut locks = BTreeMap::new();
        for record in transaction.requests() {
            for item in self.classify(&record.request)? {
                merge_lock(&mut locks, item.key, record.id, item.action)?;
            }
        }
        Ok(locks)
    }

    fn check_batch_size(&self, len: usize) -> CoreResult<()> {
        if len == 0 {
            return Err(CoreError::invalid_request("batch is empty"));
        }
        if len > self.max_transact_items {
            return Err(CoreError::invalid_request(format!(
                "batch has {len} items, limit is {}",
                self.max_transact_items
            )));
        }
        Ok(())
    }

    fn schema(&self, table: &str) -> CoreResult<KeySchema> {
        if self.protocol_tables.iter().any(|t| t == table) {
            return Err(CoreError::invalid_request(format!(
                "table {table} is reserved for transaction bookkeeping"
            )));
        }
        self.store.key_schema(table).map_err(|e| match e {
            StoreError::TableNotFound { .. } | StoreError::Validation { .. } => {
                CoreError::invalid_request(e.to_string())
            }
            other => other.into(),
        })
    }

    fn keyed(
        &self,
        table: &str,
        key: &Attributes,
        action: LockAction,
        condition: Option<Condition>,
    ) -> CoreResult<ClassifiedItem> {
        let schema = self.schema(table)?;
        schema
            .validate_key(key)
            .map_err(|e| CoreError::invalid_request(format!("{table}: {e}")))?;
        Ok(ClassifiedItem {
            key: ItemKey::new(table, key.clone()),
            action,
            condition,
            schema,
        })
    }

    fn put(&self, put: &PutItem) -> CoreResult<ClassifiedItem> {
        let schema = self.schema(&put.table)?;
        let key = schema
            .extract_key(&put.item)
            .map_err(|e| CoreError::invalid_request(format!("{}: {e}", put.table)))?;
        Ok(ClassifiedItem {
            key: ItemKey::new(put.table.clone(), key),
            action: LockAction::Put,
            condition: put.condition.clone(),
            schema,
        })
    }

    fn write_item(&self, item: &TransactWriteItem) -> CoreResult<ClassifiedItem> {
        let action = LockAction::of_write_item(item);
        match item {
            TransactWriteItem::Put(put) => self.put(put),
            TransactWriteItem::Update(update) => {
                self.keyed(&update.table, &update.key, action, update.condition.clone())
            }
            TransactWriteItem::Delete(delete) => {
                self.keyed(&delete.table, &delete.key, action, delete.condition.clone())
            }
            TransactWriteItem::ConditionCheck(check) => {
                self.keyed(&check.table, &check.key, action, Some(check.condition.clone()))
            }
        }
    }
}

fn merge_lock(
    locks: &mut BTreeMap<ItemKey, LockedItemRequestAction>,
    key: ItemKey,
    request_id: u64,
    action: LockAction,
) -> CoreResult<()> {
    match locks.entry(key) {
        Entry::Vacant(entry) => {
            let key = entry.key().clone();
            entry.insert(LockedItemRequestAction {
                key,
                request_id,
                action,
            });
        }
        Entry::Occupied(mut entry) => {
            let lock = entry.get_mut();
            if action.is_read() || lock.action == action {
                return Ok(());
            }
            if lock.action.is_read() {
                lock.action = action;
                lock.request_id = request_id;
            } else {
                return Err(CoreError::invariant_violation(format!(
                    "{} locked for both {:?} and {:?}",
                    lock.key, lock.action, action
                )));
            }
        }
    }
    Ok(())
}

fn validate_condition(item: &ClassifiedItem) -> CoreResult<()> {
    let Some(condition) = &item.condition else {
        return Ok(());
    };
    if condition.is_compound() {
        return Err(CoreError::unsupported_condition(format!(
            "compound condition on {}",
            item.key
        )));
    }
    if let Some(name) = condition
        .attribute_names()
        .into_iter()
        .find(|name| is_lock_attribute(name))
    {
        return Err(CoreError::invalid_request(format!(
            "condition may not test reserved attribute {name}"
        )));
    }
    match (item.action, condition) {
        (LockAction::Put | LockAction::Update, Condition::AttributeExists(_))
        | (LockAction::Put | LockAction::Update, Condition::AttributeNotExists(_)) => Ok(()),
        (LockAction::Put | LockAction::Update, _) => Err(CoreError::unsupported_condition(
            format!("{:?} on {} may only test attribute existence", item.action, item.key),
        )),
        _ => Ok(()),
    }
}

fn puts(request: &Request) -> Vec<&PutItem> {
    match request {
        Request::Put(put) => vec![put],
        Request::TransactWrite(items) => items
            .iter()
            .filter_map(|item| match item {
                TransactWriteItem::Put(put) => Some(put),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn updates(request: &Request) -> Vec<&UpdateItem> {
    match request {
        Request::Update(update) => vec![update],
        Request::TransactWrite(items) => items
            .iter()
            .filter_map(|item| match item {
                TransactWriteItem::Update(update) => Some(update),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
