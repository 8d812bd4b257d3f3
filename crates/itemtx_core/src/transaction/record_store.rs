//! Persistence of transaction records.
//!
//! A record is one item in the transaction table:
//!
//! | attribute   | type | meaning                                   |
//! |-------------|------|-------------------------------------------|
//! | `TXID`      | S    | transaction id (partition key)            |
//! | `STATE`     | S    | `Pending`, `Committed` or `RolledBack`    |
//! | `FINALIZED` | BOOL | whether the stored state is terminal      |
//! | `VERSION`   | N    | compare-and-set version                   |
//! | `DATE`      | N    | last write, ms since the Unix epoch       |
//! | `REQUESTS`  | L    | CBOR-encoded request records (B entries)  |
//!
//! Every mutation is a conditional write on `VERSION`. A failed condition is
//! never reported as-is: the record is re-read and the most specific error
//! for its current state is raised.

use crate::error::{CoreError, CoreResult};
use crate::request::{Request, RequestRecord};
use crate::transaction::cache::TransactionCache;
use crate::transaction::state::{Transaction, TransactionState, STORED_PENDING};
use crate::types::{
    Clock, TransactionId, ATTR_DATE, ATTR_FINALIZED, ATTR_REQUESTS, ATTR_STATE, ATTR_TXID,
    ATTR_VERSION,
};
use itemtx_codec::{from_cbor, to_cbor, AttributeValue, Attributes};
use itemtx_storage::{
    Condition, DeleteItem, GetItem, ItemStore, PutItem, ReturnValues, StoreError, UpdateAction,
    UpdateItem,
};
use std::sync::Arc;
use tracing::debug;

/// Owns transaction records: creation, CAS updates, request log, listing and deletion.
pub struct TransactionRecordStore {
    store: Arc<dyn ItemStore>,
    table: String,
    cache: Arc<dyn TransactionCache>,
    clock: Arc<dyn Clock>,
}

impl TransactionRecordStore {
    /// Creates a record store over `table`.
    pub fn new(
        store: Arc<dyn ItemStore>,
        table: impl Into<String>,
        cache: Arc<dyn TransactionCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            cache,
            clock,
        }
    }

    /// Name of the record table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the record for a fresh transaction.
    ///
    /// # Errors
    ///
    /// Fails if a record with this id already exists; the error reflects the
    /// existing record's state.
    pub fn add(&self, transaction: &Transaction) -> CoreResult<()> {
        let put = PutItem::new(self.table.clone(), encode_record(transaction)?)
            .with_condition(Condition::not_exists(ATTR_TXID));
        match self.store.put_item(&put) {
            Ok(_) => {
                self.cache.put(transaction);
                debug!(txid = %transaction.id, "transaction record created");
                Ok(())
            }
            Err(StoreError::ConditionalCheckFailed { .. }) => {
                Err(self.resolve_failure(&transaction.id, "transaction already exists"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads a transaction, from the cache unless `force_fetch` is set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no record exists.
    pub fn get(&self, id: &TransactionId, force_fetch: bool) -> CoreResult<Transaction> {
        if !force_fetch {
            if let Some(cached) = self.cache.get(id) {
                return Ok(cached);
            }
        }
        self.fetch(id)?.ok_or_else(|| CoreError::NotFound {
            transaction_id: id.clone(),
        })
    }

    /// Returns true if a record exists for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn contains(&self, id: &TransactionId) -> CoreResult<bool> {
        Ok(self.fetch(id)?.is_some())
    }

    /// Moves a transaction to `next` with a compare-and-set on its version.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidStateTransition`] for backward moves, or the
    /// re-read state's error if the stored version differs.
    pub fn update(&self, transaction: &Transaction, next: TransactionState) -> CoreResult<Transaction> {
        if !transaction.state.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: transaction.state,
                to: next,
            });
        }

        let (state, finalized) = next.to_stored();
        let update = UpdateItem::new(
            self.table.clone(),
            record_key(&transaction.id),
            vec![
                UpdateAction::set(ATTR_STATE, state),
                UpdateAction::set(ATTR_FINALIZED, finalized),
                UpdateAction::set(ATTR_VERSION, transaction.version + 1),
                UpdateAction::set(ATTR_DATE, self.clock.now_millis()),
            ],
        )
        .with_condition(Condition::equals(ATTR_VERSION, transaction.version))
        .with_return_values(ReturnValues::AllNew);

        let updated = self.write(&transaction.id, &update, "version mismatch")?;
        debug!(
            txid = %transaction.id,
            from = ?transaction.state,
            to = ?updated.state,
            version = updated.version,
            "transaction state changed"
        );
        Ok(updated)
    }

    /// Appends a request to an active transaction's log.
    ///
    /// The new record's id is the version after the append.
    ///
    /// # Errors
    ///
    /// Fails if the stored version differs from `transaction.version` or the
    /// stored state is no longer pending.
    pub fn append_request(&self, transaction: &Transaction, request: Request) -> CoreResult<Transaction> {
        let next_version = transaction.version + 1;
        let record = RequestRecord {
            id: next_version,
            request,
        };
        let update = UpdateItem::new(
            self.table.clone(),
            record_key(&transaction.id),
            vec![
                UpdateAction::Append(
                    ATTR_REQUESTS.to_string(),
                    vec![AttributeValue::B(to_cbor(&record)?)],
                ),
                UpdateAction::set(ATTR_VERSION, next_version),
                UpdateAction::set(ATTR_DATE, self.clock.now_millis()),
            ],
        )
        .with_condition(
            Condition::equals(ATTR_VERSION, transaction.version)
                .and(Condition::equals(ATTR_STATE, STORED_PENDING))
                .and(Condition::equals(ATTR_FINALIZED, false)),
        )
        .with_return_values(ReturnValues::AllNew);

        let updated = self.write(&transaction.id, &update, "version mismatch")?;
        debug!(
            txid = %transaction.id,
            request_id = record.id,
            kind = record.request.kind(),
            "request appended"
        );
        Ok(updated)
    }

    /// Deletes a finalized record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the record is absent, or a generic
    /// failure if it exists but is not finalized.
    pub fn remove(&self, id: &TransactionId) -> CoreResult<()> {
        let delete = DeleteItem::new(self.table.clone(), record_key(id))
            .with_condition(Condition::equals(ATTR_FINALIZED, true));
        let result = self.store.delete_item(&delete);
        self.cache.invalidate(id);
        match result {
            Ok(_) => {
                debug!(txid = %id, "transaction record removed");
                Ok(())
            }
            Err(StoreError::ConditionalCheckFailed { item: None }) => Err(CoreError::NotFound {
                transaction_id: id.clone(),
            }),
            Err(StoreError::ConditionalCheckFailed { item: Some(_) }) => {
                Err(CoreError::transaction_failed(id, "transaction is not finalized"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Lists up to `limit` transactions in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be scanned or a record is malformed.
    pub fn list(&self, limit: Option<usize>) -> CoreResult<Vec<Transaction>> {
        self.store
            .scan(&self.table, limit)?
            .iter()
            .map(decode_record)
            .collect()
    }

    fn fetch(&self, id: &TransactionId) -> CoreResult<Option<Transaction>> {
        let item = self
            .store
            .get_item(&GetItem::new(self.table.clone(), record_key(id)))?;
        match item {
            Some(item) => {
                let transaction = decode_record(&item)?;
                self.cache.put(&transaction);
                Ok(Some(transaction))
            }
            None => {
                self.cache.invalidate(id);
                Ok(None)
            }
        }
    }

    fn write(&self, id: &TransactionId, update: &UpdateItem, context: &str) -> CoreResult<Transaction> {
        match self.store.update_item(update) {
            Ok(Some(item)) => {
                let transaction = decode_record(&item)?;
                self.cache.put(&transaction);
                Ok(transaction)
            }
            Ok(None) => Err(CoreError::invariant_violation(
                "store returned no image for an ALL_NEW update",
            )),
            Err(StoreError::ConditionalCheckFailed { .. }) => Err(self.resolve_failure(id, context)),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-reads the record after a failed condition and picks the typed error.
    fn resolve_failure(&self, id: &TransactionId, context: &str) -> CoreError {
        match self.fetch(id) {
            Ok(Some(current)) if current.state.is_decided() => current.decided_error(),
            Ok(Some(current)) => CoreError::transaction_failed(
                id,
                format!("{context} (stored version {})", current.version),
            ),
            Ok(None) => CoreError::NotFound {
                transaction_id: id.clone(),
            },
            Err(e) => e,
        }
    }
}

fn record_key(id: &TransactionId) -> Attributes {
    let mut key = Attributes::new();
    key.insert(ATTR_TXID.to_string(), AttributeValue::s(id.as_str()));
    key
}

fn encode_record(transaction: &Transaction) -> CoreResult<Attributes> {
    let (state, finalized) = transaction.state.to_stored();
    let requests = transaction
        .requests
        .iter()
        .map(|record| to_cbor(record).map(AttributeValue::B))
        .collect::<Result<Vec<_>, _>>()?;

    let mut item = record_key(&transaction.id);
    item.insert(ATTR_STATE.to_string(), AttributeValue::s(state));
    item.insert(ATTR_FINALIZED.to_string(), AttributeValue::Bool(finalized));
    item.insert(ATTR_VERSION.to_string(), transaction.version.into());
    item.insert(ATTR_DATE.to_string(), transaction.last_update_time.into());
    item.insert(ATTR_REQUESTS.to_string(), AttributeValue::L(requests));
    Ok(item)
}

/// Decodes a transaction record item.
pub(crate) fn decode_record(item: &Attributes) -> CoreResult<Transaction> {
    let field = |name: &str| {
        item.get(name)
            .ok_or_else(|| CoreError::serialization(format!("record is missing {name}")))
    };

    let id = field(ATTR_TXID)?
        .as_s()
        .ok_or_else(|| CoreError::serialization("TXID is not a string"))?;
    let stored_state = field(ATTR_STATE)?
        .as_s()
        .ok_or_else(|| CoreError::serialization("STATE is not a string"))?;
    let finalized = field(ATTR_FINALIZED)?
        .as_bool()
        .ok_or_else(|| CoreError::serialization("FINALIZED is not a boolean"))?;
    let version = field(ATTR_VERSION)?
        .as_u64()
        .ok_or_else(|| CoreError::serialization("VERSION is not a number"))?;
    let last_update_time = field(ATTR_DATE)?
        .as_u64()
        .ok_or_else(|| CoreError::serialization("DATE is not a number"))?;

    let requests = match item.get(ATTR_REQUESTS) {
        None => Vec::new(),
        Some(AttributeValue::L(entries)) => entries
            .iter()
            .map(|entry| {
                let bytes = entry
                    .as_b()
                    .ok_or_else(|| CoreError::serialization("request entry is not binary"))?;
                Ok(from_cbor::<RequestRecord>(bytes)?)
            })
            .collect::<CoreResult<Vec<_>>>()?,
        Some(other) => {
            return Err(CoreError::serialization(format!(
                "REQUESTS has type {}",
                other.type_name()
            )))
        }
    };

    Ok(Transaction {
        id: TransactionId::from(id),
        state: TransactionState::from_stored(stored_state, finalized)?,
        version,
        last_update_time,
        requests,
    })
}
