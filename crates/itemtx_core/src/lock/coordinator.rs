//! Item lock coordinator.
//!
//! Every step here is one bounded, all-or-nothing multi-item conditional
//! write (or several, for release), so no step can be observed half done:
//!
//! 1. **Acquire** stamps `TXID`/`DATE` onto each item a request touches,
//!    inserting a `TRANSIENT` placeholder for items that do not exist yet.
//! 2. **Apply** runs the caller's request with an added guard
//!    (`TXID == me AND APPLIED absent`) and sets `APPLIED`.
//! 3. **Release** strips the lock attributes on commit, or restores the
//!    captured before-images on rollback.

use crate::error::{CoreError, CoreResult, ItemConflict};
use crate::image::{ItemImageStore, ItemRecord};
use crate::lock::classifier::{ClassifiedItem, RequestClassifier};
use crate::lock::item_state::{ItemTransactionState, LockAction, LockedItemRequestAction};
use crate::request::{Request, RequestOutcome, RequestRecord};
use crate::transaction::Transaction;
use crate::types::{
    stripped, Clock, TransactionId, ATTR_APPLIED, ATTR_DATE, ATTR_TRANSIENT, ATTR_TXID,
    LOCK_ATTRIBUTES,
};
use itemtx_codec::{AttributeValue, Attributes};
use itemtx_storage::{
    CancellationReason, Condition, ConditionCheck, DeleteItem, GetItem, ItemKey, ItemStore,
    KeySchema, PutItem, ReturnValues, StoreError, TransactWriteItem, UpdateAction, UpdateItem,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lock writes are submitted at most twice: the second time with guesses
/// corrected from the first failure.
const ACQUIRE_ATTEMPTS: u32 = 2;

/// Release batches are recomputed from live state at most once.
const RELEASE_ATTEMPTS: u32 = 2;

/// An item locked by the current transaction, as read right after locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedItem {
    /// Lock state read off the item.
    pub state: ItemTransactionState,
    /// The live item, lock attributes included.
    pub item: Option<Attributes>,
}

impl LockedItem {
    /// What a read of this item returns inside the transaction.
    ///
    /// Transient placeholders nobody wrote, and items under our own applied
    /// Delete, read as absent.
    #[must_use]
    pub fn visible(&self) -> Option<Attributes> {
        let item = self.item.as_ref()?;
        if self.state.is_transient && !self.state.is_applied {
            return None;
        }
        if self.state.lock_action == LockAction::Delete && self.state.is_applied {
            return None;
        }
        Some(stripped(item))
    }

    /// The item as it was before the transaction touched it.
    fn before(&self) -> Option<Attributes> {
        if self.state.is_transient {
            None
        } else {
            self.item.as_ref().map(stripped)
        }
    }
}

/// What the lock write assumes about an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Guess {
    exists: bool,
    applied: bool,
    transient: bool,
}

impl Guess {
    /// Everything but an unconditioned Put is assumed to hit an existing item.
    fn initial(item: &ClassifiedItem) -> Self {
        let exists = match item.action {
            LockAction::Put => matches!(item.condition, Some(Condition::AttributeExists(_))),
            LockAction::Get | LockAction::Update | LockAction::Delete | LockAction::ConditionCheck => true,
        };
        Self {
            exists,
            applied: false,
            transient: false,
        }
    }

    fn observed(state: &ItemTransactionState) -> Self {
        Self {
            exists: state.exists,
            applied: state.is_applied,
            transient: state.is_transient,
        }
    }
}

/// Acquires, applies and releases item locks for transactions.
pub struct ItemLockCoordinator {
    store: Arc<dyn ItemStore>,
    classifier: Arc<RequestClassifier>,
    images: Arc<ItemImageStore>,
    clock: Arc<dyn Clock>,
}

impl ItemLockCoordinator {
    /// Creates a coordinator.
    pub fn new(
        store: Arc<dyn ItemStore>,
        classifier: Arc<RequestClassifier>,
        images: Arc<ItemImageStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            classifier,
            images,
            clock,
        }
    }

    /// Locks every item of `record` for `transaction`.
    ///
    /// `transaction` must already contain `record`. For mutating requests the
    /// before-images are captured once the locks are held.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflicted`] if another transaction owns an item,
    /// or if the corrected lock write fails again.
    pub fn acquire_locks(
        &self,
        transaction: &Transaction,
        record: &RequestRecord,
        items: &[ClassifiedItem],
    ) -> CoreResult<Vec<LockedItem>> {
        let me = transaction.id();
        self.lock_items(me, record.id, items)?;

        let locks = self.classifier.aggregate_lock_actions(transaction)?;
        let keys: Vec<ItemKey> = items.iter().map(|item| item.key.clone()).collect();
        let images = self.read_items(&keys)?;

        let mut locked = Vec::with_capacity(items.len());
        for (item, image) in items.iter().zip(images) {
            let action = locks.get(&item.key).map_or(item.action, |lock| lock.action);
            let state = ItemTransactionState::from_item(item.key.clone(), image.as_ref(), action);
            if !state.is_owned_by(me) {
                return Err(CoreError::transaction_failed(
                    me,
                    format!("lost the lock on {} right after acquiring it", item.key),
                ));
            }
            locked.push(LockedItem { state, item: image });
        }

        if !record.request.is_read_only() {
            self.capture_images(me, record.id, items, &locked)?;
        }
        Ok(locked)
    }

    /// Runs `record`'s request against items this transaction has locked.
    ///
    /// Calling it again for a request that was already applied writes nothing
    /// and rebuilds the same outcome.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ConditionFailed`] if the caller's condition does not hold
    /// - [`CoreError::Conflicted`] if another transaction now owns an item
    /// - [`CoreError::TransactionFailed`] if our lock was released meanwhile
    pub fn apply_request(
        &self,
        transaction: &Transaction,
        record: &RequestRecord,
        items: &[ClassifiedItem],
        locked: &[LockedItem],
    ) -> CoreResult<RequestOutcome> {
        if items.len() != locked.len() || items.is_empty() {
            return Err(CoreError::invariant_violation(format!(
                "request {} has {} items but {} locks",
                record.id,
                items.len(),
                locked.len()
            )));
        }
        let me = transaction.id();

        match &record.request {
            Request::Get(_) => Ok(RequestOutcome::Item(locked[0].visible())),
            Request::TransactGet(_) => Ok(RequestOutcome::Items(
                locked.iter().map(LockedItem::visible).collect(),
            )),
            Request::Put(put) => self.apply_single(
                me,
                record,
                &items[0],
                &locked[0],
                &TransactWriteItem::Put(put.clone()),
                put.return_values,
            ),
            Request::Update(update) => self.apply_single(
                me,
                record,
                &items[0],
                &locked[0],
                &TransactWriteItem::Update(update.clone()),
                update.return_values,
            ),
            Request::Delete(delete) => self.apply_single(
                me,
                record,
                &items[0],
                &locked[0],
                &TransactWriteItem::Delete(delete.clone()),
                delete.return_values,
            ),
            Request::TransactWrite(writes) => self.apply_batch(me, record, writes, items, locked),
        }
    }

    /// Releases every lock `transaction` holds.
    ///
    /// Items no longer owned by `transaction` are skipped, so release can be
    /// run again after a partial failure or by another coordinator.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MissingImage`] if an applied mutation cannot be undone
    /// - [`CoreError::Conflicted`] if another owner appeared on an item
    pub fn release_locks(&self, transaction: &Transaction, rollback: bool) -> CoreResult<()> {
        let locks: Vec<LockedItemRequestAction> = self
            .classifier
            .aggregate_lock_actions(transaction)?
            .into_values()
            .collect();
        for chunk in locks.chunks(self.max_items()) {
            self.release_chunk(transaction.id(), chunk, rollback)?;
        }
        debug!(
            txid = %transaction.id(),
            items = locks.len(),
            rollback,
            "locks released"
        );
        Ok(())
    }

    /// Reads the current lock state of every item `transaction` has touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the items cannot be read.
    pub fn inspect(&self, transaction: &Transaction) -> CoreResult<Vec<ItemTransactionState>> {
        let locks = self.classifier.aggregate_lock_actions(transaction)?;
        let keys: Vec<ItemKey> = locks.keys().cloned().collect();
        let images = self.read_items(&keys)?;
        Ok(locks
            .into_values()
            .zip(images)
            .map(|(lock, image)| ItemTransactionState::from_item(lock.key, image.as_ref(), lock.action))
            .collect())
    }

    fn max_items(&self) -> usize {
        self.classifier
            .max_transact_items()
            .min(self.store.max_transact_items())
            .max(1)
    }

    fn lock_items(&self, me: &TransactionId, request_id: u64, items: &[ClassifiedItem]) -> CoreResult<()> {
        let mut guesses: Vec<Guess> = items.iter().map(Guess::initial).collect();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = self.clock.now_millis();
            let writes: Vec<TransactWriteItem> = items
                .iter()
                .zip(&guesses)
                .map(|(item, guess)| lock_write(me, now, item, *guess))
                .collect();

            let reasons = match self.store.transact_write(&writes) {
                Ok(()) => {
                    debug!(txid = %me, request_id, items = items.len(), attempt, "locks acquired");
                    return Ok(());
                }
                Err(StoreError::TransactionCanceled { reasons }) => reasons,
                Err(e) => return Err(e.into()),
            };

            let failures: Vec<(usize, ItemTransactionState)> = items
                .iter()
                .zip(reasons)
                .enumerate()
                .filter(|(_, (_, reason))| reason.is_failure())
                .map(|(i, (item, reason))| {
                    (
                        i,
                        ItemTransactionState::from_item(
                            item.key.clone(),
                            reason.item.as_ref(),
                            item.action,
                        ),
                    )
                })
                .collect();

            let mut conflicts: Vec<ItemConflict> = failures
                .iter()
                .filter(|(_, state)| state.is_owned_by_other(me))
                .map(|(_, state)| conflict(state))
                .collect();
            if conflicts.is_empty() && attempt >= ACQUIRE_ATTEMPTS {
                conflicts = failures.iter().map(|(_, state)| conflict(state)).collect();
            }
            if !conflicts.is_empty() {
                warn!(
                    txid = %me,
                    request_id,
                    items = conflicts.len(),
                    owners = ?conflicts.iter().map(|c| c.owner.as_ref().map(TransactionId::as_str)).collect::<Vec<_>>(),
                    "lock conflict"
                );
                return Err(CoreError::Conflicted {
                    transaction_id: me.clone(),
                    conflicts,
                });
            }

            for (i, state) in &failures {
                guesses[*i] = Guess::observed(state);
            }
            debug!(txid = %me, request_id, items = failures.len(), "stale lock guess corrected");
        }
    }

    fn read_items(&self, keys: &[ItemKey]) -> CoreResult<Vec<Option<Attributes>>> {
        let mut out = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(self.max_items()) {
            let gets: Vec<GetItem> = chunk.iter().map(GetItem::for_key).collect();
            out.extend(self.store.transact_get(&gets)?);
        }
        Ok(out)
    }

    fn capture_images(
        &self,
        me: &TransactionId,
        request_id: u64,
        items: &[ClassifiedItem],
        locked: &[LockedItem],
    ) -> CoreResult<()> {
        let writes = || {
            items
                .iter()
                .zip(locked)
                .filter(|(item, _)| !item.action.is_read())
        };
        // Already applied: the image was taken before the first apply.
        if writes().any(|(_, locked)| locked.state.is_applied) {
            return Ok(());
        }

        let records: Vec<ItemRecord> = writes()
            .filter_map(|(item, locked)| {
                locked.before().map(|attributes| ItemRecord {
                    key: item.key.clone(),
                    attributes,
                })
            })
            .collect();
        match self.images.put(me, request_id, &records) {
            Ok(()) => Ok(()),
            Err(CoreError::ImageExists { image_id }) => {
                debug!(txid = %me, request_id, image_id, "image already captured");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn apply_single(
        &self,
        me: &TransactionId,
        record: &RequestRecord,
        item: &ClassifiedItem,
        locked: &LockedItem,
        write: &TransactWriteItem,
        return_values: ReturnValues,
    ) -> CoreResult<RequestOutcome> {
        if locked.state.is_applied {
            debug!(txid = %me, request_id = record.id, "request already applied, replaying outcome");
            let attributes = match return_values {
                ReturnValues::None => None,
                ReturnValues::AllOld => self.imaged_before(me, record.id, &item.key)?,
                ReturnValues::AllNew => locked.visible(),
            };
            return Ok(RequestOutcome::Written { attributes });
        }

        let Some(guarded) = self.guarded_write(me, item, locked, write)? else {
            return Err(CoreError::invariant_violation("single write produced no store call"));
        };
        let result = match &guarded {
            TransactWriteItem::Put(put) => self.store.put_item(put),
            TransactWriteItem::Update(update) => self.store.update_item(update),
            TransactWriteItem::Delete(delete) => self.store.delete_item(delete),
            TransactWriteItem::ConditionCheck(_) => {
                return Err(CoreError::invariant_violation("condition check is not a single write"))
            }
        };
        let new_image = match result {
            Ok(image) => image,
            Err(StoreError::ConditionalCheckFailed { item: image }) => {
                return Err(apply_failure(
                    me,
                    vec![ItemTransactionState::from_item(
                        item.key.clone(),
                        image.as_ref(),
                        item.action,
                    )],
                ));
            }
            Err(e) => return Err(e.into()),
        };
        debug!(txid = %me, request_id = record.id, key = %item.key, action = ?item.action, "request applied");

        let attributes = match (return_values, item.action) {
            (ReturnValues::None, _) | (ReturnValues::AllNew, LockAction::Delete) => None,
            (ReturnValues::AllOld, _) => locked.before(),
            (ReturnValues::AllNew, _) => new_image.as_ref().map(stripped),
        };
        Ok(RequestOutcome::Written { attributes })
    }

    fn apply_batch(
        &self,
        me: &TransactionId,
        record: &RequestRecord,
        writes: &[TransactWriteItem],
        items: &[ClassifiedItem],
        locked: &[LockedItem],
    ) -> CoreResult<RequestOutcome> {
        let replay = items
            .iter()
            .zip(locked)
            .any(|(item, locked)| !item.action.is_read() && locked.state.is_applied);
        if replay {
            debug!(txid = %me, request_id = record.id, "request already applied, replaying outcome");
            return Ok(RequestOutcome::TransactWritten);
        }

        let mut batch = Vec::with_capacity(writes.len());
        let mut batch_items = Vec::with_capacity(writes.len());
        for ((write, item), locked) in writes.iter().zip(items).zip(locked) {
            if let Some(guarded) = self.guarded_write(me, item, locked, write)? {
                batch.push(guarded);
                batch_items.push(item);
            }
        }
        if batch.is_empty() {
            return Ok(RequestOutcome::TransactWritten);
        }

        match self.store.transact_write(&batch) {
            Ok(()) => {
                debug!(txid = %me, request_id = record.id, items = batch.len(), "request applied");
                Ok(RequestOutcome::TransactWritten)
            }
            Err(StoreError::TransactionCanceled { reasons }) => Err(apply_failure(
                me,
                failed_states(&batch_items, reasons),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// The caller's write with lock guards added, or `None` if it needs no store call.
    fn guarded_write(
        &self,
        me: &TransactionId,
        item: &ClassifiedItem,
        locked: &LockedItem,
        write: &TransactWriteItem,
    ) -> CoreResult<Option<TransactWriteItem>> {
        let caller = item
            .condition
            .as_ref()
            .map(|condition| rewrite_condition(condition, &item.schema));
        let guard = with_caller(
            Condition::equals(ATTR_TXID, me.as_str()).and(Condition::not_exists(ATTR_APPLIED)),
            caller.clone(),
        );

        let guarded = match write {
            TransactWriteItem::Put(put) => {
                let mut full = put.item.clone();
                full.insert(ATTR_TXID.to_string(), AttributeValue::s(me.as_str()));
                full.insert(ATTR_DATE.to_string(), self.clock.now_millis().into());
                full.insert(ATTR_APPLIED.to_string(), AttributeValue::Bool(true));
                if locked.state.is_transient {
                    full.insert(ATTR_TRANSIENT.to_string(), AttributeValue::Bool(true));
                }
                TransactWriteItem::Put(
                    PutItem::new(put.table.clone(), full)
                        .with_condition(guard)
                        .with_return_values(ReturnValues::AllNew),
                )
            }
            TransactWriteItem::Update(update) => {
                let mut actions = update.actions.clone();
                actions.push(UpdateAction::set(ATTR_APPLIED, true));
                TransactWriteItem::Update(
                    UpdateItem::new(update.table.clone(), update.key.clone(), actions)
                        .with_condition(guard)
                        .with_return_values(ReturnValues::AllNew),
                )
            }
            // The row goes away at release; until then it is only marked.
            TransactWriteItem::Delete(delete) => TransactWriteItem::Update(
                UpdateItem::new(
                    delete.table.clone(),
                    delete.key.clone(),
                    vec![UpdateAction::set(ATTR_APPLIED, true)],
                )
                .with_condition(guard),
            ),
            TransactWriteItem::ConditionCheck(check) => {
                if locked.state.lock_action == LockAction::Delete && locked.state.is_applied {
                    if check.condition.evaluate(None) {
                        return Ok(None);
                    }
                    return Err(CoreError::ConditionFailed {
                        keys: vec![item.key.clone()],
                    });
                }
                TransactWriteItem::ConditionCheck(ConditionCheck::new(
                    check.table.clone(),
                    check.key.clone(),
                    with_caller(Condition::equals(ATTR_TXID, me.as_str()), caller),
                ))
            }
        };
        Ok(Some(guarded))
    }

    fn imaged_before(
        &self,
        me: &TransactionId,
        request_id: u64,
        key: &ItemKey,
    ) -> CoreResult<Option<Attributes>> {
        Ok(self
            .images
            .get(me, request_id)?
            .and_then(|records| records.into_iter().find(|record| &record.key == key))
            .map(|record| record.attributes))
    }

    fn release_chunk(
        &self,
        me: &TransactionId,
        chunk: &[LockedItemRequestAction],
        rollback: bool,
    ) -> CoreResult<()> {
        let keys: Vec<ItemKey> = chunk.iter().map(|lock| lock.key.clone()).collect();
        let mut images: BTreeMap<u64, Vec<ItemRecord>> = BTreeMap::new();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let live = self.read_items(&keys)?;

            let mut writes = Vec::with_capacity(chunk.len());
            let mut written = Vec::with_capacity(chunk.len());
            for (lock, image) in chunk.iter().zip(live) {
                let state = ItemTransactionState::from_item(lock.key.clone(), image.as_ref(), lock.action);
                if !state.is_owned_by(me) {
                    continue;
                }
                writes.push(self.release_write(me, lock, &state, rollback, &mut images)?);
                written.push(lock);
            }
            if writes.is_empty() {
                return Ok(());
            }

            let reasons = match self.store.transact_write(&writes) {
                Ok(()) => {
                    debug!(txid = %me, items = writes.len(), rollback, attempt, "release batch submitted");
                    return Ok(());
                }
                Err(StoreError::TransactionCanceled { reasons }) => reasons,
                Err(e) => return Err(e.into()),
            };

            let conflicts: Vec<ItemConflict> = written
                .iter()
                .zip(reasons)
                .filter(|(_, reason)| reason.is_failure())
                .map(|(lock, reason)| {
                    ItemTransactionState::from_item(lock.key.clone(), reason.item.as_ref(), lock.action)
                })
                .filter(|state| state.is_owned_by_other(me))
                .map(|state| conflict(&state))
                .collect();
            if !conflicts.is_empty() {
                warn!(txid = %me, items = conflicts.len(), "release found items owned by another transaction");
                return Err(CoreError::Conflicted {
                    transaction_id: me.clone(),
                    conflicts,
                });
            }
            if attempt >= RELEASE_ATTEMPTS {
                return Err(CoreError::transaction_failed(
                    me,
                    "lock release kept racing with another writer",
                ));
            }
            debug!(txid = %me, "release batch raced, recomputing");
        }
    }

    fn release_write(
        &self,
        me: &TransactionId,
        lock: &LockedItemRequestAction,
        state: &ItemTransactionState,
        rollback: bool,
        images: &mut BTreeMap<u64, Vec<ItemRecord>>,
    ) -> CoreResult<TransactWriteItem> {
        let owned = Condition::equals(ATTR_TXID, me.as_str());
        let table = lock.key.table.clone();
        let key = lock.key.key.clone();

        if state.is_transient && (!state.is_applied || rollback) {
            return Ok(TransactWriteItem::Delete(
                DeleteItem::new(table, key).with_condition(owned),
            ));
        }
        if lock.action == LockAction::Delete && state.is_applied && !rollback {
            return Ok(TransactWriteItem::Delete(
                DeleteItem::new(table, key).with_condition(owned),
            ));
        }
        if rollback && state.is_applied {
            if !images.contains_key(&lock.request_id) {
                let loaded = self.images.get(me, lock.request_id)?.unwrap_or_default();
                images.insert(lock.request_id, loaded);
            }
            let before = images
                .get(&lock.request_id)
                .and_then(|records| records.iter().find(|record| record.key == lock.key))
                .ok_or_else(|| CoreError::MissingImage {
                    transaction_id: me.clone(),
                    request_id: lock.request_id,
                    key: lock.key.clone(),
                })?;
            return Ok(TransactWriteItem::Put(
                PutItem::new(table, before.attributes.clone()).with_condition(owned),
            ));
        }
        Ok(TransactWriteItem::Update(
            UpdateItem::new(
                table,
                key,
                LOCK_ATTRIBUTES.iter().map(|name| UpdateAction::remove(*name)).collect(),
            )
            .with_condition(owned),
        ))
    }
}

/// The conditional write that locks one item under `guess`.
fn lock_write(me: &TransactionId, now: u64, item: &ClassifiedItem, guess: Guess) -> TransactWriteItem {
    let table = item.key.table.clone();
    if guess.exists {
        let condition = Condition::exists(item.partition_key())
            .and(presence(ATTR_APPLIED, guess.applied))
            .and(presence(ATTR_TRANSIENT, guess.transient))
            .and(Condition::not_exists(ATTR_TXID).or(Condition::equals(ATTR_TXID, me.as_str())));
        TransactWriteItem::Update(
            UpdateItem::new(
                table,
                item.key.key.clone(),
                vec![
                    UpdateAction::set(ATTR_TXID, me.as_str()),
                    UpdateAction::set(ATTR_DATE, now),
                ],
            )
            .with_condition(condition),
        )
    } else {
        let mut placeholder = item.key.key.clone();
        placeholder.insert(ATTR_TXID.to_string(), AttributeValue::s(me.as_str()));
        placeholder.insert(ATTR_DATE.to_string(), now.into());
        placeholder.insert(ATTR_TRANSIENT.to_string(), AttributeValue::Bool(true));
        TransactWriteItem::Put(
            PutItem::new(table, placeholder).with_condition(Condition::not_exists(item.partition_key())),
        )
    }
}

fn presence(name: &str, present: bool) -> Condition {
    if present {
        Condition::exists(name)
    } else {
        Condition::not_exists(name)
    }
}

fn with_caller(guard: Condition, caller: Option<Condition>) -> Condition {
    match caller {
        Some(caller) => guard.and(caller),
        None => guard,
    }
}

/// Rewrites a caller clause on a key attribute so that an unapplied
/// `TRANSIENT` placeholder behaves like a missing item.
///
/// Placeholders carry the key attributes, so a key clause alone would see
/// them as present. Clauses on other attributes already see a placeholder as
/// empty.
pub(crate) fn rewrite_condition(condition: &Condition, schema: &KeySchema) -> Condition {
    let on_key = condition
        .attribute_names()
        .iter()
        .any(|name| schema.is_key_attribute(name));
    if !on_key {
        return condition.clone();
    }
    let placeholder = Condition::exists(ATTR_TRANSIENT).and(Condition::not_exists(ATTR_APPLIED));
    let real = Condition::not_exists(ATTR_TRANSIENT).or(Condition::exists(ATTR_APPLIED));
    if condition.evaluate(None) {
        condition.clone().or(placeholder)
    } else {
        condition.clone().and(real)
    }
}

fn conflict(state: &ItemTransactionState) -> ItemConflict {
    ItemConflict {
        key: state.key.clone(),
        owner: state.owner.clone(),
        state: state.clone(),
    }
}

fn failed_states(items: &[&ClassifiedItem], reasons: Vec<CancellationReason>) -> Vec<ItemTransactionState> {
    items
        .iter()
        .zip(reasons)
        .filter(|(_, reason)| reason.is_failure())
        .map(|(item, reason)| {
            ItemTransactionState::from_item(item.key.clone(), reason.item.as_ref(), item.action)
        })
        .collect()
}

/// Picks the error for a failed guarded write from the items' current images.
fn apply_failure(me: &TransactionId, failed: Vec<ItemTransactionState>) -> CoreError {
    let conflicts: Vec<ItemConflict> = failed
        .iter()
        .filter(|state| state.is_owned_by_other(me))
        .map(conflict)
        .collect();
    if !conflicts.is_empty() {
        warn!(txid = %me, items = conflicts.len(), "apply found items owned by another transaction");
        return CoreError::Conflicted {
            transaction_id: me.clone(),
            conflicts,
        };
    }
    if let Some(unlocked) = failed.iter().find(|state| state.owner.is_none()) {
        return CoreError::transaction_failed(
            me,
            format!("{} is no longer locked by this transaction", unlocked.key),
        );
    }
    CoreError::ConditionFailed {
        keys: failed.into_iter().map(|state| state.key).collect(),
    }
}
