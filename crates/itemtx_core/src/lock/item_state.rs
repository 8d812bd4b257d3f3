//! Lock state read off an item's reserved attributes.

use crate::types::{TransactionId, ATTR_APPLIED, ATTR_DATE, ATTR_TRANSIENT, ATTR_TXID};
use itemtx_codec::{AttributeValue, Attributes};
use itemtx_storage::{ItemKey, TransactWriteItem};
use serde::{Deserialize, Serialize};

/// What a request does to one item, as far as locking is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockAction {
    /// Read.
    Get,
    /// Whole-item write.
    Put,
    /// Attribute write.
    Update,
    /// Removal.
    Delete,
    /// Condition test without a write.
    ConditionCheck,
}

impl LockAction {
    /// Returns true for actions that never mutate the item.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Get | Self::ConditionCheck)
    }

    /// The action of one entry of a multi-item write.
    #[must_use]
    pub fn of_write_item(item: &TransactWriteItem) -> Self {
        match item {
            TransactWriteItem::Put(_) => Self::Put,
            TransactWriteItem::Update(_) => Self::Update,
            TransactWriteItem::Delete(_) => Self::Delete,
            TransactWriteItem::ConditionCheck(_) => Self::ConditionCheck,
        }
    }
}

/// The strongest action a transaction holds on one item, and the request
/// that took it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedItemRequestAction {
    /// The locked item.
    pub key: ItemKey,
    /// Id of the request that recorded `action`.
    pub request_id: u64,
    /// The aggregated action.
    pub action: LockAction,
}

/// Lock status of an item relative to one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// No owner.
    Unlocked,
    /// Owned by a different transaction.
    LockedByOther,
    /// Owned by us; our mutation is not written yet.
    LockedBySelfPending,
    /// Owned by us; our mutation is written.
    LockedBySelfApplied,
}

/// A derived view of one item's lock, read from the reserved attributes
/// stored on the item itself. Never persisted separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTransactionState {
    /// The item.
    pub key: ItemKey,
    /// Whether any row exists for the key, placeholder included.
    pub exists: bool,
    /// `TXID`, if the item is locked.
    pub owner: Option<TransactionId>,
    /// `DATE`, if the item is locked.
    pub last_updated: Option<u64>,
    /// The item did not exist before its owner locked it.
    pub is_transient: bool,
    /// The owner's mutation has been written.
    pub is_applied: bool,
    /// The action the observer holds or wants on the item.
    pub lock_action: LockAction,
}

impl ItemTransactionState {
    /// Reads the lock state from an item image (`None` = absent).
    #[must_use]
    pub fn from_item(key: ItemKey, item: Option<&Attributes>, lock_action: LockAction) -> Self {
        let attr = |name: &str| item.and_then(|attrs| attrs.get(name));
        Self {
            key,
            exists: item.is_some(),
            owner: attr(ATTR_TXID)
                .and_then(AttributeValue::as_s)
                .map(TransactionId::from),
            last_updated: attr(ATTR_DATE).and_then(AttributeValue::as_u64),
            is_transient: attr(ATTR_TRANSIENT).is_some(),
            is_applied: attr(ATTR_APPLIED).is_some(),
            lock_action,
        }
    }

    /// The lock status as seen by `me`.
    #[must_use]
    pub fn status(&self, me: &TransactionId) -> LockStatus {
        match &self.owner {
            None => LockStatus::Unlocked,
            Some(owner) if owner != me => LockStatus::LockedByOther,
            Some(_) if self.is_applied => LockStatus::LockedBySelfApplied,
            Some(_) => LockStatus::LockedBySelfPending,
        }
    }

    /// Returns true if the item is locked by someone other than `me`.
    #[must_use]
    pub fn is_owned_by_other(&self, me: &TransactionId) -> bool {
        self.status(me) == LockStatus::LockedByOther
    }

    /// Returns true if the item is locked by `me`.
    #[must_use]
    pub fn is_owned_by(&self, me: &TransactionId) -> bool {
        self.owner.as_ref() == Some(me)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemtx_codec::attributes;

    fn key() -> ItemKey {
        ItemKey::partition("Items", "pk", "a")
    }

    #[test]
    fn absent_item_is_unlocked() {
        let state = ItemTransactionState::from_item(key(), None, LockAction::Get);
        assert!(!state.exists);
        assert_eq!(state.status(&"t1".into()), LockStatus::Unlocked);
    }

    #[test]
    fn reads_lock_attributes() {
        let item = attributes([
            ("pk", AttributeValue::s("a")),
            (ATTR_TXID, AttributeValue::s("t1")),
            (ATTR_DATE, AttributeValue::from(1_700u64)),
            (ATTR_TRANSIENT, AttributeValue::Bool(true)),
        ]);
        let state = ItemTransactionState::from_item(key(), Some(&item), LockAction::Put);
        assert!(state.exists);
        assert!(state.is_transient);
        assert!(!state.is_applied);
        assert_eq!(state.last_updated, Some(1_700));
        assert_eq!(state.status(&"t1".into()), LockStatus::LockedBySelfPending);
        assert_eq!(state.status(&"t2".into()), LockStatus::LockedByOther);
        assert!(state.is_owned_by(&"t1".into()));
        assert!(state.is_owned_by_other(&"t2".into()));
    }

    #[test]
    fn applied_marker() {
        let item = attributes([
            ("pk", AttributeValue::s("a")),
            (ATTR_TXID, AttributeValue::s("t1")),
            (ATTR_APPLIED, AttributeValue::Bool(true)),
        ]);
        let state = ItemTransactionState::from_item(key(), Some(&item), LockAction::Update);
        assert_eq!(state.status(&"t1".into()), LockStatus::LockedBySelfApplied);
    }

    #[test]
    fn read_actions() {
        assert!(LockAction::Get.is_read());
        assert!(LockAction::ConditionCheck.is_read());
        assert!(!LockAction::Delete.is_read());
    }
}
