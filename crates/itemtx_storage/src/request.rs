//! Request and response shapes for item store calls.

use crate::expression::{Condition, UpdateAction};
use crate::key::ItemKey;
use itemtx_codec::Attributes;
use serde::{Deserialize, Serialize};

/// Which image a write returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReturnValues {
    /// Return nothing.
    #[default]
    None,
    /// Return the item as it was before the write.
    AllOld,
    /// Return the item as it is after the write.
    AllNew,
}

/// Reads one item by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetItem {
    /// Table name.
    pub table: String,
    /// Key attributes.
    pub key: Attributes,
}

impl GetItem {
    /// Creates a get request.
    pub fn new(table: impl Into<String>, key: Attributes) -> Self {
        Self {
            table: table.into(),
            key,
        }
    }

    /// Creates a get request for an item key.
    #[must_use]
    pub fn for_key(key: &ItemKey) -> Self {
        Self::new(key.table.clone(), key.key.clone())
    }
}

/// Writes a whole item, replacing any existing one with the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutItem {
    /// Table name.
    pub table: String,
    /// The full item, key attributes included.
    pub item: Attributes,
    /// Condition on the existing item.
    pub condition: Option<Condition>,
    /// Image to return.
    pub return_values: ReturnValues,
}

impl PutItem {
    /// Creates an unconditional put.
    pub fn new(table: impl Into<String>, item: Attributes) -> Self {
        Self {
            table: table.into(),
            item,
            condition: None,
            return_values: ReturnValues::None,
        }
    }

    /// Sets the condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the returned image.
    #[must_use]
    pub fn with_return_values(mut self, return_values: ReturnValues) -> Self {
        self.return_values = return_values;
        self
    }
}

/// Modifies attributes of one item, creating it if absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItem {
    /// Table name.
    pub table: String,
    /// Key attributes.
    pub key: Attributes,
    /// Changes, applied in order.
    pub actions: Vec<UpdateAction>,
    /// Condition on the existing item.
    pub condition: Option<Condition>,
    /// Image to return.
    pub return_values: ReturnValues,
}

impl UpdateItem {
    /// Creates an unconditional update.
    pub fn new(table: impl Into<String>, key: Attributes, actions: Vec<UpdateAction>) -> Self {
        Self {
            table: table.into(),
            key,
            actions,
            condition: None,
            return_values: ReturnValues::None,
        }
    }

    /// Sets the condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the returned image.
    #[must_use]
    pub fn with_return_values(mut self, return_values: ReturnValues) -> Self {
        self.return_values = return_values;
        self
    }
}

/// Removes one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteItem {
    /// Table name.
    pub table: String,
    /// Key attributes.
    pub key: Attributes,
    /// Condition on the existing item.
    pub condition: Option<Condition>,
    /// Image to return. Only `None` and `AllOld` are meaningful.
    pub return_values: ReturnValues,
}

impl DeleteItem {
    /// Creates an unconditional delete.
    pub fn new(table: impl Into<String>, key: Attributes) -> Self {
        Self {
            table: table.into(),
            key,
            condition: None,
            return_values: ReturnValues::None,
        }
    }

    /// Sets the condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the returned image.
    #[must_use]
    pub fn with_return_values(mut self, return_values: ReturnValues) -> Self {
        self.return_values = return_values;
        self
    }
}

/// Asserts a condition on one item inside an atomic multi-item write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionCheck {
    /// Table name.
    pub table: String,
    /// Key attributes.
    pub key: Attributes,
    /// The condition that must hold.
    pub condition: Condition,
}

impl ConditionCheck {
    /// Creates a condition check.
    pub fn new(table: impl Into<String>, key: Attributes, condition: Condition) -> Self {
        Self {
            table: table.into(),
            key,
            condition,
        }
    }
}

/// One action of an atomic multi-item write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactWriteItem {
    /// A conditional put.
    Put(PutItem),
    /// A conditional update.
    Update(UpdateItem),
    /// A conditional delete.
    Delete(DeleteItem),
    /// A pure condition.
    ConditionCheck(ConditionCheck),
}

impl TransactWriteItem {
    /// Table this action targets.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Put(put) => &put.table,
            Self::Update(update) => &update.table,
            Self::Delete(delete) => &delete.table,
            Self::ConditionCheck(check) => &check.table,
        }
    }

    /// Condition attached to this action, if any.
    #[must_use]
    pub fn condition(&self) -> Option<&Condition> {
        match self {
            Self::Put(put) => put.condition.as_ref(),
            Self::Update(update) => update.condition.as_ref(),
            Self::Delete(delete) => delete.condition.as_ref(),
            Self::ConditionCheck(check) => Some(&check.condition),
        }
    }
}

/// Why one action of a canceled multi-item write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationCode {
    /// This action was fine; another one failed.
    None,
    /// This action's condition did not hold.
    ConditionalCheckFailed,
}

/// Outcome of one action in a canceled multi-item write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReason {
    /// Failure code.
    pub code: CancellationCode,
    /// Current image of the target item, present for failed actions whose item exists.
    pub item: Option<Attributes>,
}

impl CancellationReason {
    /// A reason for an action that did not fail.
    #[must_use]
    pub fn none() -> Self {
        Self {
            code: CancellationCode::None,
            item: None,
        }
    }

    /// A reason for an action whose condition failed.
    #[must_use]
    pub fn condition_failed(item: Option<Attributes>) -> Self {
        Self {
            code: CancellationCode::ConditionalCheckFailed,
            item,
        }
    }

    /// Returns true if this action caused the cancellation.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.code != CancellationCode::None
    }
}
