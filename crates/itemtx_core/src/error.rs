//! Error types for the transaction protocol.

use crate::lock::ItemTransactionState;
use crate::transaction::TransactionState;
use crate::types::TransactionId;
use itemtx_codec::CodecError;
use itemtx_storage::{ItemKey, StoreError};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// One item another transaction holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemConflict {
    /// The contested item.
    pub key: ItemKey,
    /// The competing owner, if the item named one when observed.
    pub owner: Option<TransactionId>,
    /// The item's lock state as observed in the failure.
    pub state: ItemTransactionState,
}

/// Errors that can occur in transaction operations.
///
/// Every compare-and-set failure is resolved by re-reading the authoritative
/// record before one of these is raised, so callers can tell "retry later"
/// (a retryable [`CoreError::Store`]) from "the transaction is decided"
/// ([`CoreError::is_decided`]) from "someone else owns this item"
/// ([`CoreError::Conflicted`]).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Item store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Canonical codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A persisted record could not be interpreted.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the problem.
        message: String,
    },

    /// The transaction record does not exist.
    #[error("transaction not found: {transaction_id}")]
    NotFound {
        /// The transaction looked up.
        transaction_id: TransactionId,
    },

    /// The transaction is committing or committed.
    #[error("transaction already committed: {transaction_id}")]
    AlreadyCommitted {
        /// The decided transaction.
        transaction_id: TransactionId,
    },

    /// The transaction is rolling back or rolled back.
    #[error("transaction already rolled back: {transaction_id}")]
    AlreadyRolledBack {
        /// The decided transaction.
        transaction_id: TransactionId,
    },

    /// Another transaction holds items this one needs.
    #[error("transaction {transaction_id} conflicted on {} item(s)", .conflicts.len())]
    Conflicted {
        /// The transaction that lost.
        transaction_id: TransactionId,
        /// Every contested item observed.
        conflicts: Vec<ItemConflict>,
    },

    /// A compare-and-set failed for a reason other than a decided state.
    #[error("transaction {transaction_id} failed: {message}")]
    TransactionFailed {
        /// The affected transaction.
        transaction_id: TransactionId,
        /// What happened.
        message: String,
    },

    /// The caller's own condition did not hold.
    #[error("condition failed on {} item(s)", .keys.len())]
    ConditionFailed {
        /// Items whose condition failed.
        keys: Vec<ItemKey>,
    },

    /// A condition shape the protocol cannot combine with its lock guards.
    #[error("unsupported condition: {message}")]
    UnsupportedCondition {
        /// Why the condition was rejected.
        message: String,
    },

    /// The request is malformed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong.
        message: String,
    },

    /// The transaction already writes this item.
    #[error("duplicate write to {key} in one transaction")]
    DuplicateRequest {
        /// The item written twice.
        key: ItemKey,
    },

    /// A state change that would move a transaction backwards.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: TransactionState,
        /// Requested state.
        to: TransactionState,
    },

    /// Internal bookkeeping contradicts itself.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the contradiction.
        message: String,
    },

    /// Rollback needs a before-image that was never captured.
    #[error("missing image for {key} (transaction {transaction_id}, request {request_id})")]
    MissingImage {
        /// The rolling-back transaction.
        transaction_id: TransactionId,
        /// The request whose image is missing.
        request_id: u64,
        /// The item that cannot be restored.
        key: ItemKey,
    },

    /// An image for this request was already captured.
    #[error("image already exists: {image_id}")]
    ImageExists {
        /// The image record key.
        image_id: String,
    },

    /// The operation was cancelled before its next store call.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a generic transaction failure.
    pub fn transaction_failed(transaction_id: &TransactionId, message: impl Into<String>) -> Self {
        Self::TransactionFailed {
            transaction_id: transaction_id.clone(),
            message: message.into(),
        }
    }

    /// Creates an unsupported condition error.
    pub fn unsupported_condition(message: impl Into<String>) -> Self {
        Self::UnsupportedCondition {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Returns true if the same call may succeed when retried later.
    ///
    /// Only transient store faults qualify. Conflicts, decided transactions
    /// and invariant violations are never retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }

    /// Returns true if the transaction's outcome is already decided.
    #[must_use]
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            Self::AlreadyCommitted { .. } | Self::AlreadyRolledBack { .. }
        )
    }

    /// Returns true for a lock conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflicted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_only_for_transient_store_faults() {
        assert!(CoreError::from(StoreError::throttled("busy")).is_retryable());
        assert!(!CoreError::from(StoreError::validation("bad")).is_retryable());
        let conflict = CoreError::Conflicted {
            transaction_id: "t1".into(),
            conflicts: Vec::new(),
        };
        assert!(!conflict.is_retryable());
        assert!(conflict.is_conflict());
        assert!(!CoreError::Cancelled.is_retryable());
    }

    #[test]
    fn decided_errors() {
        assert!(CoreError::AlreadyCommitted {
            transaction_id: "t".into()
        }
        .is_decided());
        assert!(CoreError::AlreadyRolledBack {
            transaction_id: "t".into()
        }
        .is_decided());
        assert!(!CoreError::transaction_failed(&"t".into(), "version mismatch").is_decided());
    }

    #[test]
    fn messages() {
        let err = CoreError::transaction_failed(&"t9".into(), "version mismatch");
        assert_eq!(err.to_string(), "transaction t9 failed: version mismatch");
        let err = CoreError::DuplicateRequest {
            key: ItemKey::partition("Users", "id", "u1"),
        };
        assert_eq!(err.to_string(), "duplicate write to Users{id: \"u1\"} in one transaction");
    }
}
