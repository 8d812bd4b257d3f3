//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::request::RequestRecord;
use crate::types::TransactionId;

/// Lifecycle state of a transaction.
///
/// States only move forward:
///
/// ```text
/// Active ──> Committing ──> Committed
///    └─────> RollingBack ─> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Accepting requests.
    Active,
    /// Decided to commit; locks are being released.
    Committing,
    /// Committed and finalized.
    Committed,
    /// Decided to roll back; items are being restored.
    RollingBack,
    /// Rolled back and finalized.
    RolledBack,
}

/// Persisted value of `STATE` for a transaction that is still accepting requests.
pub(crate) const STORED_PENDING: &str = "Pending";
/// Persisted value of `STATE` for committing/committed transactions.
pub(crate) const STORED_COMMITTED: &str = "Committed";
/// Persisted value of `STATE` for rolling-back/rolled-back transactions.
pub(crate) const STORED_ROLLED_BACK: &str = "RolledBack";

impl TransactionState {
    /// Returns true for `Committed` and `RolledBack`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Returns true once the outcome is decided (commit or rollback chosen).
    #[must_use]
    pub const fn is_decided(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Returns true if `next` is a forward step from this state.
    #[must_use]
    pub const fn can_transition_to(self, next: TransactionState) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Committing)
                | (Self::Active, Self::RollingBack)
                | (Self::Committing, Self::Committed)
                | (Self::RollingBack, Self::RolledBack)
        )
    }

    /// The persisted `(STATE, FINALIZED)` pair for this state.
    pub(crate) const fn to_stored(self) -> (&'static str, bool) {
        match self {
            Self::Active => (STORED_PENDING, false),
            Self::Committing => (STORED_COMMITTED, false),
            Self::Committed => (STORED_COMMITTED, true),
            Self::RollingBack => (STORED_ROLLED_BACK, false),
            Self::RolledBack => (STORED_ROLLED_BACK, true),
        }
    }

    /// Decodes a persisted `(STATE, FINALIZED)` pair.
    pub(crate) fn from_stored(state: &str, finalized: bool) -> CoreResult<Self> {
        match (state, finalized) {
            (STORED_PENDING, false) => Ok(Self::Active),
            (STORED_COMMITTED, false) => Ok(Self::Committing),
            (STORED_COMMITTED, true) => Ok(Self::Committed),
            (STORED_ROLLED_BACK, false) => Ok(Self::RollingBack),
            (STORED_ROLLED_BACK, true) => Ok(Self::RolledBack),
            _ => Err(CoreError::serialization(format!(
                "unknown stored state {state} (finalized: {finalized})"
            ))),
        }
    }
}

/// A transaction as recorded in the transaction table.
///
/// `version` starts at 1 and grows by exactly one per successful record
/// mutation. `requests` is append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub(crate) id: TransactionId,
    pub(crate) state: TransactionState,
    pub(crate) version: u64,
    pub(crate) last_update_time: u64,
    pub(crate) requests: Vec<RequestRecord>,
}

impl Transaction {
    /// Creates a fresh, active transaction at version 1.
    pub(crate) fn new(id: TransactionId, now: u64) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            version: 1,
            last_update_time: now,
            requests: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the record version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Milliseconds since the Unix epoch of the last record write.
    #[must_use]
    pub fn last_update_time(&self) -> u64 {
        self.last_update_time
    }

    /// Logged requests, in append order.
    #[must_use]
    pub fn requests(&self) -> &[RequestRecord] {
        &self.requests
    }

    /// Checks if the transaction still accepts requests.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// The typed error describing why a decided transaction rejects work.
    pub(crate) fn decided_error(&self) -> CoreError {
        match self.state {
            TransactionState::Committing | TransactionState::Committed => {
                CoreError::AlreadyCommitted {
                    transaction_id: self.id.clone(),
                }
            }
            TransactionState::RollingBack | TransactionState::RolledBack => {
                CoreError::AlreadyRolledBack {
                    transaction_id: self.id.clone(),
                }
            }
            TransactionState::Active => {
                CoreError::transaction_failed(&self.id, "transaction is still active")
            }
        }
    }

    /// Fails unless the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(self.decided_error())
        }
    }
}
