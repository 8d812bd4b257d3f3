//! Error types for item store operations.

use crate::request::CancellationReason;
use itemtx_codec::{Attributes, CodecError};
use std::io;
use thiserror::Error;

/// Result type for item store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during item store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A single-item condition did not hold.
    ///
    /// Carries the item as it was when the condition was evaluated.
    #[error("conditional check failed")]
    ConditionalCheckFailed {
        /// Current image of the item, if it exists.
        item: Option<Attributes>,
    },

    /// An atomic multi-item write was rejected as a whole.
    ///
    /// There is one reason per submitted action, in submission order.
    #[error("transaction canceled ({} actions)", .reasons.len())]
    TransactionCanceled {
        /// Per-action outcome.
        reasons: Vec<CancellationReason>,
    },

    /// The named table does not exist.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Table name.
        table: String,
    },

    /// The named table already exists with a different key schema.
    #[error("table already exists: {table}")]
    TableExists {
        /// Table name.
        table: String,
    },

    /// The request is malformed.
    #[error("validation error: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },

    /// The store is shedding load; the request can be retried.
    #[error("throttled: {message}")]
    Throttled {
        /// Description from the store.
        message: String,
    },

    /// The store could not be reached; the request can be retried.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// Persisted state is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a table-not-found error.
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    /// Creates a throttling error.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::Throttled {
            message: message.into(),
        }
    }

    /// Creates an unavailability error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns true if the failure is transient and the same request may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Unavailable { .. })
    }

    /// Returns true if this is a condition failure (single-item or multi-item).
    #[must_use]
    pub fn is_condition_failure(&self) -> bool {
        matches!(
            self,
            Self::ConditionalCheckFailed { .. } | Self::TransactionCanceled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_faults_are_retryable() {
        assert!(StoreError::throttled("slow down").is_retryable());
        assert!(StoreError::unavailable("connection reset").is_retryable());
        assert!(!StoreError::validation("bad key").is_retryable());
        assert!(!StoreError::ConditionalCheckFailed { item: None }.is_retryable());
        assert!(!StoreError::table_not_found("t").is_retryable());
    }

    #[test]
    fn canceled_message_lists_actions() {
        let err = StoreError::TransactionCanceled {
            reasons: vec![
                CancellationReason::none(),
                CancellationReason::condition_failed(None),
            ],
        };
        assert_eq!(err.to_string(), "transaction canceled (2 actions)");
        assert!(err.is_condition_failure());
    }
}
