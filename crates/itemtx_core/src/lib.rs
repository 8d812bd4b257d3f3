//! # itemtx core
//!
//! Multi-item ACID transactions layered on an [`ItemStore`] that only offers
//! single-item conditional writes and one bounded atomic multi-item write.
//!
//! This crate provides:
//! - Transaction records with version-checked state changes
//! - Per-item locks kept in reserved attributes on the items themselves
//! - Before-images for rollback
//! - Recovery and sweeping of transactions abandoned mid-flight
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use itemtx_codec::{attributes, AttributeValue};
//! use itemtx_core::{Config, TransactionManager};
//! use itemtx_storage::{InMemoryItemStore, KeySchema, PutItem};
//!
//! let store = Arc::new(InMemoryItemStore::new());
//! let config = Config::default();
//! config.create_tables(&store).unwrap();
//! store.create_table("Accounts", KeySchema::new("id")).unwrap();
//!
//! let manager = TransactionManager::new(store, config);
//! manager
//!     .run(|manager, tx| {
//!         let item = attributes([("id", AttributeValue::s("alice")), ("balance", AttributeValue::number(10))]);
//!         manager.execute(tx, PutItem::new("Accounts", item))?;
//!         Ok(())
//!     })
//!     .unwrap();
//! ```
//!
//! [`ItemStore`]: itemtx_storage::ItemStore

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod error;
mod image;
mod lock;
mod request;
mod retry;
mod stats;
mod transaction;
mod types;

pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{CoreError, CoreResult, ItemConflict};
pub use image::{image_id, ItemImageStore, ItemRecord};
pub use lock::{
    ClassifiedItem, ItemLockCoordinator, ItemTransactionState, LockAction, LockStatus,
    LockedItem, LockedItemRequestAction, RequestClassifier,
};
pub use request::{Request, RequestOutcome, RequestRecord};
pub use retry::{RetryConfig, RetryOrchestrator, RetryPolicy};
pub use stats::{StatsSnapshot, TransactionStats};
pub use transaction::{
    MemoryTransactionCache, NoopTransactionCache, SweepOptions, SweepStats, Transaction,
    TransactionCache, TransactionManager, TransactionRecordStore, TransactionState,
};
pub use types::{
    is_lock_attribute, strip_lock_attributes, stripped, Clock, ManualClock, SystemClock,
    TransactionId, ATTR_APPLIED, ATTR_DATE, ATTR_FINALIZED, ATTR_IMAGE_ID, ATTR_IMAGE_VALUE,
    ATTR_REQUESTS, ATTR_STATE, ATTR_TRANSIENT, ATTR_TXID, ATTR_VERSION, LOCK_ATTRIBUTES,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
