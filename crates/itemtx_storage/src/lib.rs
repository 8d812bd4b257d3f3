//! # itemtx storage
//!
//! The item store contract that the transaction protocol is built on.
//!
//! An item store holds attribute maps addressed by table and key. It offers
//! single-item conditional reads and writes plus one bounded, all-or-nothing
//! multi-item conditional write. It knows nothing about transactions.
//!
//! ## Design Principles
//!
//! - Conditions and updates are typed expressions, not strings
//! - Every condition failure carries the item's current image
//! - Transient faults ([`StoreError::Throttled`], [`StoreError::Unavailable`])
//!   are distinguishable from permanent ones
//! - Stores must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryItemStore`] - For testing and embedding
//! - [`FileItemStore`] - In-memory store persisted to a snapshot file
//!
//! ## Example
//!
//! ```rust
//! use itemtx_codec::{attributes, AttributeValue};
//! use itemtx_storage::{Condition, InMemoryItemStore, ItemStore, KeySchema, PutItem, StoreError};
//!
//! let store = InMemoryItemStore::new();
//! store.create_table("t", KeySchema::new("pk")).unwrap();
//! let item = attributes([("pk", AttributeValue::s("a"))]);
//! let put = PutItem::new("t", item).with_condition(Condition::not_exists("pk"));
//! store.put_item(&put).unwrap();
//! assert!(matches!(store.put_item(&put), Err(StoreError::ConditionalCheckFailed { .. })));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod expression;
mod file;
mod key;
mod memory;
mod request;
mod store;

pub use error::{StoreError, StoreResult};
pub use expression::{apply_updates, Condition, UpdateAction};
pub use file::FileItemStore;
pub use key::{ItemKey, KeySchema};
pub use memory::InMemoryItemStore;
pub use request::{
    CancellationCode, CancellationReason, ConditionCheck, DeleteItem, GetItem, PutItem,
    ReturnValues, TransactWriteItem, UpdateItem,
};
pub use store::{ItemStore, KeySchemaSource, DEFAULT_MAX_TRANSACT_ITEMS};
