//! Item store trait definitions.

use crate::error::StoreResult;
use crate::key::KeySchema;
use crate::request::{DeleteItem, GetItem, PutItem, TransactWriteItem, UpdateItem};
use itemtx_codec::Attributes;

/// Default number of items accepted by one `transact_get` or `transact_write` call.
pub const DEFAULT_MAX_TRANSACT_ITEMS: usize = 25;

/// Looks up the key schema of a table.
pub trait KeySchemaSource: Send + Sync {
    /// Returns the key schema of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::TableNotFound`] for unknown tables.
    fn key_schema(&self, table: &str) -> StoreResult<KeySchema>;
}

/// A key-value item store with single-item conditional writes and one
/// bounded, all-or-nothing multi-item conditional write.
///
/// Items are attribute maps addressed by table and key. The store knows
/// nothing about transactions; everything transactional is expressed through
/// conditions on ordinary attributes.
///
/// # Invariants
///
/// - Every single-item write either fully happens or returns an error
/// - A failed condition returns [`crate::StoreError::ConditionalCheckFailed`]
///   carrying the item's current image
/// - `transact_write` applies all actions or none; on failure it returns
///   [`crate::StoreError::TransactionCanceled`] with one reason per action
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::InMemoryItemStore`] - For testing and embedding
/// - [`super::FileItemStore`] - Snapshot-persisted store
pub trait ItemStore: KeySchemaSource {
    /// Reads one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or the key is malformed.
    fn get_item(&self, request: &GetItem) -> StoreResult<Option<Attributes>>;

    /// Writes a whole item.
    ///
    /// Returns the old image when `AllOld` is requested, the written item for `AllNew`.
    ///
    /// # Errors
    ///
    /// Returns an error if the condition fails or the item has no valid key.
    fn put_item(&self, request: &PutItem) -> StoreResult<Option<Attributes>>;

    /// Updates attributes of one item, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the condition fails or an action targets a key attribute.
    fn update_item(&self, request: &UpdateItem) -> StoreResult<Option<Attributes>>;

    /// Deletes one item. Deleting an absent item succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the condition fails.
    fn delete_item(&self, request: &DeleteItem) -> StoreResult<Option<Attributes>>;

    /// Reads several items in one consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if more than [`ItemStore::max_transact_items`] are requested.
    fn transact_get(&self, requests: &[GetItem]) -> StoreResult<Vec<Option<Attributes>>>;

    /// Applies several conditional writes atomically.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::TransactionCanceled`] if any condition fails,
    /// or a validation error for empty, oversized or duplicate-target batches.
    fn transact_write(&self, items: &[TransactWriteItem]) -> StoreResult<()>;

    /// Lists up to `limit` items of a table in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown.
    fn scan(&self, table: &str, limit: Option<usize>) -> StoreResult<Vec<Attributes>>;

    /// Maximum number of items in one `transact_get`/`transact_write` call.
    fn max_transact_items(&self) -> usize {
        DEFAULT_MAX_TRANSACT_ITEMS
    }
}
