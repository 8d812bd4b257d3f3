//! Transaction manager configuration.

use crate::retry::RetryConfig;
use crate::types::{ATTR_IMAGE_ID, ATTR_TXID};
use itemtx_storage::{InMemoryItemStore, KeySchema, StoreResult};
use std::time::Duration;

/// Configuration for a [`crate::TransactionManager`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Table holding transaction records (partition key `TXID`).
    pub transaction_table: String,

    /// Table holding before-images (partition key `ImageId`).
    pub image_table: String,

    /// How long a finalized transaction is kept before it may be deleted.
    pub finalized_grace_period: Duration,

    /// Overrides the store's per-call item limit when set lower.
    pub max_transact_items: Option<usize>,

    /// Whether to keep a process-local read-through cache of records.
    pub cache_transactions: bool,

    /// Backoff for [`crate::TransactionManager::run`].
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transaction_table: "Transactions".to_string(),
            image_table: "TransactionImages".to_string(),
            finalized_grace_period: Duration::from_secs(60),
            max_transact_items: None,
            cache_transactions: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transaction record table name.
    #[must_use]
    pub fn transaction_table(mut self, name: impl Into<String>) -> Self {
        self.transaction_table = name.into();
        self
    }

    /// Sets the image table name.
    #[must_use]
    pub fn image_table(mut self, name: impl Into<String>) -> Self {
        self.image_table = name.into();
        self
    }

    /// Sets the grace period before finalized transactions may be deleted.
    #[must_use]
    pub const fn finalized_grace_period(mut self, period: Duration) -> Self {
        self.finalized_grace_period = period;
        self
    }

    /// Caps the number of items per atomic multi-item call.
    #[must_use]
    pub const fn max_transact_items(mut self, max: usize) -> Self {
        self.max_transact_items = Some(max);
        self
    }

    /// Sets whether transaction records are cached in-process.
    #[must_use]
    pub const fn cache_transactions(mut self, value: bool) -> Self {
        self.cache_transactions = value;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Key schema of the transaction record table.
    #[must_use]
    pub fn transaction_table_schema() -> KeySchema {
        KeySchema::new(ATTR_TXID)
    }

    /// Key schema of the image table.
    #[must_use]
    pub fn image_table_schema() -> KeySchema {
        KeySchema::new(ATTR_IMAGE_ID)
    }

    /// Creates both protocol tables in an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if a table exists with a different key schema.
    pub fn create_tables(&self, store: &InMemoryItemStore) -> StoreResult<()> {
        store.create_table(self.transaction_table.clone(), Self::transaction_table_schema())?;
        store.create_table(self.image_table.clone(), Self::image_table_schema())
    }

    /// Resolves the effective per-call item limit against a store's limit.
    #[must_use]
    pub fn effective_max_transact_items(&self, store_limit: usize) -> usize {
        self.max_transact_items
            .map_or(store_limit, |max| max.min(store_limit))
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemtx_storage::KeySchemaSource;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.transaction_table, "Transactions");
        assert_eq!(config.image_table, "TransactionImages");
        assert_eq!(config.finalized_grace_period, Duration::from_secs(60));
        assert!(config.cache_transactions);
        assert!(config.max_transact_items.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .transaction_table("Tx")
            .cache_transactions(false)
            .max_transact_items(10)
            .finalized_grace_period(Duration::ZERO);

        assert_eq!(config.transaction_table, "Tx");
        assert!(!config.cache_transactions);
        assert_eq!(config.effective_max_transact_items(25), 10);
        assert_eq!(config.effective_max_transact_items(4), 4);
    }

    #[test]
    fn create_tables() {
        let store = InMemoryItemStore::new();
        let config = Config::default();
        config.create_tables(&store).unwrap();
        config.create_tables(&store).unwrap();
        assert_eq!(store.key_schema("Transactions").unwrap(), KeySchema::new("TXID"));
        assert_eq!(
            store.key_schema("TransactionImages").unwrap(),
            KeySchema::new("ImageId")
        );
    }
}
