//! Test fixtures and store helpers.
//!
//! Provides ready-made stores with the protocol tables and an `Items` table
//! already created, plus helpers to inspect items behind the transaction
//! layer's back.

use itemtx_codec::{attributes, AttributeValue, Attributes};
use itemtx_core::{
    is_lock_attribute, Config, ManualClock, MemoryTransactionCache, TransactionManager,
};
use itemtx_storage::{FileItemStore, GetItem, InMemoryItemStore, ItemStore, KeySchema, PutItem};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Name of the ordinary table every fixture creates.
pub const ITEMS_TABLE: &str = "Items";

/// Partition key attribute of [`ITEMS_TABLE`].
pub const ITEMS_KEY: &str = "pk";

/// Clock start for fixtures, in milliseconds since the Unix epoch.
pub const FIXTURE_EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// An in-memory store with a manager on a manual clock.
pub struct TestStore {
    /// The raw store, for reads that bypass the transaction layer.
    pub store: Arc<InMemoryItemStore>,
    /// Manager over `store`.
    pub manager: TransactionManager,
    /// The manager's clock.
    pub clock: Arc<ManualClock>,
}

impl TestStore {
    /// Creates a store with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a store with `config`.
    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryItemStore::new());
        config
            .create_tables(&store)
            .expect("Failed to create protocol tables");
        store
            .create_table(ITEMS_TABLE, KeySchema::new(ITEMS_KEY))
            .expect("Failed to create items table");
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MILLIS));
        let manager = manager_over(store.clone(), config, clock.clone());
        Self {
            store,
            manager,
            clock,
        }
    }

    /// A second manager over the same store and clock, as another process
    /// would have.
    pub fn other_manager(&self) -> TransactionManager {
        manager_over(self.store.clone(), self.manager.config().clone(), self.clock.clone())
    }

    /// Reads an item of [`ITEMS_TABLE`] directly, lock attributes included.
    pub fn raw(&self, pk: &str) -> Option<Attributes> {
        self.store
            .get_item(&GetItem::new(ITEMS_TABLE, key(pk)))
            .expect("Failed to read item")
    }

    /// Writes an item of [`ITEMS_TABLE`] directly.
    pub fn seed(&self, item: Attributes) {
        self.store
            .put_item(&PutItem::new(ITEMS_TABLE, item))
            .expect("Failed to seed item");
    }

    /// Every item of [`ITEMS_TABLE`], sorted by key.
    pub fn items(&self) -> Vec<Attributes> {
        let mut items = self
            .store
            .scan(ITEMS_TABLE, None)
            .expect("Failed to scan items");
        items.sort_by(|a, b| a.get(ITEMS_KEY).cmp(&b.get(ITEMS_KEY)));
        items
    }

    /// Panics if any item still carries a lock attribute.
    pub fn assert_unlocked(&self) {
        for item in self.items() {
            assert!(
                !item.keys().any(|name| is_lock_attribute(name)),
                "item still locked: {}",
                to_json(&item)
            );
        }
    }

    /// [`ITEMS_TABLE`] as pretty JSON, for assertion messages.
    pub fn dump(&self) -> String {
        serde_json::to_string_pretty(&self.items()).unwrap_or_default()
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = TransactionManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// A snapshot file in a temporary directory.
pub struct TestFileStore {
    /// The open store.
    pub store: Arc<FileItemStore>,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TestFileStore {
    /// Creates an empty file store with the protocol tables and [`ITEMS_TABLE`].
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("items.snap");
        let store = FileItemStore::open(&path).expect("Failed to open file store");
        let config = Config::default();
        store
            .create_table(config.transaction_table.clone(), Config::transaction_table_schema())
            .expect("Failed to create transaction table");
        store
            .create_table(config.image_table.clone(), Config::image_table_schema())
            .expect("Failed to create image table");
        store
            .create_table(ITEMS_TABLE, KeySchema::new(ITEMS_KEY))
            .expect("Failed to create items table");
        Self {
            store: Arc::new(store),
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drops the open store and reads the snapshot back from disk.
    pub fn reopen(&mut self) {
        self.store = Arc::new(FileItemStore::open(&self.path).expect("Failed to reopen file store"));
    }

    /// A manager over the file store.
    pub fn manager(&self, clock: Arc<ManualClock>) -> TransactionManager {
        manager_over(self.store.clone(), Config::default(), clock)
    }
}

impl Default for TestFileStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` with a fresh [`TestStore`].
pub fn with_test_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::new();
    f(&store)
}

/// A manager with a fresh record cache over `store`.
pub fn manager_over(
    store: Arc<dyn ItemStore>,
    config: Config,
    clock: Arc<ManualClock>,
) -> TransactionManager {
    TransactionManager::with_parts(
        store,
        config,
        clock,
        Arc::new(MemoryTransactionCache::default()),
    )
}

/// Key of an [`ITEMS_TABLE`] item.
pub fn key(pk: &str) -> Attributes {
    attributes([(ITEMS_KEY, AttributeValue::s(pk))])
}

/// An [`ITEMS_TABLE`] item with one numeric attribute `n`.
pub fn counter(pk: &str, n: i64) -> Attributes {
    attributes([(ITEMS_KEY, AttributeValue::s(pk)), ("n", AttributeValue::number(n))])
}

/// Reads `n` off an item.
pub fn counter_value(item: &Attributes) -> Option<i64> {
    item.get("n").and_then(AttributeValue::as_i64)
}

fn to_json(item: &Attributes) -> String {
    serde_json::to_string(item).unwrap_or_default()
}

/// Prepared scenarios.
pub mod scenarios {
    use super::*;

    /// A store holding `count` counters `c0..c{count}` set to `initial`.
    pub fn counters(count: usize, initial: i64) -> TestStore {
        let store = TestStore::new();
        for i in 0..count {
            store.seed(counter(&format!("c{i}"), initial));
        }
        store
    }
}
