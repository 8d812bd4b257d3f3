//! Snapshot-persisted item store.

use crate::error::{StoreError, StoreResult};
use crate::key::KeySchema;
use crate::memory::{InMemoryItemStore, Table};
use crate::request::{DeleteItem, GetItem, PutItem, TransactWriteItem, UpdateItem};
use crate::store::{ItemStore, KeySchemaSource};
use itemtx_codec::{decode_attribute, encode_attribute, AttributeValue, Attributes};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes at the start of every snapshot file.
const SNAPSHOT_MAGIC: &[u8; 8] = b"ITXSNAP1";

/// An item store persisted to a single snapshot file.
///
/// All reads are served from memory. After every successful write the whole
/// store is re-encoded as canonical CBOR, written to a sibling temporary file,
/// synced and renamed over the snapshot, so the file always holds a complete
/// state.
///
/// Writes are serialized by an internal mutex held across the in-memory
/// write and the snapshot rename.
///
/// # Example
///
/// ```no_run
/// use itemtx_storage::{FileItemStore, KeySchema};
/// use std::path::Path;
///
/// let store = FileItemStore::open(Path::new("items.snap")).unwrap();
/// store.create_table("Users", KeySchema::new("id")).unwrap();
/// ```
#[derive(Debug)]
pub struct FileItemStore {
    path: PathBuf,
    inner: InMemoryItemStore,
    write_lock: Mutex<()>,
}

impl FileItemStore {
    /// Opens the snapshot at `path`, or starts empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let inner = if path.exists() {
            let bytes = fs::read(path)?;
            InMemoryItemStore::from_tables(decode_snapshot(&bytes)?)
        } else {
            InMemoryItemStore::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// Opens the snapshot, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be read.
    pub fn open_with_create_dirs(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates a table and persists the snapshot.
    ///
    /// # Errors
    ///
    /// See [`InMemoryItemStore::create_table`].
    pub fn create_table(&self, name: impl Into<String>, schema: KeySchema) -> StoreResult<()> {
        self.write(|inner| inner.create_table(name, schema))
    }

    /// Returns the names of all tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.inner.table_names()
    }

    fn write<T>(&self, op: impl FnOnce(&InMemoryItemStore) -> StoreResult<T>) -> StoreResult<T> {
        let _guard = self.write_lock.lock();
        let result = op(&self.inner)?;
        self.persist()?;
        Ok(result)
    }

    fn persist(&self) -> StoreResult<()> {
        let bytes = encode_snapshot(&self.inner.tables())?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn encode_snapshot(tables: &BTreeMap<String, Table>) -> StoreResult<Vec<u8>> {
    let mut root = Attributes::new();
    for (name, table) in tables {
        let mut entry = Attributes::new();
        entry.insert(
            "partition_key".into(),
            AttributeValue::s(table.schema.partition_key.clone()),
        );
        if let Some(sort_key) = &table.schema.sort_key {
            entry.insert("sort_key".into(), AttributeValue::s(sort_key.clone()));
        }
        entry.insert(
            "items".into(),
            AttributeValue::L(table.items.values().cloned().map(AttributeValue::M).collect()),
        );
        root.insert(name.clone(), AttributeValue::M(entry));
    }
    let mut bytes = SNAPSHOT_MAGIC.to_vec();
    bytes.extend(encode_attribute(&AttributeValue::M(root))?);
    Ok(bytes)
}

fn decode_snapshot(bytes: &[u8]) -> StoreResult<BTreeMap<String, Table>> {
    let body = bytes
        .strip_prefix(SNAPSHOT_MAGIC.as_slice())
        .ok_or_else(|| StoreError::Corrupted("missing snapshot header".into()))?;
    let AttributeValue::M(root) = decode_attribute(body)? else {
        return Err(StoreError::Corrupted("snapshot root is not a map".into()));
    };

    let mut tables = BTreeMap::new();
    for (name, entry) in root {
        let entry = entry
            .as_map()
            .ok_or_else(|| StoreError::Corrupted(format!("table {name} is not a map")))?;
        let partition_key = entry
            .get("partition_key")
            .and_then(AttributeValue::as_s)
            .ok_or_else(|| StoreError::Corrupted(format!("table {name} has no partition key")))?;
        let mut schema = KeySchema::new(partition_key);
        if let Some(sort_key) = entry.get("sort_key").and_then(AttributeValue::as_s) {
            schema = schema.with_sort_key(sort_key);
        }

        let mut table = Table::new(schema);
        let items = entry
            .get("items")
            .and_then(AttributeValue::as_list)
            .unwrap_or_default();
        for item in items {
            let item = item
                .as_map()
                .ok_or_else(|| StoreError::Corrupted(format!("item in {name} is not a map")))?;
            let key = table.schema.extract_key(item)?;
            table.items.insert(key, item.clone());
        }
        tables.insert(name, table);
    }
    Ok(tables)
}

impl KeySchemaSource for FileItemStore {
    fn key_schema(&self, table: &str) -> StoreResult<KeySchema> {
        self.inner.key_schema(table)
    }
}

impl ItemStore for FileItemStore {
    fn get_item(&self, request: &GetItem) -> StoreResult<Option<Attributes>> {
        self.inner.get_item(request)
    }

    fn put_item(&self, request: &PutItem) -> StoreResult<Option<Attributes>> {
        self.write(|inner| inner.put_item(request))
    }

    fn update_item(&self, request: &UpdateItem) -> StoreResult<Option<Attributes>> {
        self.write(|inner| inner.update_item(request))
    }

    fn delete_item(&self, request: &DeleteItem) -> StoreResult<Option<Attributes>> {
        self.write(|inner| inner.delete_item(request))
    }

    fn transact_get(&self, requests: &[GetItem]) -> StoreResult<Vec<Option<Attributes>>> {
        self.inner.transact_get(requests)
    }

    fn transact_write(&self, items: &[TransactWriteItem]) -> StoreResult<()> {
        self.write(|inner| inner.transact_write(items))
    }

    fn scan(&self, table: &str, limit: Option<usize>) -> StoreResult<Vec<Attributes>> {
        self.inner.scan(table, limit)
    }

    fn max_transact_items(&self) -> usize {
        self.inner.max_transact_items()
    }
}
