//! CLI command implementations.

pub mod list;
pub mod recover;
pub mod show;
pub mod sweep;

use itemtx_core::{Config, Transaction, TransactionManager};
use itemtx_storage::FileItemStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Result type shared by all commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Opens the snapshot at `path` and makes sure the protocol tables exist.
pub fn open_manager(path: &Path, config: Config) -> CommandResult<TransactionManager> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let store = FileItemStore::open(path)?;
    store.create_table(config.transaction_table.clone(), Config::transaction_table_schema())?;
    store.create_table(config.image_table.clone(), Config::image_table_schema())?;
    Ok(TransactionManager::new(Arc::new(store), config))
}

/// One transaction as printed by `list` and `show`.
#[derive(Debug, Serialize)]
pub struct TransactionSummary {
    /// Transaction id.
    pub id: String,
    /// Lifecycle state.
    pub state: String,
    /// Record version.
    pub version: u64,
    /// Last update, milliseconds since the Unix epoch.
    pub last_update_time: u64,
    /// Number of logged requests.
    pub requests: usize,
}

impl From<&Transaction> for TransactionSummary {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id().to_string(),
            state: format!("{:?}", tx.state()),
            version: tx.version(),
            last_update_time: tx.last_update_time(),
            requests: tx.requests().len(),
        }
    }
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
