//! Transaction records and the manager that drives them.
//!
//! A transaction's state lives in exactly one place: its record in the
//! transaction table. [`TransactionManager`] moves the record through
//! `Active -> Committing -> Committed` or `Active -> RollingBack -> RolledBack`
//! with version-checked writes, so any process can pick up where another
//! left off.

mod cache;
mod manager;
mod record_store;
mod state;

pub use cache::{MemoryTransactionCache, NoopTransactionCache, TransactionCache};
pub use manager::{SweepOptions, SweepStats, TransactionManager};
pub use record_store::TransactionRecordStore;
pub use state::{Transaction, TransactionState};
