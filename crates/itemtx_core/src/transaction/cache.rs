//! Process-local transaction cache.

use crate::transaction::state::Transaction;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A read-through cache of transaction records.
///
/// Advisory only: the record store refreshes it on every successful write and
/// forced fetch, and correctness never depends on its contents.
pub trait TransactionCache: Send + Sync {
    /// Returns the cached copy, if any.
    fn get(&self, id: &TransactionId) -> Option<Transaction>;

    /// Stores a copy, replacing any older one.
    fn put(&self, transaction: &Transaction);

    /// Drops the cached copy.
    fn invalidate(&self, id: &TransactionId);
}

/// Bounded in-memory cache.
///
/// The lock is held only for map access, never across store calls.
#[derive(Debug)]
pub struct MemoryTransactionCache {
    entries: Mutex<HashMap<TransactionId, Transaction>>,
    capacity: usize,
}

impl MemoryTransactionCache {
    /// Default number of cached records.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Creates a cache holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryTransactionCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl TransactionCache for MemoryTransactionCache {
    fn get(&self, id: &TransactionId) -> Option<Transaction> {
        self.entries.lock().get(id).cloned()
    }

    fn put(&self, transaction: &Transaction) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(transaction.id()) {
            // Evict the stalest record.
            if let Some(oldest) = entries
                .values()
                .min_by_key(|tx| tx.last_update_time())
                .map(|tx| tx.id().clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(transaction.id().clone(), transaction.clone());
    }

    fn invalidate(&self, id: &TransactionId) {
        self.entries.lock().remove(id);
    }
}

/// A cache that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransactionCache;

impl TransactionCache for NoopTransactionCache {
    fn get(&self, _id: &TransactionId) -> Option<Transaction> {
        None
    }

    fn put(&self, _transaction: &Transaction) {}

    fn invalidate(&self, _id: &TransactionId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str, time: u64) -> Transaction {
        Transaction::new(id.into(), time)
    }

    #[test]
    fn put_get_invalidate() {
        let cache = MemoryTransactionCache::default();
        cache.put(&tx("a", 1));
        assert_eq!(cache.get(&"a".into()).map(|t| t.last_update_time()), Some(1));
        cache.invalidate(&"a".into());
        assert!(cache.get(&"a".into()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_stalest_when_full() {
        let cache = MemoryTransactionCache::new(2);
        cache.put(&tx("old", 1));
        cache.put(&tx("new", 5));
        cache.put(&tx("newest", 9));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"old".into()).is_none());
        assert!(cache.get(&"newest".into()).is_some());
    }

    #[test]
    fn replacing_does_not_evict() {
        let cache = MemoryTransactionCache::new(1);
        cache.put(&tx("a", 1));
        cache.put(&tx("a", 2));
        assert_eq!(cache.get(&"a".into()).map(|t| t.last_update_time()), Some(2));
    }

    #[test]
    fn noop_cache_stores_nothing() {
        let cache = NoopTransactionCache;
        cache.put(&tx("a", 1));
        assert!(cache.get(&"a".into()).is_none());
    }
}
