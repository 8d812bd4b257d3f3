//! Transaction manager counters.
//!
//! ```rust,ignore
//! let manager = TransactionManager::new(store, Config::default());
//! manager.run(|manager, tx| { /* ... */ Ok(()) })?;
//!
//! let stats = manager.stats().snapshot();
//! println!("committed: {}", stats.committed);
//! println!("conflicts: {}", stats.conflicts);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by one [`crate::TransactionManager`].
///
/// All counters are atomic and only grow. They are process-local and say
/// nothing about transactions driven by other coordinators.
#[derive(Debug, Default)]
pub struct TransactionStats {
    begun: AtomicU64,
    requests: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    conflicts: AtomicU64,
    recovered: AtomicU64,
    deleted: AtomicU64,
    errors: AtomicU64,
}

impl TransactionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begin(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery(&self) {
        self.recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Transactions started.
    pub fn begun(&self) -> u64 {
        self.begun.load(Ordering::Relaxed)
    }

    /// Requests applied.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Transactions that reached `Committed` here.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Transactions that reached `RolledBack` here.
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }

    /// Requests that lost a lock race.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// In-flight transactions driven to completion by `recover` or `sweep`.
    pub fn recovered(&self) -> u64 {
        self.recovered.load(Ordering::Relaxed)
    }

    /// Finalized transactions deleted.
    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    /// Requests that failed for any reason other than a conflict.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns a copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            begun: self.begun(),
            requests: self.requests(),
            committed: self.committed(),
            rolled_back: self.rolled_back(),
            conflicts: self.conflicts(),
            recovered: self.recovered(),
            deleted: self.deleted(),
            errors: self.errors(),
        }
    }
}

/// A point-in-time copy of [`TransactionStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transactions started.
    pub begun: u64,
    /// Requests applied.
    pub requests: u64,
    /// Transactions committed.
    pub committed: u64,
    /// Transactions rolled back.
    pub rolled_back: u64,
    /// Lock conflicts.
    pub conflicts: u64,
    /// Transactions recovered.
    pub recovered: u64,
    /// Transactions deleted.
    pub deleted: u64,
    /// Other request failures.
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(TransactionStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = TransactionStats::new();
        stats.record_begin();
        stats.record_begin();
        stats.record_request();
        stats.record_commit();
        stats.record_conflict();

        let snap = stats.snapshot();
        assert_eq!(snap.begun, 2);
        assert_eq!(snap.requests, 1);
        assert_eq!(snap.committed, 1);
        assert_eq!(snap.conflicts, 1);
        assert_eq!(snap.rolled_back, 0);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(TransactionStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record_request();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.requests(), 800);
    }
}
