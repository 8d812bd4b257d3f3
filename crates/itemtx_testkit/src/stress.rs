//! Stress tests for concurrent transactions.
//!
//! Several threads move amounts between a small set of counters through
//! [`itemtx_core::TransactionManager::run`]. Conflicts are expected; lost
//! updates and leftover locks are not.

use crate::fixtures::{counter_value, key, scenarios, TestStore, ITEMS_TABLE};
use itemtx_core::{CoreError, CoreResult, RequestOutcome};
use itemtx_storage::{GetItem, UpdateAction, UpdateItem};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Transfers attempted.
    pub total_ops: usize,
    /// Transfers committed.
    pub committed: usize,
    /// Transfers that lost a lock race and rolled back.
    pub conflicts: usize,
    /// Transfers that failed for any other reason.
    pub failed: usize,
    /// Wall time.
    pub duration: Duration,
}

impl StressTestResult {
    /// Committed transfers per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.committed as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Attempted: {}", self.total_ops);
        println!("Committed: {}", self.committed);
        println!("Conflicts: {}", self.conflicts);
        println!("Failed: {}", self.failed);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} commits/sec", self.ops_per_second());
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Concurrent threads.
    pub threads: usize,
    /// Transfers per thread.
    pub transfers_per_thread: usize,
    /// Number of counters; fewer means more contention.
    pub counters: usize,
    /// Starting value of every counter.
    pub initial: i64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transfers_per_thread: 50,
            counters: 4,
            initial: 1_000,
        }
    }
}

impl StressConfig {
    /// The sum every committed history must preserve.
    pub fn total(&self) -> i64 {
        self.initial * self.counters as i64
    }
}

/// Creates a store seeded for [`stress_contended_writes`].
pub fn stress_store(config: &StressConfig) -> TestStore {
    scenarios::counters(config.counters, config.initial)
}

fn read_counter(
    manager: &itemtx_core::TransactionManager,
    tx: &mut itemtx_core::Transaction,
    pk: &str,
) -> CoreResult<i64> {
    match manager.execute(tx, GetItem::new(ITEMS_TABLE, key(pk)))? {
        RequestOutcome::Item(Some(item)) => counter_value(&item)
            .ok_or_else(|| CoreError::invalid_request(format!("{pk} has no counter"))),
        _ => Err(CoreError::invalid_request(format!("{pk} is missing"))),
    }
}

/// Moves 1 between pairs of counters from many threads at once.
///
/// Each transfer reads both counters and writes both back inside one
/// transaction.
pub fn stress_contended_writes(store: &TestStore, config: &StressConfig) -> StressTestResult {
    let committed = AtomicUsize::new(0);
    let conflicts = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let counters = config.counters.max(2);

    let start = Instant::now();
    thread::scope(|scope| {
        for t in 0..config.threads {
            let (committed, conflicts, failed) = (&committed, &conflicts, &failed);
            let manager = &store.manager;
            scope.spawn(move || {
                for i in 0..config.transfers_per_thread {
                    let from = format!("c{}", (t + i) % counters);
                    let to = format!("c{}", (t + i + 1 + t % (counters - 1)) % counters);
                    let result = manager.run(|m, tx| {
                        let a = read_counter(m, tx, &from)?;
                        let b = read_counter(m, tx, &to)?;
                        m.execute(
                            tx,
                            UpdateItem::new(ITEMS_TABLE, key(&from), vec![UpdateAction::set("n", a - 1)]),
                        )?;
                        m.execute(
                            tx,
                            UpdateItem::new(ITEMS_TABLE, key(&to), vec![UpdateAction::set("n", b + 1)]),
                        )?;
                        Ok(())
                    });
                    match result {
                        Ok(()) => committed.fetch_add(1, Ordering::Relaxed),
                        Err(e) if e.is_conflict() => conflicts.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult {
        total_ops: config.threads * config.transfers_per_thread,
        committed: committed.into_inner(),
        conflicts: conflicts.into_inner(),
        failed: failed.into_inner(),
        duration: start.elapsed(),
    }
}

/// Sum of all counters currently in the store.
pub fn counter_total(store: &TestStore) -> i64 {
    store.items().iter().filter_map(counter_value).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contended_transfers_conserve_total() {
        let config = StressConfig {
            threads: 4,
            transfers_per_thread: 25,
            counters: 3,
            initial: 100,
        };
        let store = stress_store(&config);
        let result = stress_contended_writes(&store, &config);

        assert_eq!(result.committed + result.conflicts + result.failed, result.total_ops);
        assert_eq!(result.failed, 0, "unexpected failures");
        assert!(result.committed > 0);
        assert_eq!(counter_total(&store), config.total());
        store.assert_unlocked();
    }

    #[test]
    fn single_thread_never_conflicts() {
        let config = StressConfig {
            threads: 1,
            transfers_per_thread: 20,
            counters: 2,
            initial: 10,
        };
        let store = stress_store(&config);
        let result = stress_contended_writes(&store, &config);
        assert_eq!(result.committed, 20);
        assert_eq!(result.conflicts, 0);
        assert_eq!(counter_total(&store), config.total());
    }

    #[test]
    fn losers_leave_no_records_behind_unfinished() {
        let config = StressConfig {
            threads: 3,
            transfers_per_thread: 10,
            counters: 2,
            initial: 50,
        };
        let store = stress_store(&config);
        stress_contended_writes(&store, &config);
        for tx in store.list(None).unwrap() {
            assert!(tx.state().is_terminal(), "{} left {:?}", tx.id(), tx.state());
        }
    }
}
