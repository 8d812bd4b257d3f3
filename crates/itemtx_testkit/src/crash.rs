//! Fault injection and crash recovery testing.
//!
//! [`FaultyItemStore`] wraps any store and fails calls on demand: a number of
//! throttled or unavailable responses, or a simulated crash after N writes,
//! after which every call fails until [`FaultyItemStore::reset`].
//!
//! [`CrashRecoveryHarness`] uses it to stop a two-item transfer at every
//! possible write, then lets a fresh manager sweep the store and checks that
//! the transfer either happened completely or not at all.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use itemtx_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! assert!(harness.run_all().iter().all(|r| r.passed));
//! ```

use crate::fixtures::{
    counter, counter_value, key, manager_over, FIXTURE_EPOCH_MILLIS, ITEMS_KEY, ITEMS_TABLE,
};
use itemtx_codec::Attributes;
use itemtx_core::{
    is_lock_attribute, Config, CoreResult, ManualClock, RetryConfig, SweepOptions, TransactionId,
    TransactionManager,
};
use itemtx_storage::{
    DeleteItem, GetItem, InMemoryItemStore, ItemStore, KeySchema, KeySchemaSource, PutItem,
    StoreError, StoreResult, TransactWriteItem, UpdateAction, UpdateItem,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An item store wrapper that injects faults.
pub struct FaultyItemStore {
    inner: Arc<dyn ItemStore>,
    throttle_next: AtomicUsize,
    unavailable_next: AtomicUsize,
    crash_after_writes: AtomicUsize,
    writes: AtomicUsize,
    crashed: AtomicBool,
}

impl FaultyItemStore {
    /// Wraps `inner` with no faults armed.
    pub fn new(inner: Arc<dyn ItemStore>) -> Self {
        Self {
            inner,
            throttle_next: AtomicUsize::new(0),
            unavailable_next: AtomicUsize::new(0),
            crash_after_writes: AtomicUsize::new(usize::MAX),
            writes: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
        }
    }

    /// Fails the next `calls` calls with [`StoreError::Throttled`].
    pub fn throttle_next(&self, calls: usize) {
        self.throttle_next.store(calls, Ordering::SeqCst);
    }

    /// Fails the next `calls` calls with [`StoreError::Unavailable`].
    pub fn fail_next(&self, calls: usize) {
        self.unavailable_next.store(calls, Ordering::SeqCst);
    }

    /// Lets `writes` more writes through, then crashes.
    pub fn crash_after_writes(&self, writes: usize) {
        let done = self.writes.load(Ordering::SeqCst);
        self.crash_after_writes
            .store(done.saturating_add(writes), Ordering::SeqCst);
    }

    /// Disarms every fault.
    pub fn reset(&self) {
        self.throttle_next.store(0, Ordering::SeqCst);
        self.unavailable_next.store(0, Ordering::SeqCst);
        self.crash_after_writes.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns whether the simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Writes that reached the inner store.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn before_call(&self, is_write: bool) -> StoreResult<()> {
        if self.has_crashed() {
            return Err(StoreError::unavailable("simulated crash"));
        }
        if Self::take(&self.throttle_next) {
            return Err(StoreError::throttled("simulated throttling"));
        }
        if Self::take(&self.unavailable_next) {
            return Err(StoreError::unavailable("simulated outage"));
        }
        if is_write {
            let limit = self.crash_after_writes.load(Ordering::SeqCst);
            if self.writes.fetch_add(1, Ordering::SeqCst) >= limit {
                self.writes.fetch_sub(1, Ordering::SeqCst);
                self.crashed.store(true, Ordering::SeqCst);
                return Err(StoreError::unavailable("simulated crash before write"));
            }
        }
        Ok(())
    }
}

impl KeySchemaSource for FaultyItemStore {
    fn key_schema(&self, table: &str) -> StoreResult<KeySchema> {
        self.inner.key_schema(table)
    }
}

impl ItemStore for FaultyItemStore {
    fn get_item(&self, request: &GetItem) -> StoreResult<Option<Attributes>> {
        self.before_call(false)?;
        self.inner.get_item(request)
    }

    fn put_item(&self, request: &PutItem) -> StoreResult<Option<Attributes>> {
        self.before_call(true)?;
        self.inner.put_item(request)
    }

    fn update_item(&self, request: &UpdateItem) -> StoreResult<Option<Attributes>> {
        self.before_call(true)?;
        self.inner.update_item(request)
    }

    fn delete_item(&self, request: &DeleteItem) -> StoreResult<Option<Attributes>> {
        self.before_call(true)?;
        self.inner.delete_item(request)
    }

    fn transact_get(&self, requests: &[GetItem]) -> StoreResult<Vec<Option<Attributes>>> {
        self.before_call(false)?;
        self.inner.transact_get(requests)
    }

    fn transact_write(&self, items: &[TransactWriteItem]) -> StoreResult<()> {
        self.before_call(true)?;
        self.inner.transact_write(items)
    }

    fn scan(&self, table: &str, limit: Option<usize>) -> StoreResult<Vec<Attributes>> {
        self.before_call(false)?;
        self.inner.scan(table, limit)
    }

    fn max_transact_items(&self) -> usize {
        self.inner.max_transact_items()
    }
}

/// Result of one crash recovery scenario.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the scenario passed.
    pub passed: bool,
    /// Writes allowed before the crash.
    pub crash_after: usize,
    /// Whether the crash actually happened before the transfer finished.
    pub crashed: bool,
    /// Balances of the two accounts after recovery.
    pub balances: (Option<i64>, Option<i64>),
    /// Why the scenario failed.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn fail(crash_after: usize, crashed: bool, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            crash_after,
            crashed,
            balances: (None, None),
            error: Some(error.into()),
        }
    }
}

/// Runs the transfer-with-crash scenario for every crash point.
pub struct CrashRecoveryHarness {
    /// Results collected so far.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Starting balance of the source account.
    pub const INITIAL: i64 = 100;
    /// Amount moved.
    pub const AMOUNT: i64 = 40;

    /// Creates an empty harness.
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
        }
    }

    /// Crashes after 0, 1, 2, ... writes until a run completes without
    /// crashing. Returns every result.
    pub fn run_all(&mut self) -> &[CrashRecoveryResult] {
        for crash_after in 0.. {
            let result = self.run_one(crash_after);
            let done = !result.crashed;
            if done || crash_after > 64 {
                break;
            }
        }
        &self.results
    }

    /// Moves [`Self::AMOUNT`] from `a` to `b`, crashing after `crash_after`
    /// writes, then recovers with a fresh manager.
    pub fn run_one(&mut self, crash_after: usize) -> CrashRecoveryResult {
        let result = Self::scenario(crash_after);
        self.results.push(result.clone());
        result
    }

    fn scenario(crash_after: usize) -> CrashRecoveryResult {
        let config = Config::default().retry(RetryConfig::no_retry());
        let raw = Arc::new(InMemoryItemStore::new());
        if let Err(e) = config.create_tables(&raw) {
            return CrashRecoveryResult::fail(crash_after, false, e.to_string());
        }
        if let Err(e) = raw.create_table(ITEMS_TABLE, KeySchema::new(ITEMS_KEY)) {
            return CrashRecoveryResult::fail(crash_after, false, e.to_string());
        }
        for (pk, n) in [("a", Self::INITIAL), ("b", 0)] {
            if let Err(e) = raw.put_item(&PutItem::new(ITEMS_TABLE, counter(pk, n))) {
                return CrashRecoveryResult::fail(crash_after, false, e.to_string());
            }
        }

        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MILLIS));
        let faulty = Arc::new(FaultyItemStore::new(raw.clone()));
        faulty.crash_after_writes(crash_after);

        // The doomed process.
        let doomed = manager_over(faulty.clone(), config.clone(), clock.clone());
        let mut started: Option<TransactionId> = None;
        let outcome = Self::transfer(&doomed, &mut started);
        let crashed = faulty.has_crashed();
        if let Err(e) = &outcome {
            if !crashed {
                return CrashRecoveryResult::fail(crash_after, crashed, format!("failed without crashing: {e}"));
            }
        }

        // A later process sweeps whatever was left behind.
        clock.advance(Duration::from_secs(300));
        let survivor = manager_over(raw.clone(), config, clock);
        let sweep = SweepOptions {
            rollback_after: Duration::from_secs(60),
            delete_after: Duration::from_secs(3_600),
            limit: None,
        };
        if let Err(e) = survivor.sweep(sweep) {
            return CrashRecoveryResult::fail(crash_after, crashed, format!("sweep failed: {e}"));
        }

        if let Some(id) = &started {
            match survivor.resume(id) {
                Ok(tx) if tx.state().is_terminal() => {}
                Ok(tx) => {
                    return CrashRecoveryResult::fail(
                        crash_after,
                        crashed,
                        format!("transaction left in {:?}", tx.state()),
                    )
                }
                Err(e) => return CrashRecoveryResult::fail(crash_after, crashed, e.to_string()),
            }
        }

        let read = |pk: &str| raw.get_item(&GetItem::new(ITEMS_TABLE, key(pk)));
        let (a, b) = match (read("a"), read("b")) {
            (Ok(Some(a)), Ok(Some(b))) => (a, b),
            _ => return CrashRecoveryResult::fail(crash_after, crashed, "an account disappeared"),
        };
        if a.keys().chain(b.keys()).any(|name| is_lock_attribute(name)) {
            return CrashRecoveryResult::fail(crash_after, crashed, "lock attributes left behind");
        }

        let balances = (counter_value(&a), counter_value(&b));
        let untouched = (Some(Self::INITIAL), Some(0));
        let moved = (Some(Self::INITIAL - Self::AMOUNT), Some(Self::AMOUNT));
        let passed = balances == untouched || balances == moved;
        CrashRecoveryResult {
            passed,
            crash_after,
            crashed,
            balances,
            error: (!passed).then(|| format!("torn transfer: {balances:?}")),
        }
    }
}

impl CrashRecoveryHarness {
    fn transfer(manager: &TransactionManager, started: &mut Option<TransactionId>) -> CoreResult<()> {
        let mut tx = manager.begin()?;
        *started = Some(tx.id().clone());
        manager.execute(
            &mut tx,
            UpdateItem::new(
                ITEMS_TABLE,
                key("a"),
                vec![UpdateAction::set("n", Self::INITIAL - Self::AMOUNT)],
            ),
        )?;
        manager.execute(
            &mut tx,
            UpdateItem::new(ITEMS_TABLE, key("b"), vec![UpdateAction::set("n", Self::AMOUNT)]),
        )?;
        manager.commit(&mut tx)
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;
    use itemtx_core::CoreError;

    #[test]
    fn faulty_store_throttles_then_recovers() {
        let store = TestStore::new();
        let faulty = FaultyItemStore::new(store.store.clone());
        faulty.throttle_next(2);

        let get = GetItem::new(ITEMS_TABLE, key("a"));
        assert!(matches!(faulty.get_item(&get), Err(StoreError::Throttled { .. })));
        assert!(matches!(faulty.get_item(&get), Err(StoreError::Throttled { .. })));
        assert!(faulty.get_item(&get).unwrap().is_none());
    }

    #[test]
    fn faulty_store_crashes_after_writes() {
        let store = TestStore::new();
        let faulty = FaultyItemStore::new(store.store.clone());
        faulty.crash_after_writes(1);

        faulty.put_item(&PutItem::new(ITEMS_TABLE, counter("a", 1))).unwrap();
        assert!(faulty.put_item(&PutItem::new(ITEMS_TABLE, counter("b", 1))).is_err());
        assert!(faulty.has_crashed());
        // Reads fail too once crashed.
        assert!(faulty.get_item(&GetItem::new(ITEMS_TABLE, key("a"))).is_err());
        assert_eq!(faulty.writes(), 1);

        faulty.reset();
        assert!(faulty.get_item(&GetItem::new(ITEMS_TABLE, key("a"))).unwrap().is_some());
        assert!(store.raw("b").is_none());
    }

    #[test]
    fn run_retries_through_outage() {
        let store = TestStore::new();
        store.seed(counter("a", 1));
        let faulty = Arc::new(FaultyItemStore::new(store.store.clone()));
        let config = Config::default().retry(
            RetryConfig::new(4)
                .with_initial_delay(Duration::ZERO)
                .with_jitter(false),
        );
        let manager = manager_over(faulty.clone(), config, store.clock.clone());

        faulty.fail_next(1);
        manager
            .run(|m, tx| {
                m.execute(tx, UpdateItem::new(ITEMS_TABLE, key("a"), vec![UpdateAction::set("n", 2i64)]))
            })
            .unwrap();
        assert_eq!(store.raw("a"), Some(counter("a", 2)));
        store.assert_unlocked();
    }

    #[test]
    fn outage_without_retry_surfaces_retryable_error() {
        let store = TestStore::new();
        let faulty = Arc::new(FaultyItemStore::new(store.store.clone()));
        let manager: TransactionManager =
            manager_over(faulty.clone(), Config::default().retry(RetryConfig::no_retry()), store.clock.clone());

        faulty.throttle_next(1);
        let err = manager.begin().unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, CoreError::Store(StoreError::Throttled { .. })));
    }

    #[test]
    fn every_crash_point_recovers_atomically() {
        let mut harness = CrashRecoveryHarness::new();
        let results = harness.run_all();
        assert!(results.len() > 5, "scenario never crashed");
        assert!(!results.last().unwrap().crashed, "scenario never completed");
        for result in results {
            assert!(result.passed, "crash after {} writes: {:?}", result.crash_after, result.error);
        }
        // The uncrashed run moved the money.
        assert_eq!(
            results.last().unwrap().balances,
            (
                Some(CrashRecoveryHarness::INITIAL - CrashRecoveryHarness::AMOUNT),
                Some(CrashRecoveryHarness::AMOUNT)
            )
        );
    }
}
