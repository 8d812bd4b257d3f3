//! Transaction manager.

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::image::ItemImageStore;
use crate::lock::{ItemLockCoordinator, ItemTransactionState, RequestClassifier};
use crate::request::{Request, RequestOutcome};
use crate::retry::{RetryOrchestrator, RetryPolicy};
use crate::stats::TransactionStats;
use crate::transaction::cache::{MemoryTransactionCache, NoopTransactionCache, TransactionCache};
use crate::transaction::record_store::TransactionRecordStore;
use crate::transaction::state::{Transaction, TransactionState};
use crate::types::{Clock, SystemClock, TransactionId};
use itemtx_storage::ItemStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which transactions a [`TransactionManager::sweep`] touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOptions {
    /// Unfinished transactions idle at least this long are driven to an end:
    /// active ones are rolled back, decided ones are finished.
    pub rollback_after: Duration,
    /// Finalized transactions idle at least this long are deleted (never
    /// before the configured grace period).
    pub delete_after: Duration,
    /// Maximum number of records scanned.
    pub limit: Option<usize>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            rollback_after: Duration::from_secs(60),
            delete_after: Duration::from_secs(600),
            limit: None,
        }
    }
}

/// What a sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepStats {
    /// Records looked at.
    pub scanned: usize,
    /// Idle active transactions rolled back.
    pub rolled_back: usize,
    /// Committing or rolling-back transactions finished.
    pub recovered: usize,
    /// Finalized transactions deleted.
    pub deleted: usize,
    /// Transactions the sweep could not process.
    pub failed: usize,
}

/// What an earlier attempt of [`TransactionManager::run`] left in flight.
enum Unsettled<T> {
    Nothing,
    /// The body failed and its rollback did not finish.
    Rollback(TransactionId),
    /// The commit failed part way; the body's value waits on the outcome.
    Commit(TransactionId, T),
}

enum Swept {
    RolledBack,
    Recovered,
    Deleted,
    Skipped,
}

/// Runs transactions over an [`ItemStore`].
///
/// The manager holds no per-transaction state: a [`Transaction`] is a copy of
/// its record, and any manager over the same store can resume, finish or
/// sweep it. All coordination goes through conditional writes.
///
/// ## Lifecycle
///
/// ```text
/// begin ──> execute* ──> commit ───> Committed
///                    └─> rollback ─> RolledBack
/// ```
pub struct TransactionManager {
    config: Config,
    records: TransactionRecordStore,
    images: Arc<ItemImageStore>,
    classifier: Arc<RequestClassifier>,
    coordinator: ItemLockCoordinator,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    stats: TransactionStats,
}

impl TransactionManager {
    /// Creates a manager using the system clock.
    ///
    /// The protocol tables named in `config` must exist.
    pub fn new(store: Arc<dyn ItemStore>, config: Config) -> Self {
        let cache: Arc<dyn TransactionCache> = if config.cache_transactions {
            Arc::new(MemoryTransactionCache::default())
        } else {
            Arc::new(NoopTransactionCache)
        };
        Self::with_parts(store, config, Arc::new(SystemClock), cache)
    }

    /// Creates a manager with an explicit clock and record cache.
    pub fn with_parts(
        store: Arc<dyn ItemStore>,
        config: Config,
        clock: Arc<dyn Clock>,
        cache: Arc<dyn TransactionCache>,
    ) -> Self {
        let max_items = config.effective_max_transact_items(store.max_transact_items());
        let classifier = Arc::new(
            RequestClassifier::new(store.clone(), max_items).with_protocol_tables([
                config.transaction_table.clone(),
                config.image_table.clone(),
            ]),
        );
        let images = Arc::new(ItemImageStore::new(store.clone(), config.image_table.clone()));
        let records = TransactionRecordStore::new(
            store.clone(),
            config.transaction_table.clone(),
            cache,
            clock.clone(),
        );
        let coordinator =
            ItemLockCoordinator::new(store, classifier.clone(), images.clone(), clock.clone());
        Self {
            config,
            records,
            images,
            classifier,
            coordinator,
            clock,
            cancel: CancellationToken::new(),
            stats: TransactionStats::new(),
        }
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The token checked before every store-touching step.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Counters for this manager.
    #[must_use]
    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }

    /// The classifier, for validating requests up front.
    #[must_use]
    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be created.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.cancel.check()?;
        let transaction = Transaction::new(TransactionId::generate(), self.clock.now_millis());
        self.records.add(&transaction)?;
        self.stats.record_begin();
        debug!(txid = %transaction.id(), "transaction begun");
        Ok(transaction)
    }

    /// Runs one request inside `transaction`.
    ///
    /// The request is validated, logged on the record, its items are locked
    /// and then it is applied. On error the transaction stays active; the
    /// caller decides whether to roll back.
    ///
    /// # Errors
    ///
    /// - Validation errors leave the record untouched
    /// - [`CoreError::Conflicted`] if another transaction holds an item
    /// - [`CoreError::ConditionFailed`] if the caller's condition does not hold
    /// - [`CoreError::AlreadyCommitted`] / [`CoreError::AlreadyRolledBack`] if
    ///   the transaction was decided, possibly by another coordinator
    pub fn execute(
        &self,
        transaction: &mut Transaction,
        request: impl Into<Request>,
    ) -> CoreResult<RequestOutcome> {
        let result = self.execute_inner(transaction, request.into());
        match &result {
            Ok(_) => self.stats.record_request(),
            Err(e) if e.is_conflict() => self.stats.record_conflict(),
            Err(_) => self.stats.record_error(),
        }
        result
    }

    fn execute_inner(&self, transaction: &mut Transaction, request: Request) -> CoreResult<RequestOutcome> {
        self.cancel.check()?;
        transaction.ensure_active()?;

        let items = self.classifier.validate(&request)?;
        self.classifier.validate_new_request(transaction, &items)?;

        *transaction = self.records.append_request(transaction, request)?;
        let record = transaction
            .requests()
            .last()
            .cloned()
            .ok_or_else(|| CoreError::invariant_violation("appended request is missing"))?;

        self.cancel.check()?;
        let locked = self.coordinator.acquire_locks(transaction, &record, &items)?;
        self.cancel.check()?;
        self.coordinator
            .apply_request(transaction, &record, &items, &locked)
    }

    /// Commits `transaction`: decides, releases its locks and finalizes.
    ///
    /// Committing an already committed transaction succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyRolledBack`] if the transaction was
    /// rolled back.
    pub fn commit(&self, transaction: &mut Transaction) -> CoreResult<()> {
        self.finish(transaction, false)
    }

    /// Rolls `transaction` back, restoring every item it changed.
    ///
    /// Rolling back an already rolled back transaction succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyCommitted`] if the transaction committed.
    pub fn rollback(&self, transaction: &mut Transaction) -> CoreResult<()> {
        self.finish(transaction, true)
    }

    /// Reloads a transaction from its record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no record exists.
    pub fn resume(&self, id: &TransactionId) -> CoreResult<Transaction> {
        self.records.get(id, true)
    }

    /// Drives a transaction left in flight to a terminal state.
    ///
    /// A committing transaction finishes its commit; an active or rolling
    /// back one is rolled back. Terminal transactions are returned as is.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be finished.
    pub fn recover(&self, id: &TransactionId) -> CoreResult<Transaction> {
        let mut transaction = self.resume(id)?;
        let rollback = match transaction.state() {
            TransactionState::Committed | TransactionState::RolledBack => return Ok(transaction),
            TransactionState::Committing => false,
            TransactionState::Active | TransactionState::RollingBack => true,
        };
        info!(txid = %id, state = ?transaction.state(), rollback, "recovering transaction");
        self.finish(&mut transaction, rollback)?;
        self.stats.record_recovery();
        Ok(transaction)
    }

    /// Deletes a finalized transaction's images and record.
    ///
    /// Returns `false` without deleting anything if the transaction is not
    /// finalized or was finalized less than the grace period ago.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or removed.
    pub fn delete(&self, transaction: &Transaction) -> CoreResult<bool> {
        self.cancel.check()?;
        let current = self.records.get(transaction.id(), true)?;
        if !current.state().is_terminal() {
            return Ok(false);
        }
        let age = self.clock.now_millis().saturating_sub(current.last_update_time());
        if u128::from(age) < self.config.finalized_grace_period.as_millis() {
            return Ok(false);
        }

        for record in current.requests().iter().filter(|r| !r.request.is_read_only()) {
            self.images.delete(current.id(), record.id)?;
        }
        match self.records.remove(current.id()) {
            Ok(()) => {}
            Err(CoreError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }
        self.stats.record_delete();
        debug!(txid = %current.id(), "transaction deleted");
        Ok(true)
    }

    /// Lists up to `limit` transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the record table cannot be scanned.
    pub fn list(&self, limit: Option<usize>) -> CoreResult<Vec<Transaction>> {
        self.records.list(limit)
    }

    /// Reads the live lock state of every item `transaction` has touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the items cannot be read.
    pub fn item_states(&self, transaction: &Transaction) -> CoreResult<Vec<ItemTransactionState>> {
        self.coordinator.inspect(transaction)
    }

    /// Finishes abandoned transactions and deletes old finalized ones.
    ///
    /// Failures on individual transactions are logged and counted; the sweep
    /// carries on with the rest.
    ///
    /// # Errors
    ///
    /// Returns an error if the record table cannot be scanned.
    pub fn sweep(&self, options: SweepOptions) -> CoreResult<SweepStats> {
        let now = self.clock.now_millis();
        let mut stats = SweepStats::default();

        for mut transaction in self.records.list(options.limit)? {
            self.cancel.check()?;
            stats.scanned += 1;
            let idle = Duration::from_millis(now.saturating_sub(transaction.last_update_time()));

            let result = match transaction.state() {
                TransactionState::Active if idle >= options.rollback_after => self
                    .finish(&mut transaction, true)
                    .map(|()| Swept::RolledBack),
                TransactionState::Committing | TransactionState::RollingBack
                    if idle >= options.rollback_after =>
                {
                    let rollback = transaction.state() == TransactionState::RollingBack;
                    self.finish(&mut transaction, rollback)
                        .map(|()| Swept::Recovered)
                }
                TransactionState::Committed | TransactionState::RolledBack
                    if idle >= options.delete_after =>
                {
                    self.delete(&transaction)
                        .map(|deleted| if deleted { Swept::Deleted } else { Swept::Skipped })
                }
                _ => Ok(Swept::Skipped),
            };

            match result {
                Ok(Swept::RolledBack) => {
                    stats.rolled_back += 1;
                    self.stats.record_recovery();
                }
                Ok(Swept::Recovered) => {
                    stats.recovered += 1;
                    self.stats.record_recovery();
                }
                Ok(Swept::Deleted) => stats.deleted += 1,
                Ok(Swept::Skipped) => {}
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    warn!(txid = %transaction.id(), error = %e, "sweep could not process transaction");
                    stats.failed += 1;
                }
            }
        }

        info!(
            scanned = stats.scanned,
            rolled_back = stats.rolled_back,
            recovered = stats.recovered,
            deleted = stats.deleted,
            failed = stats.failed,
            "sweep finished"
        );
        Ok(stats)
    }

    /// Runs a whole transaction: begin, `body`, commit.
    ///
    /// If `body` fails the transaction is rolled back and the error returned.
    /// Retryable store faults restart from a fresh transaction under
    /// [`Config::retry`]; conflicts and condition failures are returned
    /// immediately.
    ///
    /// A new attempt starts only once the previous transaction is settled:
    /// an unfinished rollback is finished first, and a commit that failed
    /// part way is recovered instead of running `body` again.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt, or
    /// [`CoreError::TransactionFailed`] if a commit was started but its
    /// outcome could not be settled. Such a transaction is finished later by
    /// [`Self::recover`] or [`Self::sweep`].
    pub fn run<T>(
        &self,
        mut body: impl FnMut(&Self, &mut Transaction) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let orchestrator = RetryOrchestrator::new(
            RetryPolicy::new(self.config.retry.clone()),
            self.cancel.clone(),
        );
        let mut unsettled = Unsettled::Nothing;
        let result = orchestrator.run(|attempt| {
            match std::mem::replace(&mut unsettled, Unsettled::Nothing) {
                Unsettled::Nothing => {}
                Unsettled::Rollback(id) => {
                    if let Err(e) = self.recover(&id) {
                        unsettled = Unsettled::Rollback(id);
                        return Err(e);
                    }
                }
                Unsettled::Commit(id, value) => match self.recover(&id) {
                    Ok(recovered) if recovered.state() == TransactionState::Committed => {
                        return Ok(value);
                    }
                    // Rolled back before the commit was decided.
                    Ok(_) => {}
                    Err(e) => {
                        unsettled = Unsettled::Commit(id, value);
                        return Err(e);
                    }
                },
            }

            let mut transaction = self.begin()?;
            debug!(txid = %transaction.id(), attempt, "running transaction");

            let value = match body(self, &mut transaction) {
                Ok(value) => value,
                Err(e) => {
                    if let Err(rollback_error) = self.rollback(&mut transaction) {
                        warn!(
                            txid = %transaction.id(),
                            error = %rollback_error,
                            "rollback after failed transaction body did not finish"
                        );
                        unsettled = Unsettled::Rollback(transaction.id().clone());
                    }
                    return Err(e);
                }
            };

            match self.commit(&mut transaction) {
                Ok(()) => Ok(value),
                Err(e) => match self.recover(transaction.id()) {
                    Ok(recovered) if recovered.state() == TransactionState::Committed => Ok(value),
                    Ok(_) => Err(e),
                    Err(recover_error) => {
                        warn!(
                            txid = %transaction.id(),
                            error = %recover_error,
                            "commit outcome not settled"
                        );
                        unsettled = Unsettled::Commit(transaction.id().clone(), value);
                        Err(e)
                    }
                },
            }
        });

        match (result, unsettled) {
            (Err(e), Unsettled::Commit(id, _)) => Err(CoreError::transaction_failed(
                &id,
                format!("commit outcome unknown after {e}; recover the transaction"),
            )),
            (result, _) => result,
        }
    }

    /// Decides (if still active), releases and finalizes.
    fn finish(&self, transaction: &mut Transaction, rollback: bool) -> CoreResult<()> {
        let (deciding, terminal) = if rollback {
            (TransactionState::RollingBack, TransactionState::RolledBack)
        } else {
            (TransactionState::Committing, TransactionState::Committed)
        };

        self.cancel.check()?;
        if transaction.state() == TransactionState::Active {
            self.advance(transaction, deciding)?;
        }
        if transaction.state() == terminal {
            return Ok(());
        }
        if transaction.state() != deciding {
            return Err(transaction.decided_error());
        }

        self.cancel.check()?;
        self.coordinator.release_locks(transaction, rollback)?;

        self.cancel.check()?;
        self.advance(transaction, terminal)?;
        if transaction.state() != terminal {
            return Err(transaction.decided_error());
        }

        if rollback {
            self.stats.record_rollback();
        } else {
            self.stats.record_commit();
        }
        info!(txid = %transaction.id(), state = ?terminal, requests = transaction.requests().len(), "transaction finished");
        Ok(())
    }

    /// Moves the record to `next`, adopting the stored record if someone
    /// else moved it first.
    fn advance(&self, transaction: &mut Transaction, next: TransactionState) -> CoreResult<()> {
        match self.records.update(transaction, next) {
            Ok(updated) => {
                *transaction = updated;
                Ok(())
            }
            Err(e) if e.is_decided() || matches!(e, CoreError::TransactionFailed { .. }) => {
                let current = self.records.get(transaction.id(), true)?;
                debug!(
                    txid = %transaction.id(),
                    stored = ?current.state(),
                    wanted = ?next,
                    "record moved underneath, reloaded"
                );
                let stale_active = current.state() == TransactionState::Active
                    && current.version() != transaction.version();
                *transaction = current;
                if stale_active {
                    *transaction = self.records.update(transaction, next)?;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("transaction_table", &self.config.transaction_table)
            .field("image_table", &self.config.image_table)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}
