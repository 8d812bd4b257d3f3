//! Cross-crate integration test helpers.
//!
//! [`ModelHarness`] runs operations through transactions and mirrors them on
//! a plain map, so the store can be compared against what the transactions
//! should have produced.

use crate::fixtures::{TestStore, ITEMS_KEY};
use crate::generators::ItemOperation;
use itemtx_codec::{AttributeValue, Attributes};
use itemtx_core::{CoreError, CoreResult, RequestOutcome};
use itemtx_storage::apply_updates;
use std::collections::BTreeMap;

/// A test harness that tracks the expected contents of the items table.
pub struct ModelHarness {
    /// The store under test.
    pub store: TestStore,
    model: BTreeMap<String, Attributes>,
}

impl ModelHarness {
    /// Creates a harness over an empty store.
    pub fn new() -> Self {
        Self {
            store: TestStore::new(),
            model: BTreeMap::new(),
        }
    }

    /// Runs `ops` in one transaction, then commits or rolls back.
    ///
    /// Operations rejected as duplicate writes are skipped. Every read is
    /// checked against the transaction's own pending writes. Returns how many
    /// operations were executed.
    ///
    /// # Errors
    ///
    /// Any other failure rolls the transaction back and is returned.
    pub fn run_transaction(&mut self, ops: &[ItemOperation], commit: bool) -> CoreResult<usize> {
        let manager = &self.store.manager;
        let mut tx = manager.begin()?;
        let mut staged = self.model.clone();
        let mut executed = 0;

        for op in ops {
            let outcome = match manager.execute(&mut tx, op.to_request()) {
                Ok(outcome) => outcome,
                Err(CoreError::DuplicateRequest { .. }) => continue,
                Err(e) => {
                    manager.rollback(&mut tx)?;
                    return Err(e);
                }
            };
            if let ItemOperation::Get { pk } = op {
                assert_eq!(
                    outcome,
                    RequestOutcome::Item(staged.get(pk).cloned()),
                    "read of {pk} does not see the transaction's own writes"
                );
            }
            apply_to_model(&mut staged, op);
            executed += 1;
        }

        if commit {
            manager.commit(&mut tx)?;
            self.model = staged;
        } else {
            manager.rollback(&mut tx)?;
        }
        Ok(executed)
    }

    /// Panics unless the store holds exactly the expected items, unlocked.
    pub fn verify(&self) {
        let expected: Vec<&Attributes> = self.model.values().collect();
        let actual = self.store.items();
        assert_eq!(
            actual.iter().collect::<Vec<_>>(),
            expected,
            "store diverged from model:\n{}",
            self.store.dump()
        );
        self.store.assert_unlocked();
    }

    /// Number of items the model expects.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for ModelHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_to_model(model: &mut BTreeMap<String, Attributes>, op: &ItemOperation) {
    match op {
        ItemOperation::Put { item } => {
            model.insert(op.pk().to_string(), item.clone());
        }
        ItemOperation::Update { pk, actions } => {
            let item = model.entry(pk.clone()).or_insert_with(|| {
                let mut key = Attributes::new();
                key.insert(ITEMS_KEY.to_string(), AttributeValue::s(pk.as_str()));
                key
            });
            apply_updates(item, actions).expect("generated updates are always valid");
        }
        ItemOperation::Delete { pk } => {
            model.remove(pk);
        }
        ItemOperation::Get { .. } => {}
    }
}

/// Reusable end-to-end checks.
pub mod checks {
    use super::*;
    use crate::fixtures::{counter, key, ITEMS_TABLE};
    use itemtx_storage::{GetItem, UpdateAction, UpdateItem};

    /// A failing transaction body leaves earlier data untouched.
    pub fn check_abort_restores(store: &TestStore) {
        store.seed(counter("abort", 1));
        let result: CoreResult<()> = store.run(|m, tx| {
            m.execute(tx, UpdateItem::new(ITEMS_TABLE, key("abort"), vec![UpdateAction::set("n", 2i64)]))?;
            Err(CoreError::invalid_request("simulated abort"))
        });
        assert!(result.is_err());
        assert_eq!(store.raw("abort"), Some(counter("abort", 1)));
    }

    /// Reads inside a transaction see its own writes; outside reads see the
    /// committed value only after commit.
    pub fn check_read_your_writes(store: &TestStore) {
        store.seed(counter("ryw", 1));
        let mut tx = store.begin().expect("Failed to begin");
        store
            .execute(&mut tx, UpdateItem::new(ITEMS_TABLE, key("ryw"), vec![UpdateAction::set("n", 2i64)]))
            .expect("Failed to update");
        let inside = store
            .execute(&mut tx, GetItem::new(ITEMS_TABLE, key("ryw")))
            .expect("Failed to read");
        assert_eq!(inside, RequestOutcome::Item(Some(counter("ryw", 2))));

        store.commit(&mut tx).expect("Failed to commit");
        assert_eq!(store.raw("ryw"), Some(counter("ryw", 2)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{operation_sequence_strategy, PropTestConfig};
    use proptest::prelude::*;

    #[test]
    fn test_model_harness() {
        let mut harness = ModelHarness::new();
        let mut item = Attributes::new();
        item.insert(ITEMS_KEY.to_string(), AttributeValue::s("k0"));
        item.insert("a".to_string(), AttributeValue::number(1));

        let ops = vec![
            ItemOperation::Get { pk: "k0".into() },
            ItemOperation::Put { item },
            ItemOperation::Get { pk: "k0".into() },
        ];
        assert_eq!(harness.run_transaction(&ops, true).unwrap(), 3);
        assert_eq!(harness.tracked_count(), 1);
        harness.verify();

        let ops = vec![ItemOperation::Delete { pk: "k0".into() }];
        harness.run_transaction(&ops, false).unwrap();
        assert_eq!(harness.tracked_count(), 1);
        harness.verify();
    }

    #[test]
    fn test_duplicate_writes_are_skipped() {
        let mut harness = ModelHarness::new();
        let ops = vec![
            ItemOperation::Delete { pk: "k1".into() },
            ItemOperation::Update {
                pk: "k1".into(),
                actions: vec![itemtx_storage::UpdateAction::set("a", true)],
            },
        ];
        assert_eq!(harness.run_transaction(&ops, true).unwrap(), 1);
        harness.verify();
    }

    #[test]
    fn test_abort_restores() {
        checks::check_abort_restores(&TestStore::new());
    }

    #[test]
    fn test_read_your_writes() {
        checks::check_read_your_writes(&TestStore::new());
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn transactions_match_model(
            batches in prop::collection::vec((operation_sequence_strategy(4, 1, 6), any::<bool>()), 1..6)
        ) {
            let mut harness = ModelHarness::new();
            for (ops, commit) in &batches {
                harness.run_transaction(ops, *commit).unwrap();
                harness.verify();
            }
        }
    }
}
