//! End-to-end protocol properties over the in-memory store.

use itemtx_codec::{attributes, AttributeValue, Attributes};
use itemtx_core::{
    CoreError, ItemImageStore, ItemLockCoordinator, ManualClock, MemoryTransactionCache,
    NoopTransactionCache, Request, RequestClassifier, RequestOutcome, Transaction,
    TransactionManager, TransactionRecordStore, TransactionState, ATTR_APPLIED, ATTR_TRANSIENT,
    ATTR_TXID,
};
use itemtx_core::Config;
use itemtx_storage::{
    DeleteItem, GetItem, InMemoryItemStore, ItemStore, KeySchema, PutItem, ReturnValues,
    UpdateAction, UpdateItem,
};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};

const TABLE: &str = "Items";

/// A manager plus direct access to the protocol components, all over one
/// store.
struct Parts {
    store: Arc<InMemoryItemStore>,
    manager: TransactionManager,
    records: TransactionRecordStore,
    classifier: Arc<RequestClassifier>,
    coordinator: ItemLockCoordinator,
}

fn parts() -> Parts {
    let store = Arc::new(InMemoryItemStore::new());
    let config = Config::default();
    config.create_tables(&store).unwrap();
    store.create_table(TABLE, KeySchema::new("pk")).unwrap();

    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let dyn_store: Arc<dyn ItemStore> = store.clone();
    let classifier = Arc::new(
        RequestClassifier::new(dyn_store.clone(), dyn_store.max_transact_items())
            .with_protocol_tables([config.transaction_table.clone(), config.image_table.clone()]),
    );
    let images = Arc::new(ItemImageStore::new(dyn_store.clone(), config.image_table.clone()));
    let records = TransactionRecordStore::new(
        dyn_store.clone(),
        config.transaction_table.clone(),
        Arc::new(NoopTransactionCache),
        clock.clone(),
    );
    let coordinator =
        ItemLockCoordinator::new(dyn_store.clone(), classifier.clone(), images, clock.clone());
    let manager = TransactionManager::with_parts(
        dyn_store,
        config,
        clock,
        Arc::new(MemoryTransactionCache::default()),
    );
    Parts {
        store,
        manager,
        records,
        classifier,
        coordinator,
    }
}

fn key(pk: &str) -> Attributes {
    attributes([("pk", AttributeValue::s(pk))])
}

fn raw(store: &InMemoryItemStore, pk: &str) -> Option<Attributes> {
    store.get_item(&GetItem::new(TABLE, key(pk))).unwrap()
}

fn seed(store: &InMemoryItemStore, item: Attributes) {
    store.put_item(&PutItem::new(TABLE, item)).unwrap();
}

#[test]
fn lock_then_release_without_apply_leaves_item_untouched() {
    let p = parts();
    let original = attributes([
        ("pk", AttributeValue::s("a")),
        ("name", AttributeValue::s("alice")),
        ("tags", AttributeValue::L(vec![AttributeValue::s("x")])),
    ]);
    seed(&p.store, original.clone());

    let tx = p.manager.begin().unwrap();
    let request = Request::Update(UpdateItem::new(
        TABLE,
        key("a"),
        vec![UpdateAction::set("name", "bob")],
    ));
    let items = p.classifier.validate(&request).unwrap();
    let tx = p.records.append_request(&tx, request).unwrap();
    let record = tx.requests()[0].clone();

    p.coordinator.acquire_locks(&tx, &record, &items).unwrap();
    let locked = raw(&p.store, "a").unwrap();
    assert_eq!(locked.get(ATTR_TXID).and_then(AttributeValue::as_s), Some(tx.id().as_str()));

    p.coordinator.release_locks(&tx, false).unwrap();
    assert_eq!(raw(&p.store, "a"), Some(original));
}

#[test]
fn apply_twice_writes_once() {
    let p = parts();
    seed(
        &p.store,
        attributes([("pk", AttributeValue::s("a")), ("log", AttributeValue::L(Vec::new()))]),
    );

    let tx = p.manager.begin().unwrap();
    let request = Request::Update(
        UpdateItem::new(
            TABLE,
            key("a"),
            vec![UpdateAction::Append("log".into(), vec![AttributeValue::s("entry")])],
        )
        .with_return_values(ReturnValues::AllNew),
    );
    let items = p.classifier.validate(&request).unwrap();
    let tx = p.records.append_request(&tx, request).unwrap();
    let record = tx.requests()[0].clone();

    let locked = p.coordinator.acquire_locks(&tx, &record, &items).unwrap();
    let first = p.coordinator.apply_request(&tx, &record, &items, &locked).unwrap();
    let after_first = raw(&p.store, "a");

    // A crashed coordinator would re-acquire and re-apply.
    let relocked = p.coordinator.acquire_locks(&tx, &record, &items).unwrap();
    let second = p.coordinator.apply_request(&tx, &record, &items, &relocked).unwrap();

    assert_eq!(first, second);
    assert_eq!(raw(&p.store, "a"), after_first);
    let log = raw(&p.store, "a").unwrap()["log"].clone();
    assert_eq!(log, AttributeValue::L(vec![AttributeValue::s("entry")]));
}

#[test]
fn concurrent_writers_one_wins() {
    for _ in 0..20 {
        let p = parts();
        seed(&p.store, attributes([("pk", AttributeValue::s("hot")), ("n", AttributeValue::number(0))]));

        let barrier = Barrier::new(2);
        let outcomes: Vec<(Transaction, Result<RequestOutcome, CoreError>)> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = (0..2)
                    .map(|i| {
                        let manager = &p.manager;
                        let barrier = &barrier;
                        scope.spawn(move || {
                            let mut tx = manager.begin().unwrap();
                            barrier.wait();
                            let result = manager.execute(
                                &mut tx,
                                UpdateItem::new(TABLE, key("hot"), vec![UpdateAction::set("n", i64::from(i))]),
                            );
                            (tx, result)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

        let winners: Vec<&Transaction> = outcomes
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(tx, _)| tx)
            .collect();
        assert_eq!(winners.len(), 1);
        let winner = winners[0].id().clone();

        let (_, loser) = outcomes.iter().find(|(_, result)| result.is_err()).unwrap();
        match loser {
            Err(CoreError::Conflicted { conflicts, .. }) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].owner.as_ref(), Some(&winner));
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
    }
}

#[test]
fn rollback_restores_exact_pre_image() {
    let p = parts();
    let original = attributes([
        ("pk", AttributeValue::s("a")),
        ("balance", AttributeValue::number(100)),
        ("note", AttributeValue::s("keep me")),
        ("blob", AttributeValue::B(vec![1, 2, 3])),
    ]);
    seed(&p.store, original.clone());

    let mut tx = p.manager.begin().unwrap();
    p.manager
        .execute(
            &mut tx,
            UpdateItem::new(
                TABLE,
                key("a"),
                vec![
                    UpdateAction::set("balance", 50i64),
                    UpdateAction::remove("note"),
                    UpdateAction::set("extra", true),
                ],
            ),
        )
        .unwrap();
    assert_eq!(raw(&p.store, "a").unwrap()["balance"], AttributeValue::number(50));
    p.manager.rollback(&mut tx).unwrap();

    assert_eq!(raw(&p.store, "a"), Some(original));
}

#[test]
fn rollback_removes_every_trace_of_new_items() {
    let p = parts();
    let mut tx = p.manager.begin().unwrap();
    p.manager.execute(&mut tx, GetItem::new(TABLE, key("read"))).unwrap();
    p.manager
        .execute(
            &mut tx,
            PutItem::new(TABLE, attributes([("pk", AttributeValue::s("put")), ("v", AttributeValue::number(1))])),
        )
        .unwrap();
    p.manager
        .execute(&mut tx, UpdateItem::new(TABLE, key("upd"), vec![UpdateAction::set("v", 2i64)]))
        .unwrap();
    assert!(raw(&p.store, "put").is_some());

    p.manager.rollback(&mut tx).unwrap();
    for pk in ["read", "put", "upd"] {
        assert_eq!(raw(&p.store, pk), None, "{pk} left behind");
    }
}

#[test]
fn commit_keeps_writes_and_drops_read_placeholders() {
    let p = parts();
    let mut tx = p.manager.begin().unwrap();
    p.manager.execute(&mut tx, GetItem::new(TABLE, key("read"))).unwrap();
    p.manager
        .execute(
            &mut tx,
            PutItem::new(TABLE, attributes([("pk", AttributeValue::s("put")), ("v", AttributeValue::number(1))])),
        )
        .unwrap();
    p.manager.commit(&mut tx).unwrap();

    assert_eq!(raw(&p.store, "read"), None);
    assert_eq!(
        raw(&p.store, "put"),
        Some(attributes([("pk", AttributeValue::s("put")), ("v", AttributeValue::number(1))]))
    );
}

#[test]
fn delete_is_deferred_until_commit() {
    let p = parts();
    seed(&p.store, attributes([("pk", AttributeValue::s("a")), ("v", AttributeValue::number(1))]));

    let mut tx = p.manager.begin().unwrap();
    p.manager.execute(&mut tx, DeleteItem::new(TABLE, key("a"))).unwrap();
    // Still physically present, but gone for the transaction itself.
    assert!(raw(&p.store, "a").is_some());
    let read = p.manager.execute(&mut tx, GetItem::new(TABLE, key("a"))).unwrap();
    assert_eq!(read, RequestOutcome::Item(None));

    p.manager.commit(&mut tx).unwrap();
    assert_eq!(raw(&p.store, "a"), None);
}

#[test]
fn worked_example() {
    let p = parts();
    let tx = p.manager.begin().unwrap();
    assert_eq!(tx.version(), 1);
    assert_eq!(tx.state(), TransactionState::Active);

    let item = attributes([("pk", AttributeValue::s("k")), ("color", AttributeValue::s("red"))]);
    let request = Request::Put(PutItem::new(TABLE, item.clone()));
    let items = p.classifier.validate(&request).unwrap();
    let tx = p.records.append_request(&tx, request).unwrap();
    assert_eq!(tx.version(), 2);
    let record = tx.requests()[0].clone();

    let locked = p.coordinator.acquire_locks(&tx, &record, &items).unwrap();
    let placeholder = raw(&p.store, "k").unwrap();
    assert_eq!(placeholder.get(ATTR_TRANSIENT), Some(&AttributeValue::Bool(true)));
    assert_eq!(
        placeholder.get(ATTR_TXID).and_then(AttributeValue::as_s),
        Some(tx.id().as_str())
    );

    p.coordinator.apply_request(&tx, &record, &items, &locked).unwrap();
    let applied = raw(&p.store, "k").unwrap();
    assert_eq!(applied.get("color"), Some(&AttributeValue::s("red")));
    assert!(applied.contains_key(ATTR_APPLIED));
    assert!(applied.contains_key(ATTR_TRANSIENT));

    let mut tx = p.manager.resume(tx.id()).unwrap();
    p.manager.commit(&mut tx).unwrap();
    assert_eq!(raw(&p.store, "k"), Some(item.clone()));

    // Re-running apply once released must not write again.
    let rerun = p.coordinator.apply_request(&tx, &record, &items, &locked);
    assert!(rerun.is_err());
    assert_eq!(raw(&p.store, "k"), Some(item));
}

#[test]
fn transaction_is_invisible_to_outside_writers() {
    let p = parts();
    seed(&p.store, attributes([("pk", AttributeValue::s("a")), ("v", AttributeValue::number(1))]));

    let mut t1 = p.manager.begin().unwrap();
    p.manager.execute(&mut t1, GetItem::new(TABLE, key("a"))).unwrap();

    let mut t2 = p.manager.begin().unwrap();
    let err = p
        .manager
        .execute(&mut t2, UpdateItem::new(TABLE, key("a"), vec![UpdateAction::set("v", 2i64)]))
        .unwrap_err();
    assert!(err.is_conflict());
    // The losing request stays in t2's log, so t2 cannot retry it.
    p.manager.rollback(&mut t2).unwrap();
    assert_eq!(raw(&p.store, "a").unwrap()["v"], AttributeValue::number(1));

    p.manager.commit(&mut t1).unwrap();
    let mut t3 = p.manager.begin().unwrap();
    p.manager
        .execute(&mut t3, UpdateItem::new(TABLE, key("a"), vec![UpdateAction::set("v", 2i64)]))
        .unwrap();
    p.manager.commit(&mut t3).unwrap();
    assert_eq!(raw(&p.store, "a").unwrap()["v"], AttributeValue::number(2));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn versions_grow_by_one_and_reject_stale_writers(stale_steps in prop::collection::vec(any::<bool>(), 1..12)) {
        let p = parts();
        let mut current = p.manager.begin().unwrap();
        let mut stale = current.clone();

        for (i, use_stale) in stale_steps.into_iter().enumerate() {
            let request = Request::Get(GetItem::new(TABLE, key(&format!("k{i}"))));
            if use_stale && stale.version() != current.version() {
                let err = p.records.append_request(&stale, request).unwrap_err();
                let is_generic_failure = matches!(err, CoreError::TransactionFailed { .. });
                prop_assert!(is_generic_failure);
                let stored = p.records.get(current.id(), true).unwrap();
                prop_assert_eq!(stored.version(), current.version());
            } else {
                let before = current.version();
                stale = current.clone();
                current = p.records.append_request(&current, request).unwrap();
                prop_assert_eq!(current.version(), before + 1);
                prop_assert_eq!(current.requests().last().map(|r| r.id), Some(before + 1));
            }
        }
    }
}
