//! End-to-end workflow tests over the in-memory store.
//!
//! Covers the full loop: receiving → reservation → fulfillment → returns →
//! cancellation, plus the availability projection, the concurrent-allocation
//! race and the scope checks.

use std::sync::Arc;

use bookstock_auth::Actor;
use bookstock_core::{ActorId, BundleId, SchoolId, SupplierId, TitleId};
use bookstock_fulfillment::{Bundle, BundleStatus, DemandLine, FulfillmentStatus};
use bookstock_ledger::{Batch, ConsumerRef};

use crate::engine::{EngineError, StockEngine};
use crate::store::{MemoryStockStore, StockStore};

fn admin() -> Actor {
    Actor::admin(ActorId::new())
}

fn warehouse() -> Actor {
    Actor::warehouse(ActorId::new())
}

fn engine() -> StockEngine<MemoryStockStore> {
    StockEngine::new(MemoryStockStore::new())
}

fn book_line(title: TitleId, quantity: i64, unit_price: u64) -> DemandLine {
    DemandLine {
        title: Some(title),
        quantity,
        unit_price,
    }
}

async fn receive(engine: &StockEngine<MemoryStockStore>, title: TitleId, quantity: i64) -> Batch {
    engine
        .receive(
            &warehouse(),
            SupplierId::new(),
            title,
            "Algebra, Part II",
            quantity,
            None,
        )
        .await
        .unwrap()
}

async fn batch_available(store: &MemoryStockStore, title: TitleId) -> Vec<i64> {
    let mut tx = store.begin().await.unwrap();
    tx.batches_for_title(title)
        .await
        .unwrap()
        .iter()
        .map(|b| b.available())
        .collect()
}

#[tokio::test]
async fn receiving_creates_stock_and_a_clean_ledger() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 10).await;

    let school = ConsumerRef::School(SchoolId::new());
    let report = engine.availability(&school, &[title]).await.unwrap();
    assert_eq!(report[0].available, 10);
    assert_eq!(report[0].free, 10);
    assert_eq!(report[0].withdrawn, 0);

    assert!(engine.reconcile(&[title]).await.unwrap().is_empty());
}

#[tokio::test]
async fn fifo_consumes_the_oldest_batch_first() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 10).await;
    receive(&engine, title, 10).await;

    let school = ConsumerRef::School(SchoolId::new());
    engine
        .fulfill(&admin(), school, &[book_line(title, 4, 100)], 1)
        .await
        .unwrap();

    // Only the older batch was touched.
    assert_eq!(batch_available(engine.store(), title).await, vec![6, 10]);
}

#[tokio::test]
async fn shortfall_is_an_outcome_not_an_error() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 3).await;

    let record = engine
        .fulfill(
            &admin(),
            ConsumerRef::School(SchoolId::new()),
            &[book_line(title, 5, 100)],
            1,
        )
        .await
        .unwrap();

    assert_eq!(record.status(), FulfillmentStatus::Partial);
    assert_eq!(record.lines()[0].achieved(), 3);
    assert_eq!(record.lines()[0].shortfall(), 2);
}

#[tokio::test]
async fn one_short_line_out_of_two_yields_partial() {
    let engine = engine();
    let full = TitleId::new();
    let short = TitleId::new();
    receive(&engine, full, 10).await;
    receive(&engine, short, 2).await;

    let record = engine
        .fulfill(
            &admin(),
            ConsumerRef::School(SchoolId::new()),
            &[book_line(full, 10, 100), book_line(short, 5, 100)],
            1,
        )
        .await
        .unwrap();

    assert_eq!(record.status(), FulfillmentStatus::Partial);
    let shortfalls: Vec<i64> = record.lines().iter().map(|l| l.shortfall()).collect();
    assert_eq!(shortfalls, vec![0, 3]);
}

#[tokio::test]
async fn blocked_fulfillment_writes_no_entries_and_moves_no_stock() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 2).await;

    let school = ConsumerRef::School(SchoolId::new());
    engine
        .fulfill(&admin(), school, &[book_line(title, 2, 100)], 1)
        .await
        .unwrap();

    let blocked = engine
        .fulfill(&admin(), school, &[book_line(title, 1, 100)], 1)
        .await
        .unwrap();
    assert_eq!(blocked.status(), FulfillmentStatus::Blocked);

    let mut tx = engine.store().begin().await.unwrap();
    let entries = tx.entries_for_fulfillment(blocked.id()).await.unwrap();
    assert!(entries.is_empty());
    drop(tx);

    assert_eq!(batch_available(engine.store(), title).await, vec![0]);
    assert!(engine.reconcile(&[title]).await.unwrap().is_empty());
}

#[tokio::test]
async fn multiplier_scales_every_line() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 12).await;

    let record = engine
        .fulfill(
            &admin(),
            ConsumerRef::School(SchoolId::new()),
            &[book_line(title, 2, 100)],
            3,
        )
        .await
        .unwrap();

    assert_eq!(record.lines()[0].requested(), 6);
    assert_eq!(record.total_achieved(), 6);
    assert_eq!(record.status(), FulfillmentStatus::Fulfilled);
}

#[tokio::test]
async fn non_trackable_lines_need_no_stock() {
    let engine = engine();
    let record = engine
        .fulfill(
            &admin(),
            ConsumerRef::School(SchoolId::new()),
            &[DemandLine {
                title: None,
                quantity: 3,
                unit_price: 50,
            }],
            1,
        )
        .await
        .unwrap();
    assert_eq!(record.status(), FulfillmentStatus::Fulfilled);
}

#[tokio::test]
async fn unknown_title_is_rejected_before_any_write() {
    let engine = engine();
    let title = TitleId::new();

    let err = engine
        .fulfill(
            &admin(),
            ConsumerRef::School(SchoolId::new()),
            &[book_line(title, 1, 100)],
            1,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownTitle(t) if t == title));
}

#[tokio::test]
async fn availability_reads_are_idempotent() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 7).await;
    let school = ConsumerRef::School(SchoolId::new());
    engine
        .fulfill(&admin(), school, &[book_line(title, 2, 100)], 1)
        .await
        .unwrap();

    let first = engine.availability(&school, &[title]).await.unwrap();
    let second = engine.availability(&school, &[title]).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn returns_credit_lifo_and_cap_at_outstanding() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 4).await;
    receive(&engine, title, 6).await;

    let record = engine
        .fulfill(
            &admin(),
            ConsumerRef::School(SchoolId::new()),
            &[book_line(title, 8, 100)],
            1,
        )
        .await
        .unwrap();
    // 4 from the older batch, 4 from the newer one.
    assert_eq!(batch_available(engine.store(), title).await, vec![0, 2]);

    let applied = engine
        .return_items(&admin(), record.id(), &[(title, 5)])
        .await
        .unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].quantity, 5);
    assert_eq!(applied[0].value, 500);
    // LIFO: the newer batch's withdrawal is refilled first (4), then 1
    // flows back into the older batch.
    assert_eq!(batch_available(engine.store(), title).await, vec![1, 6]);

    let before = engine
        .availability(&ConsumerRef::School(SchoolId::new()), &[title])
        .await
        .unwrap();
    let err = engine
        .return_items(&admin(), record.id(), &[(title, 4)])
        .await
        .unwrap_err();
    match err {
        EngineError::OverReturn {
            title: t,
            requested,
            returnable,
        } => {
            assert_eq!(t, title);
            assert_eq!(requested, 4);
            assert_eq!(returnable, 3);
        }
        other => panic!("expected OverReturn, got {other:?}"),
    }
    // Rejected whole: no partial credit happened.
    let after = engine
        .availability(&ConsumerRef::School(SchoolId::new()), &[title])
        .await
        .unwrap();
    assert_eq!(before, after);

    engine
        .return_items(&admin(), record.id(), &[(title, 3)])
        .await
        .unwrap();
    assert_eq!(batch_available(engine.store(), title).await, vec![4, 6]);
    assert!(engine.reconcile(&[title]).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_after_partial_return_credits_only_the_outstanding_six() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 10).await;

    let record = engine
        .fulfill(
            &admin(),
            ConsumerRef::School(SchoolId::new()),
            &[book_line(title, 10, 100)],
            1,
        )
        .await
        .unwrap();
    engine
        .return_items(&admin(), record.id(), &[(title, 4)])
        .await
        .unwrap();

    let reverted = engine.cancel(&admin(), record.id()).await.unwrap();
    let total: i64 = reverted.iter().map(|(_, q)| q).sum();
    assert_eq!(total, 6);
    assert_eq!(batch_available(engine.store(), title).await, vec![10]);

    // Cancel is single-shot and ends the return window.
    assert!(matches!(
        engine.cancel(&admin(), record.id()).await.unwrap_err(),
        EngineError::AlreadyCancelled(_)
    ));
    assert!(matches!(
        engine
            .return_items(&admin(), record.id(), &[(title, 1)])
            .await
            .unwrap_err(),
        EngineError::AlreadyCancelled(_)
    ));
    assert!(engine.reconcile(&[title]).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fulfillments_never_allocate_the_same_units() {
    let store = MemoryStockStore::new();
    let engine = Arc::new(StockEngine::new(store.clone()));
    let title = TitleId::new();
    receive(&engine, title, 10).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .fulfill(
                    &Actor::admin(ActorId::new()),
                    ConsumerRef::School(SchoolId::new()),
                    &[book_line(title, 6, 100)],
                    1,
                )
                .await
                .unwrap()
        }));
    }

    let mut total_achieved = 0;
    for handle in handles {
        total_achieved += handle.await.unwrap().total_achieved();
    }

    // 10 units existed; together the two calls got exactly those 10.
    assert_eq!(total_achieved, 10);
    assert_eq!(batch_available(&store, title).await, vec![0]);
    assert!(engine.reconcile(&[title]).await.unwrap().is_empty());
}

#[tokio::test]
async fn scoped_actor_cannot_reverse_a_foreign_fulfillment() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 5).await;

    let school_a = SchoolId::new();
    let record = engine
        .fulfill(
            &admin(),
            ConsumerRef::School(school_a),
            &[book_line(title, 5, 100)],
            1,
        )
        .await
        .unwrap();

    let outsider = Actor::school_staff(ActorId::new(), SchoolId::new());
    assert!(matches!(
        engine.cancel(&outsider, record.id()).await.unwrap_err(),
        EngineError::Unauthorized(_)
    ));
    assert!(matches!(
        engine
            .return_items(&outsider, record.id(), &[(title, 1)])
            .await
            .unwrap_err(),
        EngineError::Unauthorized(_)
    ));
    assert!(matches!(
        engine
            .fulfill(
                &outsider,
                ConsumerRef::School(school_a),
                &[book_line(title, 1, 100)],
                1
            )
            .await
            .unwrap_err(),
        EngineError::Unauthorized(_)
    ));

    // Nothing changed: the record is intact and the stock stayed where the
    // fulfillment left it.
    let mut tx = engine.store().begin().await.unwrap();
    let stored = tx.lock_fulfillment(record.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), FulfillmentStatus::Fulfilled);
    drop(tx);
    assert_eq!(batch_available(engine.store(), title).await, vec![0]);
}

#[tokio::test]
async fn bundle_status_follows_its_issues_through_cancel() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 10).await;

    let school = SchoolId::new();
    let bundle_id = BundleId::new();
    let mut tx = engine.store().begin().await.unwrap();
    tx.upsert_bundle(&Bundle::new(bundle_id, school)).await.unwrap();
    tx.commit().await.unwrap();

    let consumer = ConsumerRef::Bundle(bundle_id);
    let staff = Actor::school_staff(ActorId::new(), school);

    let record = engine
        .fulfill(&staff, consumer, &[book_line(title, 5, 100)], 1)
        .await
        .unwrap();
    assert_eq!(record.status(), FulfillmentStatus::Fulfilled);

    let mut tx = engine.store().begin().await.unwrap();
    assert_eq!(
        tx.bundle(bundle_id).await.unwrap().unwrap().status,
        BundleStatus::Fulfilled
    );
    drop(tx);

    // A bundle with a live fulfilled issue cannot be issued again.
    assert!(matches!(
        engine
            .fulfill(&staff, consumer, &[book_line(title, 5, 100)], 1)
            .await
            .unwrap_err(),
        EngineError::AlreadyFulfilled(b) if b == bundle_id
    ));

    engine.cancel(&staff, record.id()).await.unwrap();
    let mut tx = engine.store().begin().await.unwrap();
    assert_eq!(
        tx.bundle(bundle_id).await.unwrap().unwrap().status,
        BundleStatus::NothingFulfilled
    );
    drop(tx);
    assert_eq!(batch_available(engine.store(), title).await, vec![10]);

    // Re-issue after cancel, this time short on stock: bundle goes partial.
    let record = engine
        .fulfill(&staff, consumer, &[book_line(title, 20, 100)], 1)
        .await
        .unwrap();
    assert_eq!(record.status(), FulfillmentStatus::Partial);
    let mut tx = engine.store().begin().await.unwrap();
    assert_eq!(
        tx.bundle(bundle_id).await.unwrap().unwrap().status,
        BundleStatus::Partial
    );
}

#[tokio::test]
async fn reservations_shape_the_availability_picture() {
    let engine = engine();
    let title = TitleId::new();
    receive(&engine, title, 10).await;

    let school = SchoolId::new();
    let consumer = ConsumerRef::School(school);
    let staff = Actor::school_staff(ActorId::new(), school);

    engine
        .reserve(&staff, consumer, title, 6, Some("term demand".to_string()))
        .await
        .unwrap();

    let report = engine.availability(&consumer, &[title]).await.unwrap();
    assert_eq!(report[0].required, 6);
    assert_eq!(report[0].reserved, 6);
    assert_eq!(report[0].available, 10);
    assert_eq!(report[0].free, 4);

    engine
        .release_reservation(&staff, consumer, title, 2)
        .await
        .unwrap();
    let report = engine.availability(&consumer, &[title]).await.unwrap();
    assert_eq!(report[0].reserved, 4);
    assert_eq!(report[0].free, 6);

    let err = engine
        .release_reservation(&staff, consumer, title, 5)
        .await
        .unwrap_err();
    match err {
        EngineError::OverRelease {
            requested,
            outstanding,
            ..
        } => {
            assert_eq!(requested, 5);
            assert_eq!(outstanding, 4);
        }
        other => panic!("expected OverRelease, got {other:?}"),
    }
}

#[tokio::test]
async fn ledger_balances_survive_mixed_traffic() {
    let engine = engine();
    let title_a = TitleId::new();
    let title_b = TitleId::new();
    receive(&engine, title_a, 8).await;
    receive(&engine, title_b, 5).await;
    receive(&engine, title_a, 4).await;

    let school = ConsumerRef::School(SchoolId::new());
    let record = engine
        .fulfill(
            &admin(),
            school,
            &[book_line(title_a, 9, 100), book_line(title_b, 5, 250)],
            1,
        )
        .await
        .unwrap();
    engine
        .return_items(&admin(), record.id(), &[(title_a, 3), (title_b, 2)])
        .await
        .unwrap();
    engine.cancel(&admin(), record.id()).await.unwrap();

    // Everything flowed back: full stock on hand, caches equal the ledger.
    let report = engine.availability(&school, &[title_a, title_b]).await.unwrap();
    assert_eq!(report[0].available, 12);
    assert_eq!(report[1].available, 5);
    assert_eq!(report[0].withdrawn, 0);
    assert!(engine.reconcile(&[title_a, title_b]).await.unwrap().is_empty());
}
