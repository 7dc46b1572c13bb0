//! Integration tests for transaction scheduling and connection lifecycle.

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stow_codec::{record, Key, Value};
use stow_core::{DatabaseOptions, Migration, StoreOptions, TransactionMode};
use stow_testkit::{key_strategy, TestDatabase};
use tokio::time::timeout;

fn counter_store() -> Migration {
    Migration::sync(|upgrade| {
        upgrade.create_store("counter", StoreOptions::key_path("id"))
    })
}

#[tokio::test]
async fn concurrent_writers_are_serialized() {
    let db = TestDatabase::migrated(&[counter_store()]).await;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let db = db.db.clone();
            tokio::spawn(async move {
                db.transaction(&["counter"], Some(TransactionMode::ReadWrite), |tx| async move {
                    let seen = tx.count("counter").await?;
                    tokio::task::yield_now().await;
                    let next = i64::try_from(seen).unwrap_or(i64::MAX) + 1;
                    tx.put("counter", Value::Map(record! { "id" => next }), None)
                        .await?;
                    Ok(())
                })
                .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let total = db
        .transaction(&["counter"], None, |tx| async move { tx.count("counter").await })
        .await
        .unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn writer_waits_for_writer_on_the_same_store() {
    let db = TestDatabase::migrated(&[counter_store()]).await;
    let first = db.begin(&["counter"], TransactionMode::ReadWrite).await.unwrap();

    let waiting = timeout(
        Duration::from_millis(50),
        db.begin(&["counter"], TransactionMode::ReadWrite),
    )
    .await;
    assert!(waiting.is_err());

    first.commit().await.unwrap();
    let second = timeout(
        Duration::from_secs(1),
        db.begin(&["counter"], TransactionMode::ReadWrite),
    )
    .await
    .unwrap()
    .unwrap();
    second.commit().await.unwrap();
}

#[tokio::test]
async fn readers_run_side_by_side() {
    let db = TestDatabase::migrated(&[counter_store()]).await;
    let first = db.begin(&["counter"], TransactionMode::ReadOnly).await.unwrap();

    let second = timeout(
        Duration::from_secs(1),
        db.begin(&["counter"], TransactionMode::ReadOnly),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(first.count("counter").await.unwrap(), 0);
    assert_eq!(second.count("counter").await.unwrap(), 0);
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn delete_waits_for_open_handles() {
    let blocked = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&blocked);
    let db = TestDatabase::with_options(DatabaseOptions::new().on_blocked(move |event| {
        assert_eq!(event.new_version, None);
        seen.fetch_add(1, Ordering::SeqCst);
    }));
    db.migrate(&[counter_store()]).await.unwrap();
    let other = db.handle(DatabaseOptions::new());
    other.get_connection().await.unwrap();

    let deleting = {
        let db = db.db.clone();
        tokio::spawn(async move { db.delete().await })
    };
    while blocked.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(db.committed_version().is_some());

    other.close();
    deleting.await.unwrap().unwrap();
    assert_eq!(db.committed_version(), None);
    assert!(!db.is_connected());
}

#[tokio::test]
async fn closed_handle_reconnects_to_the_new_schema() {
    let db = TestDatabase::migrated(&[counter_store()]).await;
    let other = db.handle(DatabaseOptions::new().close_on_version_change(true));
    other.get_connection().await.unwrap();

    db.migrate(&[
        counter_store(),
        Migration::sync(|upgrade| upgrade.create_store("extra", StoreOptions::new())),
    ])
    .await
    .unwrap();

    assert!(!other.is_connected());
    let count = other
        .transaction(&["extra"], None, |tx| async move { tx.count("extra").await })
        .await
        .unwrap();
    assert_eq!(count, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn get_all_returns_records_in_key_order(keys in prop::collection::vec(key_strategy(), 0..24)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let stored = runtime.block_on(async {
            let db = TestDatabase::migrated(&[Migration::sync(|upgrade| {
                upgrade.create_store("loose", StoreOptions::new())
            })])
            .await;
            let inserted = keys.clone();
            db.transaction(&["loose"], Some(TransactionMode::ReadWrite), |tx| async move {
                for key in inserted {
                    let value = Value::Map(record! { "key" => Value::from(key.clone()) });
                    tx.put("loose", value, Some(key)).await?;
                }
                Ok(())
            })
            .await
            .unwrap();
            db.transaction(&["loose"], None, |tx| async move { tx.get_all("loose").await })
                .await
                .unwrap()
        });

        let expected: Vec<Key> = keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let found: Vec<Key> = stored
            .iter()
            .map(|value| Key::from_value(value.get("key").unwrap()).unwrap())
            .collect();
        prop_assert_eq!(found, expected);
    }
}
