//! Helpers shared by unit tests.

use crate::config::DatabaseOptions;
use crate::database::Database;
use crate::error::CoreResult;
use std::sync::Arc;
use stow_codec::{Key, Record, Value};
use stow_engine::{Engine, MemoryEngine, OpenHandlers, OpenOutcome, StoreOptions, TransactionMode};

/// Options of a store keyed by an auto-incremented `id` field.
pub(crate) fn auto_keyed() -> StoreOptions {
    StoreOptions::key_path("id").auto_increment(true)
}

/// Creates database `db` at version 1 holding the given stores.
pub(crate) async fn database_with(stores: &[(&str, StoreOptions)]) -> Database {
    let engine = Arc::new(MemoryEngine::new());
    let outcome = engine
        .open("db", Some(1), OpenHandlers::new())
        .await
        .unwrap();
    let OpenOutcome::Upgrade { transaction, .. } = outcome else {
        panic!("expected an upgrade");
    };
    for (name, options) in stores {
        transaction.create_store(name, options.clone()).unwrap();
    }
    transaction.commit().await.unwrap();
    Database::new(engine, "db", DatabaseOptions::new())
}

/// Writes raw records, bypassing the mapper.
pub(crate) async fn seed(db: &Database, store: &str, records: Vec<Record>) -> Vec<Key> {
    db.transaction(&[store], Some(TransactionMode::ReadWrite), |tx| async move {
        let mut keys = Vec::new();
        for record in records {
            keys.push(tx.put(store, Value::Map(record), None).await?);
        }
        CoreResult::Ok(keys)
    })
    .await
    .unwrap()
}

/// Reads raw records in key order.
pub(crate) async fn dump(db: &Database, store: &str) -> Vec<Value> {
    db.transaction(&[store], Some(TransactionMode::ReadOnly), |tx| async move {
        tx.get_all(store).await
    })
    .await
    .unwrap()
}
