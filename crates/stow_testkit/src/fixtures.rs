//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use std::sync::Arc;
use stow_codec::{Key, Record, Value};
use stow_core::{Database, DatabaseOptions, Migration, TransactionMode};
use stow_engine::MemoryEngine;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// A uniquely named database on its own in-memory engine.
pub struct TestDatabase {
    /// The engine hosting the database.
    pub engine: Arc<MemoryEngine>,
    /// The database handle.
    pub db: Database,
}

impl TestDatabase {
    /// Creates a new test database with default options.
    pub fn new() -> Self {
        Self::with_options(DatabaseOptions::new())
    }

    /// Creates a new test database with the given options.
    pub fn with_options(options: DatabaseOptions) -> Self {
        init_tracing();
        let engine = Arc::new(MemoryEngine::new());
        let name = format!("test-{}", Uuid::new_v4());
        let db = Database::new(engine.clone(), name, options);
        Self { engine, db }
    }

    /// Creates a test database and applies `migrations`.
    pub async fn migrated(migrations: &[Migration]) -> Self {
        let test_db = Self::new();
        test_db
            .db
            .migrate(migrations)
            .await
            .expect("Failed to migrate test database");
        test_db
    }

    /// Opens another handle to the same database.
    pub fn handle(&self, options: DatabaseOptions) -> Database {
        Database::new(self.engine.clone(), self.db.name(), options)
    }

    /// Committed version of the database, if it exists.
    pub fn committed_version(&self) -> Option<u64> {
        self.engine.version_of(self.db.name())
    }

    /// Writes raw records, bypassing the mapping layer. Returns their keys.
    pub async fn add_records(&self, store: &str, records: Vec<Record>) -> Vec<Key> {
        self.db
            .transaction(&[store], Some(TransactionMode::ReadWrite), |tx| async move {
                let mut keys = Vec::with_capacity(records.len());
                for record in records {
                    keys.push(tx.put(store, Value::Map(record), None).await?);
                }
                Ok(keys)
            })
            .await
            .expect("Failed to add records")
    }

    /// Reads raw records in key order, bypassing the mapping layer.
    pub async fn get_all_records(&self, store: &str) -> Vec<Record> {
        let values = self
            .db
            .transaction(&[store], Some(TransactionMode::ReadOnly), |tx| async move {
                tx.get_all(store).await
            })
            .await
            .expect("Failed to read records");
        values
            .into_iter()
            .map(|value| value.into_record().expect("Stored value is not a record"))
            .collect()
    }

    /// Names of the committed stores.
    pub async fn store_names(&self) -> Vec<String> {
        self.db
            .get_connection()
            .await
            .expect("Failed to connect")
            .store_names()
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Installs a test log subscriber honouring `RUST_LOG`. Later calls are
/// no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Converts a JSON literal into a record.
///
/// ```rust,ignore
/// let alice = record(json!({ "name": "Alice", "age": 33 }));
/// ```
pub fn record(value: serde_json::Value) -> Record {
    stow_codec::to_record(&value).expect("JSON literal is not a record")
}

/// Converts several JSON literals into records.
pub fn records(values: impl IntoIterator<Item = serde_json::Value>) -> Vec<Record> {
    values.into_iter().map(record).collect()
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use serde_json::json;

    /// Three people keyed 1 to 3, one of them under 18.
    pub fn people() -> Vec<Record> {
        records([
            json!({ "id": 1, "name": "Ada", "age": 33 }),
            json!({ "id": 2, "name": "Bo", "age": 13 }),
            json!({ "id": 3, "name": "Cy", "age": 28 }),
        ])
    }

    /// `count` records `{ "n": i }` without keys, for auto-keyed stores.
    pub fn numbered(count: i64) -> Vec<Record> {
        (1..=count).map(|n| record(json!({ "n": n }))).collect()
    }
}
