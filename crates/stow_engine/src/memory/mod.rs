//! In-memory engine.

mod connection;
mod cursor;
mod state;
mod transaction;

pub use connection::MemoryConnection;
pub use cursor::MemoryCursor;
pub use transaction::MemoryTransaction;

use crate::engine::{Engine, OpenHandlers, OpenOutcome};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use state::DatabaseState;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::info;

/// An in-process object-store engine.
///
/// This engine keeps every database in memory and is suitable for:
/// - Unit and integration tests
/// - Ephemeral databases that don't need persistence
///
/// It honors the whole engine contract: versioned opens with upgrade
/// transactions, the blocked protocol, lock scheduling between
/// transactions, atomic commit and abort, key generators and cursors.
///
/// # Thread Safety
///
/// The engine is thread-safe and can be shared across tasks as
/// `Arc<MemoryEngine>` or `Arc<dyn Engine>`.
pub struct MemoryEngine {
    databases: Mutex<HashMap<String, Arc<DatabaseState>>>,
    ids: Arc<AtomicU64>,
}

impl MemoryEngine {
    /// Creates an engine without databases.
    #[must_use]
    pub fn new() -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
            ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Names of the existing databases, sorted.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .lock()
            .values()
            .filter(|db| db.version() > 0)
            .map(|db| db.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Committed version of a database, if it exists.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<u64> {
        self.databases
            .lock()
            .get(name)
            .map(|db| db.version())
            .filter(|version| *version > 0)
    }

    fn database(&self, name: &str) -> Arc<DatabaseState> {
        let mut databases = self.databases.lock();
        Arc::clone(
            databases
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(DatabaseState::new(name, Arc::clone(&self.ids)))),
        )
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("databases", &self.database_names())
            .finish()
    }
}

async fn open_current(db: &Arc<DatabaseState>, handlers: &OpenHandlers) -> OpenOutcome {
    let _schema = db.lock_shared_schema().await;
    let version = {
        let mut committed = db.committed.lock();
        if committed.version == 0 {
            committed.version = 1;
            info!(database = %db.name, "database created");
        }
        committed.version
    };
    OpenOutcome::Ready(MemoryConnection::register(db, version, handlers))
}

async fn open_versioned(
    db: &Arc<DatabaseState>,
    requested: u64,
    handlers: &OpenHandlers,
) -> EngineResult<OpenOutcome> {
    {
        let _schema = db.lock_shared_schema().await;
        let current = db.version();
        match requested.cmp(&current) {
            Ordering::Less => return Err(EngineError::Version { requested, current }),
            Ordering::Equal => {
                return Ok(OpenOutcome::Ready(MemoryConnection::register(
                    db, current, handlers,
                )))
            }
            Ordering::Greater => {}
        }
    }

    db.request_exclusive(Some(requested), handlers).await;
    let guards = db.lock_exclusive().await;

    // Another upgrade may have won the race for the exclusive lock.
    let current = db.version();
    match requested.cmp(&current) {
        Ordering::Less => return Err(EngineError::Version { requested, current }),
        Ordering::Equal => {
            drop(guards);
            return Ok(OpenOutcome::Ready(MemoryConnection::register(
                db, current, handlers,
            )));
        }
        Ordering::Greater => {}
    }

    let connection = MemoryConnection::register(db, requested, handlers);
    connection.set_upgrading(true);
    let transaction = MemoryTransaction::upgrade(Arc::clone(db), &connection, requested, guards);
    info!(
        database = %db.name,
        old_version = current,
        new_version = requested,
        "upgrade started"
    );

    Ok(OpenOutcome::Upgrade {
        connection,
        transaction: Arc::new(transaction),
        old_version: current,
    })
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn open(
        &self,
        name: &str,
        version: Option<u64>,
        handlers: OpenHandlers,
    ) -> EngineResult<OpenOutcome> {
        let db = self.database(name);
        match version {
            None => Ok(open_current(&db, &handlers).await),
            Some(0) => Err(EngineError::invalid_state("version must be at least 1")),
            Some(requested) => open_versioned(&db, requested, &handlers).await,
        }
    }

    async fn delete_database(&self, name: &str, handlers: OpenHandlers) -> EngineResult<()> {
        let existing = self.databases.lock().get(name).cloned();
        let Some(db) = existing else {
            return Ok(());
        };

        db.request_exclusive(None, &handlers).await;
        let _guards = db.lock_exclusive().await;

        let mut databases = self.databases.lock();
        if databases
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, &db))
        {
            databases.remove(name);
        }
        info!(database = name, "database deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConnection, StoreOptions, TransactionMode};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use stow_codec::{record, Key, Value};
    use tokio::sync::Notify;

    fn scope(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    async fn setup(engine: &MemoryEngine) -> Arc<dyn EngineConnection> {
        let OpenOutcome::Upgrade {
            connection,
            transaction,
            old_version,
        } = engine.open("db", Some(1), OpenHandlers::new()).await.unwrap()
        else {
            panic!("expected an upgrade");
        };
        assert_eq!(old_version, 0);
        transaction
            .create_store("items", StoreOptions::key_path("id").auto_increment(true))
            .unwrap();
        transaction.commit().await.unwrap();
        connection
    }

    async fn count(connection: &Arc<dyn EngineConnection>) -> u64 {
        let tx = connection
            .transaction(&scope(&["items"]), TransactionMode::ReadOnly)
            .await
            .unwrap();
        tx.count("items").await.unwrap()
    }

    #[tokio::test]
    async fn open_without_version_creates_database() {
        let engine = MemoryEngine::new();
        let OpenOutcome::Ready(connection) = engine.open("db", None, OpenHandlers::new()).await.unwrap()
        else {
            panic!("expected a ready connection");
        };

        assert_eq!(connection.version(), 1);
        assert!(connection.store_names().is_empty());
        assert_eq!(engine.version_of("db"), Some(1));
        assert_eq!(engine.database_names(), vec!["db".to_string()]);
    }

    #[tokio::test]
    async fn upgrade_commit_publishes_stores() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;

        assert_eq!(connection.version(), 1);
        assert!(connection.contains_store("items"));
        assert_eq!(engine.version_of("db"), Some(1));
    }

    #[tokio::test]
    async fn upgrading_connection_rejects_transactions_until_commit() {
        let engine = MemoryEngine::new();
        setup(&engine).await.close();
        let OpenOutcome::Upgrade {
            connection,
            transaction,
            ..
        } = engine.open("db", Some(2), OpenHandlers::new()).await.unwrap()
        else {
            panic!("expected an upgrade");
        };

        let rejected = tokio::time::timeout(
            Duration::from_secs(1),
            connection.transaction(&scope(&["items"]), TransactionMode::ReadOnly),
        )
        .await
        .unwrap();
        assert!(matches!(rejected, Err(EngineError::InvalidState { .. })));

        transaction.commit().await.unwrap();
        assert_eq!(count(&connection).await, 0);
    }

    #[tokio::test]
    async fn aborted_upgrade_leaves_database_untouched() {
        let engine = MemoryEngine::new();
        setup(&engine).await.close();

        let OpenOutcome::Upgrade {
            connection,
            transaction,
            ..
        } = engine.open("db", Some(2), OpenHandlers::new()).await.unwrap()
        else {
            panic!("expected an upgrade");
        };
        transaction
            .create_store("other", StoreOptions::new())
            .unwrap();
        transaction
            .add("items", Value::Map(record! { "name" => "x" }), None)
            .await
            .unwrap();
        transaction.abort();

        assert!(connection.is_closed());
        assert_eq!(engine.version_of("db"), Some(1));

        let OpenOutcome::Ready(reopened) = engine.open("db", None, OpenHandlers::new()).await.unwrap()
        else {
            panic!("expected a ready connection");
        };
        assert_eq!(reopened.store_names(), vec!["items".to_string()]);
        assert_eq!(count(&reopened).await, 0);
    }

    #[tokio::test]
    async fn lower_version_is_rejected() {
        let engine = MemoryEngine::new();
        setup(&engine).await.close();

        let OpenOutcome::Upgrade { transaction, .. } =
            engine.open("db", Some(3), OpenHandlers::new()).await.unwrap()
        else {
            panic!("expected an upgrade");
        };
        transaction.commit().await.unwrap();
        drop(transaction);

        let result = engine.open("db", Some(2), OpenHandlers::new()).await;
        assert!(matches!(
            result,
            Err(EngineError::Version {
                requested: 2,
                current: 3
            })
        ));
    }

    #[tokio::test]
    async fn schema_changes_need_an_upgrade() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;
        let tx = connection
            .transaction(&scope(&["items"]), TransactionMode::ReadWrite)
            .await
            .unwrap();

        assert!(matches!(
            tx.create_store("more", StoreOptions::new()),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(matches!(
            connection
                .transaction(&scope(&["missing"]), TransactionMode::ReadOnly)
                .await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn generated_keys_roll_back_on_abort() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;
        let items = scope(&["items"]);

        let tx = connection
            .transaction(&items, TransactionMode::ReadWrite)
            .await
            .unwrap();
        let key = tx
            .add("items", Value::Map(record! { "name" => "a" }), None)
            .await
            .unwrap();
        assert_eq!(key, Key::Integer(1));
        tx.abort();

        let tx = connection
            .transaction(&items, TransactionMode::ReadWrite)
            .await
            .unwrap();
        let key = tx
            .add("items", Value::Map(record! { "name" => "b" }), None)
            .await
            .unwrap();
        assert_eq!(key, Key::Integer(1));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_add_dooms_transaction() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;
        let tx = connection
            .transaction(&scope(&["items"]), TransactionMode::ReadWrite)
            .await
            .unwrap();

        tx.add("items", Value::Map(record! { "id" => 1 }), None)
            .await
            .unwrap();
        let err = tx
            .add("items", Value::Map(record! { "id" => 1 }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Constraint { .. }));

        assert!(matches!(tx.commit().await, Err(EngineError::Aborted { .. })));
        assert!(tx.is_finished());
        assert_eq!(count(&connection).await, 0);
    }

    #[tokio::test]
    async fn reads_see_own_writes_and_commit_publishes_them() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;
        let tx = connection
            .transaction(&scope(&["items"]), TransactionMode::ReadWrite)
            .await
            .unwrap();

        let key = tx
            .put("items", Value::Map(record! { "name" => "a" }), None)
            .await
            .unwrap();
        assert_eq!(
            tx.get("items", &key).await.unwrap(),
            Some(Value::Map(record! { "id" => 1, "name" => "a" }))
        );
        tx.commit().await.unwrap();

        assert!(matches!(
            tx.get("items", &key).await,
            Err(EngineError::TransactionInactive)
        ));
        assert_eq!(count(&connection).await, 1);
    }

    #[tokio::test]
    async fn read_only_transactions_reject_writes() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;
        let tx = connection
            .transaction(&scope(&["items"]), TransactionMode::ReadOnly)
            .await
            .unwrap();

        let err = tx
            .add("items", Value::Map(record! {}), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::ReadOnly {
                store: "items".to_string()
            }
        );
    }

    #[tokio::test]
    async fn dropped_transaction_aborts() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;
        let tx = connection
            .transaction(&scope(&["items"]), TransactionMode::ReadWrite)
            .await
            .unwrap();
        tx.add("items", Value::Map(record! {}), None).await.unwrap();
        drop(tx);

        assert_eq!(count(&connection).await, 0);
    }

    #[tokio::test]
    async fn writers_on_the_same_store_are_serialized() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;
        let items = scope(&["items"]);

        let first = connection
            .transaction(&items, TransactionMode::ReadWrite)
            .await
            .unwrap();
        let waiting = tokio::time::timeout(
            Duration::from_millis(50),
            connection.transaction(&items, TransactionMode::ReadWrite),
        )
        .await;
        assert!(waiting.is_err());

        first.commit().await.unwrap();
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            connection.transaction(&items, TransactionMode::ReadWrite),
        )
        .await;
        assert!(matches!(second, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn readers_share_a_store() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;
        let items = scope(&["items"]);

        let _first = connection
            .transaction(&items, TransactionMode::ReadOnly)
            .await
            .unwrap();
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            connection.transaction(&items, TransactionMode::ReadOnly),
        )
        .await;
        assert!(matches!(second, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn cursor_walks_in_key_order_across_deletes() {
        let engine = MemoryEngine::new();
        let connection = setup(&engine).await;
        let tx = connection
            .transaction(&scope(&["items"]), TransactionMode::ReadWrite)
            .await
            .unwrap();
        for id in [3, 1, 2] {
            tx.add("items", Value::Map(record! { "id" => id }), None)
                .await
                .unwrap();
        }

        let mut cursor = tx.open_cursor("items").await.unwrap();
        let mut visited = Vec::new();
        while cursor.advance().await.unwrap() {
            let key = cursor.key().cloned().unwrap();
            if key == Key::Integer(2) {
                cursor.delete().await.unwrap();
                assert!(cursor.value().is_none());
            } else {
                let mut record = cursor.value().cloned().unwrap().into_record().unwrap();
                record.insert("seen".into(), Value::Bool(true));
                cursor.update(Value::Map(record)).await.unwrap();
            }
            visited.push(key);
        }

        assert_eq!(
            visited,
            vec![Key::Integer(1), Key::Integer(2), Key::Integer(3)]
        );
        assert_eq!(
            tx.get_all("items").await.unwrap(),
            vec![
                Value::Map(record! { "id" => 1, "seen" => true }),
                Value::Map(record! { "id" => 3, "seen" => true }),
            ]
        );
    }

    #[tokio::test]
    async fn upgrade_waits_for_blocking_connections() {
        let engine = Arc::new(MemoryEngine::new());
        setup(&engine).await.close();

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let OpenOutcome::Ready(stale) = engine
            .open(
                "db",
                None,
                OpenHandlers::new().on_version_change(Arc::new(move |event| {
                    assert_eq!(event.new_version, Some(2));
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })),
            )
            .await
            .unwrap()
        else {
            panic!("expected a ready connection");
        };

        let blocked = Arc::new(Notify::new());
        let signal = Arc::clone(&blocked);
        let upgrader = Arc::clone(&engine);
        let upgrade = tokio::spawn(async move {
            upgrader
                .open(
                    "db",
                    Some(2),
                    OpenHandlers::new().on_blocked(Arc::new(move |_| signal.notify_one())),
                )
                .await
        });

        blocked.notified().await;
        assert_eq!(notified.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!upgrade.is_finished());

        stale.close();
        let outcome = upgrade.await.unwrap().unwrap();
        assert!(matches!(outcome, OpenOutcome::Upgrade { old_version: 1, .. }));
    }

    #[tokio::test]
    async fn delete_database_removes_everything() {
        let engine = MemoryEngine::new();
        setup(&engine).await.close();

        engine
            .delete_database("db", OpenHandlers::new())
            .await
            .unwrap();
        assert_eq!(engine.version_of("db"), None);

        let OpenOutcome::Ready(connection) = engine.open("db", None, OpenHandlers::new()).await.unwrap()
        else {
            panic!("expected a ready connection");
        };
        assert!(connection.store_names().is_empty());

        engine
            .delete_database("never-created", OpenHandlers::new())
            .await
            .unwrap();
    }
}
