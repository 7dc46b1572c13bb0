//! Transaction handles and the ambient transaction propagator.
//!
//! Every operation of the mapping layer runs inside a [`Transaction`]. An
//! operation either joins the ambient transaction its caller passed down,
//! or gets a fresh one from [`Database::use_or_create`], which then owns
//! the commit point: the operation's result is returned only once the
//! transaction has committed, and a failed operation aborts it.

use crate::cursor::Cursor;
use crate::database::Database;
use crate::error::CoreResult;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use stow_codec::{Key, Value};
use stow_engine::{EngineTransaction, TransactionMode};
use tracing::{debug, trace};

/// A handle to one engine transaction.
///
/// Clones refer to the same transaction. Once it commits or aborts every
/// further request fails.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<dyn EngineTransaction>,
}

impl Transaction {
    pub(crate) fn new(inner: Arc<dyn EngineTransaction>) -> Self {
        Self { inner }
    }

    /// Identifier of the transaction.
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    /// Mode fixed at creation.
    pub fn mode(&self) -> TransactionMode {
        self.inner.mode()
    }

    /// Stores the transaction may access.
    pub fn scope(&self) -> Vec<String> {
        self.inner.scope()
    }

    /// Returns true if `store` is in the scope.
    pub fn includes(&self, store: &str) -> bool {
        self.inner.scope().iter().any(|name| name == store)
    }

    /// Returns true once the transaction committed or aborted.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Reads the record at `key`.
    pub async fn get(&self, store: &str, key: &Key) -> CoreResult<Option<Value>> {
        Ok(self.inner.get(store, key).await?)
    }

    /// Reads every record of `store` in key order.
    pub async fn get_all(&self, store: &str) -> CoreResult<Vec<Value>> {
        Ok(self.inner.get_all(store).await?)
    }

    /// Inserts a record. Fails if the key is taken, which also dooms the
    /// transaction.
    pub async fn add(&self, store: &str, value: Value, key: Option<Key>) -> CoreResult<Key> {
        Ok(self.inner.add(store, value, key).await?)
    }

    /// Inserts or overwrites a record.
    pub async fn put(&self, store: &str, value: Value, key: Option<Key>) -> CoreResult<Key> {
        Ok(self.inner.put(store, value, key).await?)
    }

    /// Removes the record at `key`, if any.
    pub async fn delete(&self, store: &str, key: &Key) -> CoreResult<()> {
        Ok(self.inner.delete(store, key).await?)
    }

    /// Removes every record of `store`.
    pub async fn clear(&self, store: &str) -> CoreResult<()> {
        Ok(self.inner.clear(store).await?)
    }

    /// Counts the records of `store`.
    pub async fn count(&self, store: &str) -> CoreResult<u64> {
        Ok(self.inner.count(store).await?)
    }

    /// Opens a cursor over `store`.
    pub async fn open_cursor(&self, store: &str) -> CoreResult<Cursor> {
        let inner = self.inner.open_cursor(store).await?;
        Ok(Cursor::new(self.clone(), store, inner))
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TransactionAborted`] if a failed request
    /// doomed the transaction or it was already aborted.
    pub async fn commit(&self) -> CoreResult<()> {
        self.inner.commit().await?;
        trace!(transaction = self.id(), "transaction committed");
        Ok(())
    }

    /// Aborts the transaction, discarding its writes. No-op once finished.
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub(crate) fn engine(&self) -> &Arc<dyn EngineTransaction> {
        &self.inner
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("mode", &self.mode())
            .field("scope", &self.scope())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Database {
    /// Starts a transaction over `stores` on the cached connection.
    ///
    /// The caller owns the commit point of the returned transaction.
    /// Dropping every handle without committing aborts it.
    pub async fn begin(&self, stores: &[&str], mode: TransactionMode) -> CoreResult<Transaction> {
        let connection = self.get_connection().await?;
        let scope: Vec<String> = stores.iter().map(|store| (*store).to_string()).collect();
        let inner = connection.transaction(&scope, mode).await?;
        trace!(transaction = inner.id(), %mode, ?scope, "transaction started");
        Ok(Transaction::new(inner))
    }

    /// Runs `op` inside `ambient`, or inside a fresh transaction over
    /// `stores` when there is none.
    ///
    /// An ambient transaction is used as is, whatever `mode` says, and is
    /// never committed or aborted here. A fresh transaction is committed
    /// after `op` succeeds, and the result is returned only once the commit
    /// completed; if `op` fails it is aborted and the error propagated.
    ///
    /// # Errors
    ///
    /// Returns the error of `op`, or
    /// [`crate::CoreError::TransactionAborted`] if the fresh transaction
    /// could not commit.
    pub async fn use_or_create<R, F, Fut>(
        &self,
        ambient: Option<&Transaction>,
        stores: &[&str],
        mode: TransactionMode,
        op: F,
    ) -> CoreResult<R>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = CoreResult<R>>,
    {
        if let Some(transaction) = ambient {
            return op(transaction.clone()).await;
        }

        let transaction = self.begin(stores, mode).await?;
        match op(transaction.clone()).await {
            Ok(result) => {
                transaction.commit().await?;
                Ok(result)
            }
            Err(err) => {
                debug!(transaction = transaction.id(), error = %err, "operation failed, aborting");
                transaction.abort();
                Err(err)
            }
        }
    }

    /// Runs `op` inside a fresh transaction over `stores`, committing it
    /// when `op` succeeds.
    ///
    /// Without a mode, [`crate::DatabaseOptions::transaction_mode`] is used.
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use stow_core::{Database, DatabaseOptions, Migration, TransactionMode};
    /// # use stow_engine::{MemoryEngine, StoreOptions};
    /// # use stow_codec::{Key, Value};
    /// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
    /// # let db = Database::new(Arc::new(MemoryEngine::new()), "docs", DatabaseOptions::new());
    /// # db.migrate(&[Migration::sync(|upgrade| upgrade.create_store("notes", StoreOptions::new()))])
    /// #     .await
    /// #     .unwrap();
    /// db.transaction(&["notes"], Some(TransactionMode::ReadWrite), |tx| async move {
    ///     tx.put("notes", Value::from("first"), Some(Key::from(1))).await?;
    ///     tx.put("notes", Value::from("second"), Some(Key::from(2))).await?;
    ///     Ok(())
    /// })
    /// .await
    /// .unwrap();
    ///
    /// let count = db
    ///     .transaction(&["notes"], None, |tx| async move { tx.count("notes").await })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(count, 2);
    /// # });
    /// ```
    pub async fn transaction<R, F, Fut>(
        &self,
        stores: &[&str],
        mode: Option<TransactionMode>,
        op: F,
    ) -> CoreResult<R>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = CoreResult<R>>,
    {
        let mode = mode.unwrap_or(self.options().transaction_mode);
        self.use_or_create(None, stores, mode, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::test_support::{auto_keyed, database_with};
    use stow_codec::record;
    use stow_engine::EngineError;

    async fn database_with_store(store: &str) -> Database {
        database_with(&[(store, auto_keyed())]).await
    }

    fn item(name: &str) -> Value {
        Value::Map(record! { "name" => name })
    }

    #[tokio::test]
    async fn fresh_transaction_commits_before_returning() {
        let db = database_with_store("items").await;

        let key = db
            .use_or_create(None, &["items"], TransactionMode::ReadWrite, |tx| async move {
                tx.add("items", item("a"), None).await
            })
            .await
            .unwrap();
        assert_eq!(key, Key::Integer(1));

        let count = db
            .transaction(&["items"], None, |tx| async move { tx.count("items").await })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn failed_operation_aborts_fresh_transaction() {
        let db = database_with_store("items").await;

        let result: CoreResult<()> = db
            .transaction(&["items"], Some(TransactionMode::ReadWrite), |tx| async move {
                tx.add("items", item("a"), None).await?;
                Err(CoreError::migration_failed("rejected"))
            })
            .await;
        assert!(matches!(result, Err(CoreError::MigrationFailed { .. })));

        let count = db
            .transaction(&["items"], None, |tx| async move { tx.count("items").await })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn ambient_transaction_is_left_open() {
        let db = database_with_store("items").await;
        let tx = db
            .begin(&["items"], TransactionMode::ReadWrite)
            .await
            .unwrap();

        for name in ["a", "b"] {
            db.use_or_create(Some(&tx), &["items"], TransactionMode::ReadOnly, |tx| async move {
                tx.add("items", item(name), None).await
            })
            .await
            .unwrap();
        }
        assert!(!tx.is_finished());
        assert_eq!(tx.count("items").await.unwrap(), 2);

        tx.commit().await.unwrap();
        assert!(tx.is_finished());
    }

    #[tokio::test]
    async fn swallowed_constraint_error_still_aborts() {
        let db = database_with_store("items").await;

        let result = db
            .transaction(&["items"], Some(TransactionMode::ReadWrite), |tx| async move {
                tx.put("items", Value::Map(record! { "id" => 1 }), None).await?;
                let duplicate = tx.add("items", Value::Map(record! { "id" => 1 }), None).await;
                assert!(matches!(
                    duplicate,
                    Err(CoreError::Engine(EngineError::Constraint { .. }))
                ));
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CoreError::TransactionAborted { .. })));

        let count = db
            .transaction(&["items"], None, |tx| async move { tx.count("items").await })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn requests_after_commit_fail() {
        let db = database_with_store("items").await;
        let tx = db.begin(&["items"], TransactionMode::ReadOnly).await.unwrap();
        tx.commit().await.unwrap();

        let err = tx.count("items").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Engine(EngineError::TransactionInactive)
        ));
        tx.abort();
        assert!(tx.is_finished());
    }

    #[tokio::test]
    async fn default_mode_comes_from_options() {
        let db = database_with_store("items").await;

        let err = db
            .transaction(&["items"], None, |tx| async move {
                tx.add("items", item("a"), None).await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Engine(EngineError::ReadOnly { .. })));
    }

    #[tokio::test]
    async fn unknown_store_is_reported() {
        let db = database_with_store("items").await;
        let err = db
            .begin(&["missing"], TransactionMode::ReadOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Engine(EngineError::NotFound { .. })));
    }
}
