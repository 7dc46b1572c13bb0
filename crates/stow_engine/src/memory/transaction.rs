//! In-memory transactions.
//!
//! A transaction works on a private copy of the stores in its scope and
//! publishes the copy on commit. Because the lock scheduler guarantees no
//! other writer holds those stores, publishing never loses an update.

use super::connection::MemoryConnection;
use super::cursor::MemoryCursor;
use super::state::{DatabaseState, LockGuards, StoreData};
use crate::engine::{EngineCursor, EngineTransaction, StoreOptions, TransactionMode};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use stow_codec::{Key, Value};
use tracing::debug;

enum Status {
    Active,
    /// A request failed; the transaction will abort instead of committing.
    Doomed(String),
    Committed,
    Aborted(String),
}

struct TxState {
    status: Status,
    scope: Vec<String>,
    stores: BTreeMap<String, StoreData>,
    guards: Option<LockGuards>,
}

impl TxState {
    fn ensure_active(&self) -> EngineResult<()> {
        match &self.status {
            Status::Active => Ok(()),
            Status::Doomed(reason) => Err(EngineError::aborted(reason.clone())),
            Status::Committed | Status::Aborted(_) => Err(EngineError::TransactionInactive),
        }
    }
}

struct UpgradeTarget {
    version: u64,
    connection: Weak<MemoryConnection>,
}

pub(crate) struct TxInner {
    id: u64,
    mode: TransactionMode,
    db: Arc<DatabaseState>,
    upgrade: Option<UpgradeTarget>,
    state: Mutex<TxState>,
}

impl TxInner {
    pub(crate) fn read<R>(
        &self,
        store: &str,
        f: impl FnOnce(&StoreData) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let state = self.state.lock();
        state.ensure_active()?;
        let data = state
            .stores
            .get(store)
            .ok_or_else(|| EngineError::store_not_found(store))?;
        f(data)
    }

    pub(crate) fn write<R>(
        &self,
        store: &str,
        f: impl FnOnce(&mut StoreData) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut state = self.state.lock();
        state.ensure_active()?;
        if !self.mode.is_writable() {
            return Err(EngineError::ReadOnly {
                store: store.to_string(),
            });
        }
        let data = state
            .stores
            .get_mut(store)
            .ok_or_else(|| EngineError::store_not_found(store))?;

        let result = f(data);
        if let Err(err @ EngineError::Constraint { .. }) = &result {
            debug!(transaction = self.id, store, error = %err, "request failed, transaction doomed");
            state.status = Status::Doomed(err.to_string());
        }
        result
    }

    fn commit(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut state.status, Status::Committed) {
            Status::Active => {}
            Status::Committed => return Ok(()),
            Status::Aborted(reason) => {
                state.status = Status::Aborted(reason.clone());
                return Err(EngineError::aborted(reason));
            }
            Status::Doomed(reason) => {
                state.status = Status::Doomed(reason.clone());
                drop(state);
                self.finish_abort(reason.clone());
                return Err(EngineError::aborted(reason));
            }
        }

        let stores = std::mem::take(&mut state.stores);
        let guards = state.guards.take();
        {
            let mut committed = self.db.committed.lock();
            match &self.upgrade {
                Some(target) => {
                    committed.stores = stores;
                    committed.version = target.version;
                }
                None => committed.stores.extend(stores),
            }
        }
        drop(guards);
        self.release_connection();

        match &self.upgrade {
            Some(target) => debug!(
                database = %self.db.name,
                version = target.version,
                "upgrade transaction committed"
            ),
            None => debug!(transaction = self.id, mode = %self.mode, "transaction committed"),
        }
        Ok(())
    }

    fn upgrade_connection(&self) -> Option<Arc<MemoryConnection>> {
        self.upgrade.as_ref().and_then(|t| t.connection.upgrade())
    }

    /// Hands the upgraded connection over to ordinary transactions.
    fn release_connection(&self) {
        if let Some(connection) = self.upgrade_connection() {
            connection.set_upgrading(false);
        }
    }

    /// Marks the transaction aborted and releases its locks. Returns false
    /// if it had already finished.
    fn finish_abort(&self, reason: String) -> bool {
        let guards = {
            let mut state = self.state.lock();
            if matches!(state.status, Status::Committed | Status::Aborted(_)) {
                return false;
            }
            debug!(transaction = self.id, %reason, "transaction aborted");
            state.status = Status::Aborted(reason);
            state.stores.clear();
            state.guards.take()
        };
        if let Some(connection) = self.upgrade_connection() {
            connection.set_upgrading(false);
            connection.close_connection();
        }
        drop(guards);
        true
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        self.finish_abort("transaction dropped before commit".to_string());
    }
}

/// A transaction of the [`super::MemoryEngine`].
pub struct MemoryTransaction {
    inner: Arc<TxInner>,
}

impl MemoryTransaction {
    pub(crate) fn begin(
        db: Arc<DatabaseState>,
        scope: &[String],
        mode: TransactionMode,
        guards: LockGuards,
    ) -> EngineResult<Self> {
        let stores = {
            let committed = db.committed.lock();
            let mut stores = BTreeMap::new();
            for name in scope {
                let data = committed
                    .stores
                    .get(name)
                    .ok_or_else(|| EngineError::store_not_found(name))?;
                stores.insert(name.clone(), data.clone());
            }
            stores
        };
        let id = db.next_id();
        debug!(transaction = id, %mode, scope = ?scope, "transaction started");

        Ok(Self::from_parts(id, mode, db, None, stores, guards))
    }

    pub(crate) fn upgrade(
        db: Arc<DatabaseState>,
        connection: &Arc<MemoryConnection>,
        version: u64,
        guards: LockGuards,
    ) -> Self {
        let stores = db.committed.lock().stores.clone();
        let id = db.next_id();
        let target = UpgradeTarget {
            version,
            connection: Arc::downgrade(connection),
        };

        Self::from_parts(
            id,
            TransactionMode::VersionChange,
            db,
            Some(target),
            stores,
            guards,
        )
    }

    fn from_parts(
        id: u64,
        mode: TransactionMode,
        db: Arc<DatabaseState>,
        upgrade: Option<UpgradeTarget>,
        stores: BTreeMap<String, StoreData>,
        guards: LockGuards,
    ) -> Self {
        let state = TxState {
            status: Status::Active,
            scope: stores.keys().cloned().collect(),
            stores,
            guards: Some(guards),
        };

        Self {
            inner: Arc::new(TxInner {
                id,
                mode,
                db,
                upgrade,
                state: Mutex::new(state),
            }),
        }
    }

    fn require_upgrade(&self, action: &str) -> EngineResult<()> {
        if self.inner.upgrade.is_none() {
            return Err(EngineError::invalid_state(format!(
                "cannot {action} an object store outside a version change transaction"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineTransaction for MemoryTransaction {
    fn id(&self) -> u64 {
        self.inner.id
    }

    fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    fn scope(&self) -> Vec<String> {
        self.inner.state.lock().scope.clone()
    }

    fn create_store(&self, name: &str, options: StoreOptions) -> EngineResult<()> {
        self.require_upgrade("create")?;
        let mut state = self.inner.state.lock();
        state.ensure_active()?;
        if state.stores.contains_key(name) {
            return Err(EngineError::invalid_state(format!(
                "object store '{name}' already exists"
            )));
        }
        state
            .stores
            .insert(name.to_string(), StoreData::new(options));
        state.scope = state.stores.keys().cloned().collect();
        debug!(database = %self.inner.db.name, store = name, "object store created");
        Ok(())
    }

    fn delete_store(&self, name: &str) -> EngineResult<()> {
        self.require_upgrade("delete")?;
        let mut state = self.inner.state.lock();
        state.ensure_active()?;
        if state.stores.remove(name).is_none() {
            return Err(EngineError::store_not_found(name));
        }
        state.scope.retain(|store| store != name);
        debug!(database = %self.inner.db.name, store = name, "object store deleted");
        Ok(())
    }

    async fn get(&self, store: &str, key: &Key) -> EngineResult<Option<Value>> {
        self.inner.read(store, |data| data.read(key))
    }

    async fn get_all(&self, store: &str) -> EngineResult<Vec<Value>> {
        self.inner.read(store, |data| {
            data.records
                .values()
                .map(|bytes| stow_codec::decode(bytes).map_err(EngineError::from))
                .collect()
        })
    }

    async fn add(&self, store: &str, value: Value, key: Option<Key>) -> EngineResult<Key> {
        self.inner.write(store, |data| data.store(value, key, false))
    }

    async fn put(&self, store: &str, value: Value, key: Option<Key>) -> EngineResult<Key> {
        self.inner.write(store, |data| data.store(value, key, true))
    }

    async fn delete(&self, store: &str, key: &Key) -> EngineResult<()> {
        self.inner.write(store, |data| {
            data.records.remove(key);
            Ok(())
        })
    }

    async fn clear(&self, store: &str) -> EngineResult<()> {
        self.inner.write(store, |data| {
            data.records.clear();
            Ok(())
        })
    }

    async fn count(&self, store: &str) -> EngineResult<u64> {
        self.inner
            .read(store, |data| Ok(data.records.len() as u64))
    }

    async fn open_cursor(&self, store: &str) -> EngineResult<Box<dyn EngineCursor>> {
        self.inner.read(store, |_| Ok(()))?;
        Ok(Box::new(MemoryCursor::new(Arc::clone(&self.inner), store)))
    }

    async fn commit(&self) -> EngineResult<()> {
        self.inner.commit()
    }

    fn abort(&self) {
        self.inner.finish_abort("transaction aborted by caller".to_string());
    }

    fn is_finished(&self) -> bool {
        matches!(
            self.inner.state.lock().status,
            Status::Committed | Status::Aborted(_)
        )
    }
}
