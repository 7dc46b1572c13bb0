//! In-memory connections.

use super::state::DatabaseState;
use super::transaction::MemoryTransaction;
use crate::engine::{EngineConnection, EngineTransaction, OpenHandlers, TransactionMode};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A connection of the [`super::MemoryEngine`].
pub struct MemoryConnection {
    id: u64,
    version: u64,
    db: Arc<DatabaseState>,
    closed: AtomicBool,
    upgrading: AtomicBool,
}

impl MemoryConnection {
    pub(crate) fn register(
        db: &Arc<DatabaseState>,
        version: u64,
        handlers: &OpenHandlers,
    ) -> Arc<Self> {
        let id = db.register(handlers.on_version_change.clone());
        debug!(database = %db.name, version, connection = id, "connection opened");
        Arc::new(Self {
            id,
            version,
            db: Arc::clone(db),
            closed: AtomicBool::new(false),
            upgrading: AtomicBool::new(false),
        })
    }

    /// Marks whether this connection's version change transaction is
    /// still running.
    pub(crate) fn set_upgrading(&self, upgrading: bool) {
        self.upgrading.store(upgrading, Ordering::SeqCst);
    }

    pub(crate) fn close_connection(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.unregister(self.id);
            debug!(database = %self.db.name, connection = self.id, "connection closed");
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close_connection();
    }
}

#[async_trait]
impl EngineConnection for MemoryConnection {
    fn name(&self) -> &str {
        &self.db.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.db.committed.lock().stores.keys().cloned().collect()
    }

    fn contains_store(&self, name: &str) -> bool {
        self.db.committed.lock().stores.contains_key(name)
    }

    async fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> EngineResult<Arc<dyn EngineTransaction>> {
        if self.is_closed() {
            return Err(EngineError::invalid_state("connection is closed"));
        }
        if self.upgrading.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state(
                "a version change transaction is running on this connection",
            ));
        }
        if mode == TransactionMode::VersionChange {
            return Err(EngineError::invalid_state(
                "version change transactions are only created by an upgrade",
            ));
        }
        if stores.is_empty() {
            return Err(EngineError::invalid_state("transaction scope is empty"));
        }
        if let Some(missing) = stores.iter().find(|name| !self.contains_store(name)) {
            return Err(EngineError::store_not_found(missing));
        }

        let guards = self.db.lock_stores(stores, mode).await;
        let transaction = MemoryTransaction::begin(Arc::clone(&self.db), stores, mode, guards)?;
        Ok(Arc::new(transaction))
    }

    fn close(&self) {
        self.close_connection();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
