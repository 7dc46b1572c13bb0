//! Connection management.
//!
//! A [`Database`] owns the lifecycle of one logical connection to a named
//! database: it opens the connection lazily, hands the cached handle to
//! every operation, and reconnects on demand once the handle is closed.

use crate::config::DatabaseOptions;
use crate::error::{CoreError, CoreResult};
use crate::model::{Entity, Model};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use stow_engine::{
    Engine, EngineConnection, EngineResult, OpenHandlers, OpenOutcome, VersionChangeEvent,
};
use tracing::{debug, info};

struct Shared {
    engine: Arc<dyn Engine>,
    name: String,
    options: DatabaseOptions,
    connection: Mutex<Option<Arc<dyn EngineConnection>>>,
}

/// A handle to a named database.
///
/// Cloning is cheap; clones share the cached connection.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use stow_core::{Database, DatabaseOptions};
/// use stow_engine::MemoryEngine;
///
/// # tokio::runtime::Builder::new_current_thread()
/// #     .build()
/// #     .unwrap()
/// #     .block_on(async {
/// let db = Database::new(Arc::new(MemoryEngine::new()), "app", DatabaseOptions::new());
/// let connection = db.get_connection().await.unwrap();
/// assert_eq!(connection.version(), 1);
/// db.close();
/// # });
/// ```
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Creates a handle to `name` on `engine`. No connection is opened
    /// until the first operation.
    pub fn new(engine: Arc<dyn Engine>, name: impl Into<String>, options: DatabaseOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                name: name.into(),
                options,
                connection: Mutex::new(None),
            }),
        }
    }

    /// Returns the database name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the options this handle was created with.
    pub fn options(&self) -> &DatabaseOptions {
        &self.shared.options
    }

    /// Returns the engine hosting the database.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.shared.engine
    }

    /// Version of the cached connection, if one is open.
    pub fn version(&self) -> Option<u64> {
        self.cached_connection().map(|connection| connection.version())
    }

    /// Returns true if a usable connection is cached.
    pub fn is_connected(&self) -> bool {
        self.cached_connection().is_some()
    }

    /// Returns the cached connection, opening one at the current version if
    /// none is cached or the cached one was closed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the engine cannot open the
    /// database.
    pub async fn get_connection(&self) -> CoreResult<Arc<dyn EngineConnection>> {
        if let Some(connection) = self.cached_connection() {
            return Ok(connection);
        }

        let outcome = self
            .shared
            .engine
            .open(&self.shared.name, None, self.handlers())
            .await
            .map_err(|e| CoreError::connection(e.to_string()))?;
        let OpenOutcome::Ready(connection) = outcome else {
            return Err(CoreError::connection(
                "engine requested an upgrade for an unversioned open",
            ));
        };
        debug!(
            database = %self.shared.name,
            version = connection.version(),
            "connection opened"
        );

        let mut cached = self.shared.connection.lock();
        if let Some(existing) = cached.as_ref().filter(|c| !c.is_closed()) {
            connection.close();
            return Ok(Arc::clone(existing));
        }
        *cached = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Releases the cached connection without touching stored data.
    pub fn close(&self) {
        let connection = self.shared.connection.lock().take();
        if let Some(connection) = connection {
            connection.close();
            debug!(database = %self.shared.name, "connection closed");
        }
    }

    /// Closes the cached connection, then deletes the whole database.
    ///
    /// If other connections stay open, the blocked callback is invoked and
    /// the call waits until they close.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the engine fails the deletion.
    pub async fn delete(&self) -> CoreResult<()> {
        self.close();
        self.shared
            .engine
            .delete_database(&self.shared.name, self.handlers())
            .await
            .map_err(|e| CoreError::connection(e.to_string()))?;
        info!(database = %self.shared.name, "database deleted");
        Ok(())
    }

    /// Adapts one engine request to the core result contract, substituting
    /// `default` when the engine reports an absent value.
    ///
    /// # Errors
    ///
    /// Propagates the engine error.
    pub async fn request<T, Fut>(host_request: Fut, default: T) -> CoreResult<T>
    where
        Fut: Future<Output = EngineResult<Option<T>>>,
    {
        Ok(host_request.await?.unwrap_or(default))
    }

    /// Binds an entity type to this database.
    pub fn model<T: Entity>(&self) -> Model<T> {
        Model::new(self.clone())
    }

    pub(crate) async fn open_version(&self, version: u64) -> CoreResult<OpenOutcome> {
        self.shared
            .engine
            .open(&self.shared.name, Some(version), self.handlers())
            .await
            .map_err(|e| CoreError::connection(e.to_string()))
    }

    pub(crate) fn set_connection(&self, connection: Arc<dyn EngineConnection>) {
        let previous = self.shared.connection.lock().replace(Arc::clone(&connection));
        if let Some(previous) = previous.filter(|p| !Arc::ptr_eq(p, &connection)) {
            previous.close();
        }
    }

    fn cached_connection(&self) -> Option<Arc<dyn EngineConnection>> {
        self.shared
            .connection
            .lock()
            .as_ref()
            .filter(|connection| !connection.is_closed())
            .cloned()
    }

    fn handlers(&self) -> OpenHandlers {
        let mut handlers = OpenHandlers::new();
        if let Some(on_blocked) = &self.shared.options.on_blocked {
            handlers = handlers.on_blocked(Arc::clone(on_blocked));
        }

        let shared = Arc::downgrade(&self.shared);
        handlers.on_version_change(Arc::new(move |event: &VersionChangeEvent| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            debug!(
                database = %event.database,
                old_version = event.old_version,
                new_version = ?event.new_version,
                "version change requested"
            );
            if let Some(callback) = &shared.options.on_version_change {
                callback(event);
            }
            if shared.options.close_on_version_change {
                let connection = shared.connection.lock().take();
                if let Some(connection) = connection {
                    connection.close();
                }
            }
        }))
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.shared.name)
            .field("version", &self.version())
            .field("options", &self.shared.options)
            .finish()
    }
}
