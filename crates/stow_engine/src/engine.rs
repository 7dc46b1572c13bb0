//! Object-store engine boundary.
//!
//! An engine is a transactional key-value store holding named object stores
//! inside versioned databases. Everything the mapping layer needs from the
//! host is expressed by the four traits in this module; every request
//! completes with either a value (possibly absent) or an [`EngineError`].
//!
//! # Invariants
//!
//! - Object stores are created and deleted only inside the version-change
//!   transaction handed out by [`Engine::open`]
//! - A transaction's scope and mode are fixed when it is created
//! - A transaction commits all of its writes or none of them
//! - Read-write transactions on overlapping stores never run concurrently

use crate::error::EngineResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use stow_codec::{Key, Value};

/// Mode of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Reads only. Read-only transactions may run concurrently.
    #[default]
    ReadOnly,
    /// Reads and writes. Excludes other transactions on the same stores.
    ReadWrite,
    /// Schema upgrade. Exclusive over the whole database.
    VersionChange,
}

impl TransactionMode {
    /// Returns true if writes are allowed in this mode.
    #[must_use]
    pub fn is_writable(self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }

    /// Returns the conventional name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
            TransactionMode::VersionChange => "versionchange",
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes how an object store derives record keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Field of the record holding its key (in-line keys).
    pub key_path: Option<String>,
    /// Whether the store generates integer keys for records without one.
    pub auto_increment: bool,
}

impl StoreOptions {
    /// Options for a store with out-of-line keys and no key generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a store keyed by the given record field.
    #[must_use]
    pub fn key_path(path: impl Into<String>) -> Self {
        Self {
            key_path: Some(path.into()),
            auto_increment: false,
        }
    }

    /// Enables or disables the key generator.
    #[must_use]
    pub fn auto_increment(mut self, enabled: bool) -> Self {
        self.auto_increment = enabled;
        self
    }
}

/// Delivered to open connections when another request needs exclusive
/// access to the database, and to the requester when it is blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionChangeEvent {
    /// Name of the database.
    pub database: String,
    /// Version before the change.
    pub old_version: u64,
    /// Requested version, or `None` when the database is being deleted.
    pub new_version: Option<u64>,
}

/// Callback receiving [`VersionChangeEvent`]s.
pub type VersionChangeHandler = Arc<dyn Fn(&VersionChangeEvent) + Send + Sync>;

/// Callbacks attached to an open or delete request.
#[derive(Clone, Default)]
pub struct OpenHandlers {
    /// Invoked on the requester when other connections stay open after
    /// being asked to close.
    pub on_blocked: Option<VersionChangeHandler>,
    /// Installed on the resulting connection; invoked when another request
    /// needs it to close.
    pub on_version_change: Option<VersionChangeHandler>,
}

impl OpenHandlers {
    /// No callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the blocked callback.
    #[must_use]
    pub fn on_blocked(mut self, handler: VersionChangeHandler) -> Self {
        self.on_blocked = Some(handler);
        self
    }

    /// Sets the version-change callback.
    #[must_use]
    pub fn on_version_change(mut self, handler: VersionChangeHandler) -> Self {
        self.on_version_change = Some(handler);
        self
    }
}

impl fmt::Debug for OpenHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenHandlers")
            .field("on_blocked", &self.on_blocked.is_some())
            .field("on_version_change", &self.on_version_change.is_some())
            .finish()
    }
}

/// Result of [`Engine::open`].
pub enum OpenOutcome {
    /// The database is at the requested version.
    Ready(Arc<dyn EngineConnection>),
    /// The database must be upgraded. The caller owns the version-change
    /// transaction: committing it promotes the database to the connection's
    /// version, aborting it leaves the database untouched and closes the
    /// connection.
    Upgrade {
        /// Connection at the requested version.
        connection: Arc<dyn EngineConnection>,
        /// Exclusive version-change transaction over the whole database.
        transaction: Arc<dyn EngineTransaction>,
        /// Version before the upgrade.
        old_version: u64,
    },
}

/// An object-store engine hosting named, versioned databases.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Opens a connection to `name`.
    ///
    /// Without a version the database is opened at its current version,
    /// creating it at version 1 if it does not exist. With a version higher
    /// than the current one, other connections are sent a version-change
    /// event, `handlers.on_blocked` is invoked if any of them stay open, and
    /// the call waits until they close before returning
    /// [`OpenOutcome::Upgrade`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Version`] if `version` is lower than the
    /// current version.
    async fn open(
        &self,
        name: &str,
        version: Option<u64>,
        handlers: OpenHandlers,
    ) -> EngineResult<OpenOutcome>;

    /// Deletes `name` and all of its stores.
    ///
    /// Follows the same blocked protocol as an upgrade. Deleting a database
    /// that does not exist succeeds.
    async fn delete_database(&self, name: &str, handlers: OpenHandlers) -> EngineResult<()>;
}

/// An open connection to one database at one version.
///
/// Dropping a connection closes it.
#[async_trait]
pub trait EngineConnection: Send + Sync {
    /// Name of the database.
    fn name(&self) -> &str;

    /// Version the connection was opened at.
    fn version(&self) -> u64;

    /// Names of the committed object stores, sorted.
    fn store_names(&self) -> Vec<String>;

    /// Returns true if a committed object store with this name exists.
    fn contains_store(&self, name: &str) -> bool;

    /// Starts a transaction over `stores`.
    ///
    /// Waits until no conflicting transaction holds any of the stores.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed, the scope is empty, a store does
    /// not exist, or `mode` is [`TransactionMode::VersionChange`]. Fails
    /// with [`crate::EngineError::InvalidState`] while the connection's own
    /// version change transaction is running.
    async fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> EngineResult<Arc<dyn EngineTransaction>>;

    /// Closes the connection. Transactions already started may finish.
    fn close(&self);

    /// Returns true once the connection is closed.
    fn is_closed(&self) -> bool;
}

/// A transaction over a fixed set of object stores.
///
/// Dropping a transaction that has not finished aborts it.
#[async_trait]
pub trait EngineTransaction: Send + Sync {
    /// Identifier, unique within the engine.
    fn id(&self) -> u64;

    /// Mode fixed at creation.
    fn mode(&self) -> TransactionMode;

    /// Stores the transaction may access, sorted.
    fn scope(&self) -> Vec<String>;

    /// Creates an object store. Version-change transactions only.
    fn create_store(&self, name: &str, options: StoreOptions) -> EngineResult<()>;

    /// Deletes an object store and its records. Version-change transactions
    /// only.
    fn delete_store(&self, name: &str) -> EngineResult<()>;

    /// Reads the record stored at `key`.
    async fn get(&self, store: &str, key: &Key) -> EngineResult<Option<Value>>;

    /// Reads every record of a store in key order.
    async fn get_all(&self, store: &str) -> EngineResult<Vec<Value>>;

    /// Inserts a record, returning its key.
    ///
    /// `key` must be given for stores with out-of-line keys and no key
    /// generator, and must be omitted for stores with in-line keys.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Constraint`] if the key is taken; the
    /// transaction is then doomed to abort.
    async fn add(&self, store: &str, value: Value, key: Option<Key>) -> EngineResult<Key>;

    /// Inserts or overwrites a record, returning its key.
    async fn put(&self, store: &str, value: Value, key: Option<Key>) -> EngineResult<Key>;

    /// Removes the record at `key`, if any.
    async fn delete(&self, store: &str, key: &Key) -> EngineResult<()>;

    /// Removes every record of a store.
    async fn clear(&self, store: &str) -> EngineResult<()>;

    /// Counts the records of a store.
    async fn count(&self, store: &str) -> EngineResult<u64>;

    /// Opens a cursor over a store, positioned before its first record.
    async fn open_cursor(&self, store: &str) -> EngineResult<Box<dyn EngineCursor>>;

    /// Commits every write of the transaction atomically.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Aborted`] if the transaction was doomed
    /// by a failed request or already aborted.
    async fn commit(&self) -> EngineResult<()>;

    /// Aborts the transaction, discarding its writes. No-op once finished.
    fn abort(&self);

    /// Returns true once the transaction committed or aborted.
    fn is_finished(&self) -> bool;
}

/// A cursor walking one store in ascending key order.
#[async_trait]
pub trait EngineCursor: Send {
    /// Key of the current record.
    fn key(&self) -> Option<&Key>;

    /// Value of the current record.
    fn value(&self) -> Option<&Value>;

    /// Moves to the next record. Returns false once the store is exhausted.
    async fn advance(&mut self) -> EngineResult<bool>;

    /// Overwrites the current record.
    async fn update(&mut self, value: Value) -> EngineResult<Key>;

    /// Deletes the current record. Iteration continues after it.
    async fn delete(&mut self) -> EngineResult<()>;
}
