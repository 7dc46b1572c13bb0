//! Schema migrations.
//!
//! Migrations are an ordered list of steps. The database records how many
//! of them were applied in the `__version__` store, so [`Database::migrate`]
//! only ever runs the suffix that has not been applied yet. Every pending
//! step runs inside one version-change transaction: either all of them are
//! applied and the version record advanced, or none of them is.
//!
//! Step 0 is implicit and creates the version store; the supplied steps
//! follow it, so after a successful migration the recorded index equals
//! the number of supplied steps.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::model::{Entity, Options};
use crate::transaction::Transaction;
use futures::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::iter;
use stow_engine::{OpenOutcome, StoreOptions};
use tracing::{debug, info, warn};

/// Store holding the version record.
pub const VERSION_STORE: &str = "__version__";

const VERSION_ID: i64 = 1;

type StepFn = dyn Fn(Upgrade) -> BoxFuture<'static, CoreResult<()>> + Send + Sync;

/// One migration step.
pub struct Migration {
    name: Option<String>,
    step: Box<StepFn>,
}

impl Migration {
    /// Creates an asynchronous step.
    ///
    /// ```rust,ignore
    /// Migration::new(|upgrade| async move {
    ///     upgrade.create_entity_store::<User>(true)?;
    ///     upgrade
    ///         .database()
    ///         .model::<User>()
    ///         .bulk_create(seed_users(), upgrade.options())
    ///         .await?;
    ///     Ok(())
    /// })
    /// ```
    pub fn new<F, Fut>(step: F) -> Self
    where
        F: Fn(Upgrade) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        Self {
            name: None,
            step: Box::new(move |upgrade| step(upgrade).boxed()),
        }
    }

    /// Creates a step that only changes the schema.
    pub fn sync<F>(step: F) -> Self
    where
        F: Fn(&Upgrade) -> CoreResult<()> + Send + Sync + 'static,
    {
        Self {
            name: None,
            step: Box::new(move |upgrade| future::ready(step(&upgrade)).boxed()),
        }
    }

    /// Labels the step in logs.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Label of the step, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn bootstrap() -> Self {
        Self::sync(|upgrade| {
            if !upgrade.contains_store(VERSION_STORE) {
                upgrade.create_store(VERSION_STORE, StoreOptions::key_path("id"))?;
            }
            Ok(())
        })
        .named("create version store")
    }

    async fn run(&self, upgrade: Upgrade) -> CoreResult<()> {
        (self.step)(upgrade).await
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration").field("name", &self.name).finish()
    }
}

/// Context handed to a migration step.
///
/// Wraps the version-change transaction, the only transaction allowed to
/// create or delete stores. Model operations joining it through
/// [`Upgrade::options`] commit or abort with the migration.
#[derive(Debug, Clone)]
pub struct Upgrade {
    database: Database,
    transaction: Transaction,
    old_version: u64,
    version: u64,
}

impl Upgrade {
    /// Database being migrated.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The version-change transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Version before the upgrade.
    pub fn old_version(&self) -> u64 {
        self.old_version
    }

    /// Version the database is being upgraded to.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Options joining the version-change transaction.
    pub fn options(&self) -> Options<'_> {
        Options::with(&self.transaction)
    }

    /// Creates a store.
    pub fn create_store(&self, name: &str, options: StoreOptions) -> CoreResult<()> {
        Ok(self.transaction.engine().create_store(name, options)?)
    }

    /// Creates the store of `T`, keyed by its primary key field.
    pub fn create_entity_store<T: Entity>(&self, auto_increment: bool) -> CoreResult<()> {
        self.create_store(
            T::STORE,
            StoreOptions::key_path(T::PRIMARY_KEY).auto_increment(auto_increment),
        )
    }

    /// Deletes a store and its records.
    pub fn delete_store(&self, name: &str) -> CoreResult<()> {
        Ok(self.transaction.engine().delete_store(name)?)
    }

    /// Stores present in the database being upgraded, sorted.
    pub fn store_names(&self) -> Vec<String> {
        self.transaction.scope()
    }

    /// Returns true if the store exists.
    pub fn contains_store(&self, name: &str) -> bool {
        self.transaction.includes(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionRecord {
    id: i64,
    version: i64,
}

impl Entity for VersionRecord {
    const STORE: &'static str = VERSION_STORE;
    const PRIMARY_KEY: &'static str = "id";
}

/// Migration progress reported by [`Database::migration_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Whether the version store exists.
    pub bootstrapped: bool,
    /// Supplied steps already applied.
    pub applied: usize,
    /// Supplied steps not applied yet.
    pub pending: usize,
    /// Current database version.
    pub version: u64,
}

impl MigrationStatus {
    /// Returns true if [`Database::migrate`] would change nothing.
    pub fn is_current(&self) -> bool {
        self.bootstrapped && self.pending == 0
    }
}

impl Database {
    /// Applies every migration not applied yet.
    ///
    /// Pending steps run in order inside one version-change transaction at
    /// the current version plus one. The version record is advanced after
    /// each step. Calling it again with the same list changes nothing.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MigrationHistory`] if fewer steps are supplied than
    ///   were applied
    /// - [`CoreError::MigrationStep`] if a step fails; nothing is applied
    /// - [`CoreError::TransactionAborted`] if the upgrade cannot commit
    /// - [`CoreError::Connection`] if the database cannot be reopened
    pub async fn migrate(&self, migrations: &[Migration]) -> CoreResult<()> {
        let result = self.apply_migrations(migrations).await;
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Reports how many of `migrations` were applied, without upgrading.
    pub async fn migration_status(&self, migrations: &[Migration]) -> CoreResult<MigrationStatus> {
        let connection = self.get_connection().await?;
        let applied = self.applied_migrations().await?;
        let bootstrapped = applied.is_some();
        let applied = applied.map_or(0, |index| usize::try_from(index).unwrap_or(0));
        Ok(MigrationStatus {
            bootstrapped,
            applied,
            pending: migrations.len().saturating_sub(applied),
            version: connection.version(),
        })
    }

    /// Index of the last applied step, or `None` before the version store
    /// exists.
    async fn applied_migrations(&self) -> CoreResult<Option<i64>> {
        let connection = self.get_connection().await?;
        if !connection.contains_store(VERSION_STORE) {
            return Ok(None);
        }
        let record = self
            .model::<VersionRecord>()
            .find_by_primary(VERSION_ID, Options::new())
            .await?;
        Ok(record.map(|record| record.version))
    }

    async fn apply_migrations(&self, migrations: &[Migration]) -> CoreResult<()> {
        let applied = self.applied_migrations().await?.unwrap_or(-1);
        let supplied = i64::try_from(migrations.len()).unwrap_or(i64::MAX);
        match applied.cmp(&supplied) {
            Ordering::Equal => {
                debug!(database = %self.name(), applied, "migrations up to date");
                return Ok(());
            }
            Ordering::Greater => {
                return Err(CoreError::MigrationHistory {
                    applied: usize::try_from(applied).unwrap_or(usize::MAX),
                    supplied: migrations.len(),
                });
            }
            Ordering::Less => {}
        }

        let current = self.get_connection().await?.version();
        self.close();
        let target = current + 1;
        let OpenOutcome::Upgrade {
            connection,
            transaction,
            old_version,
        } = self.open_version(target).await?
        else {
            return Err(CoreError::connection(format!(
                "database '{}' was not upgraded to version {target}",
                self.name()
            )));
        };
        info!(
            database = %self.name(),
            old_version,
            new_version = target,
            pending = supplied - applied,
            "upgrade started"
        );

        // Fresh transactions opened by a step land on the upgrading
        // connection and fail there.
        self.set_connection(connection);
        let transaction = Transaction::new(transaction);
        let upgrade = Upgrade {
            database: self.clone(),
            transaction: transaction.clone(),
            old_version,
            version: target,
        };
        let versions = self.model::<VersionRecord>();
        let bootstrap = Migration::bootstrap();
        let first = usize::try_from(applied + 1).unwrap_or(0);

        let steps = iter::once(&bootstrap).chain(migrations).enumerate().skip(first);
        for (index, migration) in steps {
            debug!(
                database = %self.name(),
                step = index,
                name = migration.name().unwrap_or("unnamed"),
                "running migration step"
            );
            if let Err(err) = migration.run(upgrade.clone()).await {
                warn!(database = %self.name(), step = index, error = %err, "migration step failed");
                transaction.abort();
                return Err(CoreError::MigrationStep {
                    index,
                    source: Box::new(err),
                });
            }

            let mut record = versions.instance(VersionRecord {
                id: VERSION_ID,
                version: i64::try_from(index).unwrap_or(i64::MAX),
            });
            if let Err(err) = record.save(Options::with(&transaction)).await {
                transaction.abort();
                return Err(err);
            }
        }

        transaction.commit().await?;
        info!(database = %self.name(), version = target, "upgrade committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseOptions;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use stow_engine::MemoryEngine;

    fn database() -> (Arc<MemoryEngine>, Database) {
        let engine = Arc::new(MemoryEngine::new());
        let db = Database::new(engine.clone(), "db", DatabaseOptions::new());
        (engine, db)
    }

    fn counting(store: &'static str, runs: &Arc<AtomicUsize>) -> Migration {
        let runs = Arc::clone(runs);
        Migration::sync(move |upgrade| {
            runs.fetch_add(1, AtomicOrdering::SeqCst);
            upgrade.create_store(store, StoreOptions::key_path("id").auto_increment(true))
        })
    }

    #[tokio::test]
    async fn empty_list_only_bootstraps() {
        let (engine, db) = database();

        db.migrate(&[]).await.unwrap();

        let connection = db.get_connection().await.unwrap();
        assert_eq!(connection.store_names(), vec![VERSION_STORE.to_string()]);
        assert_eq!(engine.version_of("db"), Some(2));
        assert!(db.migration_status(&[]).await.unwrap().is_current());
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let (engine, db) = database();
        let runs = Arc::new(AtomicUsize::new(0));
        let steps = [counting("a", &runs)];

        db.migrate(&steps).await.unwrap();
        db.migrate(&steps).await.unwrap();

        assert_eq!(runs.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(engine.version_of("db"), Some(2));
        assert_eq!(db.applied_migrations().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn only_new_steps_run() {
        let (engine, db) = database();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        db.migrate(&[counting("a", &first)]).await.unwrap();
        db.migrate(&[counting("a", &first), counting("b", &second)])
            .await
            .unwrap();

        assert_eq!(first.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(second.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(engine.version_of("db"), Some(3));
        assert_eq!(db.applied_migrations().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn failed_step_rolls_back_everything() {
        let (engine, db) = database();
        let runs = Arc::new(AtomicUsize::new(0));
        let steps = [
            counting("a", &runs),
            Migration::sync(|upgrade| {
                upgrade.create_store("b", StoreOptions::new())?;
                Err(CoreError::migration_failed("bad step"))
            })
            .named("broken"),
        ];

        let err = db.migrate(&steps).await.unwrap_err();

        assert!(matches!(err, CoreError::MigrationStep { index: 2, .. }));
        assert!(!db.is_connected());
        assert_eq!(engine.version_of("db"), Some(1));
        let connection = db.get_connection().await.unwrap();
        assert!(connection.store_names().is_empty());
        assert_eq!(db.applied_migrations().await.unwrap(), None);
    }

    #[tokio::test]
    async fn shorter_history_is_rejected() {
        let (_engine, db) = database();
        let runs = Arc::new(AtomicUsize::new(0));
        db.migrate(&[counting("a", &runs), counting("b", &runs)])
            .await
            .unwrap();

        let err = db.migrate(&[counting("a", &runs)]).await.unwrap_err();

        assert!(matches!(
            err,
            CoreError::MigrationHistory {
                applied: 2,
                supplied: 1
            }
        ));
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn upgrade_context_reports_versions() {
        let (_engine, db) = database();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let steps = [Migration::new(move |upgrade: Upgrade| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push((upgrade.old_version(), upgrade.version(), upgrade.store_names()));
                Ok(())
            }
        })];

        db.migrate(&steps).await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![(1, 2, vec![VERSION_STORE.to_string()])]
        );
    }

    #[tokio::test]
    async fn status_counts_pending_steps() {
        let (_engine, db) = database();
        let runs = Arc::new(AtomicUsize::new(0));
        let steps = [counting("a", &runs), counting("b", &runs)];

        let before = db.migration_status(&steps).await.unwrap();
        assert_eq!(
            before,
            MigrationStatus {
                bootstrapped: false,
                applied: 0,
                pending: 2,
                version: 1
            }
        );

        db.migrate(&steps[..1]).await.unwrap();
        let after = db.migration_status(&steps).await.unwrap();
        assert_eq!(after.applied, 1);
        assert_eq!(after.pending, 1);
        assert_eq!(after.version, 2);
        assert!(!after.is_current());
    }
}
