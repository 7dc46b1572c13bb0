//! Typed repository over one object store.

use super::visit::{DeleteVisit, FindAll, FindOne, UpdateVisit};
use super::{codec, Entity, Filter, Instance, Mutation, Options, Records};
use crate::database::Database;
use crate::error::CoreResult;
use std::fmt;
use std::marker::PhantomData;
use stow_codec::{Key, Record, Value};
use stow_engine::TransactionMode;
use tracing::debug;

/// Repository for entities of type `T`.
///
/// Every operation takes [`Options`]: it joins the ambient transaction when
/// one is given and otherwise runs in a fresh transaction over the entity's
/// store and the included stores. Bulk operations share one transaction,
/// so they apply completely or not at all.
pub struct Model<T: Entity> {
    database: Database,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Model<T> {
    pub(crate) fn new(database: Database) -> Self {
        Self {
            database,
            _marker: PhantomData,
        }
    }

    /// Database the model is bound to.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Name of the backing store.
    pub fn store(&self) -> &'static str {
        T::STORE
    }

    /// Wraps an existing value without touching the store.
    pub fn instance(&self, entity: T) -> Instance<T> {
        Instance::new(self.clone(), entity, false)
    }

    /// Constructs an instance from `values` laid over the defaults.
    pub fn build(&self, values: Record) -> CoreResult<Instance<T>> {
        Ok(self.instance(codec::build(values)?))
    }

    /// Constructs several instances.
    pub fn bulk_build(&self, values: Vec<Record>) -> CoreResult<Vec<Instance<T>>> {
        values.into_iter().map(|values| self.build(values)).collect()
    }

    /// Constructs and saves an instance.
    pub async fn create(&self, values: Record, options: Options<'_>) -> CoreResult<Instance<T>> {
        let mut instance = self.build(values)?;
        instance.save(options).await?;
        Ok(instance)
    }

    /// Constructs and saves several instances in one transaction.
    pub async fn bulk_create(
        &self,
        values: Vec<Record>,
        options: Options<'_>,
    ) -> CoreResult<Vec<Instance<T>>> {
        let mut instances = self.bulk_build(values)?;
        self.bulk_save(&mut instances, options).await?;
        Ok(instances)
    }

    /// Saves several instances in one transaction, in order.
    pub async fn bulk_save(
        &self,
        instances: &mut [Instance<T>],
        options: Options<'_>,
    ) -> CoreResult<()> {
        let include = options.include;
        self.database
            .use_or_create(
                options.transaction,
                &options.scope(T::STORE),
                TransactionMode::ReadWrite,
                |tx| async move {
                    for instance in instances.iter_mut() {
                        instance.save_in(&tx, include).await?;
                    }
                    Ok(())
                },
            )
            .await
    }

    /// Deletes several instances in one transaction. Instances without a
    /// primary key are skipped.
    pub async fn bulk_delete(
        &self,
        instances: &mut [Instance<T>],
        options: Options<'_>,
    ) -> CoreResult<()> {
        let include = options.include;
        self.database
            .use_or_create(
                options.transaction,
                &options.scope(T::STORE),
                TransactionMode::ReadWrite,
                |tx| async move {
                    for instance in instances.iter_mut() {
                        instance.delete_in(&tx, include).await?;
                    }
                    Ok(())
                },
            )
            .await
    }

    /// Every entity accepted by `filter`, in key order.
    pub async fn find_all(
        &self,
        filter: Option<&Filter<'_, T>>,
        options: Options<'_>,
    ) -> CoreResult<Vec<Instance<T>>> {
        let scope = options.scope(T::STORE);
        if filter.is_none() {
            let values = self
                .database
                .use_or_create(
                    options.transaction,
                    &scope,
                    TransactionMode::ReadOnly,
                    |tx| async move { tx.get_all(T::STORE).await },
                )
                .await?;
            return values
                .into_iter()
                .map(|value| self.materialize(value))
                .collect();
        }

        let mut visitor = FindAll {
            model: self,
            filter,
            found: Vec::new(),
        };
        self.database
            .walk(
                options.transaction,
                &scope,
                T::STORE,
                TransactionMode::ReadOnly,
                &mut visitor,
            )
            .await?;
        Ok(visitor.found)
    }

    /// First entity accepted by `filter`. Iteration stops at the match.
    pub async fn find_one(
        &self,
        filter: Option<&Filter<'_, T>>,
        options: Options<'_>,
    ) -> CoreResult<Option<Instance<T>>> {
        let mut visitor = FindOne {
            model: self,
            filter,
            found: None,
        };
        self.database
            .walk(
                options.transaction,
                &options.scope(T::STORE),
                T::STORE,
                TransactionMode::ReadOnly,
                &mut visitor,
            )
            .await?;
        Ok(visitor.found)
    }

    /// Entity stored at `key`.
    pub async fn find_by_primary(
        &self,
        key: impl Into<Key>,
        options: Options<'_>,
    ) -> CoreResult<Option<Instance<T>>> {
        let key = key.into();
        let value = self
            .database
            .use_or_create(
                options.transaction,
                &options.scope(T::STORE),
                TransactionMode::ReadOnly,
                |tx| async move { tx.get(T::STORE, &key).await },
            )
            .await?;
        value.map(|value| self.materialize(value)).transpose()
    }

    /// Applies `mutation` to every entity accepted by `filter` and writes
    /// it back, running [`Entity::before_save`] first. Returns the updated
    /// instances.
    pub async fn update(
        &self,
        mutation: Mutation<T>,
        filter: Option<&Filter<'_, T>>,
        options: Options<'_>,
    ) -> CoreResult<Vec<Instance<T>>> {
        let mut visitor = UpdateVisit {
            model: self,
            mutation: &mutation,
            filter,
            include: options.include,
            updated: Vec::new(),
        };
        self.database
            .walk(
                options.transaction,
                &options.scope(T::STORE),
                T::STORE,
                TransactionMode::ReadWrite,
                &mut visitor,
            )
            .await?;
        debug!(store = T::STORE, count = visitor.updated.len(), "records updated");
        Ok(visitor.updated)
    }

    /// Deletes every entity accepted by `filter`, running
    /// [`Entity::before_delete`] first. Returns the deleted instances.
    pub async fn delete(
        &self,
        filter: Option<&Filter<'_, T>>,
        options: Options<'_>,
    ) -> CoreResult<Vec<Instance<T>>> {
        let mut visitor = DeleteVisit {
            model: self,
            filter,
            include: options.include,
            deleted: Vec::new(),
        };
        self.database
            .walk(
                options.transaction,
                &options.scope(T::STORE),
                T::STORE,
                TransactionMode::ReadWrite,
                &mut visitor,
            )
            .await?;
        debug!(store = T::STORE, count = visitor.deleted.len(), "records deleted");
        Ok(visitor.deleted)
    }

    /// Number of stored entities.
    pub async fn count(&self, options: Options<'_>) -> CoreResult<u64> {
        self.database
            .use_or_create(
                options.transaction,
                &options.scope(T::STORE),
                TransactionMode::ReadOnly,
                |tx| async move {
                    Database::request(
                        async move { tx.engine().count(T::STORE).await.map(Some) },
                        0,
                    )
                    .await
                },
            )
            .await
    }

    /// Removes every stored entity. Hooks are not run.
    pub async fn clear(&self, options: Options<'_>) -> CoreResult<()> {
        self.database
            .use_or_create(
                options.transaction,
                &options.scope(T::STORE),
                TransactionMode::ReadWrite,
                |tx| async move { tx.clear(T::STORE).await },
            )
            .await?;
        debug!(store = T::STORE, "store cleared");
        Ok(())
    }

    /// Typed cursor over the store, read-only.
    pub async fn records(&self, options: Options<'_>) -> CoreResult<Records<T>> {
        self.open_records(options, TransactionMode::ReadOnly).await
    }

    /// Typed cursor over the store whose steps can be saved or deleted.
    pub async fn records_mut(&self, options: Options<'_>) -> CoreResult<Records<T>> {
        self.open_records(options, TransactionMode::ReadWrite).await
    }

    fn materialize(&self, value: Value) -> CoreResult<Instance<T>> {
        let entity = codec::materialize_value(value)?;
        Ok(Instance::new(self.clone(), entity, true))
    }

    async fn open_records(
        &self,
        options: Options<'_>,
        mode: TransactionMode,
    ) -> CoreResult<Records<T>> {
        let (transaction, owned) = match options.transaction {
            Some(transaction) => (transaction.clone(), false),
            None => (self.database.begin(&options.scope(T::STORE), mode).await?, true),
        };
        let cursor = transaction.open_cursor(T::STORE).await?;
        let include = options.include.iter().map(|s| (*s).to_string()).collect();
        Ok(Records::new(self.clone(), cursor, owned, include))
    }
}

impl<T: Entity> Clone for Model<T> {
    fn clone(&self) -> Self {
        Self::new(self.database.clone())
    }
}

impl<T: Entity> fmt::Debug for Model<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("store", &T::STORE)
            .field("primary_key", &T::PRIMARY_KEY)
            .field("database", &self.database.name())
            .finish()
    }
}
