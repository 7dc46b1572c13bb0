//! Active-record wrapper around one entity value.

use super::{codec, Entity, HookContext, Model, Options};
use crate::error::CoreResult;
use crate::transaction::Transaction;
use std::fmt;
use std::ops::{Deref, DerefMut};
use stow_codec::{Key, Record, Value};
use stow_engine::TransactionMode;
use tracing::trace;

/// An entity value bound to its [`Model`].
///
/// Dereferences to the entity. Two instances materialized from the same
/// record are independent values.
pub struct Instance<T: Entity> {
    data: T,
    from_database: bool,
    model: Model<T>,
}

impl<T: Entity> Instance<T> {
    pub(crate) fn new(model: Model<T>, data: T, from_database: bool) -> Self {
        Self {
            data,
            from_database,
            model,
        }
    }

    /// Model the instance belongs to.
    pub fn model(&self) -> &Model<T> {
        &self.model
    }

    /// Primary key, once assigned.
    pub fn primary_key(&self) -> CoreResult<Option<Key>> {
        codec::primary_key(&self.data)
    }

    /// Returns true if the instance was read from or written to the store
    /// and not deleted since.
    pub fn is_from_database(&self) -> bool {
        self.from_database
    }

    /// Record written to the store on save.
    pub fn to_record(&self) -> CoreResult<Record> {
        self.data.to_record()
    }

    /// Unwraps the entity.
    pub fn into_inner(self) -> T {
        self.data
    }

    /// Inserts the instance if it has no primary key, otherwise overwrites
    /// the record at its key. An assigned key is written back.
    pub async fn save(&mut self, options: Options<'_>) -> CoreResult<()> {
        let database = self.model.database().clone();
        let scope = options.scope(T::STORE);
        let include = options.include;
        database
            .use_or_create(
                options.transaction,
                &scope,
                TransactionMode::ReadWrite,
                |tx| async move { self.save_in(&tx, include).await },
            )
            .await
    }

    /// Removes the record at the instance's primary key. Does nothing if
    /// the instance has none.
    pub async fn delete(&mut self, options: Options<'_>) -> CoreResult<()> {
        if self.primary_key()?.is_none() {
            return Ok(());
        }
        let database = self.model.database().clone();
        let scope = options.scope(T::STORE);
        let include = options.include;
        database
            .use_or_create(
                options.transaction,
                &scope,
                TransactionMode::ReadWrite,
                |tx| async move { self.delete_in(&tx, include).await },
            )
            .await
    }

    pub(crate) async fn save_in(&mut self, tx: &Transaction, include: &[&str]) -> CoreResult<()> {
        let ctx = HookContext::new(tx, self.model.database(), include);
        self.data.before_save(&ctx).await?;

        let record = Value::Map(self.data.to_record()?);
        let key = match codec::primary_key(&self.data)? {
            Some(_) => tx.put(T::STORE, record, None).await?,
            None => {
                let key = tx.add(T::STORE, record, None).await?;
                self.data = codec::with_primary_key(&self.data, key.clone())?;
                key
            }
        };
        self.from_database = true;
        trace!(store = T::STORE, %key, "instance saved");
        Ok(())
    }

    pub(crate) async fn delete_in(&mut self, tx: &Transaction, include: &[&str]) -> CoreResult<()> {
        let Some(key) = codec::primary_key(&self.data)? else {
            return Ok(());
        };
        let ctx = HookContext::new(tx, self.model.database(), include);
        self.data.before_delete(&ctx).await?;
        tx.delete(T::STORE, &key).await?;
        self.from_database = false;
        trace!(store = T::STORE, %key, "instance deleted");
        Ok(())
    }

    pub(crate) fn set_from_database(&mut self, from_database: bool) {
        self.from_database = from_database;
    }
}

impl<T: Entity> Deref for Instance<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T: Entity> DerefMut for Instance<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

impl<T: Entity + Clone> Clone for Instance<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            from_database: self.from_database,
            model: self.model.clone(),
        }
    }
}

impl<T: Entity + fmt::Debug> fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("data", &self.data)
            .field("from_database", &self.from_database)
            .finish()
    }
}

impl<T: Entity + PartialEq> PartialEq<T> for Instance<T> {
    fn eq(&self, other: &T) -> bool {
        self.data == *other
    }
}
