//! Typed cursor over an entity store.

use super::{codec, Entity, HookContext, Instance, Model};
use crate::cursor::Cursor;
use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use std::fmt;
use stow_codec::{Key, Value};

/// Pull-based iteration over the instances of one store.
///
/// When the cursor opened its own transaction, reaching the end commits
/// it; [`Records::finish`] commits early. Dropping an unfinished cursor
/// aborts its own transaction.
///
/// ```rust,ignore
/// let mut records = users.records_mut(Options::new()).await?;
/// while let Some(mut step) = records.next().await? {
///     if step.instance().age < 18 {
///         step.delete().await?;
///     }
/// }
/// ```
pub struct Records<T: Entity> {
    model: Model<T>,
    cursor: Cursor,
    owned: bool,
    include: Vec<String>,
}

impl<T: Entity> Records<T> {
    pub(crate) fn new(model: Model<T>, cursor: Cursor, owned: bool, include: Vec<String>) -> Self {
        Self {
            model,
            cursor,
            owned,
            include,
        }
    }

    /// Transaction the cursor runs in.
    pub fn transaction(&self) -> &Transaction {
        self.cursor.transaction()
    }

    /// Moves to the next instance. Returns `None` at the end of the store,
    /// after committing the cursor's own transaction.
    pub async fn next(&mut self) -> CoreResult<Option<RecordStep<'_, T>>> {
        let current = match self.cursor.next().await? {
            Some(step) => step.value().cloned().map(|value| (step.key().clone(), value)),
            None => None,
        };
        let Some((key, value)) = current else {
            self.finish().await?;
            return Ok(None);
        };

        let entity = codec::materialize_value(value)?;
        let instance = Instance::new(self.model.clone(), entity, true);
        Ok(Some(RecordStep {
            records: self,
            key,
            instance,
            deleted: false,
        }))
    }

    /// Stops iterating and commits the cursor's own transaction. An ambient
    /// transaction is left to its owner.
    pub async fn finish(&mut self) -> CoreResult<()> {
        self.cursor.stop();
        let transaction = self.cursor.transaction();
        if self.owned && !transaction.is_finished() {
            transaction.commit().await?;
        }
        Ok(())
    }

    fn include(&self) -> Vec<&str> {
        self.include.iter().map(String::as_str).collect()
    }
}

impl<T: Entity> fmt::Debug for Records<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Records")
            .field("store", &T::STORE)
            .field("cursor", &self.cursor)
            .field("owned", &self.owned)
            .finish()
    }
}

/// One instance yielded by [`Records::next`].
pub struct RecordStep<'r, T: Entity> {
    records: &'r mut Records<T>,
    key: Key,
    instance: Instance<T>,
    deleted: bool,
}

impl<T: Entity> RecordStep<'_, T> {
    /// Key of the current record.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The materialized instance.
    pub fn instance(&self) -> &Instance<T> {
        &self.instance
    }

    /// The materialized instance, for changes written by
    /// [`RecordStep::save`].
    pub fn instance_mut(&mut self) -> &mut Instance<T> {
        &mut self.instance
    }

    /// Releases the step, keeping the instance.
    pub fn into_instance(self) -> Instance<T> {
        self.instance
    }

    /// Transaction the cursor runs in.
    pub fn transaction(&self) -> &Transaction {
        self.records.transaction()
    }

    /// Writes the instance back at the current position.
    pub async fn save(&mut self) -> CoreResult<()> {
        self.ensure_live()?;
        let transaction = self.records.transaction().clone();
        let include = self.records.include();
        let ctx = HookContext::new(&transaction, self.records.model.database(), &include);
        self.instance.before_save(&ctx).await?;

        let record = self.instance.to_record()?;
        self.records.cursor.update_current(Value::Map(record)).await?;
        self.instance.set_from_database(true);
        Ok(())
    }

    /// Deletes the current record.
    pub async fn delete(&mut self) -> CoreResult<()> {
        self.ensure_live()?;
        let transaction = self.records.transaction().clone();
        let include = self.records.include();
        let ctx = HookContext::new(&transaction, self.records.model.database(), &include);
        self.instance.before_delete(&ctx).await?;

        self.records.cursor.delete_current().await?;
        self.instance.set_from_database(false);
        self.deleted = true;
        Ok(())
    }

    /// Ends the iteration after this step.
    pub fn stop(&mut self) {
        self.records.cursor.stop();
    }

    fn ensure_live(&self) -> CoreResult<()> {
        if self.deleted {
            return Err(CoreError::CursorStepExpired);
        }
        Ok(())
    }
}

impl<T: Entity + fmt::Debug> fmt::Debug for RecordStep<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStep")
            .field("key", &self.key)
            .field("instance", &self.instance)
            .field("deleted", &self.deleted)
            .finish()
    }
}
