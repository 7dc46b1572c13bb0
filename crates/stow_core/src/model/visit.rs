//! Cursor visitors behind the model's scan operations.

use super::{codec, Entity, Filter, HookContext, Instance, Model, Mutation};
use crate::cursor::{CursorStep, Visit};
use crate::error::CoreResult;
use async_trait::async_trait;
use stow_codec::Value;

fn accepts<T>(filter: Option<&Filter<'_, T>>, entity: &T) -> bool {
    filter.map_or(true, |filter| filter(entity))
}

fn current<T: Entity>(step: &CursorStep<'_>) -> CoreResult<Option<T>> {
    step.value()
        .cloned()
        .map(codec::materialize_value)
        .transpose()
}

/// Collects every matching record.
pub(super) struct FindAll<'f, T: Entity> {
    pub(super) model: &'f Model<T>,
    pub(super) filter: Option<&'f Filter<'f, T>>,
    pub(super) found: Vec<Instance<T>>,
}

#[async_trait]
impl<'f, T: Entity> Visit for FindAll<'f, T> {
    async fn visit(&mut self, step: &mut CursorStep<'_>) -> CoreResult<()> {
        if let Some(entity) = current::<T>(step)? {
            if accepts(self.filter, &entity) {
                self.found.push(Instance::new(self.model.clone(), entity, true));
            }
        }
        Ok(())
    }
}

/// Stops at the first matching record.
pub(super) struct FindOne<'f, T: Entity> {
    pub(super) model: &'f Model<T>,
    pub(super) filter: Option<&'f Filter<'f, T>>,
    pub(super) found: Option<Instance<T>>,
}

#[async_trait]
impl<'f, T: Entity> Visit for FindOne<'f, T> {
    async fn visit(&mut self, step: &mut CursorStep<'_>) -> CoreResult<()> {
        if let Some(entity) = current::<T>(step)? {
            if accepts(self.filter, &entity) {
                self.found = Some(Instance::new(self.model.clone(), entity, true));
                step.stop();
            }
        }
        Ok(())
    }
}

/// Mutates matching records in place.
pub(super) struct UpdateVisit<'f, T: Entity> {
    pub(super) model: &'f Model<T>,
    pub(super) mutation: &'f Mutation<T>,
    pub(super) filter: Option<&'f Filter<'f, T>>,
    pub(super) include: &'f [&'f str],
    pub(super) updated: Vec<Instance<T>>,
}

#[async_trait]
impl<'f, T: Entity> Visit for UpdateVisit<'f, T> {
    async fn visit(&mut self, step: &mut CursorStep<'_>) -> CoreResult<()> {
        let Some(mut entity) = current::<T>(step)? else {
            return Ok(());
        };
        if !accepts(self.filter, &entity) {
            return Ok(());
        }

        match self.mutation {
            Mutation::Patch(fields) => entity = codec::patch(&entity, fields)?,
            Mutation::Apply(apply) => apply(&mut entity),
        }
        let transaction = step.transaction().clone();
        let ctx = HookContext::new(&transaction, self.model.database(), self.include);
        entity.before_save(&ctx).await?;

        step.update(Value::Map(entity.to_record()?)).await?;
        self.updated.push(Instance::new(self.model.clone(), entity, true));
        Ok(())
    }
}

/// Removes matching records in place.
pub(super) struct DeleteVisit<'f, T: Entity> {
    pub(super) model: &'f Model<T>,
    pub(super) filter: Option<&'f Filter<'f, T>>,
    pub(super) include: &'f [&'f str],
    pub(super) deleted: Vec<Instance<T>>,
}

#[async_trait]
impl<'f, T: Entity> Visit for DeleteVisit<'f, T> {
    async fn visit(&mut self, step: &mut CursorStep<'_>) -> CoreResult<()> {
        let Some(entity) = current::<T>(step)? else {
            return Ok(());
        };
        if !accepts(self.filter, &entity) {
            return Ok(());
        }

        let transaction = step.transaction().clone();
        let ctx = HookContext::new(&transaction, self.model.database(), self.include);
        entity.before_delete(&ctx).await?;

        step.delete().await?;
        self.deleted.push(Instance::new(self.model.clone(), entity, false));
        Ok(())
    }
}
