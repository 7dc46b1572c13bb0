//! Conversions between entities and stored records.

use super::Entity;
use crate::error::CoreResult;
use stow_codec::{Key, Record, Value};

/// Default projection of an entity: every serialized field, minus a null
/// primary key, restricted to [`Entity::fields`] when one is declared.
pub fn project<T: Entity>(entity: &T) -> CoreResult<Record> {
    let mut record = stow_codec::to_record(entity)?;
    if record.get(T::PRIMARY_KEY).is_some_and(Value::is_null) {
        record.remove(T::PRIMARY_KEY);
    }
    if let Some(fields) = T::fields() {
        record.retain(|name, _| fields.contains(&name.as_str()));
    }
    Ok(record)
}

/// Constructs an entity from `values` laid over its defaults.
pub(crate) fn build<T: Entity>(values: Record) -> CoreResult<T> {
    let mut record = T::defaults();
    record.extend(values);
    materialize(record)
}

/// Reads an entity back from a stored record. Defaults are not applied.
pub(crate) fn materialize<T: Entity>(record: Record) -> CoreResult<T> {
    Ok(stow_codec::from_record(record)?)
}

pub(crate) fn materialize_value<T: Entity>(value: Value) -> CoreResult<T> {
    materialize(value.into_record()?)
}

/// Primary key carried by the entity, if it was assigned.
pub(crate) fn primary_key<T: Entity>(entity: &T) -> CoreResult<Option<Key>> {
    let record = stow_codec::to_record(entity)?;
    match record.get(T::PRIMARY_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(Key::from_value(value)?)),
    }
}

/// Returns a copy of the entity carrying `key` as its primary key.
pub(crate) fn with_primary_key<T: Entity>(entity: &T, key: Key) -> CoreResult<T> {
    let mut record = stow_codec::to_record(entity)?;
    record.insert(T::PRIMARY_KEY.to_string(), Value::from(key));
    materialize(record)
}

/// Returns a copy of the entity with `changes` written over its fields.
pub(crate) fn patch<T: Entity>(entity: &T, changes: &Record) -> CoreResult<T> {
    let mut record = stow_codec::to_record(entity)?;
    record.extend(changes.iter().map(|(name, value)| (name.clone(), value.clone())));
    materialize(record)
}
