//! Typed entities over object stores.
//!
//! An [`Entity`] describes how a serde type maps onto one object store: the
//! store name, the field holding the primary key, default values and the
//! projected field list. [`Model`] is the repository over that store and
//! [`Instance`] the active-record wrapper around one value.
//!
//! The store backing an entity is expected to use the primary key field as
//! its key path, usually with a key generator:
//!
//! ```rust,ignore
//! upgrade.create_entity_store::<User>(true)?;
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use serde::{Deserialize, Serialize};
//! use stow_core::{Entity, Options};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     id: Option<i64>,
//!     name: String,
//!     age: i64,
//! }
//!
//! impl Entity for User {
//!     const STORE: &'static str = "users";
//!     const PRIMARY_KEY: &'static str = "id";
//! }
//!
//! let users = db.model::<User>();
//! let alice = users.create(record! { "name" => "Alice", "age" => 33 }, Options::new()).await?;
//! assert_eq!(alice.id, Some(1));
//!
//! let adults = users.find_all(Some(&|u: &User| u.age >= 18), Options::new()).await?;
//! ```

mod codec;
mod instance;
mod records;
mod repository;
mod visit;

pub use codec::project;
pub use instance::Instance;
pub use records::{RecordStep, Records};
pub use repository::Model;

use crate::database::Database;
use crate::error::CoreResult;
use crate::transaction::Transaction;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use stow_codec::Record;

/// A serde type stored in one object store.
///
/// Implementations are usually two constants. The hooks run inside the
/// transaction of the triggering operation, so any reads or writes they
/// issue through [`HookContext::options`] commit or abort with it.
///
/// A hook must not start a fresh transaction over a store its triggering
/// operation holds read-write. That transaction waits for the triggering
/// one to finish, which in turn waits for the hook, so neither completes.
#[async_trait]
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the object store.
    const STORE: &'static str;

    /// Field holding the primary key. A `None`/null value means the
    /// instance was never saved.
    const PRIMARY_KEY: &'static str;

    /// Fields written to the store. `None` writes every serialized field.
    fn fields() -> Option<&'static [&'static str]> {
        None
    }

    /// Values applied under the supplied ones by [`Model::build`].
    fn defaults() -> Record {
        Record::new()
    }

    /// Projects the entity to the record written on save.
    fn to_record(&self) -> CoreResult<Record> {
        project(self)
    }

    /// Runs before the entity is written.
    async fn before_save(&mut self, _ctx: &HookContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    /// Runs before the entity is deleted.
    async fn before_delete(&self, _ctx: &HookContext<'_>) -> CoreResult<()> {
        Ok(())
    }
}

/// Where a model operation runs.
///
/// Without a transaction, the operation opens its own over the entity's
/// store plus the `include` stores, which hooks may need to touch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options<'t> {
    /// Ambient transaction to join.
    pub transaction: Option<&'t Transaction>,
    /// Extra stores for a fresh transaction.
    pub include: &'t [&'t str],
}

impl<'t> Options<'t> {
    /// No ambient transaction, no extra stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins `transaction`.
    #[must_use]
    pub fn with(transaction: &'t Transaction) -> Self {
        Self {
            transaction: Some(transaction),
            include: &[],
        }
    }

    /// Adds stores to a fresh transaction's scope.
    #[must_use]
    pub fn include(mut self, stores: &'t [&'t str]) -> Self {
        self.include = stores;
        self
    }

    pub(crate) fn scope(&self, store: &'t str) -> Vec<&'t str> {
        let mut scope = Vec::with_capacity(self.include.len() + 1);
        scope.push(store);
        for &name in self.include {
            if !scope.contains(&name) {
                scope.push(name);
            }
        }
        scope
    }
}

/// Passed to [`Entity`] hooks.
pub struct HookContext<'a> {
    transaction: &'a Transaction,
    database: &'a Database,
    include: &'a [&'a str],
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(
        transaction: &'a Transaction,
        database: &'a Database,
        include: &'a [&'a str],
    ) -> Self {
        Self {
            transaction,
            database,
            include,
        }
    }

    /// Transaction of the triggering operation.
    pub fn transaction(&self) -> &'a Transaction {
        self.transaction
    }

    /// Database the entity lives in.
    pub fn database(&self) -> &'a Database {
        self.database
    }

    /// Extra stores requested by the triggering operation.
    pub fn include(&self) -> &'a [&'a str] {
        self.include
    }

    /// Options joining the triggering transaction.
    pub fn options(&self) -> Options<'a> {
        Options::with(self.transaction).include(self.include)
    }
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("transaction", &self.transaction.id())
            .field("database", &self.database.name())
            .field("include", &self.include)
            .finish()
    }
}

/// Predicate over entities. It may borrow from the caller for the
/// duration of the call.
pub type Filter<'a, T> = dyn Fn(&T) -> bool + Send + Sync + 'a;

/// Change applied by [`Model::update`].
pub enum Mutation<T> {
    /// Fields overwritten on the projected record.
    Patch(Record),
    /// Callback mutating the materialized entity.
    Apply(Box<dyn Fn(&mut T) + Send + Sync>),
}

impl<T> Mutation<T> {
    /// Overwrites the given fields.
    #[must_use]
    pub fn patch(fields: Record) -> Self {
        Self::Patch(fields)
    }

    /// Runs `f` on each matching entity.
    #[must_use]
    pub fn apply<F>(f: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        Self::Apply(Box::new(f))
    }
}

impl<T> fmt::Debug for Mutation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patch(fields) => f.debug_tuple("Patch").field(fields).finish(),
            Self::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_starts_with_the_entity_store() {
        let include = ["audit", "users", "audit"];
        let options = Options::new().include(&include);
        assert_eq!(options.scope("users"), vec!["users", "audit"]);
        assert!(options.transaction.is_none());
    }

    #[test]
    fn mutation_debug_hides_callbacks() {
        let apply: Mutation<i64> = Mutation::apply(|n| *n += 1);
        assert_eq!(format!("{apply:?}"), "Apply(..)");
        let patch: Mutation<i64> = Mutation::patch(Record::new());
        assert_eq!(format!("{patch:?}"), "Patch({})");
    }
}
