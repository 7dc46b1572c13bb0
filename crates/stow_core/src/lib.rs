//! # Stow Core
//!
//! Typed object mapping over a transactional object-store engine.
//!
//! This crate provides:
//! - [`Database`]: one lazily opened, cached connection per database name
//! - [`Database::use_or_create`]: ambient transaction propagation, so nested
//!   operations share one atomic unit of work
//! - [`Cursor`] and [`Visit`]: record-by-record iteration with early exit
//!   and in-place update or delete
//! - [`Migration`]: ordered schema steps, each applied exactly once
//! - [`Entity`], [`Model`] and [`Instance`]: the typed repository and
//!   active-record layer
//!
//! # Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use stow_codec::record;
//! use stow_core::{Database, DatabaseOptions, Entity, Migration, Options};
//! use stow_engine::MemoryEngine;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Item {
//!     id: Option<i64>,
//!     value: String,
//! }
//!
//! impl Entity for Item {
//!     const STORE: &'static str = "store";
//!     const PRIMARY_KEY: &'static str = "id";
//! }
//!
//! # tokio::runtime::Builder::new_current_thread()
//! #     .build()
//! #     .unwrap()
//! #     .block_on(async {
//! let db = Database::new(Arc::new(MemoryEngine::new()), "app", DatabaseOptions::new());
//! db.migrate(&[Migration::sync(|upgrade| upgrade.create_entity_store::<Item>(true))])
//!     .await
//!     .unwrap();
//!
//! let items = db.model::<Item>();
//! let item = items.create(record! { "value" => "v" }, Options::new()).await.unwrap();
//! assert_eq!(item.id, Some(1));
//!
//! let all = items.find_all(None, Options::new()).await.unwrap();
//! assert_eq!(all.len(), 1);
//! assert_eq!(all[0].value, "v");
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
mod database;
mod error;
mod migration;
mod model;
mod transaction;

#[cfg(test)]
mod test_support;

pub use config::DatabaseOptions;
pub use cursor::{Cursor, CursorStep, Visit};
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use migration::{Migration, MigrationStatus, Upgrade, VERSION_STORE};
pub use model::{
    project, Entity, Filter, HookContext, Instance, Model, Mutation, Options, RecordStep, Records,
};
pub use transaction::Transaction;

pub use async_trait::async_trait;
pub use stow_engine::{StoreOptions, TransactionMode, VersionChangeEvent};
