//! # Stow Engine
//!
//! The object-store engine boundary consumed by Stow, and an in-memory
//! engine implementing it.
//!
//! Engines host named databases at integer versions. A database holds
//! object stores of schema-less records; all access happens inside
//! transactions whose scope and mode are fixed up front. The mapping layer
//! in `stow_core` only ever talks to the [`Engine`] traits.
//!
//! ## Design Principles
//!
//! - Schema changes happen only in version-change transactions
//! - Commit is all-or-nothing; abort discards every write
//! - Records are stored encoded, so reads never alias written values
//! - Traits are object safe and shared as `Arc<dyn ...>`
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - In-process engine for tests and ephemeral data
//!
//! ## Example
//!
//! ```rust
//! use stow_engine::{Engine, MemoryEngine, OpenHandlers, OpenOutcome, StoreOptions};
//!
//! # tokio::runtime::Builder::new_current_thread()
//! #     .build()
//! #     .unwrap()
//! #     .block_on(async {
//! let engine = MemoryEngine::new();
//! let outcome = engine.open("app", Some(1), OpenHandlers::new()).await.unwrap();
//! if let OpenOutcome::Upgrade { transaction, .. } = outcome {
//!     transaction
//!         .create_store("users", StoreOptions::key_path("id").auto_increment(true))
//!         .unwrap();
//!     transaction.commit().await.unwrap();
//! }
//! assert_eq!(engine.version_of("app"), Some(1));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod memory;

pub use engine::{
    Engine, EngineConnection, EngineCursor, EngineTransaction, OpenHandlers, OpenOutcome,
    StoreOptions, TransactionMode, VersionChangeEvent, VersionChangeHandler,
};
pub use error::{EngineError, EngineResult};
pub use memory::{MemoryConnection, MemoryCursor, MemoryEngine, MemoryTransaction};
