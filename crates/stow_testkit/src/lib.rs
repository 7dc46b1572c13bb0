//! # Stow Testkit
//!
//! Test utilities for Stow.
//!
//! This crate provides:
//! - Uniquely named test databases over an in-memory engine
//! - Raw record helpers that bypass the mapping layer
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stow_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_database() {
//!     let db = TestDatabase::migrated(&[users_migration()]).await;
//!     db.add_records("users", scenarios::people()).await;
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
