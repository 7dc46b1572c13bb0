//! Error types for engine operations.

use stow_codec::CodecError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by an object-store engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A record with the same key already exists.
    #[error("constraint violation: {message}")]
    Constraint {
        /// Description of the violated constraint.
        message: String,
    },

    /// A key is missing or cannot be used.
    #[error("data error: {message}")]
    Data {
        /// Description of the problem.
        message: String,
    },

    /// A store or database does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was looked up.
        message: String,
    },

    /// A write was issued inside a read-only transaction.
    #[error("store '{store}' is read-only in this transaction")]
    ReadOnly {
        /// The store that was written to.
        store: String,
    },

    /// The operation is not allowed in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state violation.
        message: String,
    },

    /// A request was issued after the transaction finished.
    #[error("transaction is no longer active")]
    TransactionInactive,

    /// The transaction aborted and all of its writes were discarded.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Why the transaction aborted.
        reason: String,
    },

    /// The requested version is lower than the stored one.
    #[error("requested version {requested} is lower than current version {current}")]
    Version {
        /// The version that was requested.
        requested: u64,
        /// The version currently stored.
        current: u64,
    },

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl EngineError {
    /// Create a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Create a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Create a not found error for a store.
    pub fn store_not_found(store: &str) -> Self {
        Self::NotFound {
            message: format!("object store '{store}'"),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}
