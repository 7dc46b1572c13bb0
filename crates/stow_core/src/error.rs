//! Error types for Stow core.

use stow_codec::CodecError;
use stow_engine::EngineError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Stow core operations.
///
/// Absent records are never errors: point lookups and `find_one` return
/// `None` instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Opening or deleting the database failed.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// A transaction aborted and all of its writes were discarded.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// A migration step failed; the upgrade was rolled back.
    ///
    /// Any error a step returns is reported here, including an explicit
    /// rejection, with the upgrade already aborted. An abort the engine
    /// raises at commit is reported as [`CoreError::TransactionAborted`].
    #[error("migration step {index} failed: {source}")]
    MigrationStep {
        /// Position of the step, where 0 is the version store bootstrap.
        index: usize,
        /// The error raised by the step.
        source: Box<CoreError>,
    },

    /// Fewer migrations were supplied than the database already applied.
    #[error("{applied} migrations were already applied but only {supplied} were supplied")]
    MigrationHistory {
        /// Number of migrations recorded in the database.
        applied: usize,
        /// Number of migrations supplied.
        supplied: usize,
    },

    /// A cursor step was used after its record was deleted.
    #[error("cursor step is no longer positioned on a record")]
    CursorStepExpired,

    /// Migration or hook logic rejected the operation.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[source] EngineError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl CoreError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns the engine error behind this error, if any.
    #[must_use]
    pub fn as_engine(&self) -> Option<&EngineError> {
        match self {
            Self::Engine(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Aborted { reason } => Self::TransactionAborted { reason },
            other => Self::Engine(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_abort_becomes_transaction_aborted() {
        let err = CoreError::from(EngineError::aborted("constraint violation"));
        assert!(matches!(err, CoreError::TransactionAborted { reason } if reason == "constraint violation"));
    }

    #[test]
    fn other_engine_errors_are_wrapped() {
        let err = CoreError::from(EngineError::constraint("key 1 already exists"));
        assert!(matches!(
            err.as_engine(),
            Some(EngineError::Constraint { .. })
        ));
    }

    #[test]
    fn step_error_displays_source() {
        let err = CoreError::MigrationStep {
            index: 2,
            source: Box::new(CoreError::migration_failed("bad seed")),
        };
        assert_eq!(
            err.to_string(),
            "migration step 2 failed: migration failed: bad seed"
        );
    }
}
