//! Database configuration.

use std::fmt;
use std::sync::Arc;
use stow_engine::{TransactionMode, VersionChangeEvent, VersionChangeHandler};

/// Options for a [`crate::Database`].
#[derive(Clone, Default)]
pub struct DatabaseOptions {
    /// Mode used by [`crate::Database::transaction`] when none is given.
    pub transaction_mode: TransactionMode,

    /// Invoked when an upgrade or delete waits for other connections.
    pub on_blocked: Option<VersionChangeHandler>,

    /// Invoked when another request needs this database's connection to
    /// close.
    pub on_version_change: Option<VersionChangeHandler>,

    /// Whether to close the cached connection on a version-change event.
    /// The next operation then reconnects on demand.
    pub close_on_version_change: bool,
}

impl DatabaseOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default transaction mode.
    #[must_use]
    pub fn transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    /// Sets the blocked callback.
    #[must_use]
    pub fn on_blocked<F>(mut self, callback: F) -> Self
    where
        F: Fn(&VersionChangeEvent) + Send + Sync + 'static,
    {
        let handler: VersionChangeHandler = Arc::new(callback);
        self.on_blocked = Some(handler);
        self
    }

    /// Sets the version-change callback.
    #[must_use]
    pub fn on_version_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&VersionChangeEvent) + Send + Sync + 'static,
    {
        let handler: VersionChangeHandler = Arc::new(callback);
        self.on_version_change = Some(handler);
        self
    }

    /// Sets whether version-change events close the cached connection.
    #[must_use]
    pub fn close_on_version_change(mut self, value: bool) -> Self {
        self.close_on_version_change = value;
        self
    }
}

impl fmt::Debug for DatabaseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("transaction_mode", &self.transaction_mode)
            .field("on_blocked", &self.on_blocked.is_some())
            .field("on_version_change", &self.on_version_change.is_some())
            .field("close_on_version_change", &self.close_on_version_change)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_read_only_without_callbacks() {
        let options = DatabaseOptions::default();
        assert_eq!(options.transaction_mode, TransactionMode::ReadOnly);
        assert!(options.on_blocked.is_none());
        assert!(options.on_version_change.is_none());
        assert!(!options.close_on_version_change);
    }

    #[test]
    fn builder_sets_fields() {
        let options = DatabaseOptions::new()
            .transaction_mode(TransactionMode::ReadWrite)
            .on_blocked(|_| {})
            .close_on_version_change(true);

        assert_eq!(options.transaction_mode, TransactionMode::ReadWrite);
        assert!(options.on_blocked.is_some());
        assert!(options.close_on_version_change);
        assert_eq!(
            format!("{options:?}"),
            "DatabaseOptions { transaction_mode: ReadWrite, on_blocked: true, \
             on_version_change: false, close_on_version_change: true }"
        );
    }
}
