//! Cursor iteration over one store.
//!
//! A [`Cursor`] is pulled one record at a time. Each call to
//! [`Cursor::next`] yields a [`CursorStep`] that mutably borrows the cursor,
//! so a step is the only live handle to the current record and cannot be
//! kept past its iteration. The next record is only requested after the
//! previous step is released, which keeps at most one request in flight.
//!
//! [`Database::open_cursor`] drives a cursor with a [`Visit`]
//! implementation, the building block of the model's find, update and
//! delete operations.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use async_trait::async_trait;
use std::fmt;
use stow_codec::{Key, Value};
use stow_engine::{EngineCursor, TransactionMode};
use tracing::trace;

/// An open cursor over one store, in ascending key order.
pub struct Cursor {
    transaction: Transaction,
    store: String,
    inner: Box<dyn EngineCursor>,
    stopped: bool,
}

impl Cursor {
    pub(crate) fn new(transaction: Transaction, store: &str, inner: Box<dyn EngineCursor>) -> Self {
        Self {
            transaction,
            store: store.to_string(),
            inner,
            stopped: false,
        }
    }

    /// Store being iterated.
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Transaction the cursor runs in.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Returns true once the cursor was stopped or exhausted.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Ends the iteration; [`Cursor::next`] returns `None` from now on.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Moves to the next record.
    ///
    /// Returns `None` once the store is exhausted or the cursor stopped.
    pub async fn next(&mut self) -> CoreResult<Option<CursorStep<'_>>> {
        if self.stopped {
            return Ok(None);
        }
        if !self.inner.advance().await? {
            self.stopped = true;
            return Ok(None);
        }
        let Some(key) = self.inner.key().cloned() else {
            self.stopped = true;
            return Ok(None);
        };
        trace!(store = %self.store, %key, "cursor step");
        Ok(Some(CursorStep {
            cursor: self,
            key,
            deleted: false,
        }))
    }

    pub(crate) async fn update_current(&mut self, value: Value) -> CoreResult<Key> {
        Ok(self.inner.update(value).await?)
    }

    pub(crate) async fn delete_current(&mut self) -> CoreResult<()> {
        Ok(self.inner.delete().await?)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("store", &self.store)
            .field("transaction", &self.transaction.id())
            .field("stopped", &self.stopped)
            .finish()
    }
}

/// The live handle to the record a cursor is positioned on.
///
/// Valid for one iteration step. After [`CursorStep::delete`] the step no
/// longer refers to a record and further mutations fail with
/// [`CoreError::CursorStepExpired`].
pub struct CursorStep<'c> {
    cursor: &'c mut Cursor,
    key: Key,
    deleted: bool,
}

impl CursorStep<'_> {
    /// Key of the current record.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Current record, or `None` once it was deleted.
    pub fn value(&self) -> Option<&Value> {
        if self.deleted {
            return None;
        }
        self.cursor.inner.value()
    }

    /// Store being iterated.
    pub fn store(&self) -> &str {
        &self.cursor.store
    }

    /// Transaction the cursor runs in.
    pub fn transaction(&self) -> &Transaction {
        &self.cursor.transaction
    }

    /// Returns true once the current record was deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Overwrites the current record.
    pub async fn update(&mut self, value: Value) -> CoreResult<Key> {
        self.ensure_live()?;
        self.cursor.update_current(value).await
    }

    /// Deletes the current record.
    pub async fn delete(&mut self) -> CoreResult<()> {
        self.ensure_live()?;
        self.cursor.delete_current().await?;
        self.deleted = true;
        Ok(())
    }

    /// Ends the iteration after this step.
    pub fn stop(&mut self) {
        self.cursor.stop();
    }

    fn ensure_live(&self) -> CoreResult<()> {
        if self.deleted {
            return Err(CoreError::CursorStepExpired);
        }
        Ok(())
    }
}

impl fmt::Debug for CursorStep<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorStep")
            .field("store", &self.cursor.store)
            .field("key", &self.key)
            .field("deleted", &self.deleted)
            .finish()
    }
}

/// Callback driven by [`Database::open_cursor`] once per record.
///
/// The next record is requested only after `visit` returns. Calling
/// [`CursorStep::stop`] ends the iteration after the current call.
#[async_trait]
pub trait Visit: Send {
    /// Visits one record.
    async fn visit(&mut self, step: &mut CursorStep<'_>) -> CoreResult<()>;
}

impl Database {
    /// Walks `store` with `visitor`, inside `ambient` or a fresh transaction
    /// of the given mode.
    pub async fn open_cursor<V>(
        &self,
        ambient: Option<&Transaction>,
        store: &str,
        mode: TransactionMode,
        visitor: &mut V,
    ) -> CoreResult<()>
    where
        V: Visit + ?Sized,
    {
        self.walk(ambient, &[store], store, mode, visitor).await
    }

    /// Like [`Database::open_cursor`], with a fresh transaction spanning
    /// `scope`.
    pub(crate) async fn walk<V>(
        &self,
        ambient: Option<&Transaction>,
        scope: &[&str],
        store: &str,
        mode: TransactionMode,
        visitor: &mut V,
    ) -> CoreResult<()>
    where
        V: Visit + ?Sized,
    {
        self.use_or_create(ambient, scope, mode, |tx| async move {
            let mut cursor = tx.open_cursor(store).await?;
            while let Some(mut step) = cursor.next().await? {
                visitor.visit(&mut step).await?;
            }
            Ok(())
        })
        .await
    }
}
