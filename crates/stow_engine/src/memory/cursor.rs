//! In-memory cursors.

use super::transaction::TxInner;
use crate::engine::EngineCursor;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use std::ops::Bound;
use std::sync::Arc;
use stow_codec::{Key, Value};

/// A cursor of the [`super::MemoryEngine`].
///
/// The cursor remembers the last key it visited and looks up the next
/// greater key on every advance, so updating or deleting the current
/// record never disturbs iteration.
pub struct MemoryCursor {
    tx: Arc<TxInner>,
    store: String,
    position: Option<Key>,
    current: Option<(Key, Value)>,
}

impl MemoryCursor {
    pub(crate) fn new(tx: Arc<TxInner>, store: &str) -> Self {
        Self {
            tx,
            store: store.to_string(),
            position: None,
            current: None,
        }
    }

    fn current_key(&self) -> EngineResult<Key> {
        self.current
            .as_ref()
            .map(|(key, _)| key.clone())
            .ok_or_else(|| EngineError::invalid_state("cursor is not positioned on a record"))
    }
}

#[async_trait]
impl EngineCursor for MemoryCursor {
    fn key(&self) -> Option<&Key> {
        self.current.as_ref().map(|(key, _)| key)
    }

    fn value(&self) -> Option<&Value> {
        self.current.as_ref().map(|(_, value)| value)
    }

    async fn advance(&mut self) -> EngineResult<bool> {
        let lower = match &self.position {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        let next = self.tx.read(&self.store, |data| {
            match data.records.range((lower, Bound::Unbounded)).next() {
                Some((key, bytes)) => Ok(Some((key.clone(), stow_codec::decode(bytes)?))),
                None => Ok(None),
            }
        })?;

        match next {
            Some((key, value)) => {
                self.position = Some(key.clone());
                self.current = Some((key, value));
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    async fn update(&mut self, value: Value) -> EngineResult<Key> {
        let key = self.current_key()?;
        let stored = self
            .tx
            .write(&self.store, |data| data.overwrite(&key, value))?;
        self.current = Some((key.clone(), stored));
        Ok(key)
    }

    async fn delete(&mut self) -> EngineResult<()> {
        let key = self.current_key()?;
        self.tx.write(&self.store, |data| {
            data.records.remove(&key);
            Ok(())
        })?;
        self.current = None;
        Ok(())
    }
}
