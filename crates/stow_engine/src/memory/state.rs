//! Committed database state and the lock scheduler.

use crate::engine::{
    OpenHandlers, StoreOptions, TransactionMode, VersionChangeEvent, VersionChangeHandler,
};
use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stow_codec::{Key, Value};
use tokio::sync::{Notify, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

/// Records of one object store, encoded as CBOR.
#[derive(Debug, Clone)]
pub(crate) struct StoreData {
    pub(crate) options: StoreOptions,
    pub(crate) records: BTreeMap<Key, Vec<u8>>,
    next_key: i64,
}

impl StoreData {
    pub(crate) fn new(options: StoreOptions) -> Self {
        Self {
            options,
            records: BTreeMap::new(),
            next_key: 1,
        }
    }

    /// Stores `value`, returning its key. Fails with a constraint error if
    /// `overwrite` is false and the key is taken.
    pub(crate) fn store(
        &mut self,
        value: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> EngineResult<Key> {
        let (key, value) = self.resolve_key(value, key)?;
        if !overwrite && self.records.contains_key(&key) {
            return Err(EngineError::constraint(format!(
                "key {key} already exists"
            )));
        }
        let bytes = stow_codec::encode(&value)?;
        self.bump_generator(&key);
        self.records.insert(key.clone(), bytes);
        Ok(key)
    }

    /// Overwrites the record at `key` in place, keeping an in-line key field
    /// consistent with the position.
    pub(crate) fn overwrite(&mut self, key: &Key, value: Value) -> EngineResult<Value> {
        let value = self.align_key(value, key)?;
        self.records.insert(key.clone(), stow_codec::encode(&value)?);
        Ok(value)
    }

    pub(crate) fn read(&self, key: &Key) -> EngineResult<Option<Value>> {
        self.records
            .get(key)
            .map(|bytes| stow_codec::decode(bytes))
            .transpose()
            .map_err(EngineError::from)
    }

    fn resolve_key(&mut self, mut value: Value, key: Option<Key>) -> EngineResult<(Key, Value)> {
        let key_path = self.options.key_path.clone();
        match (key_path, key) {
            (Some(_), Some(_)) => Err(EngineError::data(
                "store uses in-line keys; an explicit key is not allowed",
            )),
            (Some(path), None) => {
                let found = value.get(&path).filter(|v| !v.is_null()).cloned();
                if let Some(found) = found {
                    let key =
                        Key::from_value(&found).map_err(|e| EngineError::data(e.to_string()))?;
                    return Ok((key, value));
                }
                if !self.options.auto_increment {
                    return Err(EngineError::data(format!("record has no key at '{path}'")));
                }
                let key = self.generate_key()?;
                match &mut value {
                    Value::Map(record) => {
                        record.insert(path, Value::from(key.clone()));
                    }
                    other => {
                        return Err(EngineError::data(format!(
                            "cannot inject a key into {}",
                            other.kind()
                        )))
                    }
                }
                Ok((key, value))
            }
            (None, Some(key)) => Ok((key, value)),
            (None, None) if self.options.auto_increment => Ok((self.generate_key()?, value)),
            (None, None) => Err(EngineError::data(
                "store has neither a key path nor a key generator; a key is required",
            )),
        }
    }

    fn align_key(&self, mut value: Value, key: &Key) -> EngineResult<Value> {
        let Some(path) = &self.options.key_path else {
            return Ok(value);
        };
        match value.get(path).filter(|v| !v.is_null()) {
            Some(found) => {
                let found = Key::from_value(found).map_err(|e| EngineError::data(e.to_string()))?;
                if &found != key {
                    return Err(EngineError::data(format!(
                        "record key {found} does not match position {key}"
                    )));
                }
            }
            None => match &mut value {
                Value::Map(record) => {
                    record.insert(path.clone(), Value::from(key.clone()));
                }
                other => {
                    return Err(EngineError::data(format!(
                        "cannot inject a key into {}",
                        other.kind()
                    )))
                }
            },
        }
        Ok(value)
    }

    fn generate_key(&mut self) -> EngineResult<Key> {
        let key = self.next_key;
        self.next_key = key
            .checked_add(1)
            .ok_or_else(|| EngineError::constraint("key generator exhausted"))?;
        Ok(Key::Integer(key))
    }

    fn bump_generator(&mut self, key: &Key) {
        if !self.options.auto_increment {
            return;
        }
        if let Some(n) = key.as_integer() {
            if n >= self.next_key {
                self.next_key = n.saturating_add(1);
            }
        }
    }
}

/// Last committed version and stores of a database.
#[derive(Debug, Default)]
pub(crate) struct Committed {
    pub(crate) version: u64,
    pub(crate) stores: BTreeMap<String, StoreData>,
}

struct ConnectionEntry {
    id: u64,
    on_version_change: Option<VersionChangeHandler>,
}

/// Locks held by a running transaction. Dropping them lets waiting
/// transactions proceed.
pub(crate) struct LockGuards {
    _schema: SchemaGuard,
    _stores: Vec<StoreGuard>,
}

#[allow(dead_code)]
enum SchemaGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

#[allow(dead_code)]
enum StoreGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// Shared state of one named database.
///
/// Every transaction holds the schema lock shared; version-change
/// transactions and deletion hold it exclusively. Read-write transactions
/// additionally hold their stores' locks exclusively, read-only ones hold
/// them shared. Store locks are always taken in name order.
pub(crate) struct DatabaseState {
    pub(crate) name: String,
    pub(crate) committed: Mutex<Committed>,
    schema_lock: Arc<RwLock<()>>,
    store_locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    connections: Mutex<Vec<ConnectionEntry>>,
    closed: Notify,
    ids: Arc<AtomicU64>,
}

impl DatabaseState {
    pub(crate) fn new(name: &str, ids: Arc<AtomicU64>) -> Self {
        Self {
            name: name.to_string(),
            committed: Mutex::new(Committed::default()),
            schema_lock: Arc::new(RwLock::new(())),
            store_locks: Mutex::new(HashMap::new()),
            connections: Mutex::new(Vec::new()),
            closed: Notify::new(),
            ids,
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn version(&self) -> u64 {
        self.committed.lock().version
    }

    pub(crate) fn register(&self, on_version_change: Option<VersionChangeHandler>) -> u64 {
        let id = self.next_id();
        self.connections.lock().push(ConnectionEntry {
            id,
            on_version_change,
        });
        id
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.connections.lock().retain(|entry| entry.id != id);
        self.closed.notify_waiters();
    }

    pub(crate) fn open_connections(&self) -> usize {
        self.connections.lock().len()
    }

    /// Runs the blocked protocol: asks every open connection to close,
    /// reports the requester as blocked if any stay open, then waits until
    /// all of them are closed.
    pub(crate) async fn request_exclusive(
        &self,
        new_version: Option<u64>,
        handlers: &OpenHandlers,
    ) {
        let event = VersionChangeEvent {
            database: self.name.clone(),
            old_version: self.version(),
            new_version,
        };

        let listeners: Vec<VersionChangeHandler> = self
            .connections
            .lock()
            .iter()
            .filter_map(|entry| entry.on_version_change.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }

        if self.open_connections() == 0 {
            return;
        }

        debug!(
            database = %self.name,
            open = self.open_connections(),
            "request blocked by open connections"
        );
        if let Some(on_blocked) = &handlers.on_blocked {
            on_blocked(&event);
        }

        loop {
            let notified = self.closed.notified();
            if self.open_connections() == 0 {
                break;
            }
            notified.await;
        }
        debug!(database = %self.name, "blocking connections closed");
    }

    pub(crate) async fn lock_shared_schema(&self) -> OwnedRwLockReadGuard<()> {
        Arc::clone(&self.schema_lock).read_owned().await
    }

    pub(crate) async fn lock_exclusive(&self) -> LockGuards {
        LockGuards {
            _schema: SchemaGuard::Exclusive(Arc::clone(&self.schema_lock).write_owned().await),
            _stores: Vec::new(),
        }
    }

    /// Waits until a transaction of `mode` may run over `stores`.
    pub(crate) async fn lock_stores(&self, stores: &[String], mode: TransactionMode) -> LockGuards {
        let schema = SchemaGuard::Shared(self.lock_shared_schema().await);

        let mut names: Vec<&String> = stores.iter().collect();
        names.sort();
        names.dedup();

        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            let lock = self.store_lock(name);
            let guard = if mode.is_writable() {
                StoreGuard::Exclusive(lock.write_owned().await)
            } else {
                StoreGuard::Shared(lock.read_owned().await)
            };
            guards.push(guard);
        }

        LockGuards {
            _schema: schema,
            _stores: guards,
        }
    }

    fn store_lock(&self, name: &str) -> Arc<RwLock<()>> {
        let mut locks = self.store_locks.lock();
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stow_codec::record;

    fn keyed() -> StoreData {
        StoreData::new(StoreOptions::key_path("id").auto_increment(true))
    }

    #[test]
    fn generated_key_is_injected() {
        let mut store = keyed();
        let key = store
            .store(Value::Map(record! { "name" => "a" }), None, false)
            .unwrap();

        assert_eq!(key, Key::Integer(1));
        assert_eq!(
            store.read(&key).unwrap(),
            Some(Value::Map(record! { "id" => 1, "name" => "a" }))
        );
    }

    #[test]
    fn null_key_field_is_generated() {
        let mut store = keyed();
        let key = store
            .store(Value::Map(record! { "id" => Value::Null }), None, false)
            .unwrap();
        assert_eq!(key, Key::Integer(1));
    }

    #[test]
    fn explicit_key_bumps_generator() {
        let mut store = keyed();
        store
            .store(Value::Map(record! { "id" => 10 }), None, false)
            .unwrap();
        let next = store.store(Value::Map(record! {}), None, false).unwrap();
        assert_eq!(next, Key::Integer(11));
    }

    #[test]
    fn duplicate_add_is_a_constraint_error() {
        let mut store = keyed();
        store
            .store(Value::Map(record! { "id" => 1 }), None, false)
            .unwrap();
        let err = store
            .store(Value::Map(record! { "id" => 1 }), None, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::Constraint { .. }));

        store
            .store(Value::Map(record! { "id" => 1, "v" => 2 }), None, true)
            .unwrap();
        assert_eq!(
            store.read(&Key::Integer(1)).unwrap(),
            Some(Value::Map(record! { "id" => 1, "v" => 2 }))
        );
    }

    #[test]
    fn in_line_store_rejects_explicit_key() {
        let mut store = keyed();
        let err = store
            .store(Value::Map(record! {}), Some(Key::Integer(1)), false)
            .unwrap_err();
        assert!(matches!(err, EngineError::Data { .. }));
    }

    #[test]
    fn out_of_line_store_requires_key() {
        let mut store = StoreData::new(StoreOptions::new());
        assert!(matches!(
            store.store(Value::from("v"), None, false),
            Err(EngineError::Data { .. })
        ));
        assert_eq!(
            store
                .store(Value::from("v"), Some(Key::from("k")), false)
                .unwrap(),
            Key::from("k")
        );
    }

    #[test]
    fn overwrite_rejects_moved_key() {
        let mut store = keyed();
        store
            .store(Value::Map(record! { "id" => 1 }), None, false)
            .unwrap();

        let err = store
            .overwrite(&Key::Integer(1), Value::Map(record! { "id" => 2 }))
            .unwrap_err();
        assert!(matches!(err, EngineError::Data { .. }));

        let value = store
            .overwrite(&Key::Integer(1), Value::Map(record! { "v" => 3 }))
            .unwrap();
        assert_eq!(value, Value::Map(record! { "id" => 1, "v" => 3 }));
    }

    proptest! {
        #[test]
        fn generated_keys_stay_above_explicit_ones(explicit in prop::collection::vec(1i64..1_000, 0..16)) {
            let mut store = keyed();
            for id in &explicit {
                store.store(Value::Map(record! { "id" => *id }), None, true).unwrap();
            }
            let generated = store.store(Value::Map(record! {}), None, false).unwrap();

            let floor = explicit.iter().copied().max().unwrap_or(0);
            prop_assert_eq!(generated, Key::Integer(floor + 1));
        }
    }
}
