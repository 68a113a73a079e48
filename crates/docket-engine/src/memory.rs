//! In-memory reference engine.
//!
//! Stores live in ordered maps guarded by a single data mutex locked per
//! operation. Transaction exclusion is engine-level: a write transaction
//! owns the engine latch exclusively for its whole life, readers share it.
//! Within a transaction, deletions are soft (tombstones purged at commit)
//! so live iterators keep a stable view, and every mutation pushes a
//! compensating [`UndoOp`] replayed in LIFO order on rollback.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::{Key, Val};
use crate::{Cancellation, Engine, EngineIterator, EngineStore, EngineTransaction, TxOptions};

#[derive(Debug, Clone)]
struct Item {
    value: Val,
    deleted: bool,
}

#[derive(Debug, Clone, Default)]
struct StoreData {
    tree: BTreeMap<Key, Item>,
}

#[derive(Debug, Default)]
struct EngineState {
    stores: HashMap<String, StoreData>,
    sequences: HashMap<String, u64>,
}

/// Compensating action registered by a mutation, applied on rollback.
#[derive(Debug)]
enum UndoOp {
    CreatedStore { name: String },
    DroppedStore { name: String, data: StoreData },
    InsertedItem { store: String, key: Key },
    ReplacedItem { store: String, key: Key, value: Val, deleted: bool },
    DeletedItem { store: String, key: Key },
    TruncatedStore { store: String, tree: BTreeMap<Key, Item> },
    Sequence { store: String, prev: u64 },
}

/// State shared between a transaction and the handles it hands out.
#[derive(Debug)]
struct TxShared {
    writable: bool,
    cancel: Cancellation,
    discarded: AtomicBool,
    undo: Mutex<Vec<UndoOp>>,
    tombstones: Mutex<Vec<(String, Key)>>,
}

impl TxShared {
    /// Fails if the transaction is unusable for any further operation.
    fn check_active(&self) -> EngineResult<()> {
        self.cancel.check()?;
        if self.discarded.load(Ordering::SeqCst) {
            return Err(EngineError::TransactionDiscarded);
        }
        Ok(())
    }

    fn check_writable(&self) -> EngineResult<()> {
        if !self.writable {
            return Err(EngineError::TransactionReadOnly);
        }
        Ok(())
    }

    fn push_undo(&self, op: UndoOp) {
        self.undo.lock().push(op);
    }
}

/// In-memory storage engine backed by ordered maps.
///
/// Suitable for tests and ephemeral databases; contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    latch: Arc<RwLock<()>>,
    state: Arc<Mutex<EngineState>>,
}

impl MemoryEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for MemoryEngine {
    fn begin(&self, opts: TxOptions) -> EngineResult<Box<dyn EngineTransaction>> {
        opts.cancel.check()?;

        let permit = if opts.read_only {
            TxPermit::Read(self.latch.read_arc())
        } else {
            TxPermit::Write(self.latch.write_arc())
        };
        debug!(read_only = opts.read_only, "begin transaction");

        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            shared: Arc::new(TxShared {
                writable: !opts.read_only,
                cancel: opts.cancel,
                discarded: AtomicBool::new(false),
                undo: Mutex::new(Vec::new()),
                tombstones: Mutex::new(Vec::new()),
            }),
            permit: Some(permit),
        }))
    }
}

#[allow(dead_code)]
enum TxPermit {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// A transaction over a [`MemoryEngine`].
struct MemoryTransaction {
    state: Arc<Mutex<EngineState>>,
    shared: Arc<TxShared>,
    permit: Option<TxPermit>,
}

impl EngineTransaction for MemoryTransaction {
    fn writable(&self) -> bool {
        self.shared.writable
    }

    fn create_store(&self, name: &str) -> EngineResult<()> {
        self.shared.check_active()?;
        self.shared.check_writable()?;

        let mut state = self.state.lock();
        if state.stores.contains_key(name) {
            return Err(EngineError::StoreAlreadyExists(name.to_string()));
        }
        state.stores.insert(name.to_string(), StoreData::default());
        self.shared.push_undo(UndoOp::CreatedStore {
            name: name.to_string(),
        });
        Ok(())
    }

    fn drop_store(&self, name: &str) -> EngineResult<()> {
        self.shared.check_active()?;
        self.shared.check_writable()?;

        let mut state = self.state.lock();
        let data = state
            .stores
            .remove(name)
            .ok_or_else(|| EngineError::StoreNotFound(name.to_string()))?;
        self.shared.push_undo(UndoOp::DroppedStore {
            name: name.to_string(),
            data,
        });
        Ok(())
    }

    fn get_store(&self, name: &str) -> EngineResult<Box<dyn EngineStore>> {
        self.shared.check_active()?;

        let state = self.state.lock();
        if !state.stores.contains_key(name) {
            return Err(EngineError::StoreNotFound(name.to_string()));
        }
        Ok(Box::new(MemoryStore {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn commit(&mut self) -> EngineResult<()> {
        self.shared.check_active()?;
        self.shared.check_writable()?;

        let mut state = self.state.lock();
        // Physically purge keys tombstoned by this transaction, unless a
        // later put revived them.
        for (store, key) in self.shared.tombstones.lock().drain(..) {
            if let Some(data) = state.stores.get_mut(&store) {
                if data.tree.get(&key).is_some_and(|item| item.deleted) {
                    data.tree.remove(&key);
                }
            }
        }
        self.shared.undo.lock().clear();
        self.shared.discarded.store(true, Ordering::SeqCst);
        self.permit = None;
        debug!("transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> EngineResult<()> {
        if self.shared.discarded.swap(true, Ordering::SeqCst) {
            return Err(EngineError::TransactionDiscarded);
        }

        let mut state = self.state.lock();
        let mut undo = self.shared.undo.lock();
        while let Some(op) = undo.pop() {
            match op {
                UndoOp::CreatedStore { name } => {
                    state.stores.remove(&name);
                }
                UndoOp::DroppedStore { name, data } => {
                    state.stores.insert(name, data);
                }
                UndoOp::InsertedItem { store, key } => {
                    if let Some(data) = state.stores.get_mut(&store) {
                        data.tree.remove(&key);
                    }
                }
                UndoOp::ReplacedItem {
                    store,
                    key,
                    value,
                    deleted,
                } => {
                    if let Some(item) = state
                        .stores
                        .get_mut(&store)
                        .and_then(|data| data.tree.get_mut(&key))
                    {
                        item.value = value;
                        item.deleted = deleted;
                    }
                }
                UndoOp::DeletedItem { store, key } => {
                    if let Some(item) = state
                        .stores
                        .get_mut(&store)
                        .and_then(|data| data.tree.get_mut(&key))
                    {
                        item.deleted = false;
                    }
                }
                UndoOp::TruncatedStore { store, tree } => {
                    if let Some(data) = state.stores.get_mut(&store) {
                        data.tree = tree;
                    }
                }
                UndoOp::Sequence { store, prev } => {
                    state.sequences.insert(store, prev);
                }
            }
        }
        self.shared.tombstones.lock().clear();
        self.permit = None;
        debug!("transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        // An abandoned transaction must not leak its writes.
        if !self.shared.discarded.load(Ordering::SeqCst) {
            let _ = self.rollback();
        }
    }
}

struct MemoryStore {
    name: String,
    state: Arc<Mutex<EngineState>>,
    shared: Arc<TxShared>,
}

impl MemoryStore {
    fn with_data<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut state = self.state.lock();
        let data = state
            .stores
            .get_mut(&self.name)
            .ok_or_else(|| EngineError::StoreNotFound(self.name.clone()))?;
        f(data)
    }
}

impl EngineStore for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.shared.check_active()?;
        self.shared.check_writable()?;
        if key.is_empty() {
            return Err(EngineError::InvalidArgument("empty key".to_string()));
        }
        if value.is_empty() {
            return Err(EngineError::InvalidArgument("empty value".to_string()));
        }

        let shared = &self.shared;
        let name = &self.name;
        self.with_data(|data| {
            let key = Key::from_slice(key);
            let value = Val::from_slice(value);
            match data.tree.get_mut(&key) {
                Some(item) => {
                    shared.push_undo(UndoOp::ReplacedItem {
                        store: name.clone(),
                        key,
                        value: item.value.clone(),
                        deleted: item.deleted,
                    });
                    item.value = value;
                    item.deleted = false;
                }
                None => {
                    shared.push_undo(UndoOp::InsertedItem {
                        store: name.clone(),
                        key: key.clone(),
                    });
                    data.tree.insert(
                        key,
                        Item {
                            value,
                            deleted: false,
                        },
                    );
                }
            }
            Ok(())
        })
    }

    fn get(&self, key: &[u8]) -> EngineResult<Val> {
        self.shared.check_active()?;

        self.with_data(|data| match data.tree.get(key) {
            Some(item) if !item.deleted => Ok(item.value.clone()),
            _ => Err(EngineError::KeyNotFound),
        })
    }

    fn delete(&self, key: &[u8]) -> EngineResult<()> {
        self.shared.check_active()?;
        self.shared.check_writable()?;

        let shared = &self.shared;
        let name = &self.name;
        self.with_data(|data| {
            let item = data
                .tree
                .get_mut(key)
                .filter(|item| !item.deleted)
                .ok_or(EngineError::KeyNotFound)?;
            item.deleted = true;
            let key = Key::from_slice(key);
            shared.push_undo(UndoOp::DeletedItem {
                store: name.clone(),
                key: key.clone(),
            });
            shared.tombstones.lock().push((name.clone(), key));
            Ok(())
        })
    }

    fn truncate(&self) -> EngineResult<()> {
        self.shared.check_active()?;
        self.shared.check_writable()?;

        let shared = &self.shared;
        let name = &self.name;
        self.with_data(|data| {
            let tree = std::mem::take(&mut data.tree);
            shared.push_undo(UndoOp::TruncatedStore {
                store: name.clone(),
                tree,
            });
            Ok(())
        })
    }

    fn next_sequence(&self) -> EngineResult<u64> {
        self.shared.check_active()?;
        self.shared.check_writable()?;

        let mut state = self.state.lock();
        if !state.stores.contains_key(&self.name) {
            return Err(EngineError::StoreNotFound(self.name.clone()));
        }
        let seq = state.sequences.entry(self.name.clone()).or_insert(0);
        let prev = *seq;
        *seq += 1;
        let next = *seq;
        self.shared.push_undo(UndoOp::Sequence {
            store: self.name.clone(),
            prev,
        });
        Ok(next)
    }

    fn iterator(&self, reverse: bool) -> Box<dyn EngineIterator> {
        // Snapshot the visible key set: inserts made after this point are
        // invisible, while liveness is re-checked at every step so
        // same-transaction deletes disappear mid-iteration.
        let keys: Vec<Key> = {
            let state = self.state.lock();
            state
                .stores
                .get(&self.name)
                .map(|data| {
                    data.tree
                        .iter()
                        .filter(|(_, item)| !item.deleted)
                        .map(|(k, _)| k.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        Box::new(MemoryIterator {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
            shared: Arc::clone(&self.shared),
            reverse,
            keys,
            pos: None,
            current: None,
        })
    }
}

struct MemoryIterator {
    name: String,
    state: Arc<Mutex<EngineState>>,
    shared: Arc<TxShared>,
    reverse: bool,
    keys: Vec<Key>,
    pos: Option<usize>,
    current: Option<(Key, Val)>,
}

impl MemoryIterator {
    fn step(&mut self) {
        self.pos = match self.pos {
            Some(pos) if !self.reverse => {
                if pos + 1 < self.keys.len() {
                    Some(pos + 1)
                } else {
                    None
                }
            }
            Some(pos) => pos.checked_sub(1),
            None => None,
        };
    }

    /// Loads the item under the cursor, skipping keys that died since the
    /// snapshot was taken.
    fn settle(&mut self) {
        loop {
            let Some(pos) = self.pos else {
                self.current = None;
                return;
            };
            let key = &self.keys[pos];
            let live = {
                let state = self.state.lock();
                state
                    .stores
                    .get(&self.name)
                    .and_then(|data| data.tree.get(key))
                    .filter(|item| !item.deleted)
                    .map(|item| item.value.clone())
            };
            match live {
                Some(value) => {
                    self.current = Some((key.clone(), value));
                    return;
                }
                None => self.step(),
            }
        }
    }
}

impl EngineIterator for MemoryIterator {
    fn seek(&mut self, pivot: &[u8]) -> EngineResult<()> {
        self.shared.check_active()?;

        self.pos = if self.reverse {
            if pivot.is_empty() {
                self.keys.len().checked_sub(1)
            } else {
                // Last key <= pivot.
                let idx = self.keys.partition_point(|k| k.as_bytes() <= pivot);
                idx.checked_sub(1)
            }
        } else {
            // First key >= pivot.
            let idx = self.keys.partition_point(|k| k.as_bytes() < pivot);
            if idx < self.keys.len() {
                Some(idx)
            } else {
                None
            }
        };
        self.settle();
        Ok(())
    }

    fn valid(&self) -> bool {
        self.current.is_some() && !self.shared.cancel.is_cancelled()
    }

    fn advance(&mut self) -> EngineResult<()> {
        self.shared.check_active()?;
        self.step();
        self.settle();
        Ok(())
    }

    fn item(&self) -> Option<(Key, Val)> {
        self.current.clone()
    }
}
