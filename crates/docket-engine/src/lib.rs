//! # docket-engine
//!
//! Ordered key/value storage abstraction for Docket.
//!
//! This crate defines the storage contract the rest of the database is built
//! on:
//! - [`Engine`]: entry point producing transactions over named stores
//! - [`EngineTransaction`]: atomic unit of work with commit/rollback
//! - [`EngineStore`]: one flat ordered key space
//! - [`EngineIterator`]: ordered cursor with seek support
//!
//! It also ships [`MemoryEngine`], the in-memory reference implementation
//! used by tests and embedders that don't need persistence.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cancel;
mod error;
mod memory;
mod types;

pub use cancel::Cancellation;
pub use error::{EngineError, EngineResult};
pub use memory::MemoryEngine;
pub use types::{Key, Val};

/// Options controlling how a transaction is begun.
#[derive(Debug, Clone, Default)]
pub struct TxOptions {
    /// When true, any write through the transaction fails with
    /// [`EngineError::TransactionReadOnly`].
    pub read_only: bool,
    /// Cancellation token checked at the top of every storage operation.
    pub cancel: Cancellation,
}

impl TxOptions {
    /// Returns options for a read-only transaction.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            cancel: Cancellation::new(),
        }
    }

    /// Returns options for a read-write transaction.
    pub fn read_write() -> Self {
        Self {
            read_only: false,
            cancel: Cancellation::new(),
        }
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A pluggable ordered key/value storage engine.
///
/// Engines are injected at database construction and hold no global state.
/// They serialize writers: at most one write transaction is live at any
/// time, and a write transaction excludes readers for its whole life.
pub trait Engine: Send + Sync {
    /// Begins a new transaction.
    ///
    /// A write transaction blocks until every other live transaction ends.
    fn begin(&self, opts: TxOptions) -> EngineResult<Box<dyn EngineTransaction>>;
}

/// A transaction over the engine's stores.
///
/// All mutations made through a transaction are invisible to other
/// transactions until [`commit`](EngineTransaction::commit) and are undone
/// byte-for-byte by [`rollback`](EngineTransaction::rollback). A transaction
/// on which commit or rollback has been called refuses further operations
/// with [`EngineError::TransactionDiscarded`].
pub trait EngineTransaction {
    /// Reports whether this transaction accepts writes.
    fn writable(&self) -> bool;

    /// Creates a new named store.
    ///
    /// Fails with [`EngineError::StoreAlreadyExists`] if the name is taken.
    fn create_store(&self, name: &str) -> EngineResult<()>;

    /// Drops a store and all its contents.
    ///
    /// Fails with [`EngineError::StoreNotFound`] if the store doesn't exist.
    fn drop_store(&self, name: &str) -> EngineResult<()>;

    /// Returns a handle on a store.
    ///
    /// Fails with [`EngineError::StoreNotFound`] if the store doesn't exist.
    fn get_store(&self, name: &str) -> EngineResult<Box<dyn EngineStore>>;

    /// Makes every mutation of this transaction durable and visible to
    /// transactions begun afterwards.
    fn commit(&mut self) -> EngineResult<()>;

    /// Reverts every mutation of this transaction in LIFO order, restoring
    /// the exact pre-transaction state.
    fn rollback(&mut self) -> EngineResult<()>;
}

/// One flat ordered key space inside a transaction.
///
/// Keys and values are non-empty byte strings; passing an empty key or
/// value fails with [`EngineError::InvalidArgument`].
pub trait EngineStore {
    /// Stores a key/value pair, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Returns the value associated with `key`.
    ///
    /// Fails with [`EngineError::KeyNotFound`] if the key is absent or was
    /// deleted earlier in this transaction.
    fn get(&self, key: &[u8]) -> EngineResult<Val>;

    /// Deletes a key.
    ///
    /// The key becomes invisible to this transaction immediately, including
    /// to live iterators, but the physical removal is deferred to commit so
    /// iteration order never changes mid-transaction.
    fn delete(&self, key: &[u8]) -> EngineResult<()>;

    /// Removes every key from the store.
    fn truncate(&self) -> EngineResult<()>;

    /// Returns a monotonically increasing integer scoped to this store.
    fn next_sequence(&self) -> EngineResult<u64>;

    /// Creates an iterator over the store.
    ///
    /// The iterator sees the keys visible at creation time: later inserts
    /// are invisible, and keys deleted within this transaction disappear
    /// from the remaining iteration.
    fn iterator(&self, reverse: bool) -> Box<dyn EngineIterator>;
}

/// An ordered cursor over a store.
///
/// An iterator starts unpositioned; call [`seek`](EngineIterator::seek)
/// first (an empty pivot positions at the first key in iteration order).
pub trait EngineIterator {
    /// Positions the iterator at the first key `>= pivot` (or `<= pivot`
    /// for reverse iterators). An empty pivot means the start of the store
    /// in iteration order.
    fn seek(&mut self, pivot: &[u8]) -> EngineResult<()>;

    /// Reports whether the iterator is positioned on a live item.
    fn valid(&self) -> bool;

    /// Advances to the next item in iteration order.
    fn advance(&mut self) -> EngineResult<()>;

    /// Returns the current key and a copy of the current value, or `None`
    /// if the iterator is not valid.
    fn item(&self) -> Option<(Key, Val)>;
}
