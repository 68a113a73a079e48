//! Storage engine error types.

use thiserror::Error;

/// Errors returned by storage engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The named store doesn't exist.
    #[error("store not found: {0}")]
    StoreNotFound(String),

    /// A store with that name already exists.
    #[error("store already exists: {0}")]
    StoreAlreadyExists(String),

    /// The key is absent from the store.
    #[error("key not found")]
    KeyNotFound,

    /// A write was attempted through a read-only transaction.
    #[error("transaction is read-only")]
    TransactionReadOnly,

    /// The transaction was already committed or rolled back.
    #[error("transaction has been committed or rolled back")]
    TransactionDiscarded,

    /// A malformed argument, such as an empty key or value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
