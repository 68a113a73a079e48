//! Facade error type.

use thiserror::Error;

use docket_core::CoreError;
use docket_sql::SqlError;

/// Errors surfaced by the database facade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Error from parsing, planning or execution.
    #[error(transparent)]
    Sql(#[from] SqlError),

    /// Error from the core layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// BEGIN while a session transaction is already open.
    #[error("a transaction is already in progress")]
    AlreadyInTransaction,

    /// COMMIT or ROLLBACK without an open session transaction.
    #[error("no transaction in progress")]
    NoActiveTransaction,

    /// A misuse of the query API.
    #[error("{0}")]
    Query(String),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;
