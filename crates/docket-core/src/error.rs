//! Core error types.

use thiserror::Error;

use crate::value::ValueKind;
use docket_engine::EngineError;

/// Errors returned by the document, catalog and transaction layers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Error bubbled up from the storage engine.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A decode ran out of bytes.
    #[error("buffer too short")]
    ShortBuffer,

    /// Stored bytes don't decode to a well-formed value.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// The named table doesn't exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A table with that name already exists.
    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    /// The named index doesn't exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// An index with that name already exists.
    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    /// A DDL or write statement targeted a reserved catalog table.
    #[error("cannot write to read-only table: {0}")]
    ReadOnlyTable(String),

    /// No document lives at the given key.
    #[error("document not found")]
    DocumentNotFound,

    /// A unique index rejected a duplicate value.
    #[error("duplicate value for unique index: {0}")]
    DuplicateValue(String),

    /// A document with the same primary key already exists.
    #[error("duplicate document: a document with the same key already exists")]
    DuplicateDocument,

    /// Replacing a document may not change its primary key.
    #[error("primary key of a document cannot be modified")]
    PrimaryKeyImmutable,

    /// A NOT NULL (or primary key) constraint was violated.
    #[error("field {0} is required and must not be null")]
    NotNullViolation(String),

    /// A value doesn't match a field's declared type and can't be
    /// converted losslessly.
    #[error("field {path} must be of type {expected}, got {got}")]
    IncompatibleType {
        /// Constrained path.
        path: String,
        /// Declared type.
        expected: ValueKind,
        /// Actual value type.
        got: ValueKind,
    },

    /// A cast between value types failed.
    #[error("cannot cast {from} to {to}")]
    InvalidCast {
        /// Source type.
        from: ValueKind,
        /// Target type.
        to: ValueKind,
    },

    /// A path couldn't be written into a document.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
