//! SQL layer error types.

use thiserror::Error;

use docket_core::CoreError;
use docket_engine::EngineError;

/// Errors raised while scanning or parsing SQL text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The parser met a token it didn't expect.
    #[error("unexpected token {found} at line {line}, char {column}, expected {expected}")]
    UnexpectedToken {
        /// Literal text of the offending token.
        found: String,
        /// Human-readable list of what would have been accepted.
        expected: String,
        /// 1-based source line.
        line: usize,
        /// 1-based character offset within the line.
        column: usize,
    },

    /// A string literal never terminated.
    #[error("unterminated string at line {line}, char {column}")]
    BadString {
        /// 1-based source line.
        line: usize,
        /// 1-based character offset within the line.
        column: usize,
    },

    /// A string literal used an unsupported escape sequence.
    #[error("invalid escape sequence at line {line}, char {column}")]
    BadEscape {
        /// 1-based source line.
        line: usize,
        /// 1-based character offset within the line.
        column: usize,
    },

    /// A numeric literal didn't parse.
    #[error("unable to parse number at line {line}, char {column}")]
    InvalidNumber {
        /// 1-based source line.
        line: usize,
        /// 1-based character offset within the line.
        column: usize,
    },

    /// A statement mixed `?` and `$name` placeholders.
    #[error("cannot mix positional arguments with named arguments")]
    MixedParams,

    /// A `$` placeholder without a name.
    #[error("missing param name")]
    MissingParamName,

    /// A document literal repeated a field.
    #[error("duplicate field {0}")]
    DuplicateField(String),

    /// A call to a function the engine doesn't know.
    #[error("unknown function {0}")]
    UnknownFunction(String),

    /// Anything else.
    #[error("{0}")]
    Message(String),
}

/// Errors raised while planning or executing statements.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SqlError {
    /// Error bubbled up from the core layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error raised during parsing.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A placeholder had no matching parameter binding.
    #[error("parameter not bound: {0}")]
    UnknownParameter(String),

    /// An operator needed a document and got something else.
    #[error("expected a document, got {0}")]
    NotADocument(String),

    /// A statement-level misuse, such as EXPLAIN on a DDL statement or a
    /// non-integer LIMIT.
    #[error("{0}")]
    Query(String),

    /// Internal sentinel used by operators to end iteration early. The
    /// stream driver converts it to normal completion; it never escapes
    /// to callers.
    #[error("stream closed")]
    StreamClosed,

    /// A broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for SqlError {
    fn from(err: EngineError) -> Self {
        SqlError::Core(CoreError::Engine(err))
    }
}

/// Result type for SQL operations.
pub type SqlResult<T> = Result<T, SqlError>;
