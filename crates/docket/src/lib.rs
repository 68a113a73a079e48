//! # docket
//!
//! An embeddable document-oriented database queried through a SQL-like
//! language over schemaless JSON-shaped documents.
//!
//! ```
//! use docket::{Database, Param, Value};
//!
//! let db = Database::memory().unwrap();
//! db.exec("CREATE TABLE users", &[]).unwrap();
//! db.exec(
//!     "INSERT INTO users VALUES {name: \"Ava\", age: 33}",
//!     &[],
//! )
//! .unwrap();
//!
//! let docs = db
//!     .query("SELECT name FROM users WHERE age > ?", &[Param::positional(Value::Integer(30))])
//!     .unwrap()
//!     .collect()
//!     .unwrap();
//! assert_eq!(docs.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod database;
mod error;

pub use database::{Database, QueryResult};
pub use error::{Error, Result};

pub use docket_core::{Document, Path, PathFragment, Value, ValueKind};
pub use docket_engine::{Cancellation, Engine, MemoryEngine};
pub use docket_sql::{Param, Statement};
