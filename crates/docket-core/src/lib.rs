//! # docket-core
//!
//! Core building blocks of the Docket document database:
//!
//! - [`Value`]/[`Document`]/[`Path`]: the dynamic document value model
//! - [`binarysort`]: sort-preserving binary encodings for primitive keys
//! - [`codec`]: the document <-> bytes storage codec
//! - [`catalog`]: table and index metadata, persisted as rows of reserved
//!   system tables
//! - [`Table`]/[`Index`]: document and index stores over one engine store
//! - [`Database`]/[`Transaction`]: the transaction manager tying catalog
//!   mutations, index maintenance and rollback together

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binarysort;
pub mod catalog;
pub mod codec;
mod database;
mod error;
mod index;
mod path;
mod table;
mod value;

pub use database::{Database, Transaction};
pub use error::{CoreError, CoreResult};
pub use index::Index;
pub use path::{Path, PathFragment};
pub use table::Table;
pub use value::{Document, Value, ValueKind};
