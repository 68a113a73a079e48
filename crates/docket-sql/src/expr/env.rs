//! Evaluation environment.

use docket_core::{Document, Transaction, Value};

/// A statement parameter binding, either positional or named.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Name for `$name` placeholders, `None` for positional ones.
    pub name: Option<String>,
    /// Bound value.
    pub value: Value,
}

impl Param {
    /// Creates a positional parameter.
    pub fn positional(value: Value) -> Self {
        Self { name: None, value }
    }

    /// Creates a named parameter.
    pub fn named(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }
}

/// Per-statement evaluation context threaded through expression
/// evaluation and stream iteration.
///
/// Created once per statement execution and mutated in place by the
/// stream operators; it never crosses threads.
pub struct Environment<'a> {
    /// The transaction the statement runs in.
    pub tx: &'a Transaction,
    /// Bound parameters, positional or named.
    pub params: &'a [Param],
    /// The current document, if the stream has produced one.
    pub doc: Option<Document>,
    /// The current document key.
    pub key: Option<Vec<u8>>,
    /// The current group tag set by GroupBy: rendered expression and
    /// group value.
    pub group: Option<(String, Value)>,
}

impl<'a> Environment<'a> {
    /// Creates an environment with no current document.
    pub fn new(tx: &'a Transaction, params: &'a [Param]) -> Self {
        Self {
            tx,
            params,
            doc: None,
            key: None,
            group: None,
        }
    }

    /// Looks up a positional parameter (1-based).
    pub fn positional_param(&self, n: usize) -> Option<&Value> {
        self.params
            .iter()
            .filter(|p| p.name.is_none())
            .nth(n.checked_sub(1)?)
            .map(|p| &p.value)
    }

    /// Looks up a named parameter.
    pub fn named_param(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .map(|p| &p.value)
    }
}
