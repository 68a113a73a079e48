//! Paths into documents.
//!
//! A path is a non-empty list of fragments, each either a field name or an
//! array index. Resolving a path against a value walks the fragments; any
//! missing fragment yields nothing rather than an error, which the
//! expression layer maps to NULL.

use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::value::{Document, Value};

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathFragment {
    /// Descend into a document field.
    Field(String),
    /// Descend into an array element.
    Index(usize),
}

impl fmt::Display for PathFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathFragment::Field(name) => write!(f, "{name}"),
            PathFragment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// A non-empty ordered list of fragments addressing a value inside a
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    fragments: Vec<PathFragment>,
}

impl Path {
    /// Creates a path from fragments.
    pub fn new(fragments: Vec<PathFragment>) -> Self {
        debug_assert!(!fragments.is_empty());
        Self { fragments }
    }

    /// Creates a single-field path.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            fragments: vec![PathFragment::Field(name.into())],
        }
    }

    /// Appends a fragment.
    pub fn push(&mut self, fragment: PathFragment) {
        self.fragments.push(fragment);
    }

    /// Returns the fragments.
    pub fn fragments(&self) -> &[PathFragment] {
        &self.fragments
    }

    /// Returns the field name if this is a single-field path.
    pub fn as_field(&self) -> Option<&str> {
        match self.fragments.as_slice() {
            [PathFragment::Field(name)] => Some(name),
            _ => None,
        }
    }

    /// Returns the leading field name, if the path starts with one.
    pub fn first_field(&self) -> Option<&str> {
        match self.fragments.first() {
            Some(PathFragment::Field(name)) => Some(name),
            _ => None,
        }
    }

    /// Resolves the path against a document.
    pub fn resolve_document(&self, doc: &Document) -> Option<Value> {
        let mut current = match self.fragments.first()? {
            PathFragment::Field(name) => doc.get(name)?.clone(),
            PathFragment::Index(_) => return None,
        };
        for fragment in &self.fragments[1..] {
            current = descend(&current, fragment)?;
        }
        Some(current)
    }

    /// Resolves the path against an arbitrary value.
    pub fn resolve(&self, value: &Value) -> Option<Value> {
        let mut current = value.clone();
        for fragment in &self.fragments {
            current = descend(&current, fragment)?;
        }
        Some(current)
    }

    /// Writes `value` at this path inside `doc`, creating missing
    /// intermediate documents along the way.
    ///
    /// Descending through an existing non-document with a field fragment,
    /// or indexing outside an array's bounds, fails with
    /// [`CoreError::InvalidPath`].
    pub fn set_document(&self, doc: &mut Document, value: Value) -> CoreResult<()> {
        set_in_document(doc, &self.fragments, value, self)
    }

    /// Encodes the path as a plain value, for storage in catalog rows.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.fragments
                .iter()
                .map(|fragment| match fragment {
                    PathFragment::Field(name) => Value::text(name.clone()),
                    PathFragment::Index(i) => Value::Integer(*i as i64),
                })
                .collect(),
        )
    }

    /// Decodes a path previously encoded with [`Path::to_value`].
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| CoreError::Corrupted("path is not an array".to_string()))?;
        if items.is_empty() {
            return Err(CoreError::Corrupted("empty path".to_string()));
        }
        let fragments = items
            .iter()
            .map(|item| match item {
                Value::Text(name) => Ok(PathFragment::Field(name.clone())),
                Value::Integer(i) if *i >= 0 => Ok(PathFragment::Index(*i as usize)),
                _ => Err(CoreError::Corrupted("bad path fragment".to_string())),
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self { fragments })
    }
}

fn descend(value: &Value, fragment: &PathFragment) -> Option<Value> {
    match (value, fragment) {
        (Value::Document(doc), PathFragment::Field(name)) => doc.get(name).cloned(),
        (Value::Array(items), PathFragment::Index(i)) => items.get(*i).cloned(),
        _ => None,
    }
}

fn set_in_document(
    doc: &mut Document,
    fragments: &[PathFragment],
    value: Value,
    full: &Path,
) -> CoreResult<()> {
    let (first, rest) = fragments
        .split_first()
        .ok_or_else(|| CoreError::InvalidPath(full.to_string()))?;
    let name = match first {
        PathFragment::Field(name) => name,
        PathFragment::Index(_) => return Err(CoreError::InvalidPath(full.to_string())),
    };

    if rest.is_empty() {
        doc.set(name.clone(), value);
        return Ok(());
    }

    if !doc.contains(name) {
        doc.set(name.clone(), Value::Document(Document::new()));
    }
    match doc.get_mut(name) {
        Some(Value::Document(inner)) => set_in_document(inner, rest, value, full),
        Some(Value::Array(items)) => set_in_array(items, rest, value, full),
        _ => Err(CoreError::InvalidPath(full.to_string())),
    }
}

fn set_in_array(
    items: &mut [Value],
    fragments: &[PathFragment],
    value: Value,
    full: &Path,
) -> CoreResult<()> {
    let (first, rest) = fragments
        .split_first()
        .ok_or_else(|| CoreError::InvalidPath(full.to_string()))?;
    let idx = match first {
        PathFragment::Index(i) => *i,
        PathFragment::Field(_) => return Err(CoreError::InvalidPath(full.to_string())),
    };
    let slot = items
        .get_mut(idx)
        .ok_or_else(|| CoreError::InvalidPath(full.to_string()))?;

    if rest.is_empty() {
        *slot = value;
        return Ok(());
    }
    match slot {
        Value::Document(inner) => set_in_document(inner, rest, value, full),
        Value::Array(inner) => set_in_array(inner, rest, value, full),
        _ => Err(CoreError::InvalidPath(full.to_string())),
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, fragment) in self.fragments.iter().enumerate() {
            match fragment {
                PathFragment::Field(name) if i == 0 => write!(f, "{name}")?,
                PathFragment::Field(name) => write!(f, ".{name}")?,
                PathFragment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_resolve_nested() {
        let inner = doc(&[("b", Value::Integer(42))]);
        let d = doc(&[
            ("a", Value::Document(inner)),
            (
                "list",
                Value::Array(vec![Value::Integer(10), Value::Integer(20)]),
            ),
        ]);

        let p = Path::new(vec![
            PathFragment::Field("a".to_string()),
            PathFragment::Field("b".to_string()),
        ]);
        assert_eq!(p.resolve_document(&d), Some(Value::Integer(42)));

        let p = Path::new(vec![
            PathFragment::Field("list".to_string()),
            PathFragment::Index(1),
        ]);
        assert_eq!(p.resolve_document(&d), Some(Value::Integer(20)));
    }

    #[test]
    fn test_resolve_missing_yields_none() {
        let d = doc(&[("a", Value::Integer(1))]);
        assert_eq!(Path::field("missing").resolve_document(&d), None);

        let p = Path::new(vec![
            PathFragment::Field("a".to_string()),
            PathFragment::Field("b".to_string()),
        ]);
        assert_eq!(p.resolve_document(&d), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut d = Document::new();
        let p = Path::new(vec![
            PathFragment::Field("a".to_string()),
            PathFragment::Field("b".to_string()),
        ]);
        p.set_document(&mut d, Value::Integer(7)).unwrap();
        assert_eq!(p.resolve_document(&d), Some(Value::Integer(7)));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut d = doc(&[("a", Value::Integer(1))]);
        let p = Path::new(vec![
            PathFragment::Field("a".to_string()),
            PathFragment::Field("b".to_string()),
        ]);
        assert!(matches!(
            p.set_document(&mut d, Value::Integer(7)),
            Err(CoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_path_value_roundtrip() {
        let p = Path::new(vec![
            PathFragment::Field("a".to_string()),
            PathFragment::Index(3),
            PathFragment::Field("b".to_string()),
        ]);
        assert_eq!(Path::from_value(&p.to_value()).unwrap(), p);
        assert_eq!(p.to_string(), "a[3].b");
    }
}
