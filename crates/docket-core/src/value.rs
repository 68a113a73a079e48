//! Dynamic document value model.
//!
//! A [`Value`] is a tagged union over the eight document types. Comparison
//! dispatch is by the pair of tags: numeric types promote to each other,
//! everything else only compares within its own type. The "undefined"
//! cases of three-valued logic surface as `None` from [`Value::compare`];
//! the expression layer turns them into SQL NULL.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Discriminant of a [`Value`], also used for declared field types.
///
/// The order of the variants defines the sort regions used by indexes:
/// values of a lower kind always sort before values of a higher kind,
/// except Integer and Double which share the numeric region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// The NULL type.
    Null,
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit IEEE-754 float.
    Double,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Blob,
    /// Ordered list of values.
    Array,
    /// Ordered field -> value mapping.
    Document,
}

impl ValueKind {
    /// Parses a kind from its lowercase name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "null" => Some(ValueKind::Null),
            "bool" => Some(ValueKind::Bool),
            "integer" => Some(ValueKind::Integer),
            "double" => Some(ValueKind::Double),
            "text" => Some(ValueKind::Text),
            "blob" => Some(ValueKind::Blob),
            "array" => Some(ValueKind::Array),
            "document" => Some(ValueKind::Document),
            _ => None,
        }
    }

    /// Returns true for Integer and Double.
    pub fn is_number(self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Double)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Double => "double",
            ValueKind::Text => "text",
            ValueKind::Blob => "blob",
            ValueKind::Array => "array",
            ValueKind::Document => "document",
        };
        write!(f, "{name}")
    }
}

/// A dynamically typed document value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The NULL value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit float.
    Double(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
    /// An ordered list of values.
    Array(Vec<Value>),
    /// A nested document.
    Document(Document),
}

impl Value {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Creates a blob value.
    pub fn blob(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Blob(bytes.into())
    }

    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Integer(_) => ValueKind::Integer,
            Value::Double(_) => ValueKind::Double,
            Value::Text(_) => ValueKind::Text,
            Value::Blob(_) => ValueKind::Blob,
            Value::Array(_) => ValueKind::Array,
            Value::Document(_) => ValueKind::Document,
        }
    }

    /// Returns true if this is the NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this value counts as true in a filter: non-null,
    /// non-zero, non-empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Blob(b) => !b.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Document(d) => !d.is_empty(),
        }
    }

    /// Returns the value as an i64 if it is an Integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as an f64 if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the value as text if it is Text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a document if it is one.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the value as an array if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Compares two values under the document ordering rules.
    ///
    /// Returns `None` where the comparison is undefined: when either side
    /// is NULL, or across types outside the numeric pair. The expression
    /// layer maps `None` to SQL NULL.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Integer(a), Double(b)) => (*a as f64).partial_cmp(b),
            (Double(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Text(a), Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Blob(a), Blob(b)) => Some(a.cmp(b)),
            (Array(a), Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (Document(a), Document(b)) => {
                for ((na, va), (nb, vb)) in a.iter().zip(b.iter()) {
                    match na.cmp(nb) {
                        Ordering::Equal => {}
                        ord => return Some(ord),
                    }
                    match va.compare(vb)? {
                        Ordering::Equal => {}
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Semantic equality: Integer and Double promote, NULL equals NULL,
    /// all other cross-type pairs are unequal.
    pub fn is_equal(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Null, _) | (_, Null) => false,
            (Integer(a), Double(b)) => (*a as f64) == *b,
            (Double(a), Integer(b)) => *a == (*b as f64),
            (Array(a), Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.is_equal(y))
            }
            (Document(a), Document(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((na, va), (nb, vb))| na == nb && va.is_equal(vb))
            }
            _ => self == other,
        }
    }

    /// Total ordering across all kinds, used by Sort and index layouts:
    /// Null < Bool < numbers < Text < Blob < Array < Document.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let ra = self.sort_region();
        let rb = other.sort_region();
        if ra != rb {
            return ra.cmp(&rb);
        }
        self.compare(other).unwrap_or(Ordering::Equal)
    }

    fn sort_region(&self) -> u8 {
        match self.kind() {
            ValueKind::Null => 0,
            ValueKind::Bool => 1,
            ValueKind::Integer | ValueKind::Double => 2,
            ValueKind::Text => 3,
            ValueKind::Blob => 4,
            ValueKind::Array => 5,
            ValueKind::Document => 6,
        }
    }

    /// Casts this value to the target kind.
    ///
    /// NULL casts to NULL regardless of the target. Conversions that would
    /// lose information fail with [`CoreError::InvalidCast`].
    pub fn cast(&self, to: ValueKind) -> CoreResult<Value> {
        if self.kind() == to {
            return Ok(self.clone());
        }
        let fail = || CoreError::InvalidCast {
            from: self.kind(),
            to,
        };

        match (self, to) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Integer(i), ValueKind::Bool) => Ok(Value::Bool(*i != 0)),
            (Value::Text(s), ValueKind::Bool) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            (Value::Bool(b), ValueKind::Integer) => Ok(Value::Integer(i64::from(*b))),
            (Value::Double(d), ValueKind::Integer) => Ok(Value::Integer(*d as i64)),
            (Value::Text(s), ValueKind::Integer) => {
                s.parse::<i64>().map(Value::Integer).map_err(|_| fail())
            }
            (Value::Integer(i), ValueKind::Double) => Ok(Value::Double(*i as f64)),
            (Value::Text(s), ValueKind::Double) => {
                s.parse::<f64>().map(Value::Double).map_err(|_| fail())
            }
            (Value::Bool(b), ValueKind::Text) => Ok(Value::text(b.to_string())),
            (Value::Integer(i), ValueKind::Text) => Ok(Value::text(i.to_string())),
            (Value::Double(d), ValueKind::Text) => Ok(Value::text(d.to_string())),
            (Value::Text(s), ValueKind::Blob) => Ok(Value::Blob(s.clone().into_bytes())),
            _ => Err(fail()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => {
                if d.is_finite() && d.fract() == 0.0 {
                    write!(f, "{d:.1}")
                } else {
                    write!(f, "{d}")
                }
            }
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Blob(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Document(d) => write!(f, "{d}"),
        }
    }
}

/// An ordered field -> value mapping that preserves insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing its value in place if it already exists
    /// and appending it otherwise.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Returns the value of a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Returns a mutable reference to the value of a field.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns true if the document contains the field.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (name, value) in iter {
            doc.set(name, value);
        }
        doc
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_promotion() {
        assert!(Value::Integer(10).is_equal(&Value::Double(10.0)));
        assert_eq!(
            Value::Integer(10).compare(&Value::Double(10.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Double(2.5).compare(&Value::Integer(2)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_null_comparison_is_undefined() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
        assert_eq!(Value::Integer(1).compare(&Value::Null), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
        // IS-style equality is still defined.
        assert!(Value::Null.is_equal(&Value::Null));
    }

    #[test]
    fn test_cross_type_comparison() {
        assert!(!Value::Integer(1).is_equal(&Value::text("1")));
        assert_eq!(Value::Integer(1).compare(&Value::text("1")), None);
        assert_eq!(Value::Bool(true).compare(&Value::Integer(1)), None);
    }

    #[test]
    fn test_text_compares_by_bytes() {
        assert_eq!(
            Value::text("abc").compare(&Value::text("abd")),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::text("Z").compare(&Value::text("a")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_array_comparison() {
        let a = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        let b = Value::Array(vec![Value::Integer(1), Value::Integer(3)]);
        let c = Value::Array(vec![Value::Integer(1)]);
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(c.compare(&a), Some(Ordering::Less));
        assert!(a.is_equal(&a.clone()));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(!Value::text("").is_truthy());
        assert!(Value::Integer(-1).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn test_sort_regions() {
        assert_eq!(
            Value::Null.sort_cmp(&Value::Bool(false)),
            Ordering::Less
        );
        assert_eq!(
            Value::Bool(true).sort_cmp(&Value::Integer(0)),
            Ordering::Less
        );
        assert_eq!(
            Value::Integer(9).sort_cmp(&Value::text("")),
            Ordering::Less
        );
        assert_eq!(
            Value::Double(1.5).sort_cmp(&Value::Integer(2)),
            Ordering::Less
        );
    }

    #[test]
    fn test_cast() {
        assert_eq!(
            Value::text("42").cast(ValueKind::Integer).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            Value::Integer(1).cast(ValueKind::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::Double(3.7).cast(ValueKind::Integer).unwrap(),
            Value::Integer(3)
        );
        assert!(Value::text("abc").cast(ValueKind::Integer).is_err());
        assert_eq!(Value::Null.cast(ValueKind::Integer).unwrap(), Value::Null);
    }

    #[test]
    fn test_document_insertion_order() {
        let mut doc = Document::new();
        doc.set("b", Value::Integer(1));
        doc.set("a", Value::Integer(2));
        doc.set("b", Value::Integer(3));

        let names: Vec<&str> = doc.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(doc.get("b"), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_document_display() {
        let mut doc = Document::new();
        doc.set("a", Value::Integer(1));
        doc.set("s", Value::text("x"));
        assert_eq!(doc.to_string(), r#"{a: 1, s: "x"}"#);
    }
}
