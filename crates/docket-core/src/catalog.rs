//! Table and index metadata.
//!
//! The schema itself is data: every table gets a row in the reserved
//! `__tables` table and every index a row in `__indexes`, both encoded
//! with the document codec. The [`Catalog`] type is the in-memory image of
//! those two tables, rebuilt when a database is opened and republished at
//! commit by the transaction that changed it.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::path::Path;
use crate::value::{Document, Value, ValueKind};

/// Name of the reserved table listing all tables.
pub const TABLES_TABLE: &str = "__tables";
/// Name of the reserved table listing all indexes.
pub const INDEXES_TABLE: &str = "__indexes";

/// Returns the engine store name backing a table.
pub fn table_store_name(table: &str) -> String {
    format!("t_{table}")
}

/// Returns the engine store name backing an index.
pub fn index_store_name(index: &str) -> String {
    format!("i_{index}")
}

/// Returns true for the reserved catalog tables, which user DDL and
/// writes may not touch.
pub fn is_reserved(table: &str) -> bool {
    table == TABLES_TABLE || table == INDEXES_TABLE
}

/// A constraint attached to one field path of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConstraint {
    /// The constrained path.
    pub path: Path,
    /// Declared type, if any. Inserted values are converted to it.
    pub kind: Option<ValueKind>,
    /// Whether this path is the table's primary key.
    pub primary_key: bool,
    /// Whether values at this path must be unique across the table.
    pub unique: bool,
    /// Whether the path must be present and non-null.
    pub not_null: bool,
    /// Value injected when the field is missing on insert.
    pub default_value: Option<Value>,
}

impl FieldConstraint {
    /// Creates a constraint on a path.
    pub fn new(path: Path) -> Self {
        Self {
            path,
            kind: None,
            primary_key: false,
            unique: false,
            not_null: false,
            default_value: None,
        }
    }

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.set("path", self.path.to_value());
        if let Some(kind) = self.kind {
            doc.set("type", Value::text(kind.to_string()));
        }
        if self.primary_key {
            doc.set("primary_key", Value::Bool(true));
        }
        if self.unique {
            doc.set("unique", Value::Bool(true));
        }
        if self.not_null {
            doc.set("not_null", Value::Bool(true));
        }
        if let Some(default) = &self.default_value {
            doc.set("default", default.clone());
        }
        doc
    }

    fn from_document(doc: &Document) -> CoreResult<Self> {
        let path = Path::from_value(
            doc.get("path")
                .ok_or_else(|| CoreError::Corrupted("constraint without path".to_string()))?,
        )?;
        let kind = match doc.get("type") {
            Some(Value::Text(name)) => Some(ValueKind::from_name(name).ok_or_else(|| {
                CoreError::Corrupted(format!("unknown field type {name}"))
            })?),
            _ => None,
        };
        Ok(Self {
            path,
            kind,
            primary_key: matches!(doc.get("primary_key"), Some(Value::Bool(true))),
            unique: matches!(doc.get("unique"), Some(Value::Bool(true))),
            not_null: matches!(doc.get("not_null"), Some(Value::Bool(true))),
            default_value: doc.get("default").cloned(),
        })
    }
}

/// Persistent metadata of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    /// Logical table name.
    pub name: String,
    /// Engine store backing the table. Stable across renames.
    pub store_name: String,
    /// Field constraints, at most one of which is a primary key.
    pub field_constraints: Vec<FieldConstraint>,
}

impl TableInfo {
    /// Creates metadata for a new table.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let store_name = table_store_name(&name);
        Self {
            name,
            store_name,
            field_constraints: Vec::new(),
        }
    }

    /// Returns the primary key constraint, if one is declared.
    pub fn primary_key(&self) -> Option<&FieldConstraint> {
        self.field_constraints.iter().find(|fc| fc.primary_key)
    }

    /// Adds a field constraint, enforcing the single-primary-key and
    /// unique-path invariants.
    pub fn add_constraint(&mut self, fc: FieldConstraint) -> CoreResult<()> {
        if fc.primary_key && self.primary_key().is_some() {
            return Err(CoreError::Internal(format!(
                "table {} already has a primary key",
                self.name
            )));
        }
        if self
            .field_constraints
            .iter()
            .any(|existing| existing.path == fc.path)
        {
            return Err(CoreError::Internal(format!(
                "duplicate constraint on {}",
                fc.path
            )));
        }
        self.field_constraints.push(fc);
        Ok(())
    }

    /// Encodes the metadata as a catalog row.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.set("name", Value::text(self.name.clone()));
        doc.set("store_name", Value::text(self.store_name.clone()));
        doc.set(
            "constraints",
            Value::Array(
                self.field_constraints
                    .iter()
                    .map(|fc| Value::Document(fc.to_document()))
                    .collect(),
            ),
        );
        doc
    }

    /// Decodes metadata from a catalog row.
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        let name = doc
            .get("name")
            .and_then(|v| v.as_text())
            .ok_or_else(|| CoreError::Corrupted("table row without name".to_string()))?
            .to_string();
        let store_name = doc
            .get("store_name")
            .and_then(|v| v.as_text())
            .ok_or_else(|| CoreError::Corrupted("table row without store".to_string()))?
            .to_string();
        let field_constraints = match doc.get("constraints") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Document(d) => FieldConstraint::from_document(d),
                    _ => Err(CoreError::Corrupted("bad constraint row".to_string())),
                })
                .collect::<CoreResult<Vec<_>>>()?,
            _ => Vec::new(),
        };
        Ok(Self {
            name,
            store_name,
            field_constraints,
        })
    }
}

/// Persistent metadata of one index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    /// Index name, unique across the whole database.
    pub name: String,
    /// Table the index belongs to.
    pub table_name: String,
    /// Engine store backing the index.
    pub store_name: String,
    /// Indexed paths, in order.
    pub paths: Vec<Path>,
    /// Declared type per path; `None` leaves the slot unconstrained.
    pub kinds: Vec<Option<ValueKind>>,
    /// Whether the index rejects duplicate value tuples.
    pub unique: bool,
}

impl IndexInfo {
    /// Creates metadata for a new index.
    pub fn new(name: impl Into<String>, table_name: impl Into<String>, paths: Vec<Path>) -> Self {
        let name = name.into();
        let store_name = index_store_name(&name);
        let kinds = vec![None; paths.len()];
        Self {
            name,
            table_name: table_name.into(),
            store_name,
            paths,
            kinds,
            unique: false,
        }
    }

    /// Marks the index unique.
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Declares the value types of the indexed paths.
    pub fn with_kinds(mut self, kinds: Vec<Option<ValueKind>>) -> Self {
        debug_assert_eq!(kinds.len(), self.paths.len());
        self.kinds = kinds;
        self
    }

    /// Encodes the metadata as a catalog row.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.set("name", Value::text(self.name.clone()));
        doc.set("table_name", Value::text(self.table_name.clone()));
        doc.set("store_name", Value::text(self.store_name.clone()));
        doc.set(
            "paths",
            Value::Array(self.paths.iter().map(Path::to_value).collect()),
        );
        doc.set(
            "types",
            Value::Array(
                self.kinds
                    .iter()
                    .map(|kind| match kind {
                        Some(kind) => Value::text(kind.to_string()),
                        None => Value::Null,
                    })
                    .collect(),
            ),
        );
        doc.set("unique", Value::Bool(self.unique));
        doc
    }

    /// Decodes metadata from a catalog row.
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        let text_field = |field: &str| -> CoreResult<String> {
            doc.get(field)
                .and_then(|v| v.as_text())
                .map(str::to_string)
                .ok_or_else(|| CoreError::Corrupted(format!("index row without {field}")))
        };
        let paths = match doc.get("paths") {
            Some(Value::Array(items)) => items
                .iter()
                .map(Path::from_value)
                .collect::<CoreResult<Vec<_>>>()?,
            _ => return Err(CoreError::Corrupted("index row without paths".to_string())),
        };
        let kinds = match doc.get("types") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Null => Ok(None),
                    Value::Text(name) => ValueKind::from_name(name).map(Some).ok_or_else(|| {
                        CoreError::Corrupted(format!("unknown index type {name}"))
                    }),
                    _ => Err(CoreError::Corrupted("bad index type".to_string())),
                })
                .collect::<CoreResult<Vec<_>>>()?,
            _ => vec![None; paths.len()],
        };
        Ok(Self {
            name: text_field("name")?,
            table_name: text_field("table_name")?,
            store_name: text_field("store_name")?,
            paths,
            kinds,
            unique: matches!(doc.get("unique"), Some(Value::Bool(true))),
        })
    }
}

/// In-memory image of the two reserved catalog tables.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, TableInfo>,
    indexes: HashMap<String, IndexInfo>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a table. The reserved catalog tables resolve to synthetic
    /// constraint-free metadata so they can be read like any other table.
    pub fn get_table(&self, name: &str) -> CoreResult<TableInfo> {
        if is_reserved(name) {
            return Ok(TableInfo::new(name));
        }
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::TableNotFound(name.to_string()))
    }

    /// Returns true if the table exists.
    pub fn table_exists(&self, name: &str) -> bool {
        is_reserved(name) || self.tables.contains_key(name)
    }

    /// Looks up an index.
    pub fn get_index(&self, name: &str) -> CoreResult<IndexInfo> {
        self.indexes
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::IndexNotFound(name.to_string()))
    }

    /// Returns true if the index exists.
    pub fn index_exists(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    /// Lists table names in sorted order.
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Lists index names in sorted order.
    pub fn list_indexes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the indexes declared on a table, sorted by name.
    pub fn indexes_for_table(&self, table: &str) -> Vec<IndexInfo> {
        let mut indexes: Vec<IndexInfo> = self
            .indexes
            .values()
            .filter(|info| info.table_name == table)
            .cloned()
            .collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        indexes
    }

    pub(crate) fn insert_table(&mut self, info: TableInfo) {
        self.tables.insert(info.name.clone(), info);
    }

    pub(crate) fn remove_table(&mut self, name: &str) -> Option<TableInfo> {
        self.tables.remove(name)
    }

    pub(crate) fn insert_index(&mut self, info: IndexInfo) {
        self.indexes.insert(info.name.clone(), info);
    }

    pub(crate) fn remove_index(&mut self, name: &str) -> Option<IndexInfo> {
        self.indexes.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathFragment;

    #[test]
    fn test_table_info_roundtrip() {
        let mut info = TableInfo::new("users");
        let mut pk = FieldConstraint::new(Path::field("id"));
        pk.kind = Some(ValueKind::Integer);
        pk.primary_key = true;
        info.add_constraint(pk).unwrap();
        let mut email = FieldConstraint::new(Path::field("email"));
        email.unique = true;
        email.not_null = true;
        email.default_value = Some(Value::text("none"));
        info.add_constraint(email).unwrap();

        let decoded = TableInfo::from_document(&info.to_document()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_index_info_roundtrip() {
        let info = IndexInfo::new(
            "ix_users_age",
            "users",
            vec![
                Path::field("age"),
                Path::new(vec![
                    PathFragment::Field("address".to_string()),
                    PathFragment::Field("city".to_string()),
                ]),
            ],
        )
        .with_unique(true)
        .with_kinds(vec![Some(ValueKind::Integer), None]);

        let decoded = IndexInfo::from_document(&info.to_document()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_single_primary_key_enforced() {
        let mut info = TableInfo::new("t");
        let mut pk1 = FieldConstraint::new(Path::field("a"));
        pk1.primary_key = true;
        info.add_constraint(pk1).unwrap();

        let mut pk2 = FieldConstraint::new(Path::field("b"));
        pk2.primary_key = true;
        assert!(info.add_constraint(pk2).is_err());
    }

    #[test]
    fn test_reserved_tables_resolve() {
        let catalog = Catalog::new();
        assert!(catalog.get_table(TABLES_TABLE).is_ok());
        assert!(catalog.get_table(INDEXES_TABLE).is_ok());
        assert!(matches!(
            catalog.get_table("missing"),
            Err(CoreError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_store_names() {
        assert_eq!(table_store_name("users"), "t_users");
        assert_eq!(index_store_name("ix"), "i_ix");
        assert_eq!(table_store_name(TABLES_TABLE), "t___tables");
        assert!(is_reserved("__tables"));
        assert!(!is_reserved("users"));
    }
}
