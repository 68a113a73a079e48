//! Document storage for one table.
//!
//! A table owns a single engine store. Rows are codec-encoded documents;
//! keys are either the binary-sort encoding of the primary key value or a
//! store-scoped sequence number, so a sequential scan always yields rows
//! in key order.

use crate::binarysort;
use crate::catalog::TableInfo;
use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::index;
use crate::value::{Document, Value, ValueKind};
use docket_engine::{EngineError, EngineStore};

/// A handle on one table inside a transaction.
pub struct Table {
    info: TableInfo,
    store: Box<dyn EngineStore>,
}

impl Table {
    pub(crate) fn new(info: TableInfo, store: Box<dyn EngineStore>) -> Self {
        Self { info, store }
    }

    /// Returns the table metadata.
    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    /// Applies the table's field constraints to a document: injects
    /// defaults, converts values to declared types and checks NOT NULL.
    pub fn validate(&self, mut doc: Document) -> CoreResult<Document> {
        for fc in &self.info.field_constraints {
            let current = fc.path.resolve_document(&doc);

            if current.is_none() {
                if let Some(default) = &fc.default_value {
                    fc.path.set_document(&mut doc, default.clone())?;
                }
            }

            let current = fc.path.resolve_document(&doc);
            if fc.not_null || fc.primary_key {
                match &current {
                    None | Some(Value::Null) => {
                        return Err(CoreError::NotNullViolation(fc.path.to_string()))
                    }
                    _ => {}
                }
            }

            if let (Some(kind), Some(value)) = (fc.kind, &current) {
                if !value.is_null() && value.kind() != kind {
                    let converted = convert_declared(value, kind).ok_or_else(|| {
                        CoreError::IncompatibleType {
                            path: fc.path.to_string(),
                            expected: kind,
                            got: value.kind(),
                        }
                    })?;
                    fc.path.set_document(&mut doc, converted)?;
                }
            }
        }
        Ok(doc)
    }

    /// Computes the storage key for a validated document: the encoded
    /// primary key value when one is declared, otherwise the next store
    /// sequence number.
    pub fn generate_key(&self, doc: &Document) -> CoreResult<Vec<u8>> {
        match self.info.primary_key() {
            Some(pk) => {
                let value = pk
                    .path
                    .resolve_document(doc)
                    .ok_or_else(|| CoreError::NotNullViolation(pk.path.to_string()))?;
                encode_key_value(&value, pk.kind)
            }
            None => {
                let seq = self.store.next_sequence()?;
                let mut buf = Vec::with_capacity(8);
                binarysort::append_u64(&mut buf, seq);
                Ok(buf)
            }
        }
    }

    /// Encodes a candidate primary key value the way [`generate_key`]
    /// would, converting it to the declared key type first. Used by
    /// primary key range scans.
    ///
    /// [`generate_key`]: Table::generate_key
    pub fn encode_pk_value(&self, value: &Value) -> CoreResult<Vec<u8>> {
        let pk = self
            .info
            .primary_key()
            .ok_or_else(|| CoreError::Internal(format!("table {} has no primary key", self.info.name)))?;
        let converted = match pk.kind {
            Some(kind) if !value.is_null() && value.kind() != kind => {
                convert_declared(value, kind).ok_or_else(|| CoreError::IncompatibleType {
                    path: pk.path.to_string(),
                    expected: kind,
                    got: value.kind(),
                })?
            }
            _ => value.clone(),
        };
        encode_key_value(&converted, pk.kind)
    }

    /// Inserts a validated document under `key`.
    ///
    /// Fails with [`CoreError::DuplicateDocument`] if the key is taken.
    pub fn put_new(&self, key: &[u8], doc: &Document) -> CoreResult<()> {
        match self.store.get(key) {
            Ok(_) => return Err(CoreError::DuplicateDocument),
            Err(EngineError::KeyNotFound) => {}
            Err(err) => return Err(err.into()),
        }
        self.store.put(key, &codec::encode_document(doc))?;
        Ok(())
    }

    /// Returns the document stored under `key`.
    pub fn get(&self, key: &[u8]) -> CoreResult<Document> {
        match self.store.get(key) {
            Ok(bytes) => codec::decode_document(bytes.as_bytes()),
            Err(EngineError::KeyNotFound) => Err(CoreError::DocumentNotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Overwrites the document stored under `key`.
    ///
    /// Fails with [`CoreError::DocumentNotFound`] if no document lives
    /// there.
    pub fn replace(&self, key: &[u8], doc: &Document) -> CoreResult<()> {
        match self.store.get(key) {
            Ok(_) => {}
            Err(EngineError::KeyNotFound) => return Err(CoreError::DocumentNotFound),
            Err(err) => return Err(err.into()),
        }
        self.store.put(key, &codec::encode_document(doc))?;
        Ok(())
    }

    /// Deletes the document stored under `key`.
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        match self.store.delete(key) {
            Ok(()) => Ok(()),
            Err(EngineError::KeyNotFound) => Err(CoreError::DocumentNotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes every row.
    pub fn truncate(&self) -> CoreResult<()> {
        self.store.truncate()?;
        Ok(())
    }

    /// Visits every row in key order (reversed on demand). The visitor
    /// returns `false` to stop.
    pub fn iterate(
        &self,
        reverse: bool,
        mut visit: impl FnMut(&[u8], Document) -> CoreResult<bool>,
    ) -> CoreResult<()> {
        self.iterate_from(&[], reverse, &mut visit)
    }

    /// Visits rows starting at the given pivot key.
    pub fn iterate_from(
        &self,
        pivot: &[u8],
        reverse: bool,
        visit: &mut impl FnMut(&[u8], Document) -> CoreResult<bool>,
    ) -> CoreResult<()> {
        let mut it = self.store.iterator(reverse);
        it.seek(pivot)?;
        while it.valid() {
            let (key, bytes) = it.item().ok_or_else(|| {
                CoreError::Internal("valid iterator without item".to_string())
            })?;
            let doc = codec::decode_document(bytes.as_bytes())?;
            if !visit(key.as_bytes(), doc)? {
                break;
            }
            it.advance()?;
        }
        Ok(())
    }
}

/// Encodes a primary key value: fixed-width binary sort encoding when the
/// key has a declared type, tagged encoding otherwise.
pub(crate) fn encode_key_value(value: &Value, kind: Option<ValueKind>) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(9);
    match (kind, value) {
        (Some(ValueKind::Integer), Value::Integer(i)) => binarysort::append_i64(&mut buf, *i),
        (Some(ValueKind::Double), Value::Double(d)) => binarysort::append_f64(&mut buf, *d),
        (Some(ValueKind::Bool), Value::Bool(b)) => binarysort::append_bool(&mut buf, *b),
        (Some(ValueKind::Text), Value::Text(s)) => buf.extend_from_slice(s.as_bytes()),
        (Some(ValueKind::Blob), Value::Blob(b)) => buf.extend_from_slice(b),
        (Some(expected), v) => {
            return Err(CoreError::IncompatibleType {
                path: String::new(),
                expected,
                got: v.kind(),
            })
        }
        (None, v) => index::append_tagged_value(&mut buf, v, None)?,
    }
    if buf.is_empty() {
        return Err(CoreError::Internal("empty document key".to_string()));
    }
    Ok(buf)
}

/// Converts a value to a declared field type, when the conversion is
/// lossless: an integral double becomes an integer, an integer becomes a
/// double. Anything else is rejected.
fn convert_declared(value: &Value, kind: ValueKind) -> Option<Value> {
    match (value, kind) {
        (Value::Double(d), ValueKind::Integer) if d.fract() == 0.0 => {
            Some(Value::Integer(*d as i64))
        }
        (Value::Integer(i), ValueKind::Double) => Some(Value::Double(*i as f64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{table_store_name, FieldConstraint};
    use crate::path::Path;
    use docket_engine::{Engine, EngineTransaction, MemoryEngine, TxOptions};

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    fn setup(info: TableInfo) -> (Box<dyn EngineTransaction>, TableInfo) {
        let engine = MemoryEngine::new();
        let tx = engine.begin(TxOptions::read_write()).unwrap();
        tx.create_store(&table_store_name(&info.name)).unwrap();
        (tx, info)
    }

    fn open(tx: &dyn EngineTransaction, info: &TableInfo) -> Table {
        Table::new(info.clone(), tx.get_store(&info.store_name).unwrap())
    }

    #[test]
    fn test_sequence_keys_preserve_insertion_order() {
        let (tx, info) = setup(TableInfo::new("t"));
        let table = open(tx.as_ref(), &info);

        for i in 0..3 {
            let d = doc(&[("a", Value::Integer(i))]);
            let key = table.generate_key(&d).unwrap();
            table.put_new(&key, &d).unwrap();
        }

        let mut values = Vec::new();
        table
            .iterate(false, |_, d| {
                values.push(d.get("a").unwrap().clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(
            values,
            vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]
        );
    }

    #[test]
    fn test_primary_key_orders_rows() {
        let mut info = TableInfo::new("t");
        let mut pk = FieldConstraint::new(Path::field("id"));
        pk.kind = Some(ValueKind::Integer);
        pk.primary_key = true;
        info.add_constraint(pk).unwrap();
        let (tx, info) = setup(info);
        let table = open(tx.as_ref(), &info);

        for id in [2i64, 1, 3] {
            let d = table.validate(doc(&[("id", Value::Integer(id))])).unwrap();
            let key = table.generate_key(&d).unwrap();
            table.put_new(&key, &d).unwrap();
        }

        let mut ids = Vec::new();
        table
            .iterate(false, |_, d| {
                ids.push(d.get("id").unwrap().clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(
            ids,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
    }

    #[test]
    fn test_duplicate_primary_key_rejected() {
        let mut info = TableInfo::new("t");
        let mut pk = FieldConstraint::new(Path::field("id"));
        pk.primary_key = true;
        info.add_constraint(pk).unwrap();
        let (tx, info) = setup(info);
        let table = open(tx.as_ref(), &info);

        let d = doc(&[("id", Value::Integer(1))]);
        let key = table.generate_key(&d).unwrap();
        table.put_new(&key, &d).unwrap();
        assert_eq!(table.put_new(&key, &d), Err(CoreError::DuplicateDocument));
    }

    #[test]
    fn test_validate_not_null_and_defaults() {
        let mut info = TableInfo::new("t");
        let mut required = FieldConstraint::new(Path::field("name"));
        required.not_null = true;
        info.add_constraint(required).unwrap();
        let mut with_default = FieldConstraint::new(Path::field("level"));
        with_default.default_value = Some(Value::Integer(1));
        info.add_constraint(with_default).unwrap();
        let (tx, info) = setup(info);
        let table = open(tx.as_ref(), &info);

        let validated = table.validate(doc(&[("name", Value::text("x"))])).unwrap();
        assert_eq!(validated.get("level"), Some(&Value::Integer(1)));

        assert!(matches!(
            table.validate(doc(&[("level", Value::Integer(2))])),
            Err(CoreError::NotNullViolation(_))
        ));
        assert!(matches!(
            table.validate(doc(&[("name", Value::Null)])),
            Err(CoreError::NotNullViolation(_))
        ));
    }

    #[test]
    fn test_validate_type_conversion() {
        let mut info = TableInfo::new("t");
        let mut typed = FieldConstraint::new(Path::field("age"));
        typed.kind = Some(ValueKind::Integer);
        info.add_constraint(typed).unwrap();
        let (tx, info) = setup(info);
        let table = open(tx.as_ref(), &info);

        // A lossless double converts to the declared integer type.
        let validated = table.validate(doc(&[("age", Value::Double(42.0))])).unwrap();
        assert_eq!(validated.get("age"), Some(&Value::Integer(42)));

        assert!(matches!(
            table.validate(doc(&[("age", Value::Double(42.5))])),
            Err(CoreError::IncompatibleType { .. })
        ));
        assert!(matches!(
            table.validate(doc(&[("age", Value::text("42"))])),
            Err(CoreError::IncompatibleType { .. })
        ));
    }

    #[test]
    fn test_get_replace_delete() {
        let (tx, info) = setup(TableInfo::new("t"));
        let table = open(tx.as_ref(), &info);

        let d = doc(&[("a", Value::Integer(1))]);
        let key = table.generate_key(&d).unwrap();
        table.put_new(&key, &d).unwrap();

        assert_eq!(table.get(&key).unwrap(), d);

        let d2 = doc(&[("a", Value::Integer(2))]);
        table.replace(&key, &d2).unwrap();
        assert_eq!(table.get(&key).unwrap(), d2);

        table.delete(&key).unwrap();
        assert_eq!(table.get(&key), Err(CoreError::DocumentNotFound));
        assert_eq!(table.delete(&key), Err(CoreError::DocumentNotFound));
        assert_eq!(table.replace(&key, &d2), Err(CoreError::DocumentNotFound));
    }
}
