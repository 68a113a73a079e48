//! Database handle and transaction manager.
//!
//! [`Database`] owns the storage engine and the in-memory catalog image.
//! [`Transaction`] wraps one engine transaction and layers catalog
//! mutations, constraint enforcement and index maintenance on top of it.
//! Catalog changes are made on a transaction-local copy and republished
//! to the shared image at commit, so concurrent readers keep seeing the
//! pre-transaction catalog until then.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::catalog::{
    self, Catalog, FieldConstraint, IndexInfo, TableInfo, INDEXES_TABLE, TABLES_TABLE,
};
use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::index::Index;
use crate::table::Table;
use crate::value::{Document, Value};
use docket_engine::{
    Cancellation, Engine, EngineError, EngineStore, EngineTransaction, TxOptions,
};

/// A collection of tables persisted in a pluggable storage engine.
pub struct Database {
    engine: Box<dyn Engine>,
    catalog: Arc<RwLock<Catalog>>,
}

impl Database {
    /// Opens a database over the given engine, creating the reserved
    /// catalog stores on first use and loading the catalog image.
    pub fn new(engine: Box<dyn Engine>) -> CoreResult<Self> {
        let db = Self {
            engine,
            catalog: Arc::new(RwLock::new(Catalog::new())),
        };

        let mut tx = db.begin(true)?;
        for table in [TABLES_TABLE, INDEXES_TABLE] {
            match tx.tx.create_store(&catalog::table_store_name(table)) {
                Ok(()) | Err(EngineError::StoreAlreadyExists(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        tx.load_catalog()?;
        tx.commit()?;
        Ok(db)
    }

    /// Begins a transaction.
    pub fn begin(&self, writable: bool) -> CoreResult<Transaction> {
        self.begin_with(writable, Cancellation::new())
    }

    /// Begins a transaction carrying a cancellation token.
    pub fn begin_with(&self, writable: bool, cancel: Cancellation) -> CoreResult<Transaction> {
        let opts = TxOptions {
            read_only: !writable,
            cancel,
        };
        let tx = self.engine.begin(opts)?;
        let catalog = self.catalog.read().clone();
        Ok(Transaction {
            tx,
            writable,
            shared_catalog: Arc::clone(&self.catalog),
            catalog,
            catalog_dirty: false,
        })
    }
}

/// One unit of work over the database.
///
/// Consuming [`commit`](Transaction::commit) publishes engine writes and
/// catalog changes together; [`rollback`](Transaction::rollback) discards
/// both.
pub struct Transaction {
    tx: Box<dyn EngineTransaction>,
    writable: bool,
    shared_catalog: Arc<RwLock<Catalog>>,
    catalog: Catalog,
    catalog_dirty: bool,
}

impl Transaction {
    /// Reports whether this transaction accepts writes.
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Returns the catalog as seen by this transaction.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Makes the transaction's writes visible and publishes its catalog
    /// changes.
    pub fn commit(mut self) -> CoreResult<()> {
        self.tx.commit()?;
        if self.catalog_dirty {
            *self.shared_catalog.write() = self.catalog;
        }
        Ok(())
    }

    /// Reverts every change made through this transaction.
    pub fn rollback(mut self) -> CoreResult<()> {
        self.tx.rollback()?;
        Ok(())
    }

    // =========================================================================
    // Catalog operations
    // =========================================================================

    /// Creates a table from its metadata.
    pub fn create_table(&mut self, info: TableInfo) -> CoreResult<()> {
        if catalog::is_reserved(&info.name) {
            return Err(CoreError::ReadOnlyTable(info.name));
        }
        if self.catalog.table_exists(&info.name) {
            return Err(CoreError::TableAlreadyExists(info.name));
        }

        self.tx.create_store(&info.store_name)?;
        self.persist_table(&info)?;
        debug!(table = %info.name, "created table");
        self.catalog.insert_table(info);
        self.catalog_dirty = true;
        Ok(())
    }

    /// Drops a table along with all its indexes.
    pub fn drop_table(&mut self, name: &str) -> CoreResult<()> {
        if catalog::is_reserved(name) {
            return Err(CoreError::ReadOnlyTable(name.to_string()));
        }
        let info = self.catalog.get_table(name)?;

        for index in self.catalog.indexes_for_table(name) {
            self.drop_index(&index.name)?;
        }

        self.tx.drop_store(&info.store_name)?;
        self.catalog_store(TABLES_TABLE)?.delete(name.as_bytes())?;
        debug!(table = %name, "dropped table");
        self.catalog.remove_table(name);
        self.catalog_dirty = true;
        Ok(())
    }

    /// Renames a table. The backing store keeps its name, so the
    /// operation only rewrites metadata.
    pub fn rename_table(&mut self, old: &str, new: &str) -> CoreResult<()> {
        if catalog::is_reserved(old) {
            return Err(CoreError::ReadOnlyTable(old.to_string()));
        }
        if self.catalog.table_exists(new) {
            return Err(CoreError::TableAlreadyExists(new.to_string()));
        }
        let mut info = self.catalog.get_table(old)?;
        info.name = new.to_string();

        let tables = self.catalog_store(TABLES_TABLE)?;
        tables.delete(old.as_bytes())?;
        tables.put(
            new.as_bytes(),
            &codec::encode_document(&info.to_document()),
        )?;

        for mut index in self.catalog.indexes_for_table(old) {
            index.table_name = new.to_string();
            self.persist_index(&index)?;
            self.catalog.insert_index(index);
        }

        debug!(from = %old, to = %new, "renamed table");
        self.catalog.remove_table(old);
        self.catalog.insert_table(info);
        self.catalog_dirty = true;
        Ok(())
    }

    /// Adds a field constraint to an existing table.
    pub fn add_field_constraint(&mut self, table: &str, fc: FieldConstraint) -> CoreResult<()> {
        if catalog::is_reserved(table) {
            return Err(CoreError::ReadOnlyTable(table.to_string()));
        }
        let mut info = self.catalog.get_table(table)?;
        info.add_constraint(fc)?;
        self.persist_table(&info)?;
        self.catalog.insert_table(info);
        self.catalog_dirty = true;
        Ok(())
    }

    /// Creates an index and backfills it from its table.
    pub fn create_index(&mut self, info: IndexInfo) -> CoreResult<()> {
        if catalog::is_reserved(&info.table_name) {
            return Err(CoreError::ReadOnlyTable(info.table_name));
        }
        if !self.catalog.table_exists(&info.table_name) {
            return Err(CoreError::TableNotFound(info.table_name));
        }
        if self.catalog.index_exists(&info.name) {
            return Err(CoreError::IndexAlreadyExists(info.name));
        }

        self.tx.create_store(&info.store_name)?;
        self.persist_index(&info)?;
        debug!(index = %info.name, table = %info.table_name, "created index");
        self.catalog.insert_index(info.clone());
        self.catalog_dirty = true;
        self.build_index(&info)?;
        Ok(())
    }

    /// Drops an index.
    pub fn drop_index(&mut self, name: &str) -> CoreResult<()> {
        let info = self.catalog.get_index(name)?;
        self.tx.drop_store(&info.store_name)?;
        self.catalog_store(INDEXES_TABLE)?.delete(name.as_bytes())?;
        debug!(index = %name, "dropped index");
        self.catalog.remove_index(name);
        self.catalog_dirty = true;
        Ok(())
    }

    /// Truncates an index and rebuilds it from its table.
    pub fn reindex(&self, name: &str) -> CoreResult<()> {
        let info = self.catalog.get_index(name)?;
        self.get_index(name)?.truncate()?;
        self.build_index(&info)
    }

    /// Rebuilds every index in the database.
    pub fn reindex_all(&self) -> CoreResult<()> {
        for name in self.catalog.list_indexes() {
            self.reindex(&name)?;
        }
        Ok(())
    }

    /// Lists table names.
    pub fn list_tables(&self) -> Vec<String> {
        self.catalog.list_tables()
    }

    /// Lists index names.
    pub fn list_indexes(&self) -> Vec<String> {
        self.catalog.list_indexes()
    }

    // =========================================================================
    // Data access
    // =========================================================================

    /// Returns a handle on a table.
    pub fn get_table(&self, name: &str) -> CoreResult<Table> {
        let info = self.catalog.get_table(name)?;
        let store = self.tx.get_store(&info.store_name)?;
        Ok(Table::new(info, store))
    }

    /// Returns a handle on an index.
    pub fn get_index(&self, name: &str) -> CoreResult<Index> {
        let info = self.catalog.get_index(name)?;
        let store = self.tx.get_store(&info.store_name)?;
        Ok(Index::new(info, store))
    }

    /// Inserts a document into a table: validates constraints, assigns a
    /// key, preflights unique indexes, then writes the row and every
    /// index entry. Returns the key and the document as stored.
    pub fn insert_document(
        &self,
        table_name: &str,
        doc: Document,
    ) -> CoreResult<(Vec<u8>, Document)> {
        if catalog::is_reserved(table_name) {
            return Err(CoreError::ReadOnlyTable(table_name.to_string()));
        }
        let table = self.get_table(table_name)?;
        let doc = table.validate(doc)?;
        let key = table.generate_key(&doc)?;

        let indexes = self.catalog.indexes_for_table(table_name);
        for info in indexes.iter().filter(|info| info.unique) {
            if let Some(values) = indexed_values(info, &doc)? {
                let index = self.get_index(&info.name)?;
                if index.lookup_unique(&values)?.is_some() {
                    return Err(CoreError::DuplicateValue(info.name.clone()));
                }
            }
        }

        table.put_new(&key, &doc)?;
        for info in &indexes {
            if let Some(values) = indexed_values(info, &doc)? {
                self.get_index(&info.name)?.set(&values, &key)?;
            }
        }
        Ok((key, doc))
    }

    /// Replaces the document at `key`, keeping every index in sync.
    pub fn replace_document(
        &self,
        table_name: &str,
        key: &[u8],
        doc: Document,
    ) -> CoreResult<Document> {
        if catalog::is_reserved(table_name) {
            return Err(CoreError::ReadOnlyTable(table_name.to_string()));
        }
        let table = self.get_table(table_name)?;
        let old = table.get(key)?;
        let doc = table.validate(doc)?;

        if table.info().primary_key().is_some() {
            let new_key = table.generate_key(&doc)?;
            if new_key != key {
                return Err(CoreError::PrimaryKeyImmutable);
            }
        }

        let indexes = self.catalog.indexes_for_table(table_name);
        for info in indexes.iter().filter(|info| info.unique) {
            if let Some(values) = indexed_values(info, &doc)? {
                let index = self.get_index(&info.name)?;
                if let Some(existing) = index.lookup_unique(&values)? {
                    if existing != key {
                        return Err(CoreError::DuplicateValue(info.name.clone()));
                    }
                }
            }
        }

        for info in &indexes {
            if let Some(values) = indexed_values(info, &old)? {
                self.get_index(&info.name)?.delete(&values, key)?;
            }
        }
        table.replace(key, &doc)?;
        for info in &indexes {
            if let Some(values) = indexed_values(info, &doc)? {
                self.get_index(&info.name)?.set(&values, key)?;
            }
        }
        Ok(doc)
    }

    /// Deletes the document at `key` along with its index entries.
    pub fn delete_document(&self, table_name: &str, key: &[u8]) -> CoreResult<()> {
        if catalog::is_reserved(table_name) {
            return Err(CoreError::ReadOnlyTable(table_name.to_string()));
        }
        let table = self.get_table(table_name)?;
        let old = table.get(key)?;

        for info in self.catalog.indexes_for_table(table_name) {
            if let Some(values) = indexed_values(&info, &old)? {
                self.get_index(&info.name)?.delete(&values, key)?;
            }
        }
        table.delete(key)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn catalog_store(&self, table: &str) -> CoreResult<Box<dyn EngineStore>> {
        Ok(self.tx.get_store(&catalog::table_store_name(table))?)
    }

    fn persist_table(&self, info: &TableInfo) -> CoreResult<()> {
        self.catalog_store(TABLES_TABLE)?.put(
            info.name.as_bytes(),
            &codec::encode_document(&info.to_document()),
        )?;
        Ok(())
    }

    fn persist_index(&self, info: &IndexInfo) -> CoreResult<()> {
        self.catalog_store(INDEXES_TABLE)?.put(
            info.name.as_bytes(),
            &codec::encode_document(&info.to_document()),
        )?;
        Ok(())
    }

    /// Replays every row of an index's table through the index.
    fn build_index(&self, info: &IndexInfo) -> CoreResult<()> {
        let table = self.get_table(&info.table_name)?;
        let index = self.get_index(&info.name)?;
        table.iterate(false, |key, doc| {
            if let Some(values) = indexed_values(info, &doc)? {
                index.set(&values, key)?;
            }
            Ok(true)
        })
    }

    /// Rebuilds the transaction-local catalog from the reserved stores.
    fn load_catalog(&mut self) -> CoreResult<()> {
        let mut loaded = Catalog::new();

        let tables = self.catalog_store(TABLES_TABLE)?;
        let mut it = tables.iterator(false);
        it.seek(&[])?;
        while it.valid() {
            let (_, bytes) = it.item().ok_or_else(|| {
                CoreError::Internal("valid iterator without item".to_string())
            })?;
            loaded.insert_table(TableInfo::from_document(&codec::decode_document(
                bytes.as_bytes(),
            )?)?);
            it.advance()?;
        }

        let indexes = self.catalog_store(INDEXES_TABLE)?;
        let mut it = indexes.iterator(false);
        it.seek(&[])?;
        while it.valid() {
            let (_, bytes) = it.item().ok_or_else(|| {
                CoreError::Internal("valid iterator without item".to_string())
            })?;
            loaded.insert_index(IndexInfo::from_document(&codec::decode_document(
                bytes.as_bytes(),
            )?)?);
            it.advance()?;
        }

        self.catalog = loaded;
        self.catalog_dirty = true;
        Ok(())
    }
}

/// Extracts and normalizes the values an index tracks for a document.
///
/// Returns `None` when any indexed path is missing or null: such rows are
/// left out of the index, which also keeps multiple null values from
/// tripping unique constraints.
fn indexed_values(info: &IndexInfo, doc: &Document) -> CoreResult<Option<Vec<Value>>> {
    let mut values = Vec::with_capacity(info.paths.len());
    for (i, path) in info.paths.iter().enumerate() {
        let value = match path.resolve_document(doc) {
            Some(Value::Null) | None => return Ok(None),
            Some(value) => value,
        };
        let value = match info.kinds.get(i).copied().flatten() {
            Some(kind) if value.kind() != kind => match (&value, kind) {
                (Value::Double(d), crate::ValueKind::Integer) if d.fract() == 0.0 => {
                    Value::Integer(*d as i64)
                }
                (Value::Integer(x), crate::ValueKind::Double) => Value::Double(*x as f64),
                _ => {
                    return Err(CoreError::IncompatibleType {
                        path: path.to_string(),
                        expected: kind,
                        got: value.kind(),
                    })
                }
            },
            _ => value,
        };
        values.push(value);
    }
    Ok(Some(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;
    use crate::value::ValueKind;
    use docket_engine::MemoryEngine;

    fn new_db() -> Database {
        Database::new(Box::new(MemoryEngine::new())).unwrap()
    }

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_create_and_drop_table() {
        let db = new_db();

        let mut tx = db.begin(true).unwrap();
        tx.create_table(TableInfo::new("users")).unwrap();
        assert_eq!(
            tx.create_table(TableInfo::new("users")),
            Err(CoreError::TableAlreadyExists("users".to_string()))
        );
        tx.commit().unwrap();

        let mut tx = db.begin(true).unwrap();
        assert_eq!(tx.list_tables(), vec!["users".to_string()]);
        tx.drop_table("users").unwrap();
        assert_eq!(
            tx.drop_table("users"),
            Err(CoreError::TableNotFound("users".to_string()))
        );
        tx.commit().unwrap();
    }

    #[test]
    fn test_catalog_persists_across_reopen() {
        let engine = Arc::new(MemoryEngine::new());

        struct Shared(Arc<MemoryEngine>);
        impl Engine for Shared {
            fn begin(&self, opts: TxOptions) -> docket_engine::EngineResult<Box<dyn EngineTransaction>> {
                self.0.begin(opts)
            }
        }

        {
            let db = Database::new(Box::new(Shared(Arc::clone(&engine)))).unwrap();
            let mut tx = db.begin(true).unwrap();
            tx.create_table(TableInfo::new("t")).unwrap();
            tx.commit().unwrap();
        }

        let db = Database::new(Box::new(Shared(engine))).unwrap();
        let tx = db.begin(false).unwrap();
        assert!(tx.catalog().table_exists("t"));
        tx.rollback().unwrap();
    }

    #[test]
    fn test_reserved_tables_rejected() {
        let db = new_db();
        let mut tx = db.begin(true).unwrap();

        assert!(matches!(
            tx.create_table(TableInfo::new("__tables")),
            Err(CoreError::ReadOnlyTable(_))
        ));
        assert!(matches!(
            tx.drop_table("__indexes"),
            Err(CoreError::ReadOnlyTable(_))
        ));
        assert!(matches!(
            tx.rename_table("__tables", "x"),
            Err(CoreError::ReadOnlyTable(_))
        ));
        assert!(matches!(
            tx.insert_document("__tables", Document::new()),
            Err(CoreError::ReadOnlyTable(_))
        ));
        tx.rollback().unwrap();
    }

    #[test]
    fn test_insert_and_scan() {
        let db = new_db();
        let mut tx = db.begin(true).unwrap();
        tx.create_table(TableInfo::new("t")).unwrap();

        for i in 1..=3 {
            tx.insert_document("t", doc(&[("a", Value::Integer(i))]))
                .unwrap();
        }

        let table = tx.get_table("t").unwrap();
        let mut values = Vec::new();
        table
            .iterate(false, |_, d| {
                values.push(d.get("a").unwrap().clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(
            values,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
        tx.commit().unwrap();
    }

    #[test]
    fn test_rollback_discards_catalog_and_rows() {
        let db = new_db();

        let mut tx = db.begin(true).unwrap();
        tx.create_table(TableInfo::new("t")).unwrap();
        tx.insert_document("t", doc(&[("a", Value::Integer(1))]))
            .unwrap();
        tx.rollback().unwrap();

        let tx = db.begin(false).unwrap();
        assert!(!tx.catalog().table_exists("t"));
        tx.rollback().unwrap();
    }

    #[test]
    fn test_unique_index_preflight_leaves_table_unchanged() {
        let db = new_db();
        let mut tx = db.begin(true).unwrap();
        tx.create_table(TableInfo::new("t")).unwrap();
        tx.create_index(IndexInfo::new("ix", "t", vec![Path::field("x")]).with_unique(true))
            .unwrap();

        tx.insert_document("t", doc(&[("x", Value::Integer(1))]))
            .unwrap();
        assert_eq!(
            tx.insert_document("t", doc(&[("x", Value::Integer(1))])),
            Err(CoreError::DuplicateValue("ix".to_string()))
        );

        let table = tx.get_table("t").unwrap();
        let mut count = 0;
        table
            .iterate(false, |_, _| {
                count += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(count, 1);
        tx.commit().unwrap();
    }

    #[test]
    fn test_index_maintained_on_replace_and_delete() {
        let db = new_db();
        let mut tx = db.begin(true).unwrap();
        tx.create_table(TableInfo::new("t")).unwrap();
        tx.create_index(IndexInfo::new("ix", "t", vec![Path::field("x")]))
            .unwrap();

        let (key, _) = tx
            .insert_document("t", doc(&[("x", Value::Integer(1))]))
            .unwrap();
        tx.replace_document("t", &key, doc(&[("x", Value::Integer(9))]))
            .unwrap();

        let index = tx.get_index("ix").unwrap();
        let mut seen = Vec::new();
        index
            .ascend_greater_or_equal(None, |values, _| {
                seen.push(values[0].clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec![Value::Integer(9)]);

        tx.delete_document("t", &key).unwrap();
        let mut count = 0;
        index
            .ascend_greater_or_equal(None, |_, _| {
                count += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(count, 0);
        tx.commit().unwrap();
    }

    #[test]
    fn test_create_index_backfills_existing_rows() {
        let db = new_db();
        let mut tx = db.begin(true).unwrap();
        tx.create_table(TableInfo::new("t")).unwrap();
        for i in [3i64, 1, 2] {
            tx.insert_document("t", doc(&[("x", Value::Integer(i))]))
                .unwrap();
        }
        tx.create_index(IndexInfo::new("ix", "t", vec![Path::field("x")]))
            .unwrap();

        let index = tx.get_index("ix").unwrap();
        let mut seen = Vec::new();
        index
            .ascend_greater_or_equal(None, |values, _| {
                seen.push(values[0].clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
        tx.commit().unwrap();
    }

    #[test]
    fn test_reindex_rebuilds() {
        let db = new_db();
        let mut tx = db.begin(true).unwrap();
        tx.create_table(TableInfo::new("t")).unwrap();
        tx.create_index(IndexInfo::new("ix", "t", vec![Path::field("x")]))
            .unwrap();
        tx.insert_document("t", doc(&[("x", Value::Integer(5))]))
            .unwrap();

        tx.get_index("ix").unwrap().truncate().unwrap();
        tx.reindex("ix").unwrap();

        let mut count = 0;
        tx.get_index("ix")
            .unwrap()
            .ascend_greater_or_equal(None, |_, _| {
                count += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(count, 1);
        tx.commit().unwrap();
    }

    #[test]
    fn test_rename_table_keeps_rows_and_indexes() {
        let db = new_db();
        let mut tx = db.begin(true).unwrap();
        tx.create_table(TableInfo::new("old")).unwrap();
        tx.create_index(IndexInfo::new("ix", "old", vec![Path::field("x")]))
            .unwrap();
        tx.insert_document("old", doc(&[("x", Value::Integer(1))]))
            .unwrap();

        tx.rename_table("old", "new").unwrap();
        assert!(!tx.catalog().table_exists("old"));
        assert!(tx.catalog().table_exists("new"));
        assert_eq!(tx.catalog().get_index("ix").unwrap().table_name, "new");

        let table = tx.get_table("new").unwrap();
        let mut count = 0;
        table
            .iterate(false, |_, _| {
                count += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(count, 1);
        tx.commit().unwrap();
    }

    #[test]
    fn test_primary_key_immutable_on_replace() {
        let db = new_db();
        let mut tx = db.begin(true).unwrap();
        let mut info = TableInfo::new("t");
        let mut pk = FieldConstraint::new(Path::field("id"));
        pk.kind = Some(ValueKind::Integer);
        pk.primary_key = true;
        info.add_constraint(pk).unwrap();
        tx.create_table(info).unwrap();

        let (key, _) = tx
            .insert_document("t", doc(&[("id", Value::Integer(1))]))
            .unwrap();
        assert_eq!(
            tx.replace_document("t", &key, doc(&[("id", Value::Integer(2))])),
            Err(CoreError::PrimaryKeyImmutable)
        );
        tx.commit().unwrap();
    }
}
