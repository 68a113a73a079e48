//! Sorted map from encoded composite keys to document keys.
//!
//! Index entry sort keys follow the layout
//! `tag(v1) || enc(v1) || 0x1F || ... || tag(vn) || enc(vn) || 0x1F`,
//! with the document key appended for non-unique indexes to keep entries
//! distinct. One-byte tags place values of different kinds in disjoint
//! sort regions; Integer and Double share the numeric region through the
//! 16-byte number encoding when the slot type is unconstrained. Text and
//! blob bytes pass through sortable base64 so they can never collide with
//! the 0x1F separator.
//!
//! The entry value carries the indexed values plus the document key,
//! codec-encoded, so iteration can hand both back without parsing the
//! sort key.

use crate::binarysort;
use crate::catalog::IndexInfo;
use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::value::{Value, ValueKind};
use docket_engine::{EngineError, EngineStore};

/// Separator byte between encoded values. Strictly smaller than every
/// sortable base64 character, so a shorter prefix sorts first.
const SEPARATOR: u8 = 0x1F;

const TAG_NULL: u8 = 0x01;
const TAG_BOOL: u8 = 0x02;
const TAG_NUMBER: u8 = 0x03;
const TAG_TEXT: u8 = 0x04;
const TAG_BLOB: u8 = 0x05;
const TAG_ARRAY: u8 = 0x06;
const TAG_DOCUMENT: u8 = 0x07;

/// Appends the tagged sort encoding of one value for an index slot.
///
/// `kind` is the slot's declared type: a typed numeric slot uses the
/// fixed 8-byte encoding, an unconstrained slot the 16-byte number
/// encoding that interleaves integers and doubles.
pub(crate) fn append_tagged_value(
    buf: &mut Vec<u8>,
    value: &Value,
    kind: Option<ValueKind>,
) -> CoreResult<()> {
    match (kind, value) {
        (Some(ValueKind::Integer), Value::Integer(i)) => {
            buf.push(TAG_NUMBER);
            binarysort::append_i64(buf, *i);
        }
        (Some(ValueKind::Double), Value::Double(d)) => {
            buf.push(TAG_NUMBER);
            binarysort::append_f64(buf, *d);
        }
        (Some(expected), v) if v.kind() != expected => {
            return Err(CoreError::IncompatibleType {
                path: String::new(),
                expected,
                got: v.kind(),
            });
        }
        (_, Value::Null) => buf.push(TAG_NULL),
        (_, Value::Bool(b)) => {
            buf.push(TAG_BOOL);
            binarysort::append_bool(buf, *b);
        }
        (_, Value::Integer(i)) => {
            buf.push(TAG_NUMBER);
            binarysort::append_int_number(buf, *i);
        }
        (_, Value::Double(d)) => {
            buf.push(TAG_NUMBER);
            binarysort::append_float_number(buf, *d);
        }
        (_, Value::Text(s)) => {
            buf.push(TAG_TEXT);
            binarysort::append_base64(buf, s.as_bytes());
        }
        (_, Value::Blob(b)) => {
            buf.push(TAG_BLOB);
            binarysort::append_base64(buf, b);
        }
        (_, Value::Array(_)) => {
            buf.push(TAG_ARRAY);
            let mut nested = Vec::new();
            append_nested_value(&mut nested, value);
            binarysort::append_base64(buf, &nested);
        }
        (_, Value::Document(_)) => {
            buf.push(TAG_DOCUMENT);
            let mut nested = Vec::new();
            append_nested_value(&mut nested, value);
            binarysort::append_base64(buf, &nested);
        }
    }
    Ok(())
}

/// Order-preserving encoding of nested values, wrapped in base64 by the
/// caller so inner bytes can't collide with the slot separator.
fn append_nested_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            binarysort::append_bool(buf, *b);
        }
        Value::Integer(i) => {
            buf.push(TAG_NUMBER);
            binarysort::append_int_number(buf, *i);
        }
        Value::Double(d) => {
            buf.push(TAG_NUMBER);
            binarysort::append_float_number(buf, *d);
        }
        Value::Text(s) => {
            buf.push(TAG_TEXT);
            buf.extend_from_slice(s.as_bytes());
            buf.push(0x00);
        }
        Value::Blob(b) => {
            buf.push(TAG_BLOB);
            buf.extend_from_slice(b);
            buf.push(0x00);
        }
        Value::Array(items) => {
            buf.push(TAG_ARRAY);
            for item in items {
                append_nested_value(buf, item);
            }
            buf.push(0x00);
        }
        Value::Document(doc) => {
            buf.push(TAG_DOCUMENT);
            for (name, item) in doc.iter() {
                buf.extend_from_slice(name.as_bytes());
                buf.push(0x00);
                append_nested_value(buf, item);
            }
            buf.push(0x00);
        }
    }
}

/// A unique or non-unique ordered map from composite values to document
/// keys, stored in its own engine store.
pub struct Index {
    info: IndexInfo,
    store: Box<dyn EngineStore>,
}

impl Index {
    pub(crate) fn new(info: IndexInfo, store: Box<dyn EngineStore>) -> Self {
        Self { info, store }
    }

    /// Returns the index metadata.
    pub fn info(&self) -> &IndexInfo {
        &self.info
    }

    /// Encodes the sort-key prefix shared by all entries with the given
    /// values: each tagged value followed by a separator.
    fn encode_prefix(&self, values: &[Value]) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(values.len() * 12);
        for (i, value) in values.iter().enumerate() {
            let kind = self.info.kinds.get(i).copied().flatten();
            append_tagged_value(&mut buf, value, kind)?;
            buf.push(SEPARATOR);
        }
        Ok(buf)
    }

    fn encode_payload(values: &[Value], key: &[u8]) -> Vec<u8> {
        let mut items: Vec<Value> = values.to_vec();
        items.push(Value::blob(key.to_vec()));
        let mut buf = Vec::new();
        codec::encode_value(&Value::Array(items), &mut buf);
        buf
    }

    fn decode_payload(bytes: &[u8]) -> CoreResult<(Vec<Value>, Vec<u8>)> {
        let (value, _) = codec::decode_value(bytes)?;
        let Value::Array(mut items) = value else {
            return Err(CoreError::Corrupted("bad index entry".to_string()));
        };
        let Some(Value::Blob(key)) = items.pop() else {
            return Err(CoreError::Corrupted("index entry without key".to_string()));
        };
        Ok((items, key))
    }

    /// Associates a value tuple with a document key.
    ///
    /// For unique indexes, fails with [`CoreError::DuplicateValue`] when a
    /// live entry with the same values already points at another document.
    pub fn set(&self, values: &[Value], key: &[u8]) -> CoreResult<()> {
        let mut entry_key = self.encode_prefix(values)?;
        if self.info.unique {
            match self.store.get(&entry_key) {
                Ok(existing) => {
                    let (_, existing_key) = Self::decode_payload(existing.as_bytes())?;
                    if existing_key != key {
                        return Err(CoreError::DuplicateValue(self.info.name.clone()));
                    }
                }
                Err(EngineError::KeyNotFound) => {}
                Err(err) => return Err(err.into()),
            }
        } else {
            entry_key.extend_from_slice(key);
        }
        self.store
            .put(&entry_key, &Self::encode_payload(values, key))?;
        Ok(())
    }

    /// Returns the document key a unique index associates with the given
    /// values, if any. Always `None` on non-unique indexes.
    pub fn lookup_unique(&self, values: &[Value]) -> CoreResult<Option<Vec<u8>>> {
        if !self.info.unique {
            return Ok(None);
        }
        let entry_key = self.encode_prefix(values)?;
        match self.store.get(&entry_key) {
            Ok(payload) => {
                let (_, key) = Self::decode_payload(payload.as_bytes())?;
                Ok(Some(key))
            }
            Err(EngineError::KeyNotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes the entry associating a value tuple with a document key.
    pub fn delete(&self, values: &[Value], key: &[u8]) -> CoreResult<()> {
        let mut entry_key = self.encode_prefix(values)?;
        if !self.info.unique {
            entry_key.extend_from_slice(key);
        }
        self.store.delete(&entry_key)?;
        Ok(())
    }

    /// Removes every entry.
    pub fn truncate(&self) -> CoreResult<()> {
        self.store.truncate()?;
        Ok(())
    }

    /// Visits entries whose values are `>= pivot` in ascending order. An
    /// empty pivot starts at the smallest entry. The visitor receives the
    /// decoded values and the document key, and returns `false` to stop.
    pub fn ascend_greater_or_equal(
        &self,
        pivot: Option<&[Value]>,
        mut visit: impl FnMut(&[Value], &[u8]) -> CoreResult<bool>,
    ) -> CoreResult<()> {
        let pivot_bytes = match pivot {
            // The prefix encoding (values + separators) is <= every entry
            // key starting with the same values.
            Some(values) => self.encode_seek_key(values)?,
            None => Vec::new(),
        };
        self.iterate(&pivot_bytes, false, &mut visit)
    }

    /// Visits entries whose values are `<= pivot` in descending order. An
    /// empty pivot starts at the largest entry.
    pub fn descend_less_or_equal(
        &self,
        pivot: Option<&[Value]>,
        mut visit: impl FnMut(&[Value], &[u8]) -> CoreResult<bool>,
    ) -> CoreResult<()> {
        let pivot_bytes = match pivot {
            Some(values) => {
                // 0xFF caps the prefix so every entry sharing the pivot
                // values sorts at or below the seek position.
                let mut buf = self.encode_seek_key(values)?;
                buf.push(0xFF);
                buf
            }
            None => Vec::new(),
        };
        // Variable-length encodings may place a longer value (e.g. a text
        // extending the pivot) below the capped seek key; skip those until
        // the cursor reaches the pivot.
        let mut reached = pivot.is_none();
        self.iterate(&pivot_bytes, true, &mut |values: &[Value], key: &[u8]| {
            if !reached {
                let pivot = pivot.unwrap_or(&[]);
                let above = values
                    .iter()
                    .zip(pivot.iter())
                    .map(|(v, p)| v.sort_cmp(p))
                    .find(|ord| *ord != std::cmp::Ordering::Equal)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    == std::cmp::Ordering::Greater;
                if above {
                    return Ok(true);
                }
                reached = true;
            }
            visit(values, key)
        })
    }

    /// Seek keys stop right before the final separator so a partial pivot
    /// (fewer values than indexed paths) still covers all completions.
    fn encode_seek_key(&self, values: &[Value]) -> CoreResult<Vec<u8>> {
        let mut buf = self.encode_prefix(values)?;
        if !values.is_empty() {
            buf.pop();
        }
        Ok(buf)
    }

    fn iterate(
        &self,
        pivot: &[u8],
        reverse: bool,
        visit: &mut impl FnMut(&[Value], &[u8]) -> CoreResult<bool>,
    ) -> CoreResult<()> {
        let mut it = self.store.iterator(reverse);
        it.seek(pivot)?;
        while it.valid() {
            let (_, payload) = it.item().ok_or_else(|| {
                CoreError::Internal("valid iterator without item".to_string())
            })?;
            let (values, key) = Self::decode_payload(payload.as_bytes())?;
            if !visit(&values, &key)? {
                break;
            }
            it.advance()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::index_store_name;
    use docket_engine::{Engine, EngineTransaction, MemoryEngine, TxOptions};

    fn test_index(unique: bool, kinds: Vec<Option<ValueKind>>) -> (Box<dyn EngineTransaction>, IndexInfo) {
        let engine = MemoryEngine::new();
        let tx = engine.begin(TxOptions::read_write()).unwrap();
        tx.create_store(&index_store_name("ix")).unwrap();
        let info = IndexInfo::new("ix", "t", vec![crate::Path::field("x")])
            .with_unique(unique)
            .with_kinds(kinds);
        (tx, info)
    }

    fn open(tx: &dyn EngineTransaction, info: &IndexInfo) -> Index {
        Index::new(info.clone(), tx.get_store(&info.store_name).unwrap())
    }

    #[test]
    fn test_set_and_ascend() {
        let (tx, info) = test_index(false, vec![None]);
        let index = open(tx.as_ref(), &info);

        index.set(&[Value::Integer(3)], b"k3").unwrap();
        index.set(&[Value::Integer(1)], b"k1").unwrap();
        index.set(&[Value::Double(2.5)], b"k2").unwrap();

        let mut seen = Vec::new();
        index
            .ascend_greater_or_equal(None, |values, key| {
                seen.push((values[0].clone(), key.to_vec()));
                Ok(true)
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (Value::Integer(1), b"k1".to_vec()),
                (Value::Double(2.5), b"k2".to_vec()),
                (Value::Integer(3), b"k3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_ascend_from_pivot() {
        let (tx, info) = test_index(false, vec![None]);
        let index = open(tx.as_ref(), &info);
        for i in 1..=5 {
            index
                .set(&[Value::Integer(i)], format!("k{i}").as_bytes())
                .unwrap();
        }

        let mut seen = Vec::new();
        index
            .ascend_greater_or_equal(Some(&[Value::Integer(3)]), |values, _| {
                seen.push(values[0].clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![Value::Integer(3), Value::Integer(4), Value::Integer(5)]
        );
    }

    #[test]
    fn test_descend_from_pivot() {
        let (tx, info) = test_index(false, vec![None]);
        let index = open(tx.as_ref(), &info);
        for i in 1..=5 {
            index
                .set(&[Value::Integer(i)], format!("k{i}").as_bytes())
                .unwrap();
        }

        let mut seen = Vec::new();
        index
            .descend_less_or_equal(Some(&[Value::Integer(3)]), |values, _| {
                seen.push(values[0].clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![Value::Integer(3), Value::Integer(2), Value::Integer(1)]
        );
    }

    #[test]
    fn test_visitor_stop() {
        let (tx, info) = test_index(false, vec![None]);
        let index = open(tx.as_ref(), &info);
        for i in 1..=5 {
            index
                .set(&[Value::Integer(i)], format!("k{i}").as_bytes())
                .unwrap();
        }

        let mut count = 0;
        index
            .ascend_greater_or_equal(None, |_, _| {
                count += 1;
                Ok(count < 2)
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_unique_rejects_duplicates() {
        let (tx, info) = test_index(true, vec![None]);
        let index = open(tx.as_ref(), &info);

        index.set(&[Value::Integer(1)], b"k1").unwrap();
        assert_eq!(
            index.set(&[Value::Integer(1)], b"k2"),
            Err(CoreError::DuplicateValue("ix".to_string()))
        );
        // Same document may refresh its own entry.
        index.set(&[Value::Integer(1)], b"k1").unwrap();
        // The integer and double encodings are distinct keys: the
        // integer sorts right before the equal-valued double.
        index.set(&[Value::Double(1.0)], b"k3").unwrap();
    }

    #[test]
    fn test_non_unique_allows_duplicates() {
        let (tx, info) = test_index(false, vec![None]);
        let index = open(tx.as_ref(), &info);

        index.set(&[Value::Integer(1)], b"k1").unwrap();
        index.set(&[Value::Integer(1)], b"k2").unwrap();

        let mut keys = Vec::new();
        index
            .ascend_greater_or_equal(None, |_, key| {
                keys.push(key.to_vec());
                Ok(true)
            })
            .unwrap();
        assert_eq!(keys, vec![b"k1".to_vec(), b"k2".to_vec()]);
    }

    #[test]
    fn test_delete_entry() {
        let (tx, info) = test_index(false, vec![None]);
        let index = open(tx.as_ref(), &info);

        index.set(&[Value::Integer(1)], b"k1").unwrap();
        index.set(&[Value::Integer(2)], b"k2").unwrap();
        index.delete(&[Value::Integer(1)], b"k1").unwrap();

        let mut seen = Vec::new();
        index
            .ascend_greater_or_equal(None, |values, _| {
                seen.push(values[0].clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec![Value::Integer(2)]);
    }

    #[test]
    fn test_type_regions_are_disjoint() {
        let (tx, info) = test_index(false, vec![None]);
        let index = open(tx.as_ref(), &info);

        index.set(&[Value::text("10")], b"k-text").unwrap();
        index.set(&[Value::Integer(999)], b"k-int").unwrap();
        index.set(&[Value::Bool(true)], b"k-bool").unwrap();
        index.set(&[Value::Null], b"k-null").unwrap();

        let mut keys = Vec::new();
        index
            .ascend_greater_or_equal(None, |_, key| {
                keys.push(String::from_utf8(key.to_vec()).unwrap());
                Ok(true)
            })
            .unwrap();
        assert_eq!(keys, vec!["k-null", "k-bool", "k-int", "k-text"]);
    }

    #[test]
    fn test_typed_slot_uses_fixed_encoding() {
        let (tx, info) = test_index(false, vec![Some(ValueKind::Integer)]);
        let index = open(tx.as_ref(), &info);

        index.set(&[Value::Integer(2)], b"k2").unwrap();
        index.set(&[Value::Integer(1)], b"k1").unwrap();
        assert!(matches!(
            index.set(&[Value::text("x")], b"k3"),
            Err(CoreError::IncompatibleType { .. })
        ));

        let mut seen = Vec::new();
        index
            .ascend_greater_or_equal(None, |values, _| {
                seen.push(values[0].clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec![Value::Integer(1), Value::Integer(2)]);
    }
}
