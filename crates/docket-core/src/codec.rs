//! Storage codec for document values.
//!
//! A compact tag-and-length binary format used for table rows, catalog
//! rows and index entry payloads. The only contract callers rely on is
//! that `decode(encode(d))` yields a document equal to `d` under value
//! equality.

use crate::error::{CoreError, CoreResult};
use crate::value::{Document, Value};

const TAG_NULL: u8 = 0x01;
const TAG_BOOL: u8 = 0x02;
const TAG_INTEGER: u8 = 0x03;
const TAG_DOUBLE: u8 = 0x04;
const TAG_TEXT: u8 = 0x05;
const TAG_BLOB: u8 = 0x06;
const TAG_ARRAY: u8 = 0x07;
const TAG_DOCUMENT: u8 = 0x08;

/// Encodes a document to bytes.
pub fn encode_document(doc: &Document) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    encode_value(&Value::Document(doc.clone()), &mut buf);
    buf
}

/// Decodes a document previously encoded with [`encode_document`].
pub fn decode_document(buf: &[u8]) -> CoreResult<Document> {
    let (value, read) = decode_value(buf)?;
    if read != buf.len() {
        return Err(CoreError::Corrupted("trailing bytes".to_string()));
    }
    match value {
        Value::Document(doc) => Ok(doc),
        other => Err(CoreError::Corrupted(format!(
            "expected a document, got {}",
            other.kind()
        ))),
    }
}

/// Appends the encoding of a value.
pub fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*b));
        }
        Value::Integer(i) => {
            buf.push(TAG_INTEGER);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Value::Double(d) => {
            buf.push(TAG_DOUBLE);
            buf.extend_from_slice(&d.to_bits().to_le_bytes());
        }
        Value::Text(s) => {
            buf.push(TAG_TEXT);
            encode_len(s.len(), buf);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Blob(b) => {
            buf.push(TAG_BLOB);
            encode_len(b.len(), buf);
            buf.extend_from_slice(b);
        }
        Value::Array(items) => {
            buf.push(TAG_ARRAY);
            encode_len(items.len(), buf);
            for item in items {
                encode_value(item, buf);
            }
        }
        Value::Document(doc) => {
            buf.push(TAG_DOCUMENT);
            encode_len(doc.len(), buf);
            for (name, value) in doc.iter() {
                encode_len(name.len(), buf);
                buf.extend_from_slice(name.as_bytes());
                encode_value(value, buf);
            }
        }
    }
}

/// Decodes one value, returning it and the number of bytes consumed.
pub fn decode_value(buf: &[u8]) -> CoreResult<(Value, usize)> {
    let tag = *buf.first().ok_or(CoreError::ShortBuffer)?;
    let rest = &buf[1..];

    match tag {
        TAG_NULL => Ok((Value::Null, 1)),
        TAG_BOOL => {
            let b = *rest.first().ok_or(CoreError::ShortBuffer)?;
            Ok((Value::Bool(b != 0), 2))
        }
        TAG_INTEGER => {
            let bytes = take(rest, 8)?;
            Ok((
                Value::Integer(i64::from_le_bytes(bytes.try_into().unwrap())),
                9,
            ))
        }
        TAG_DOUBLE => {
            let bytes = take(rest, 8)?;
            let bits = u64::from_le_bytes(bytes.try_into().unwrap());
            Ok((Value::Double(f64::from_bits(bits)), 9))
        }
        TAG_TEXT => {
            let (len, used) = decode_len(rest)?;
            let bytes = take(&rest[used..], len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| CoreError::Corrupted("invalid utf-8 text".to_string()))?;
            Ok((Value::text(s), 1 + used + len))
        }
        TAG_BLOB => {
            let (len, used) = decode_len(rest)?;
            let bytes = take(&rest[used..], len)?;
            Ok((Value::Blob(bytes.to_vec()), 1 + used + len))
        }
        TAG_ARRAY => {
            let (count, used) = decode_len(rest)?;
            let mut pos = 1 + used;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let (item, read) = decode_value(&buf[pos..])?;
                items.push(item);
                pos += read;
            }
            Ok((Value::Array(items), pos))
        }
        TAG_DOCUMENT => {
            let (count, used) = decode_len(rest)?;
            let mut pos = 1 + used;
            let mut doc = Document::new();
            for _ in 0..count {
                let (name_len, used) = decode_len(&buf[pos..])?;
                pos += used;
                let name_bytes = take(&buf[pos..], name_len)?;
                let name = std::str::from_utf8(name_bytes)
                    .map_err(|_| CoreError::Corrupted("invalid utf-8 field name".to_string()))?
                    .to_string();
                pos += name_len;
                let (value, read) = decode_value(&buf[pos..])?;
                pos += read;
                doc.set(name, value);
            }
            Ok((Value::Document(doc), pos))
        }
        other => Err(CoreError::Corrupted(format!("unknown value tag {other}"))),
    }
}

fn encode_len(len: usize, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(len as u32).to_le_bytes());
}

fn decode_len(buf: &[u8]) -> CoreResult<(usize, usize)> {
    let bytes = take(buf, 4)?;
    Ok((u32::from_le_bytes(bytes.try_into().unwrap()) as usize, 4))
}

fn take(buf: &[u8], n: usize) -> CoreResult<&[u8]> {
    buf.get(..n).ok_or(CoreError::ShortBuffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: Vec<(&str, Value)>) -> Document {
        pairs
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect()
    }

    #[test]
    fn test_roundtrip_scalars() {
        let d = doc(vec![
            ("null", Value::Null),
            ("b", Value::Bool(true)),
            ("i", Value::Integer(-123456789)),
            ("d", Value::Double(3.25)),
            ("s", Value::text("héllo")),
            ("bytes", Value::blob(vec![0u8, 1, 255])),
        ]);
        let decoded = decode_document(&encode_document(&d)).unwrap();
        assert_eq!(decoded, d);
    }

    #[test]
    fn test_roundtrip_nested() {
        let inner = doc(vec![("x", Value::Integer(1))]);
        let d = doc(vec![
            (
                "arr",
                Value::Array(vec![
                    Value::Integer(1),
                    Value::text("two"),
                    Value::Document(inner.clone()),
                ]),
            ),
            ("nested", Value::Document(inner)),
        ]);
        let decoded = decode_document(&encode_document(&d)).unwrap();
        assert_eq!(decoded, d);
    }

    #[test]
    fn test_field_order_preserved() {
        let d = doc(vec![
            ("z", Value::Integer(1)),
            ("a", Value::Integer(2)),
            ("m", Value::Integer(3)),
        ]);
        let decoded = decode_document(&encode_document(&d)).unwrap();
        let names: Vec<&str> = decoded.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_decode_truncated_fails() {
        let d = doc(vec![("a", Value::text("hello"))]);
        let bytes = encode_document(&d);
        let result = decode_document(&bytes[..bytes.len() - 2]);
        assert!(matches!(
            result,
            Err(CoreError::ShortBuffer) | Err(CoreError::Corrupted(_))
        ));
    }

    #[test]
    fn test_empty_document() {
        let d = Document::new();
        let bytes = encode_document(&d);
        assert!(!bytes.is_empty());
        assert_eq!(decode_document(&bytes).unwrap(), d);
    }
}
