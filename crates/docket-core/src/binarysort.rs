//! Sort-preserving binary encodings.
//!
//! For every supported type, `encode(a) < encode(b)` under lexicographic
//! byte order iff `a < b` under the type's natural order. These encodings
//! are the substrate of every table key and index entry.
//!
//! - booleans encode as a single 0/1 byte
//! - u64 as 8 big-endian bytes
//! - i64 as 8 big-endian bytes with the sign bit flipped
//! - f64 as its IEEE-754 bits, sign bit flipped when non-negative and all
//!   bits flipped when negative, which lays the full real line out
//!   monotonically (-0.0 and +0.0 encode differently but compare equal at
//!   the value layer)
//! - the sortable base64 alphabet is itself in ASCII order and unpadded,
//!   so base64 output of ordered input stays ordered
//! - "number" slots that may hold either an integer or a double use a
//!   16-byte form: the i64 encoding of the integer part, then the f64
//!   encoding; integers pad the second half with zero bytes so that an
//!   integer sorts right before any strictly-greater double

use crate::error::{CoreError, CoreResult};
use crate::value::Value;

/// Sorted base64 alphabet: every character is greater than the previous
/// one in ASCII, so encoded output preserves input order.
const BASE64_ALPHABET: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Appends the encoding of a bool.
pub fn append_bool(buf: &mut Vec<u8>, x: bool) {
    buf.push(u8::from(x));
}

/// Decodes a bool.
pub fn decode_bool(buf: &[u8]) -> CoreResult<bool> {
    match buf.first() {
        Some(b) => Ok(*b == 1),
        None => Err(CoreError::ShortBuffer),
    }
}

/// Appends the encoding of a u64.
pub fn append_u64(buf: &mut Vec<u8>, x: u64) {
    buf.extend_from_slice(&x.to_be_bytes());
}

/// Decodes a u64.
pub fn decode_u64(buf: &[u8]) -> CoreResult<u64> {
    let bytes: [u8; 8] = buf
        .get(..8)
        .and_then(|s| s.try_into().ok())
        .ok_or(CoreError::ShortBuffer)?;
    Ok(u64::from_be_bytes(bytes))
}

/// Appends the encoding of an i64 (sign bit flipped).
pub fn append_i64(buf: &mut Vec<u8>, x: i64) {
    append_u64(buf, (x as u64) ^ (1 << 63));
}

/// Decodes an i64.
pub fn decode_i64(buf: &[u8]) -> CoreResult<i64> {
    let x = decode_u64(buf)?;
    Ok((x ^ (1 << 63)) as i64)
}

/// Appends the encoding of an f64. Negative zero is normalized to
/// positive zero so both encode identically.
pub fn append_f64(buf: &mut Vec<u8>, x: f64) {
    let x = if x == 0.0 { 0.0 } else { x };
    let mut bits = x.to_bits();
    if x >= 0.0 {
        bits ^= 1 << 63;
    } else {
        bits = !bits;
    }
    append_u64(buf, bits);
}

/// Decodes an f64.
pub fn decode_f64(buf: &[u8]) -> CoreResult<f64> {
    let mut bits = decode_u64(buf)?;
    if bits & (1 << 63) != 0 {
        bits ^= 1 << 63;
    } else {
        bits = !bits;
    }
    Ok(f64::from_bits(bits))
}

/// Appends the sortable base64 encoding of `data`, without padding.
pub fn append_base64(buf: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(3) {
        let mut n = (chunk[0] as u32) << 16;
        if chunk.len() > 1 {
            n |= (chunk[1] as u32) << 8;
        }
        if chunk.len() > 2 {
            n |= chunk[2] as u32;
        }

        buf.push(BASE64_ALPHABET[(n >> 18) as usize & 0x3F]);
        buf.push(BASE64_ALPHABET[(n >> 12) as usize & 0x3F]);
        if chunk.len() > 1 {
            buf.push(BASE64_ALPHABET[(n >> 6) as usize & 0x3F]);
        }
        if chunk.len() > 2 {
            buf.push(BASE64_ALPHABET[n as usize & 0x3F]);
        }
    }
}

/// Decodes a sortable base64 byte string produced by [`append_base64`].
pub fn decode_base64(data: &[u8]) -> CoreResult<Vec<u8>> {
    fn lookup(c: u8) -> CoreResult<u32> {
        BASE64_ALPHABET
            .iter()
            .position(|&a| a == c)
            .map(|i| i as u32)
            .ok_or_else(|| CoreError::Corrupted("invalid base64 byte".to_string()))
    }

    let mut out = Vec::with_capacity(data.len() / 4 * 3 + 2);
    for chunk in data.chunks(4) {
        if chunk.len() < 2 {
            return Err(CoreError::Corrupted("truncated base64 chunk".to_string()));
        }
        let mut n = lookup(chunk[0])? << 18 | lookup(chunk[1])? << 12;
        if chunk.len() > 2 {
            n |= lookup(chunk[2])? << 6;
        }
        if chunk.len() > 3 {
            n |= lookup(chunk[3])?;
        }

        out.push((n >> 16) as u8);
        if chunk.len() > 2 {
            out.push((n >> 8) as u8);
        }
        if chunk.len() > 3 {
            out.push(n as u8);
        }
    }
    Ok(out)
}

/// Appends the 16-byte number encoding of an integer: its i64 encoding
/// followed by 8 zero bytes, so the integer sorts before every double
/// strictly greater than it and after every double strictly less.
pub fn append_int_number(buf: &mut Vec<u8>, x: i64) {
    append_i64(buf, x);
    buf.extend_from_slice(&[0u8; 8]);
}

/// Appends the 16-byte number encoding of a double: the i64 encoding of
/// its integer part followed by its f64 encoding.
pub fn append_float_number(buf: &mut Vec<u8>, x: f64) {
    // `as` saturates at the i64 bounds, which keeps the layout monotonic
    // for values beyond them: the f64 half still orders those.
    append_i64(buf, x as i64);
    append_f64(buf, x);
}

/// Decodes a 16-byte number encoding into an Integer or Double value.
pub fn decode_number(buf: &[u8]) -> CoreResult<Value> {
    if buf.len() < 16 {
        return Err(CoreError::ShortBuffer);
    }
    if buf[8..16].iter().all(|&b| b == 0) {
        Ok(Value::Integer(decode_i64(&buf[..8])?))
    } else {
        Ok(Value::Double(decode_f64(&buf[8..16])?))
    }
}
