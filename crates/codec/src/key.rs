//! Order-preserving encoding of typed tuples into byte keys.
//!
//! Each component is encoded as a tag byte followed by a self-delimiting
//! payload, so a decoder can split a tuple back into values without length
//! fields. Tags are chosen so that bytewise comparison orders values of
//! different kinds as `NULL < booleans < integers < doubles < text <
//! bytea`, and payloads are normalized so that comparison within one kind
//! matches the type's natural order:
//!
//! * integers are sign-biased and written big-endian;
//! * doubles flip the sign bit when positive and complement all bits when
//!   negative; NaN is normalized to the positive quiet NaN and therefore
//!   sorts above every other double;
//! * text and bytea escape `0x00` as `0x00 0x01` and terminate with
//!   `0x00 0x00`, which keeps prefix order intact.
//!
//! A descending component is one's-complemented byte for byte after
//! encoding, inverting its order relative to the rest of the key.

use crate::error::DecodeError;
use crate::value::{DataType, Value};
use crate::varint::{decode_varint_ordered, encode_varint_ordered};
use basalt_primitives::{Namespace, SortOrder};

const TAG_NULL: u8 = 0x05;
const TAG_FALSE: u8 = 0x10;
const TAG_TRUE: u8 = 0x11;
const TAG_INT: u8 = 0x20;
const TAG_DOUBLE: u8 = 0x28;
const TAG_TEXT: u8 = 0x30;
const TAG_BYTEA: u8 = 0x38;

const SIGN_BIT: u64 = 1 << 63;

/// Encodes a single value, complementing the output when `desc` is set.
pub fn encode_value(value: &Value, desc: bool, out: &mut Vec<u8>) {
    let start = out.len();
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Boolean(false) => out.push(TAG_FALSE),
        Value::Boolean(true) => out.push(TAG_TRUE),
        Value::Integer(v) => encode_int(*v as i64, out),
        Value::Bigint(v) => encode_int(*v, out),
        Value::Double(v) => {
            out.push(TAG_DOUBLE);
            // Normalize -0.0 and NaN so equal values share one encoding
            // and NaN lands above every finite double.
            let v = if v.is_nan() {
                f64::NAN
            } else if *v == 0.0 {
                0.0
            } else {
                *v
            };
            let bits = v.to_bits();
            let ordered = if bits & SIGN_BIT != 0 { !bits } else { bits | SIGN_BIT };
            out.extend_from_slice(&ordered.to_be_bytes());
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            encode_escaped(s.as_bytes(), out);
        }
        Value::Bytea(b) => {
            out.push(TAG_BYTEA);
            encode_escaped(b, out);
        }
    }
    if desc {
        for byte in &mut out[start..] {
            *byte = !*byte;
        }
    }
}

fn encode_int(v: i64, out: &mut Vec<u8>) {
    out.push(TAG_INT);
    out.extend_from_slice(&((v as u64) ^ SIGN_BIT).to_be_bytes());
}

fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        if b == 0x00 {
            out.extend_from_slice(&[0x00, 0x01]);
        } else {
            out.push(b);
        }
    }
    out.extend_from_slice(&[0x00, 0x00]);
}

/// Reads one value from the front of `bytes`, returning it together with
/// the number of bytes consumed.
pub fn decode_value(bytes: &[u8], desc: bool) -> Result<(Value, usize), DecodeError> {
    let at = |i: usize| -> Result<u8, DecodeError> {
        let b = *bytes.get(i).ok_or(DecodeError::UnexpectedEof)?;
        Ok(if desc { !b } else { b })
    };
    let word = |from: usize| -> Result<u64, DecodeError> {
        let mut w = 0u64;
        for i in 0..8 {
            w = (w << 8) | at(from + i)? as u64;
        }
        Ok(w)
    };
    match at(0)? {
        TAG_NULL => Ok((Value::Null, 1)),
        TAG_FALSE => Ok((Value::Boolean(false), 1)),
        TAG_TRUE => Ok((Value::Boolean(true), 1)),
        TAG_INT => Ok((Value::Bigint((word(1)? ^ SIGN_BIT) as i64), 9)),
        TAG_DOUBLE => {
            let ordered = word(1)?;
            let bits = if ordered & SIGN_BIT != 0 {
                ordered ^ SIGN_BIT
            } else {
                !ordered
            };
            Ok((Value::Double(f64::from_bits(bits)), 9))
        }
        tag @ (TAG_TEXT | TAG_BYTEA) => {
            let mut raw = Vec::new();
            let mut i = 1;
            loop {
                let b = at(i)?;
                if b != 0x00 {
                    raw.push(b);
                    i += 1;
                    continue;
                }
                match at(i + 1)? {
                    0x00 => {
                        i += 2;
                        break;
                    }
                    0x01 => {
                        raw.push(0x00);
                        i += 2;
                    }
                    esc => return Err(DecodeError::InvalidTag(esc)),
                }
            }
            let value = if tag == TAG_TEXT {
                Value::Text(String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?)
            } else {
                Value::Bytea(raw)
            };
            Ok((value, i))
        }
        tag => Err(DecodeError::InvalidTag(tag)),
    }
}

/// Length of the value at the front of `bytes`, without materializing it.
pub fn skip_value(bytes: &[u8], desc: bool) -> Result<usize, DecodeError> {
    let at = |i: usize| -> Result<u8, DecodeError> {
        let b = *bytes.get(i).ok_or(DecodeError::UnexpectedEof)?;
        Ok(if desc { !b } else { b })
    };
    match at(0)? {
        TAG_NULL | TAG_FALSE | TAG_TRUE => Ok(1),
        TAG_INT | TAG_DOUBLE => {
            if bytes.len() < 9 {
                return Err(DecodeError::UnexpectedEof);
            }
            Ok(9)
        }
        TAG_TEXT | TAG_BYTEA => {
            let mut i = 1;
            loop {
                if at(i)? != 0x00 {
                    i += 1;
                    continue;
                }
                match at(i + 1)? {
                    0x00 => return Ok(i + 2),
                    0x01 => i += 2,
                    esc => return Err(DecodeError::InvalidTag(esc)),
                }
            }
        }
        tag => Err(DecodeError::InvalidTag(tag)),
    }
}

/// Encodes a tuple under the given sort-order bitmap.
pub fn encode_tuple(values: &[Value], sort: SortOrder, out: &mut Vec<u8>) {
    for (i, value) in values.iter().enumerate() {
        encode_value(value, sort.is_desc(i), out);
    }
}

/// Decodes exactly `types.len()` values, re-casting each to its declared
/// type. `DataType::Any` keeps the natural decoded type.
pub fn decode_tuple(
    bytes: &[u8],
    sort: SortOrder,
    types: &[DataType],
) -> Result<Vec<Value>, DecodeError> {
    let mut values = Vec::with_capacity(types.len());
    let mut offset = 0;
    for (i, &ty) in types.iter().enumerate() {
        let (value, n) = decode_value(&bytes[offset..], sort.is_desc(i))?;
        offset += n;
        values.push(recast(value, ty));
    }
    Ok(values)
}

/// Decodes the first `count` values without type information, returning
/// them together with the offset of the remaining tail.
pub fn decode_prefix(
    bytes: &[u8],
    sort: SortOrder,
    count: usize,
) -> Result<(Vec<Value>, usize), DecodeError> {
    let mut values = Vec::with_capacity(count);
    let mut offset = 0;
    for i in 0..count {
        let (value, n) = decode_value(&bytes[offset..], sort.is_desc(i))?;
        offset += n;
        values.push(value);
    }
    Ok((values, offset))
}

/// Offset just past the first `count` values of an encoded tuple.
pub fn skip_values(bytes: &[u8], sort: SortOrder, count: usize) -> Result<usize, DecodeError> {
    let mut offset = 0;
    for i in 0..count {
        offset += skip_value(&bytes[offset..], sort.is_desc(i))?;
    }
    Ok(offset)
}

// The encoder writes both integer types with the same tag; the declared
// type disambiguates on the way out.
fn recast(value: Value, ty: DataType) -> Value {
    match (value, ty) {
        (Value::Bigint(v), DataType::Integer) => Value::Integer(v as i32),
        (value, _) => value,
    }
}

/// The byte prefix every key of `ns` starts with.
pub fn key_prefix(ns: Namespace) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    encode_varint_ordered(ns.0, &mut out);
    out
}

/// Reads a namespace prefix from the front of a key.
pub fn decode_namespace(input: &mut &[u8]) -> Result<Namespace, DecodeError> {
    decode_varint_ordered(input).map(Namespace)
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` when no such bound exists (all bytes `0xff`).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(&last) = out.last() {
        if last == 0xff {
            out.pop();
        } else {
            *out.last_mut().unwrap() += 1;
            return Some(out);
        }
    }
    None
}
