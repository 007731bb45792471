//! Compact, self-delimiting value encoding for row payloads.
//!
//! Unlike [`crate::key`], this form is not order-preserving; it optimizes
//! for size and for skipping past fields without decoding them, which is
//! what the lazy row reader does.

use crate::error::DecodeError;
use crate::value::Value;
use crate::varint::{decode_varint, decode_zigzag, encode_varint, encode_zigzag};

const FIELD_NULL: u8 = 0x00;
const FIELD_FALSE: u8 = 0x01;
const FIELD_TRUE: u8 = 0x02;
const FIELD_INT: u8 = 0x03;
const FIELD_DOUBLE: u8 = 0x04;
const FIELD_TEXT: u8 = 0x05;
const FIELD_BYTEA: u8 = 0x06;

pub fn encode_field(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(FIELD_NULL),
        Value::Boolean(false) => out.push(FIELD_FALSE),
        Value::Boolean(true) => out.push(FIELD_TRUE),
        Value::Integer(v) => {
            out.push(FIELD_INT);
            encode_zigzag(*v as i64, out);
        }
        Value::Bigint(v) => {
            out.push(FIELD_INT);
            encode_zigzag(*v, out);
        }
        Value::Double(v) => {
            out.push(FIELD_DOUBLE);
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Value::Text(s) => {
            out.push(FIELD_TEXT);
            encode_varint(s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytea(b) => {
            out.push(FIELD_BYTEA);
            encode_varint(b.len() as u64, out);
            out.extend_from_slice(b);
        }
    }
}

/// Decodes one field from the front of `input`, advancing it.
///
/// Integers come back as `Bigint`; the schema layer re-casts to the
/// declared column type.
pub fn decode_field(input: &mut &[u8]) -> Result<Value, DecodeError> {
    let (&tag, rest) = input.split_first().ok_or(DecodeError::UnexpectedEof)?;
    *input = rest;
    match tag {
        FIELD_NULL => Ok(Value::Null),
        FIELD_FALSE => Ok(Value::Boolean(false)),
        FIELD_TRUE => Ok(Value::Boolean(true)),
        FIELD_INT => decode_zigzag(input).map(Value::Bigint),
        FIELD_DOUBLE => {
            if input.len() < 8 {
                return Err(DecodeError::UnexpectedEof);
            }
            let (head, rest) = input.split_at(8);
            *input = rest;
            Ok(Value::Double(f64::from_bits(u64::from_be_bytes(
                head.try_into().unwrap(),
            ))))
        }
        FIELD_TEXT | FIELD_BYTEA => {
            let len = decode_varint(input)? as usize;
            if input.len() < len {
                return Err(DecodeError::UnexpectedEof);
            }
            let (head, rest) = input.split_at(len);
            *input = rest;
            if tag == FIELD_TEXT {
                Ok(Value::Text(
                    std::str::from_utf8(head)
                        .map_err(|_| DecodeError::InvalidUtf8)?
                        .to_owned(),
                ))
            } else {
                Ok(Value::Bytea(head.to_vec()))
            }
        }
        tag => Err(DecodeError::InvalidTag(tag)),
    }
}

/// Advances `input` past one field without materializing it.
pub fn skip_field(input: &mut &[u8]) -> Result<(), DecodeError> {
    let (&tag, rest) = input.split_first().ok_or(DecodeError::UnexpectedEof)?;
    *input = rest;
    match tag {
        FIELD_NULL | FIELD_FALSE | FIELD_TRUE => Ok(()),
        FIELD_INT => decode_varint(input).map(|_| ()),
        FIELD_DOUBLE => {
            if input.len() < 8 {
                return Err(DecodeError::UnexpectedEof);
            }
            *input = &input[8..];
            Ok(())
        }
        FIELD_TEXT | FIELD_BYTEA => {
            let len = decode_varint(input)? as usize;
            if input.len() < len {
                return Err(DecodeError::UnexpectedEof);
            }
            *input = &input[len..];
            Ok(())
        }
        tag => Err(DecodeError::InvalidTag(tag)),
    }
}
