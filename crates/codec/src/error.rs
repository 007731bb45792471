use crate::value::DataType;
use thiserror::Error;

/// Error produced when decoding encoded keys or fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid tag byte 0x{0:02x}")]
    InvalidTag(u8),
    #[error("varint does not fit in 64 bits")]
    VarintOverflow,
    #[error("invalid utf-8 in text value")]
    InvalidUtf8,
}

/// Error produced by the implicit conversion rules.
///
/// Carries no column context; the schema layer wraps it with the column
/// name when it surfaces to callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CastError {
    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: DataType, got: DataType },
    #[error("value {value} out of range for {target}")]
    OutOfRange { target: DataType, value: String },
}
