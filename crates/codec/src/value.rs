//! The closed set of column types and their runtime values.

use crate::error::CastError;
use std::fmt;

/// Declared type of a column.
///
/// `Any` is an internal wildcard: it accepts every value unchanged and is
/// never persisted in a schema written by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Integer,
    Bigint,
    DoublePrecision,
    Text,
    Bytea,
    Null,
    Any,
}

impl DataType {
    /// The SQL spelling, used for catalog regeneration.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Integer => "INTEGER",
            DataType::Bigint => "BIGINT",
            DataType::DoublePrecision => "DOUBLE PRECISION",
            DataType::Text => "TEXT",
            DataType::Bytea => "BYTEA",
            DataType::Null => "NULL",
            DataType::Any => "ANY",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DataType::Integer | DataType::Bigint)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self == DataType::DoublePrecision
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    Bigint(i64),
    Double(f64),
    Text(String),
    Bytea(Vec<u8>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Bigint(_) => DataType::Bigint,
            Value::Double(_) => DataType::DoublePrecision,
            Value::Text(_) => DataType::Text,
            Value::Bytea(_) => DataType::Bytea,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The integer payload when the value is of either integer type.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Integer(v) => Some(v as i64),
            Value::Bigint(v) => Some(v),
            _ => None,
        }
    }

    /// Applies the implicit conversion rules to `target`.
    ///
    /// * `Integer` and `Bigint` convert into each other, range-checked.
    /// * either integer type converts into `DoublePrecision`.
    /// * a `DoublePrecision` converts into an integer type only when it is
    ///   finite and has no fractional part.
    /// * `Null` converts to anything and stays `Null`; `Any` accepts
    ///   everything unchanged.
    ///
    /// Text/bytea and boolean/numeric conversions are never implicit and
    /// fail with [`CastError::TypeMismatch`].
    pub fn cast(self, target: DataType) -> Result<Value, CastError> {
        let got = self.data_type();
        if got == target || target == DataType::Any {
            return Ok(self);
        }
        match (self, target) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Integer(v), DataType::Bigint) => Ok(Value::Bigint(v as i64)),
            (Value::Bigint(v), DataType::Integer) => i32::try_from(v)
                .map(Value::Integer)
                .map_err(|_| CastError::OutOfRange {
                    target,
                    value: v.to_string(),
                }),
            (Value::Integer(v), DataType::DoublePrecision) => Ok(Value::Double(v as f64)),
            (Value::Bigint(v), DataType::DoublePrecision) => Ok(Value::Double(v as f64)),
            (Value::Double(v), DataType::Integer | DataType::Bigint) => {
                if !v.is_finite() || v.fract() != 0.0 {
                    return Err(CastError::TypeMismatch { expected: target, got });
                }
                if target == DataType::Integer {
                    if v < i32::MIN as f64 || v > i32::MAX as f64 {
                        return Err(CastError::OutOfRange {
                            target,
                            value: v.to_string(),
                        });
                    }
                    Ok(Value::Integer(v as i32))
                } else {
                    // i64::MAX is not exactly representable as f64; the
                    // comparison below uses the next representable bound.
                    if v < -9_223_372_036_854_775_808.0 || v >= 9_223_372_036_854_775_808.0 {
                        return Err(CastError::OutOfRange {
                            target,
                            value: v.to_string(),
                        });
                    }
                    Ok(Value::Bigint(v as i64))
                }
            }
            (_, _) => Err(CastError::TypeMismatch { expected: target, got }),
        }
    }

    /// Truthiness under the CHECK evaluation rules: booleans are
    /// themselves, numerics are true when non-zero, NULL is indeterminate
    /// (`None`), everything else is a type error.
    pub fn truthiness(&self) -> Result<Option<bool>, CastError> {
        match *self {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(b)),
            Value::Integer(v) => Ok(Some(v != 0)),
            Value::Bigint(v) => Ok(Some(v != 0)),
            Value::Double(v) => Ok(Some(v != 0.0)),
            _ => Err(CastError::TypeMismatch {
                expected: DataType::Boolean,
                got: self.data_type(),
            }),
        }
    }
}

impl fmt::Display for Value {
    /// SQL literal form, used for catalog regeneration.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(true) => f.write_str("TRUE"),
            Value::Boolean(false) => f.write_str("FALSE"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Bigint(v) => write!(f, "{v}"),
            Value::Double(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytea(b) => {
                f.write_str("X'")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                f.write_str("'")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Bigint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytea(v)
    }
}
