use crate::row::Key;
use basalt_codec::{CastError, DataType, DecodeError};
use basalt_kv::KvError;
use enum_as_inner::EnumAsInner;
use strum::Display;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error, EnumAsInner)]
pub enum Error {
    #[error("relation `{0}` not found")]
    NotFound(Box<str>),
    #[error("key not found")]
    KeyNotFound,
    #[error("relation `{0}` already exists")]
    AlreadyExists(Box<str>),
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),
    #[error("type mismatch for column `{column}`: expected {expected}, got {got}")]
    TypeMismatch {
        column: Box<str>,
        expected: DataType,
        got: DataType,
    },
    #[error("value out of range for column `{column}`: {value}")]
    ValueOutOfRange { column: Box<str>, value: Box<str> },
    #[error("row is missing primary key column `{0}`")]
    MissingPrimaryKey(Box<str>),
    #[error("table is read-only")]
    ReadOnlyTable,
    #[error("transaction is read-only")]
    ReadOnlyTransaction,
    #[error("sequence `{0}` is exhausted")]
    SequenceExhausted(Box<str>),
    #[error("invalid schema: {0}")]
    InvalidSchema(Box<str>),
    #[error("invalid range: {0}")]
    InvalidRange(&'static str),
    #[error("index `{index}` expects {expected} values, got {got}")]
    WrongArity {
        index: Box<str>,
        expected: usize,
        got: usize,
    },
    #[error("connection already has an open transaction")]
    NestedTransaction,
    #[error("database is closed")]
    Closed,
    #[error("corrupted record: {0}")]
    Corrupted(#[from] DecodeError),
    #[error("i/o error: {0}")]
    Io(#[source] KvError),
}

impl Error {
    pub(crate) fn not_found(name: impl AsRef<str>) -> Self {
        Error::NotFound(name.as_ref().into())
    }

    pub(crate) fn already_exists(name: impl AsRef<str>) -> Self {
        Error::AlreadyExists(name.as_ref().into())
    }

    pub(crate) fn invalid_schema(reason: impl Into<String>) -> Self {
        Error::InvalidSchema(reason.into().into_boxed_str())
    }

    /// Attaches a column name to a codec cast error.
    pub(crate) fn from_cast(column: &str, err: CastError) -> Self {
        match err {
            CastError::TypeMismatch { expected, got } => Error::TypeMismatch {
                column: column.into(),
                expected,
                got,
            },
            CastError::OutOfRange { value, .. } => Error::ValueOutOfRange {
                column: column.into(),
                value: value.into_boxed_str(),
            },
        }
    }
}

// Engine errors carrying storage-level meaning (`KeyNotFound`,
// `KeyAlreadyExists`) are translated where the meaning is known, at the
// table and index layers. Everything else is an engine failure.
impl From<KvError> for Error {
    fn from(err: KvError) -> Self {
        match err {
            KvError::KeyNotFound => Error::KeyNotFound,
            KvError::ReadOnlySession => Error::ReadOnlyTransaction,
            other => Error::Io(other),
        }
    }
}

/// Which kind of constraint was violated.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    #[strum(serialize = "PRIMARY KEY")]
    PrimaryKey,
    #[strum(serialize = "UNIQUE")]
    Unique,
    #[strum(serialize = "NOT NULL")]
    NotNull,
    #[strum(serialize = "CHECK")]
    Check,
}

/// A constraint rejected a write.
#[derive(Debug, Error)]
#[error("{kind} constraint `{constraint}` violated on columns {columns:?}")]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    /// Name of the violated constraint.
    pub constraint: Box<str>,
    pub columns: Vec<String>,
    /// The conflicting key, when the violation came from a keyed write.
    pub key: Option<Key>,
}

impl ConstraintViolation {
    pub(crate) fn not_null(column: &str) -> Self {
        ConstraintViolation {
            kind: ConstraintKind::NotNull,
            constraint: format!("{column}_not_null").into_boxed_str(),
            columns: vec![column.to_owned()],
            key: None,
        }
    }
}
