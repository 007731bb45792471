//! Rows and row keys.
//!
//! A row is either *owned*, an ordered list of column/value pairs in the
//! form writes arrive in, or *encoded*, a byte buffer plus the schema
//! it was encoded under, the form reads return. The encoded form decodes
//! lazily: `get` skips earlier fields instead of materializing the whole
//! row, and `iterate` streams fields in declared order.

use crate::error::{ConstraintViolation, Error, Result};
use crate::schema::TableInfo;
use crate::transaction::Transaction;
use basalt_codec::field::{decode_field, encode_field, skip_field};
use basalt_codec::{key, DataType, Value};
use basalt_primitives::SortOrder;
use std::fmt;
use std::sync::Arc;

/// An encoded row key: the order-preserving encoding of the primary-key
/// tuple, without the namespace prefix.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn from_values(values: &[Value], sort_order: SortOrder) -> Key {
        let mut bytes = Vec::new();
        key::encode_tuple(values, sort_order, &mut bytes);
        Key(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Key {
        Key(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decodes the key back into its typed components.
    pub fn decode(&self, types: &[DataType], sort_order: SortOrder) -> Result<Vec<Value>> {
        Ok(key::decode_tuple(&self.0, sort_order, types)?)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        f.write_str(")")
    }
}

/// A row under construction: ordered column/value pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnedRow {
    entries: Vec<(String, Value)>,
}

impl OwnedRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`OwnedRow::set`].
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value.into());
        self
    }

    /// Sets a column, replacing any earlier value for it.
    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A row backed by its encoded bytes and the schema that produced them.
#[derive(Debug, Clone)]
pub struct EncodedRow {
    bytes: Vec<u8>,
    schema: Arc<TableInfo>,
}

impl EncodedRow {
    pub fn new(bytes: Vec<u8>, schema: Arc<TableInfo>) -> Self {
        EncodedRow { bytes, schema }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn schema(&self) -> &Arc<TableInfo> {
        &self.schema
    }

    /// Decodes a single column, skipping everything before it.
    ///
    /// Returns `Ok(None)` for columns the schema does not know (and the
    /// trailing block does not carry). Columns appended to the schema
    /// after this row was written decode as `NULL`, unless they are NOT
    /// NULL, which surfaces as a constraint violation here.
    pub fn get(&self, column: &str) -> Result<Option<Value>> {
        match self.schema.column_constraints.get(column) {
            Some(cc) => {
                let mut input = self.bytes.as_slice();
                for _ in 0..cc.position {
                    if input.is_empty() {
                        break;
                    }
                    skip_field(&mut input)?;
                }
                if input.is_empty() {
                    // The row predates this column.
                    if cc.not_null {
                        return Err(ConstraintViolation::not_null(&cc.column).into());
                    }
                    return Ok(Some(Value::Null));
                }
                let value = decode_field(&mut input)?;
                Ok(Some(recast(value, cc.data_type)))
            }
            None => {
                if !self.schema.column_constraints.allow_extra() {
                    return Ok(None);
                }
                let mut input = self.bytes.as_slice();
                for _ in 0..self.schema.column_constraints.len() {
                    skip_field(&mut input)?;
                }
                while !input.is_empty() {
                    let name = match decode_field(&mut input)? {
                        Value::Text(name) => name,
                        _ => return Err(basalt_codec::DecodeError::InvalidTag(0xff).into()),
                    };
                    if name == column {
                        return Ok(Some(decode_field(&mut input)?));
                    }
                    skip_field(&mut input)?;
                }
                Ok(None)
            }
        }
    }

    /// Streams every field in declared order, then any extra columns.
    pub fn iterate(&self, mut f: impl FnMut(&str, Value) -> Result<()>) -> Result<()> {
        let mut input = self.bytes.as_slice();
        for cc in &self.schema.column_constraints {
            if input.is_empty() {
                let value = if cc.not_null {
                    return Err(ConstraintViolation::not_null(&cc.column).into());
                } else {
                    Value::Null
                };
                f(&cc.column, value)?;
                continue;
            }
            let value = decode_field(&mut input)?;
            f(&cc.column, recast(value, cc.data_type))?;
        }
        while !input.is_empty() {
            let name = match decode_field(&mut input)? {
                Value::Text(name) => name,
                _ => return Err(basalt_codec::DecodeError::InvalidTag(0xff).into()),
            };
            let value = decode_field(&mut input)?;
            f(&name, value)?;
        }
        Ok(())
    }

    pub fn to_owned_row(&self) -> Result<OwnedRow> {
        let mut row = OwnedRow::new();
        self.iterate(|column, value| {
            row.set(column, value);
            Ok(())
        })?;
        Ok(row)
    }
}

/// A row in either representation.
#[derive(Debug, Clone)]
pub enum Row {
    Owned(OwnedRow),
    Encoded(EncodedRow),
}

impl Row {
    pub fn get(&self, column: &str) -> Result<Option<Value>> {
        match self {
            Row::Owned(row) => Ok(row.get(column).cloned()),
            Row::Encoded(row) => row.get(column),
        }
    }

    pub fn to_owned_row(&self) -> Result<OwnedRow> {
        match self {
            Row::Owned(row) => Ok(row.clone()),
            Row::Encoded(row) => row.to_owned_row(),
        }
    }
}

impl From<OwnedRow> for Row {
    fn from(row: OwnedRow) -> Self {
        Row::Owned(row)
    }
}

impl From<EncodedRow> for Row {
    fn from(row: EncodedRow) -> Self {
        Row::Encoded(row)
    }
}

// Stored integers always travel as Bigint; narrow to the declared type.
fn recast(value: Value, ty: DataType) -> Value {
    match (value, ty) {
        (Value::Bigint(v), DataType::Integer) => Value::Integer(v as i32),
        (value, _) => value,
    }
}

/// Encodes `row` against `schema`, in column-position order.
///
/// Missing columns take their default (evaluated in `tx`) or NULL; a NULL
/// in a NOT NULL column is a constraint violation. Every value is cast to
/// its declared type. Returns the fully materialized row alongside the
/// encoded bytes.
pub(crate) fn encode_row(
    tx: &mut Transaction,
    schema: &TableInfo,
    row: &Row,
) -> Result<(OwnedRow, Vec<u8>)> {
    let source = row.to_owned_row()?;
    let mut out = Vec::new();
    let mut materialized = OwnedRow::new();

    for cc in &schema.column_constraints {
        let value = match source.get(&cc.column) {
            Some(value) => value.clone(),
            None => match &cc.default {
                Some(default) => default.eval(tx, None)?,
                None => Value::Null,
            },
        };
        if value.is_null() {
            if cc.not_null {
                return Err(ConstraintViolation::not_null(&cc.column).into());
            }
            encode_field(&Value::Null, &mut out);
            materialized.set(&*cc.column, Value::Null);
            continue;
        }
        let value = value
            .cast(cc.data_type)
            .map_err(|e| Error::from_cast(&cc.column, e))?;
        encode_field(&value, &mut out);
        materialized.set(&*cc.column, value);
    }

    for (column, value) in source.columns() {
        if schema.column_constraints.get(column).is_some() {
            continue;
        }
        if !schema.column_constraints.allow_extra() {
            return Err(Error::invalid_schema(format!(
                "unknown column `{column}` on table `{}`",
                schema.table_name
            )));
        }
        encode_field(&Value::Text(column.to_owned()), &mut out);
        encode_field(value, &mut out);
        materialized.set(column, value.clone());
    }

    Ok((materialized, out))
}
