//! CRUD over one table namespace.
//!
//! A [`Table`] is a cheap view derived from the catalog; every operation
//! runs against the transaction passed to it. The table layer maintains
//! primary keys, defaults, NOT NULL and CHECK constraints; secondary
//! indexes are maintained by the caller issuing matching index writes in
//! the same transaction.

use crate::error::{ConstraintKind, ConstraintViolation, Error, Result};
use crate::range::Range;
use crate::row::{encode_row, EncodedRow, Key, OwnedRow, Row};
use crate::schema::{PrimaryKey, TableConstraintKind, TableInfo};
use crate::transaction::Transaction;
use basalt_codec::key::{key_prefix, prefix_successor};
use basalt_codec::{DataType, Value};
use basalt_kv::{KvError, KvIter};
use basalt_primitives::SortOrder;
use smallvec::SmallVec;
use std::ops::Bound;
use std::sync::Arc;

/// A view over `(transaction, table info)`.
#[derive(Clone, Debug)]
pub struct Table {
    info: Arc<TableInfo>,
    primary_key: Option<PrimaryKey>,
    prefix: Vec<u8>,
}

impl Table {
    pub(crate) fn new(info: Arc<TableInfo>) -> Table {
        let primary_key = info.primary_key();
        let prefix = key_prefix(info.store_namespace);
        Table {
            info,
            primary_key,
            prefix,
        }
    }

    /// Builds a view over a table that is not registered in the
    /// catalog. Used for transient state (sort spills, hash join
    /// scratch) under a namespace from
    /// [`crate::Database::transient_namespace`]; such namespaces are
    /// wiped at the next open, and the counter is not persisted, so
    /// callers check for leftovers before writing.
    pub fn transient(info: TableInfo) -> Table {
        Table::new(Arc::new(info))
    }

    pub fn info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    /// The declared key column types: the primary key's, or the implicit
    /// rowid for tables without one.
    pub fn key_types(&self) -> Vec<DataType> {
        match &self.primary_key {
            Some(pk) => pk.types.clone(),
            None => vec![DataType::Bigint],
        }
    }

    pub fn key_sort_order(&self) -> SortOrder {
        match &self.primary_key {
            Some(pk) => pk.sort_order,
            None => SortOrder::ASC,
        }
    }

    /// Inserts a row, returning its key and the fully materialized row
    /// (defaults applied, values cast).
    pub fn insert(&self, tx: &mut Transaction, row: Row) -> Result<(Key, Row)> {
        if self.info.read_only {
            return Err(Error::ReadOnlyTable);
        }
        tx.require_writable()?;
        let (materialized, bytes) = encode_row(tx, &self.info, &row)?;
        self.check_constraints(tx, &materialized)?;
        let key = self.key_for(tx, &materialized)?;

        match tx.session_mut().insert(&self.full_key(&key), &bytes) {
            Ok(()) => Ok((key, Row::Owned(materialized))),
            Err(KvError::KeyAlreadyExists) => Err(self.primary_key_violation(key).into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Fetches the row stored under `key` as a lazily decoded handle.
    pub fn get(&self, tx: &Transaction, key: &Key) -> Result<Row> {
        match tx.session().get(&self.full_key(key))? {
            Some(bytes) => Ok(Row::Encoded(EncodedRow::new(bytes, self.info.clone()))),
            None => Err(Error::KeyNotFound),
        }
    }

    pub fn exists(&self, tx: &Transaction, key: &Key) -> Result<bool> {
        Ok(tx.session().get(&self.full_key(key))?.is_some())
    }

    pub fn delete(&self, tx: &mut Transaction, key: &Key) -> Result<()> {
        if self.info.read_only {
            return Err(Error::ReadOnlyTable);
        }
        tx.require_writable()?;
        self.delete_unchecked(tx, key)
    }

    /// Re-encodes `row` under an existing key. The key does not change.
    pub fn replace(&self, tx: &mut Transaction, key: &Key, row: Row) -> Result<Row> {
        if self.info.read_only {
            return Err(Error::ReadOnlyTable);
        }
        tx.require_writable()?;
        if tx.session().get(&self.full_key(key))?.is_none() {
            return Err(Error::KeyNotFound);
        }
        let (materialized, bytes) = encode_row(tx, &self.info, &row)?;
        self.check_constraints(tx, &materialized)?;
        tx.session_mut().put(&self.full_key(key), &bytes)?;
        Ok(Row::Owned(materialized))
    }

    /// Writes `row` under `key` whether or not the key exists.
    pub fn put(&self, tx: &mut Transaction, key: &Key, row: Row) -> Result<Row> {
        if self.info.read_only {
            return Err(Error::ReadOnlyTable);
        }
        self.put_unchecked(tx, key, row)
    }

    /// Removes every row of the table.
    pub fn truncate(&self, tx: &mut Transaction) -> Result<()> {
        if self.info.read_only {
            return Err(Error::ReadOnlyTable);
        }
        tx.require_writable()?;
        self.truncate_unchecked(tx)
    }

    /// Iterates `(key, row)` pairs inside `range`, in key order or
    /// reversed. The iterator reads from the transaction's session view;
    /// a write on the same session invalidates it (the borrow checker
    /// enforces this).
    pub fn iter<'a>(
        &self,
        tx: &'a Transaction,
        range: &Range,
        reverse: bool,
    ) -> Result<TableIter<'a>> {
        let (lo, hi) = range.to_kv_bounds(&self.prefix, &self.key_types(), self.key_sort_order())?;
        let inner = tx.session().iter(
            as_bound_ref(&lo),
            as_bound_ref(&hi),
            reverse,
        )?;
        Ok(TableIter {
            inner,
            prefix_len: self.prefix.len(),
            info: self.info.clone(),
        })
    }

    // Upsert that skips the read-only gate; the catalog writer maintains
    // system tables through this.
    pub(crate) fn put_unchecked(&self, tx: &mut Transaction, key: &Key, row: Row) -> Result<Row> {
        tx.require_writable()?;
        let (materialized, bytes) = encode_row(tx, &self.info, &row)?;
        self.check_constraints(tx, &materialized)?;
        tx.session_mut().put(&self.full_key(key), &bytes)?;
        Ok(Row::Owned(materialized))
    }

    pub(crate) fn insert_unchecked(&self, tx: &mut Transaction, row: Row) -> Result<(Key, Row)> {
        tx.require_writable()?;
        let (materialized, bytes) = encode_row(tx, &self.info, &row)?;
        self.check_constraints(tx, &materialized)?;
        let key = self.key_for(tx, &materialized)?;
        match tx.session_mut().insert(&self.full_key(&key), &bytes) {
            Ok(()) => Ok((key, Row::Owned(materialized))),
            Err(KvError::KeyAlreadyExists) => Err(self.primary_key_violation(key).into()),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn delete_unchecked(&self, tx: &mut Transaction, key: &Key) -> Result<()> {
        tx.require_writable()?;
        match tx.session_mut().delete(&self.full_key(key)) {
            Err(KvError::KeyNotFound) => Err(Error::KeyNotFound),
            other => Ok(other?),
        }
    }

    pub(crate) fn truncate_unchecked(&self, tx: &mut Transaction) -> Result<()> {
        tx.require_writable()?;
        let hi = prefix_successor(&self.prefix).unwrap_or_default();
        tx.session_mut().delete_range(&self.prefix, &hi)?;
        Ok(())
    }

    /// Computes the row key: the declared primary key extracted from the
    /// row, or the next value of the table's rowid sequence.
    fn key_for(&self, tx: &mut Transaction, row: &OwnedRow) -> Result<Key> {
        match &self.primary_key {
            Some(pk) => {
                let mut values: SmallVec<[Value; 4]> = SmallVec::with_capacity(pk.columns.len());
                for column in &pk.columns {
                    match row.get(column) {
                        Some(value) if !value.is_null() => values.push(value.clone()),
                        _ => return Err(Error::MissingPrimaryKey(column.as_str().into())),
                    }
                }
                Ok(Key::from_values(&values, pk.sort_order))
            }
            None => {
                let name = self.info.rowid_sequence_name.clone().ok_or_else(|| {
                    Error::invalid_schema(format!(
                        "table `{}` has neither a primary key nor a rowid sequence",
                        self.info.table_name
                    ))
                })?;
                let sequence = tx.catalog().get_sequence(&name)?;
                let rowid = sequence.next(tx)?;
                Ok(Key::from_values(&[Value::Bigint(rowid)], SortOrder::ASC))
            }
        }
    }

    fn check_constraints(&self, tx: &mut Transaction, row: &OwnedRow) -> Result<()> {
        for tc in &self.info.table_constraints {
            let TableConstraintKind::Check { expr } = &tc.kind else {
                continue;
            };
            let value = expr.eval(tx, Some(row))?;
            let satisfied = value.truthiness().map_err(|_| {
                Error::invalid_schema(format!(
                    "CHECK constraint `{}` did not evaluate to a boolean",
                    tc.name
                ))
            })?;
            // NULL satisfies a CHECK.
            if satisfied == Some(false) {
                return Err(ConstraintViolation {
                    kind: ConstraintKind::Check,
                    constraint: tc.name.as_str().into(),
                    columns: vec![],
                    key: None,
                }
                .into());
            }
        }
        Ok(())
    }

    fn primary_key_violation(&self, key: Key) -> ConstraintViolation {
        let (constraint, columns) = match &self.primary_key {
            Some(pk) => {
                let name = self
                    .info
                    .table_constraints
                    .iter()
                    .find(|c| c.is_primary_key())
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| format!("{}_pk", self.info.table_name));
                (name, pk.columns.clone())
            }
            None => (format!("{}_pk", self.info.table_name), vec![]),
        };
        ConstraintViolation {
            kind: ConstraintKind::PrimaryKey,
            constraint: constraint.into_boxed_str(),
            columns,
            key: Some(key),
        }
    }

    fn full_key(&self, key: &Key) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.prefix.len() + key.as_bytes().len());
        bytes.extend_from_slice(&self.prefix);
        bytes.extend_from_slice(key.as_bytes());
        bytes
    }
}

fn as_bound_ref(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Iterator over `(key, row)` pairs of a table range.
pub struct TableIter<'a> {
    inner: KvIter<'a>,
    prefix_len: usize,
    info: Arc<TableInfo>,
}

impl Iterator for TableIter<'_> {
    type Item = Result<(Key, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.map_err(Error::from).map(|(key, value)| {
            let key = Key::from_bytes(key[self.prefix_len..].to_vec());
            (key, Row::Encoded(EncodedRow::new(value, self.info.clone())))
        }))
    }
}
