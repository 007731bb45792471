//! Secondary indexes: an ordered map from indexed values to row keys.
//!
//! One entry is one engine key: the indexed values encoded under the
//! index's sort order, with the owning row's key appended as the tail.
//! The engine value is empty; presence is the payload, and carrying the
//! row key in the entry itself lets duplicates coexist on non-unique
//! indexes.

use crate::error::{ConstraintKind, ConstraintViolation, Error, Result};
use crate::range::Range;
use crate::row::Key;
use crate::schema::IndexInfo;
use crate::transaction::Transaction;
use basalt_codec::key::{decode_prefix, encode_tuple, key_prefix, prefix_successor, skip_values};
use basalt_codec::{DataType, Value};
use basalt_kv::{KvError, KvIter};
use basalt_primitives::SortOrder;
use std::ops::Bound;
use std::sync::Arc;

/// A view over `(transaction, index info)`.
#[derive(Clone)]
pub struct Index {
    info: Arc<IndexInfo>,
    /// Declared types of the indexed columns, resolved from the owner
    /// table when the handle is built.
    key_types: Vec<DataType>,
    prefix: Vec<u8>,
}

/// One decoded index entry: the indexed values and the row key they
/// point at.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub values: Vec<Value>,
    pub key: Key,
}

impl Index {
    pub(crate) fn new(info: Arc<IndexInfo>, key_types: Vec<DataType>) -> Index {
        let prefix = key_prefix(info.store_namespace);
        Index {
            info,
            key_types,
            prefix,
        }
    }

    pub fn info(&self) -> &Arc<IndexInfo> {
        &self.info
    }

    /// Number of indexed columns.
    pub fn arity(&self) -> usize {
        self.info.columns.len()
    }

    /// Adds an entry for `values -> key`. On unique indexes, an existing
    /// entry with the same values but a different row key is a constraint
    /// violation.
    pub fn set(&self, tx: &mut Transaction, values: &[Value], key: &Key) -> Result<()> {
        tx.require_writable()?;
        let values = self.convert(values)?;
        if self.info.unique {
            if let Some(existing) = self.seek_row_key(tx, &values)? {
                if existing != *key {
                    return Err(ConstraintViolation {
                        kind: ConstraintKind::Unique,
                        constraint: self.info.index_name.as_str().into(),
                        columns: self.info.columns.clone(),
                        key: Some(Key::from_values(&values, self.info.sort_order)),
                    }
                    .into());
                }
            }
        }
        let entry = self.entry_key(&values, key);
        tx.session_mut().put(&entry, &[])?;
        Ok(())
    }

    /// Removes the entry for `values -> key`.
    pub fn delete(&self, tx: &mut Transaction, values: &[Value], key: &Key) -> Result<()> {
        tx.require_writable()?;
        let values = self.convert(values)?;
        let entry = self.entry_key(&values, key);
        match tx.session_mut().delete(&entry) {
            Err(KvError::KeyNotFound) => Err(Error::KeyNotFound),
            other => Ok(other?),
        }
    }

    /// Whether an entry with exactly `values` exists, and the row key of
    /// the first one.
    pub fn exists(&self, tx: &Transaction, values: &[Value]) -> Result<Option<Key>> {
        let values = self.convert(values)?;
        self.seek_row_key(tx, &values)
    }

    /// Iterates entries inside `range`, in index order or reversed.
    pub fn iter<'a>(
        &self,
        tx: &'a Transaction,
        range: &Range,
        reverse: bool,
    ) -> Result<IndexIter<'a>> {
        let (lo, hi) = range.to_kv_bounds(&self.prefix, &self.key_types, self.info.sort_order)?;
        let inner = tx.session().iter(bound_ref(&lo), bound_ref(&hi), reverse)?;
        Ok(IndexIter {
            inner,
            prefix_len: self.prefix.len(),
            arity: self.arity(),
            sort_order: self.info.sort_order,
        })
    }

    /// Removes every entry of the index.
    pub fn truncate(&self, tx: &mut Transaction) -> Result<()> {
        tx.require_writable()?;
        let hi = prefix_successor(&self.prefix).unwrap_or_default();
        tx.session_mut().delete_range(&self.prefix, &hi)?;
        Ok(())
    }

    /// First row key stored under exactly `values`, if any.
    fn seek_row_key(&self, tx: &Transaction, values: &[Value]) -> Result<Option<Key>> {
        let mut lo = self.prefix.clone();
        encode_tuple(values, self.info.sort_order, &mut lo);
        let hi = match prefix_successor(&lo) {
            Some(hi) => Bound::Excluded(hi),
            None => Bound::Unbounded,
        };
        let mut iter = tx
            .session()
            .iter(Bound::Included(lo.as_slice()), bound_ref(&hi), false)?;
        match iter.next().transpose()? {
            Some((entry, _)) => {
                let encoded = &entry[self.prefix.len()..];
                let tail = skip_values(encoded, self.info.sort_order, self.arity())?;
                Ok(Some(Key::from_bytes(encoded[tail..].to_vec())))
            }
            None => Ok(None),
        }
    }

    fn entry_key(&self, values: &[Value], key: &Key) -> Vec<u8> {
        let mut entry = self.prefix.clone();
        encode_tuple(values, self.info.sort_order, &mut entry);
        entry.extend_from_slice(key.as_bytes());
        entry
    }

    /// Arity check plus conversion to the declared column types.
    fn convert(&self, values: &[Value]) -> Result<Vec<Value>> {
        if values.len() != self.arity() {
            return Err(Error::WrongArity {
                index: self.info.index_name.as_str().into(),
                expected: self.arity(),
                got: values.len(),
            });
        }
        values
            .iter()
            .zip(&self.key_types)
            .zip(&self.info.columns)
            .map(|((value, &ty), column)| {
                value
                    .clone()
                    .cast(ty)
                    .map_err(|e| Error::from_cast(column, e))
            })
            .collect()
    }
}

fn bound_ref(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Iterator over decoded index entries. The values decode with their
/// natural types (integers surface as BIGINT); the trailing row key is
/// projected out of the entry's tail.
pub struct IndexIter<'a> {
    inner: KvIter<'a>,
    prefix_len: usize,
    arity: usize,
    sort_order: SortOrder,
}

impl std::fmt::Debug for IndexIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexIter").finish_non_exhaustive()
    }
}

impl Iterator for IndexIter<'_> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.map_err(Error::from).and_then(|(entry, _)| {
            let encoded = &entry[self.prefix_len..];
            let (values, tail) = decode_prefix(encoded, self.sort_order, self.arity)?;
            Ok(IndexEntry {
                values,
                key: Key::from_bytes(encoded[tail..].to_vec()),
            })
        }))
    }
}
