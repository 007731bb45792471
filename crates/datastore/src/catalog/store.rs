//! Schema definitions and access paths for the system tables, which hold
//! the durable form of the catalog.
//!
//! Two tables live under reserved namespaces:
//!
//! * `__catalog` holds one row per relation: its kind, namespace, the
//!   canonical CREATE statement regenerated from the info, and owner
//!   back-references.
//! * `__sequence` holds one row per sequence: its current lease.
//!
//! Both are read-only for ordinary writes; the catalog writer maintains
//! them through the unchecked table paths.

use crate::catalog::ddl;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::range::Range;
use crate::row::{Key, OwnedRow, Row};
use crate::schema::{Owner, SequenceInfo, TableConstraint, TableInfo};
use crate::table::Table;
use crate::transaction::Transaction;
use basalt_codec::{DataType, Value};
use basalt_primitives::{Namespace, SortOrder};
use std::sync::{Arc, OnceLock};
use strum::Display;

pub(crate) const CATALOG_TABLE_NAME: &str = "__catalog";
pub(crate) const SEQUENCE_TABLE_NAME: &str = "__sequence";
/// The sequence allocating store namespaces for user relations.
pub(crate) const STORE_SEQUENCE_NAME: &str = "__store_seq";

/// How far ahead the namespace allocator leases; namespaces are cheap
/// and never reused, so a generous lease keeps DDL from writing the
/// sequence table on every create.
const STORE_SEQUENCE_CACHE: u64 = 16;

#[allow(non_camel_case_types)]
#[derive(Debug, Display, Clone, Copy)]
pub enum SystemTable {
    __catalog,
    __sequence,
}

// Field enums for the system tables. Keep names and positions stable;
// they are the on-disk schema.
macro_rules! catalog_fields_enum {
    ($(#[$attr:meta])* enum $ty_name:ident { $($name:expr, $var:ident = $discr:expr,)* }) => {
        #[derive(Copy, Clone, Debug)]
        $(#[$attr])*
        pub(crate) enum $ty_name {
            $($var = $discr,)*
        }

        impl $ty_name {
            #[inline]
            pub(crate) fn name(self) -> &'static str {
                match self {
                    $(Self::$var => $name,)*
                }
            }
        }
    }
}

catalog_fields_enum!(enum CatalogFields {
    "name", Name = 0,
    "type", Type = 1,
    "namespace", Namespace = 2,
    "sql", Sql = 3,
    "rowid_sequence_name", RowidSequenceName = 4,
    "owner_table_name", OwnerTableName = 5,
    "owner_table_columns", OwnerTableColumns = 6,
});

catalog_fields_enum!(enum SequenceFields {
    "name", Name = 0,
    "seq", Seq = 1,
});

/// Kind tag of a `__catalog` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelationKind {
    Table,
    Index,
    Sequence,
}

impl RelationKind {
    fn as_str(self) -> &'static str {
        match self {
            RelationKind::Table => "table",
            RelationKind::Index => "index",
            RelationKind::Sequence => "sequence",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "table" => Ok(RelationKind::Table),
            "index" => Ok(RelationKind::Index),
            "sequence" => Ok(RelationKind::Sequence),
            other => Err(Error::invalid_schema(format!(
                "unknown relation kind `{other}` in {}",
                SystemTable::__catalog
            ))),
        }
    }
}

/// One row of `__catalog`.
#[derive(Debug, Clone)]
pub(crate) struct CatalogRow {
    pub name: String,
    pub kind: RelationKind,
    pub namespace: Option<Namespace>,
    pub sql: String,
    pub rowid_sequence_name: Option<String>,
    pub owner_table_name: Option<String>,
    pub owner_table_columns: Option<Vec<String>>,
}

impl CatalogRow {
    pub fn for_table(info: &TableInfo) -> CatalogRow {
        CatalogRow {
            name: info.table_name.clone(),
            kind: RelationKind::Table,
            namespace: Some(info.store_namespace),
            sql: info.to_sql(),
            rowid_sequence_name: info.rowid_sequence_name.clone(),
            owner_table_name: None,
            owner_table_columns: None,
        }
    }

    pub fn for_index(info: &crate::schema::IndexInfo) -> CatalogRow {
        CatalogRow {
            name: info.index_name.clone(),
            kind: RelationKind::Index,
            namespace: Some(info.store_namespace),
            sql: info.to_sql(),
            rowid_sequence_name: None,
            owner_table_name: Some(info.owner.table_name.clone()),
            owner_table_columns: info.owner.columns.clone(),
        }
    }

    pub fn for_sequence(info: &SequenceInfo) -> CatalogRow {
        CatalogRow {
            name: info.name.clone(),
            kind: RelationKind::Sequence,
            namespace: None,
            sql: info.to_sql(),
            rowid_sequence_name: None,
            owner_table_name: info.owner.as_ref().map(|o| o.table_name.clone()),
            owner_table_columns: info.owner.as_ref().and_then(|o| o.columns.clone()),
        }
    }

    fn into_row(self) -> OwnedRow {
        let opt_text = |v: Option<String>| v.map(Value::Text).unwrap_or(Value::Null);
        OwnedRow::new()
            .with(CatalogFields::Name.name(), Value::Text(self.name))
            .with(CatalogFields::Type.name(), Value::Text(self.kind.as_str().into()))
            .with(
                CatalogFields::Namespace.name(),
                self.namespace
                    .map(|ns| Value::Bigint(ns.0 as i64))
                    .unwrap_or(Value::Null),
            )
            .with(CatalogFields::Sql.name(), Value::Text(self.sql))
            .with(
                CatalogFields::RowidSequenceName.name(),
                opt_text(self.rowid_sequence_name),
            )
            .with(
                CatalogFields::OwnerTableName.name(),
                opt_text(self.owner_table_name),
            )
            .with(
                CatalogFields::OwnerTableColumns.name(),
                opt_text(self.owner_table_columns.map(|cols| cols.join(","))),
            )
    }
}

impl TryFrom<&Row> for CatalogRow {
    type Error = Error;

    fn try_from(row: &Row) -> Result<CatalogRow> {
        let text = |field: CatalogFields| -> Result<String> {
            match row.get(field.name())? {
                Some(Value::Text(s)) => Ok(s),
                other => Err(Error::invalid_schema(format!(
                    "{}.{} holds {other:?}",
                    SystemTable::__catalog,
                    field.name()
                ))),
            }
        };
        let opt_text = |field: CatalogFields| -> Result<Option<String>> {
            match row.get(field.name())? {
                Some(Value::Text(s)) => Ok(Some(s)),
                _ => Ok(None),
            }
        };
        let namespace = match row.get(CatalogFields::Namespace.name())? {
            Some(Value::Bigint(ns)) => Some(Namespace(ns as u64)),
            _ => None,
        };
        Ok(CatalogRow {
            name: text(CatalogFields::Name)?,
            kind: RelationKind::parse(&text(CatalogFields::Type)?)?,
            namespace,
            sql: text(CatalogFields::Sql)?,
            rowid_sequence_name: opt_text(CatalogFields::RowidSequenceName)?,
            owner_table_name: opt_text(CatalogFields::OwnerTableName)?,
            owner_table_columns: opt_text(CatalogFields::OwnerTableColumns)?
                .map(|s| s.split(',').map(str::to_owned).collect()),
        })
    }
}

/// Schema of `__catalog`.
pub(crate) fn catalog_table_info() -> Arc<TableInfo> {
    static INFO: OnceLock<Arc<TableInfo>> = OnceLock::new();
    INFO.get_or_init(|| {
        let mut info = TableInfo::new(CATALOG_TABLE_NAME);
        info.store_namespace = Namespace::CATALOG;
        info.read_only = true;
        info.add_column(CatalogFields::Name.name(), DataType::Text, true, None)
            .unwrap();
        info.add_column(CatalogFields::Type.name(), DataType::Text, true, None)
            .unwrap();
        info.add_column(CatalogFields::Namespace.name(), DataType::Bigint, false, None)
            .unwrap();
        info.add_column(CatalogFields::Sql.name(), DataType::Text, false, None)
            .unwrap();
        info.add_column(
            CatalogFields::RowidSequenceName.name(),
            DataType::Text,
            false,
            None,
        )
        .unwrap();
        info.add_column(CatalogFields::OwnerTableName.name(), DataType::Text, false, None)
            .unwrap();
        info.add_column(
            CatalogFields::OwnerTableColumns.name(),
            DataType::Text,
            false,
            None,
        )
        .unwrap();
        info.add_table_constraint(TableConstraint::primary_key(
            vec![CatalogFields::Name.name().to_owned()],
            SortOrder::ASC,
        ))
        .unwrap();
        Arc::new(info)
    })
    .clone()
}

/// Schema of `__sequence`.
pub(crate) fn sequence_table_info() -> Arc<TableInfo> {
    static INFO: OnceLock<Arc<TableInfo>> = OnceLock::new();
    INFO.get_or_init(|| {
        let mut info = TableInfo::new(SEQUENCE_TABLE_NAME);
        info.store_namespace = Namespace::SEQUENCES;
        info.read_only = true;
        info.add_column(SequenceFields::Name.name(), DataType::Text, true, None)
            .unwrap();
        info.add_column(SequenceFields::Seq.name(), DataType::Bigint, false, None)
            .unwrap();
        info.add_table_constraint(TableConstraint::primary_key(
            vec![SequenceFields::Name.name().to_owned()],
            SortOrder::ASC,
        ))
        .unwrap();
        Arc::new(info)
    })
    .clone()
}

/// The namespace allocator for user relations.
pub(crate) fn store_sequence_info() -> SequenceInfo {
    // Sequence bounds are i64; the transient band sits above i64::MAX,
    // so the signed maximum already keeps allocations out of it.
    let max = (Namespace::MIN_TRANSIENT.0 - 1).min(i64::MAX as u64) as i64;
    SequenceInfo {
        name: STORE_SEQUENCE_NAME.into(),
        increment_by: 1,
        min: Namespace::FIRST_USER.0 as i64,
        max,
        start: Namespace::FIRST_USER.0 as i64,
        cache: STORE_SEQUENCE_CACHE,
        cycle: false,
        owner: None,
    }
}

fn name_key(name: &str) -> Key {
    Key::from_values(&[Value::Text(name.to_owned())], SortOrder::ASC)
}

/// Upserts a relation's `__catalog` row.
pub(crate) fn write_relation(tx: &mut Transaction, row: CatalogRow) -> Result<()> {
    let table = Table::new(catalog_table_info());
    let key = name_key(&row.name);
    table.put_unchecked(tx, &key, Row::Owned(row.into_row()))?;
    Ok(())
}

/// Inserts a relation's `__catalog` row, failing when the name is taken.
pub(crate) fn insert_relation(tx: &mut Transaction, row: CatalogRow) -> Result<()> {
    let table = Table::new(catalog_table_info());
    table.insert_unchecked(tx, Row::Owned(row.into_row()))?;
    Ok(())
}

/// Removes a relation's `__catalog` row.
pub(crate) fn delete_relation(tx: &mut Transaction, name: &str) -> Result<()> {
    let table = Table::new(catalog_table_info());
    table.delete_unchecked(tx, &name_key(name))
}

/// Upserts a sequence's lease row in `__sequence`.
pub(crate) fn write_sequence_lease(tx: &mut Transaction, name: &str, lease: i64) -> Result<()> {
    let table = Table::new(sequence_table_info());
    let row = OwnedRow::new()
        .with(SequenceFields::Name.name(), Value::Text(name.to_owned()))
        .with(SequenceFields::Seq.name(), Value::Bigint(lease));
    table.put_unchecked(tx, &name_key(name), Row::Owned(row))?;
    Ok(())
}

/// Creates a sequence's `__sequence` row with no lease yet.
pub(crate) fn insert_sequence_row(tx: &mut Transaction, name: &str) -> Result<()> {
    let table = Table::new(sequence_table_info());
    let row = OwnedRow::new()
        .with(SequenceFields::Name.name(), Value::Text(name.to_owned()))
        .with(SequenceFields::Seq.name(), Value::Null);
    table.insert_unchecked(tx, Row::Owned(row))?;
    Ok(())
}

pub(crate) fn delete_sequence_row(tx: &mut Transaction, name: &str) -> Result<()> {
    let table = Table::new(sequence_table_info());
    table.delete_unchecked(tx, &name_key(name))
}

/// Reads the persisted lease of every sequence. Used to seed the
/// in-memory cells at open.
pub(crate) fn read_sequence_leases(tx: &Transaction) -> Result<Vec<(String, i64)>> {
    let table = Table::new(sequence_table_info());
    let mut leases = Vec::new();
    for item in table.iter(tx, &Range::all(), false)? {
        let (_, row) = item?;
        let name = match row.get(SequenceFields::Name.name())? {
            Some(Value::Text(name)) => name,
            other => {
                log::warn!(
                    "malformed row in {}: name column holds {other:?}",
                    SystemTable::__sequence
                );
                continue;
            }
        };
        if let Some(Value::Bigint(lease)) = row.get(SequenceFields::Seq.name())? {
            leases.push((name, lease));
        }
    }
    Ok(leases)
}

/// Rebuilds the in-memory catalog from the persisted `__catalog` rows.
///
/// The `sql` column is parsed back through the canonical DDL reader;
/// namespaces, read-only flags and owner back-references come from the
/// dedicated columns. System relations are recognized by name and keep
/// their fixed schemas.
pub(crate) fn load_catalog(tx: &Transaction) -> Result<Catalog> {
    let table = Table::new(catalog_table_info());
    let mut rows = Vec::new();
    for item in table.iter(tx, &Range::all(), false)? {
        let (_, row) = item?;
        rows.push(CatalogRow::try_from(&row)?);
    }

    let mut catalog = Catalog::default();
    // Tables first: indexes resolve their columns through the owner.
    for row in rows.iter().filter(|r| r.kind == RelationKind::Table) {
        if row.name == CATALOG_TABLE_NAME {
            catalog.insert_table((*catalog_table_info()).clone())?;
            continue;
        }
        if row.name == SEQUENCE_TABLE_NAME {
            catalog.insert_table((*sequence_table_info()).clone())?;
            continue;
        }
        let mut info = ddl::parse_table(&row.sql, tx.expression_parser())?;
        info.store_namespace = row.namespace.ok_or_else(|| {
            Error::invalid_schema(format!("table `{}` has no namespace", row.name))
        })?;
        info.rowid_sequence_name = row.rowid_sequence_name.clone();
        catalog.insert_table(info)?;
    }
    for row in &rows {
        match row.kind {
            RelationKind::Table => {}
            RelationKind::Index => {
                let mut info = ddl::parse_index(&row.sql)?;
                info.store_namespace = row.namespace.ok_or_else(|| {
                    Error::invalid_schema(format!("index `{}` has no namespace", row.name))
                })?;
                if let Some(owner_table) = &row.owner_table_name {
                    info.owner = Owner {
                        table_name: owner_table.clone(),
                        columns: row.owner_table_columns.clone(),
                    };
                }
                catalog.insert_index(info)?;
            }
            RelationKind::Sequence => {
                let mut info = ddl::parse_sequence(&row.sql)?;
                info.owner = row.owner_table_name.clone().map(|table_name| Owner {
                    table_name,
                    columns: row.owner_table_columns.clone(),
                });
                catalog.insert_sequence(info)?;
            }
        }
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_sequence_stays_below_the_transient_band() {
        let info = store_sequence_info();
        info.validate().unwrap();
        assert!(info.max > 0);
        assert!((info.max as u64) < Namespace::MIN_TRANSIENT.0);
    }
}
