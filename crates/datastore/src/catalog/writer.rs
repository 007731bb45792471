//! Transactional catalog mutation.
//!
//! Every operation updates the transaction's pending catalog clone *and*
//! writes the durable representation into the system tables through the
//! same session, so commit publishes both together and rollback discards
//! both together.

use crate::catalog::store::{self, CatalogRow, STORE_SEQUENCE_NAME};
use crate::error::{ConstraintKind, Error, Result};
use crate::range::Range;
use crate::row::Key;
use crate::schema::{
    relation_name_is_system, ColumnConstraint, IndexInfo, Owner, SequenceInfo, TableConstraint,
    TableInfo,
};
use crate::transaction::Transaction;
use basalt_codec::key::{key_prefix, prefix_successor};
use basalt_codec::Value;
use basalt_primitives::Namespace;

/// A writable view over the transaction's catalog clone.
pub struct CatalogWriter<'tx> {
    tx: &'tx mut Transaction,
}

impl std::fmt::Debug for CatalogWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogWriter").finish_non_exhaustive()
    }
}

impl<'tx> CatalogWriter<'tx> {
    pub(crate) fn new(tx: &'tx mut Transaction) -> CatalogWriter<'tx> {
        CatalogWriter { tx }
    }

    /// Idempotently creates the system tables and the namespace
    /// allocator. Races on re-creation are tolerated: a name or key
    /// conflict from another initializer means the work is already done.
    pub fn init(&mut self) -> Result<()> {
        log::trace!("CATALOG INIT");
        for info in [store::catalog_table_info(), store::sequence_table_info()] {
            if self.tx.catalog().contains(&info.table_name) {
                continue;
            }
            Self::swallow_existing(store::insert_relation(self.tx, CatalogRow::for_table(&info)))?;
            self.tx.pending_catalog_mut().insert_table((*info).clone())?;
        }
        if !self.tx.catalog().contains(STORE_SEQUENCE_NAME) {
            let info = store::store_sequence_info();
            Self::swallow_existing(store::insert_relation(
                self.tx,
                CatalogRow::for_sequence(&info),
            ))?;
            Self::swallow_existing(store::insert_sequence_row(self.tx, &info.name))?;
            self.tx.pending_catalog_mut().insert_sequence(info)?;
        }
        Ok(())
    }

    fn swallow_existing(result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(Error::AlreadyExists(_)) => Ok(()),
            Err(Error::Constraint(v)) if v.kind == ConstraintKind::PrimaryKey => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Creates a table: allocates its namespace, persists its catalog
    /// row, and creates its rowid sequence when no primary key is
    /// declared.
    pub fn create_table(&mut self, mut info: TableInfo) -> Result<()> {
        log::trace!("TABLE CREATING: {}", info.table_name);
        self.check_new_name(&info.table_name)?;
        for cc in &info.column_constraints {
            if let Some(default) = &cc.default {
                default.validate(&info)?;
            }
        }

        info.store_namespace = self.allocate_namespace()?;
        if info.primary_key().is_none() {
            let name = self.unique_name(&format!("{}_seq", info.table_name));
            let mut sequence = SequenceInfo::new(name.clone());
            sequence.cache = self.tx.db().options.rowid_sequence_cache;
            sequence.owner = Some(Owner::table(&info.table_name));
            self.create_sequence_unchecked(sequence)?;
            info.rowid_sequence_name = Some(name);
        }

        store::insert_relation(self.tx, CatalogRow::for_table(&info))?;
        let name = info.table_name.clone();
        self.tx.pending_catalog_mut().insert_table(info)?;
        log::trace!("TABLE CREATED: {name}");
        Ok(())
    }

    /// Drops a table together with every index and sequence it owns,
    /// then deletes its data.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        log::trace!("TABLE DROPPING: {name}");
        let info = self.tx.catalog().get_table_info(name)?.clone();
        if info.read_only {
            return Err(Error::ReadOnlyTable);
        }

        let owned_indexes: Vec<String> = self
            .tx
            .catalog()
            .list_indexes(Some(name))
            .map(|i| i.index_name.clone())
            .collect();
        for index in owned_indexes {
            self.drop_index_unchecked(&index)?;
        }

        let owned_sequences: Vec<String> = self
            .tx
            .catalog()
            .list_sequences()
            .filter(|s| s.owner.as_ref().is_some_and(|o| o.table_name == name))
            .map(|s| s.name.clone())
            .collect();
        for sequence in owned_sequences {
            self.drop_sequence_unchecked(&sequence)?;
        }

        store::delete_relation(self.tx, name)?;
        self.truncate_namespace(info.store_namespace)?;
        self.tx.pending_catalog_mut().remove_table(name);
        log::trace!("TABLE DROPPED: {name}");
        Ok(())
    }

    /// Renames a table, cascading to the owner references of its indexes
    /// and sequences.
    pub fn rename_table(&mut self, old: &str, new: &str) -> Result<()> {
        log::trace!("TABLE RENAMING: {old} -> {new}");
        if new.is_empty() {
            return Err(Error::invalid_schema("table name cannot be empty"));
        }
        self.check_new_name(new)?;
        let old_info = self.tx.catalog().get_table_info(old)?.clone();
        if old_info.read_only {
            return Err(Error::ReadOnlyTable);
        }

        let mut info = (*old_info).clone();
        info.table_name = new.to_owned();

        let owned_indexes: Vec<IndexInfo> = self
            .tx
            .catalog()
            .list_indexes(Some(old))
            .map(|i| (**i).clone())
            .collect();
        for mut index in owned_indexes {
            index.owner.table_name = new.to_owned();
            store::write_relation(self.tx, CatalogRow::for_index(&index))?;
            self.tx.pending_catalog_mut().replace_index(index);
        }

        let owned_sequences: Vec<SequenceInfo> = self
            .tx
            .catalog()
            .list_sequences()
            .filter(|s| s.owner.as_ref().is_some_and(|o| o.table_name == old))
            .map(|s| (**s).clone())
            .collect();
        for mut sequence in owned_sequences {
            if let Some(owner) = &mut sequence.owner {
                owner.table_name = new.to_owned();
            }
            store::write_relation(self.tx, CatalogRow::for_sequence(&sequence))?;
            self.tx.pending_catalog_mut().replace_sequence(sequence);
        }

        store::delete_relation(self.tx, old)?;
        store::insert_relation(self.tx, CatalogRow::for_table(&info))?;
        let catalog = self.tx.pending_catalog_mut();
        catalog.remove_table(old);
        catalog.insert_table(info)?;
        Ok(())
    }

    /// Appends a column and/or table constraints to an existing table.
    ///
    /// The column lands at the next position; rows written before the
    /// change decode through the new schema lazily, so the new column
    /// should be nullable or carry a default for them to stay readable.
    pub fn add_column_constraint(
        &mut self,
        table: &str,
        column: Option<ColumnConstraint>,
        constraints: Vec<TableConstraint>,
    ) -> Result<()> {
        let current = self.tx.catalog().get_table_info(table)?.clone();
        if current.read_only {
            return Err(Error::ReadOnlyTable);
        }
        let mut info = (*current).clone();
        if let Some(column) = column {
            if let Some(default) = &column.default {
                default.validate(&info)?;
            }
            info.add_column(column.column, column.data_type, column.not_null, column.default)?;
        }
        for constraint in constraints {
            info.add_table_constraint(constraint)?;
        }
        store::write_relation(self.tx, CatalogRow::for_table(&info))?;
        self.tx.pending_catalog_mut().replace_table(info);
        Ok(())
    }

    /// Creates an index over an existing table. An empty name is
    /// generated from the table and column names.
    pub fn create_index(&mut self, mut info: IndexInfo) -> Result<String> {
        let table = self.tx.catalog().get_table_info(&info.owner.table_name)?.clone();
        if info.columns.is_empty() {
            return Err(Error::invalid_schema("index requires at least one column"));
        }
        if info.columns.len() > 64 {
            return Err(Error::invalid_schema("index spans more than 64 columns"));
        }
        for column in &info.columns {
            if table.column_constraints.get(column).is_none() {
                return Err(Error::invalid_schema(format!(
                    "unknown column `{column}` on table `{}`",
                    table.table_name
                )));
            }
        }
        if info.index_name.is_empty() {
            info.index_name = self.unique_name(&format!(
                "{}_{}_idx",
                info.owner.table_name,
                info.columns.join("_")
            ));
        } else {
            self.check_new_name(&info.index_name)?;
        }
        log::trace!(
            "INDEX CREATING: {} for table: {} and col(s): {:?}",
            info.index_name,
            info.owner.table_name,
            info.columns
        );

        info.store_namespace = self.allocate_namespace()?;
        store::insert_relation(self.tx, CatalogRow::for_index(&info))?;
        let name = info.index_name.clone();
        self.tx.pending_catalog_mut().insert_index(info)?;
        log::trace!("INDEX CREATED: {name}");
        Ok(name)
    }

    /// Drops an index. Indexes backing a UNIQUE constraint can only go
    /// away with their constraint.
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        let info = self.tx.catalog().get_index_info(name)?.clone();
        if info.owner.columns.is_some() {
            return Err(Error::invalid_schema(format!(
                "index `{name}` backs a unique constraint of table `{}`",
                info.owner.table_name
            )));
        }
        self.drop_index_unchecked(name)
    }

    fn drop_index_unchecked(&mut self, name: &str) -> Result<()> {
        log::trace!("INDEX DROPPING: {name}");
        let info = self.tx.catalog().get_index_info(name)?.clone();
        self.truncate_namespace(info.store_namespace)?;
        store::delete_relation(self.tx, name)?;
        self.tx.pending_catalog_mut().remove_index(name);
        log::trace!("INDEX DROPPED: {name}");
        Ok(())
    }

    /// Creates a sequence. An empty name is generated from the owner
    /// table.
    pub fn create_sequence(&mut self, mut info: SequenceInfo) -> Result<String> {
        if info.name.is_empty() {
            let owner = info
                .owner
                .as_ref()
                .map(|o| o.table_name.as_str())
                .ok_or_else(|| Error::invalid_schema("unnamed sequence requires an owner"))?;
            info.name = self.unique_name(&format!("{owner}_seq"));
        } else {
            self.check_new_name(&info.name)?;
        }
        self.create_sequence_unchecked(info)
    }

    fn create_sequence_unchecked(&mut self, mut info: SequenceInfo) -> Result<String> {
        log::trace!("SEQUENCE CREATING: {}", info.name);
        if info.cache == 0 {
            info.cache = 1;
        }
        info.validate()?;
        store::insert_relation(self.tx, CatalogRow::for_sequence(&info))?;
        store::insert_sequence_row(self.tx, &info.name)?;
        let name = info.name.clone();
        self.tx.pending_catalog_mut().insert_sequence(info)?;
        log::trace!("SEQUENCE CREATED: {name}");
        Ok(name)
    }

    /// Drops a standalone sequence. Owned sequences go away with their
    /// owner.
    pub fn drop_sequence(&mut self, name: &str) -> Result<()> {
        let info = self.tx.catalog().get_sequence_info(name)?.clone();
        if let Some(owner) = &info.owner {
            return Err(Error::invalid_schema(format!(
                "sequence `{name}` is owned by table `{}` and is dropped with it",
                owner.table_name
            )));
        }
        self.drop_sequence_unchecked(name)
    }

    fn drop_sequence_unchecked(&mut self, name: &str) -> Result<()> {
        log::trace!("SEQUENCE DROPPING: {name}");
        self.tx.catalog().get_sequence_info(name)?;
        store::delete_relation(self.tx, name)?;
        store::delete_sequence_row(self.tx, name)?;
        self.tx.pending_catalog_mut().remove_sequence(name);
        self.tx.forget_sequence(name);
        let db = self.tx.db().clone();
        let cell_name = name.to_owned();
        self.tx.on_commit(move || db.remove_sequence_cell(&cell_name));
        Ok(())
    }

    /// Rebuilds an index from a full scan of its table.
    pub fn re_index(&mut self, name: &str) -> Result<()> {
        log::trace!("REINDEXING: {name}");
        let index = self.tx.catalog().get_index(name)?;
        let table = self.tx.catalog().get_table(&index.info().owner.table_name)?;

        index.truncate(self.tx)?;
        let mut entries: Vec<(Key, Vec<Value>)> = Vec::new();
        for item in table.iter(self.tx, &Range::all(), false)? {
            let (key, row) = item?;
            let values = index
                .info()
                .columns
                .iter()
                .map(|col| Ok(row.get(col)?.unwrap_or(Value::Null)))
                .collect::<Result<Vec<Value>>>()?;
            entries.push((key, values));
        }
        for (key, values) in entries {
            index.set(self.tx, &values, &key)?;
        }
        Ok(())
    }

    /// Rebuilds every index in the catalog.
    pub fn re_index_all(&mut self) -> Result<()> {
        let names: Vec<String> = self
            .tx
            .catalog()
            .list_indexes(None)
            .map(|i| i.index_name.clone())
            .collect();
        for name in names {
            self.re_index(&name)?;
        }
        Ok(())
    }

    fn check_new_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_schema("relation name cannot be empty"));
        }
        if relation_name_is_system(name) {
            return Err(Error::invalid_schema(format!(
                "name `{name}` is reserved for system relations"
            )));
        }
        if self.tx.catalog().contains(name) {
            return Err(Error::already_exists(name));
        }
        Ok(())
    }

    /// Smallest `base`, `base1`, `base2`, … not taken in the catalog.
    fn unique_name(&self, base: &str) -> String {
        if !self.tx.catalog().contains(base) {
            return base.to_owned();
        }
        let mut n = 1;
        loop {
            let name = format!("{base}{n}");
            if !self.tx.catalog().contains(&name) {
                return name;
            }
            n += 1;
        }
    }

    fn allocate_namespace(&mut self) -> Result<Namespace> {
        let sequence = self.tx.catalog().get_sequence(STORE_SEQUENCE_NAME)?;
        let allocated = sequence.next(self.tx)?;
        Ok(Namespace(allocated as u64))
    }

    fn truncate_namespace(&mut self, namespace: Namespace) -> Result<()> {
        let prefix = key_prefix(namespace);
        let hi = prefix_successor(&prefix).unwrap_or_default();
        self.tx.session_mut().delete_range(&prefix, &hi)?;
        Ok(())
    }
}
