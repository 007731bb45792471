//! The catalog: the in-memory registry of tables, indexes and sequences.
//!
//! Reader operations consult the in-memory maps only. A writable
//! transaction mutates a private clone through [`CatalogWriter`]; commit
//! publishes the clone with an atomic pointer swap, so concurrent readers
//! keep the catalog they captured at `begin` (see
//! [`crate::transaction::Transaction`]).

pub(crate) mod ddl;
pub(crate) mod store;
mod writer;

pub use writer::CatalogWriter;

use crate::error::{Error, Result};
use crate::index::Index;
use crate::schema::{IndexInfo, SequenceInfo, TableInfo};
use crate::sequence::Sequence;
use crate::table::Table;
use basalt_codec::DataType;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named catalog entry of any kind.
#[derive(Debug, Clone)]
pub enum Relation {
    Table(Arc<TableInfo>),
    Index(Arc<IndexInfo>),
    Sequence(Arc<SequenceInfo>),
}

impl Relation {
    pub fn name(&self) -> &str {
        match self {
            Relation::Table(info) => &info.table_name,
            Relation::Index(info) => &info.index_name,
            Relation::Sequence(info) => &info.name,
        }
    }
}

/// The registry itself. Cloning is cheap: the maps hold `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, Arc<TableInfo>>,
    indexes: BTreeMap<String, Arc<IndexInfo>>,
    sequences: BTreeMap<String, Arc<SequenceInfo>>,
}

impl Catalog {
    /// Builds a table view. The handle owns its schema; it stays valid
    /// for the life of the transaction it is used with.
    pub fn get_table(&self, name: &str) -> Result<Table> {
        Ok(Table::new(self.get_table_info(name)?.clone()))
    }

    pub fn get_table_info(&self, name: &str) -> Result<&Arc<TableInfo>> {
        self.tables.get(name).ok_or_else(|| Error::not_found(name))
    }

    /// Builds an index view, resolving the indexed column types from the
    /// owner table.
    pub fn get_index(&self, name: &str) -> Result<Index> {
        let info = self.get_index_info(name)?;
        let table = self.get_table_info(&info.owner.table_name)?;
        let key_types = info
            .columns
            .iter()
            .map(|col| {
                table
                    .column_constraints
                    .get(col)
                    .map(|cc| cc.data_type)
                    .ok_or_else(|| {
                        Error::invalid_schema(format!(
                            "index `{}` references unknown column `{col}` of table `{}`",
                            info.index_name, table.table_name
                        ))
                    })
            })
            .collect::<Result<Vec<DataType>>>()?;
        Ok(Index::new(info.clone(), key_types))
    }

    pub fn get_index_info(&self, name: &str) -> Result<&Arc<IndexInfo>> {
        self.indexes.get(name).ok_or_else(|| Error::not_found(name))
    }

    pub fn get_sequence(&self, name: &str) -> Result<Sequence> {
        Ok(Sequence::new(self.get_sequence_info(name)?.clone()))
    }

    pub fn get_sequence_info(&self, name: &str) -> Result<&Arc<SequenceInfo>> {
        self.sequences
            .get(name)
            .ok_or_else(|| Error::not_found(name))
    }

    pub fn list_tables(&self) -> impl Iterator<Item = &Arc<TableInfo>> {
        self.tables.values()
    }

    /// Indexes in name order, optionally only those of one table.
    pub fn list_indexes<'a>(
        &'a self,
        table: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Arc<IndexInfo>> + 'a {
        self.indexes
            .values()
            .filter(move |info| table.map_or(true, |t| info.owner.table_name == t))
    }

    pub fn list_sequences(&self) -> impl Iterator<Item = &Arc<SequenceInfo>> {
        self.sequences.values()
    }

    /// Looks a name up across all three kinds.
    pub fn relation(&self, name: &str) -> Option<Relation> {
        if let Some(info) = self.tables.get(name) {
            return Some(Relation::Table(info.clone()));
        }
        if let Some(info) = self.indexes.get(name) {
            return Some(Relation::Index(info.clone()));
        }
        self.sequences.get(name).cloned().map(Relation::Sequence)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
            || self.indexes.contains_key(name)
            || self.sequences.contains_key(name)
    }

    // Mutators, reachable only through the catalog writer. Relation
    // names are unique across kinds.

    pub(crate) fn insert_table(&mut self, info: TableInfo) -> Result<()> {
        self.check_free(&info.table_name)?;
        self.tables.insert(info.table_name.clone(), Arc::new(info));
        Ok(())
    }

    pub(crate) fn insert_index(&mut self, info: IndexInfo) -> Result<()> {
        self.check_free(&info.index_name)?;
        self.indexes.insert(info.index_name.clone(), Arc::new(info));
        Ok(())
    }

    pub(crate) fn insert_sequence(&mut self, info: SequenceInfo) -> Result<()> {
        self.check_free(&info.name)?;
        self.sequences.insert(info.name.clone(), Arc::new(info));
        Ok(())
    }

    /// Replaces a table's schema in place (same name).
    pub(crate) fn replace_table(&mut self, info: TableInfo) {
        self.tables.insert(info.table_name.clone(), Arc::new(info));
    }

    pub(crate) fn replace_index(&mut self, info: IndexInfo) {
        self.indexes.insert(info.index_name.clone(), Arc::new(info));
    }

    pub(crate) fn replace_sequence(&mut self, info: SequenceInfo) {
        self.sequences.insert(info.name.clone(), Arc::new(info));
    }

    pub(crate) fn remove_table(&mut self, name: &str) -> Option<Arc<TableInfo>> {
        self.tables.remove(name)
    }

    pub(crate) fn remove_index(&mut self, name: &str) -> Option<Arc<IndexInfo>> {
        self.indexes.remove(name)
    }

    pub(crate) fn remove_sequence(&mut self, name: &str) -> Option<Arc<SequenceInfo>> {
        self.sequences.remove(name)
    }

    fn check_free(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_schema("relation name cannot be empty"));
        }
        if self.contains(name) {
            return Err(Error::already_exists(name));
        }
        Ok(())
    }
}
