//! The basalt storage core: typed relational tables, secondary indexes
//! and sequences over an ordered key-value engine, with a transactional
//! catalog.
//!
//! The shape of the API follows the data flow: a [`Database`] opens
//! [`Transaction`]s (directly or through a [`Connection`]); a
//! transaction exposes a [`Catalog`] snapshot and, when writable, a
//! [`CatalogWriter`]; [`Table`], [`Index`] and [`Sequence`] views come
//! from the catalog and operate against the transaction they are handed.
//!
//! ```
//! use basalt_codec::DataType;
//! use basalt_datastore::{Database, OwnedRow, Row, SortOrder, TableConstraint, TableInfo};
//!
//! # fn main() -> basalt_datastore::Result<()> {
//! let db = Database::open_memory()?;
//! let mut tx = db.begin(true)?;
//!
//! let mut users = TableInfo::new("users");
//! users.add_column("id", DataType::Integer, true, None)?;
//! users.add_column("name", DataType::Text, false, None)?;
//! users.add_table_constraint(TableConstraint::primary_key(
//!     vec!["id".into()],
//!     SortOrder::ASC,
//! ))?;
//! tx.catalog_writer()?.create_table(users)?;
//!
//! let table = tx.catalog().get_table("users")?;
//! table.insert(&mut tx, Row::Owned(OwnedRow::new().with("id", 1).with("name", "ada")))?;
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```

mod catalog;
mod database;
mod error;
mod expr;
mod index;
mod range;
mod row;
mod schema;
mod sequence;
mod table;
mod transaction;

pub use basalt_codec::{DataType, Value};
pub use basalt_primitives::{Namespace, SortOrder, TxId};

pub use catalog::{Catalog, CatalogWriter, Relation};
pub use database::{CatalogLoader, Connection, Database, Options};
pub use error::{ConstraintKind, ConstraintViolation, Error, Result};
pub use expr::{
    BinaryExpr, BinaryOp, ColumnRef, ExpressionParser, Literal, NextValueFor, TableExpression,
};
pub use index::{Index, IndexEntry, IndexIter};
pub use range::Range;
pub use row::{EncodedRow, Key, OwnedRow, Row};
pub use schema::{
    relation_name_is_system, ColumnConstraint, ColumnConstraints, IndexInfo, Owner, PrimaryKey,
    SequenceInfo, TableConstraint, TableConstraintKind, TableInfo,
};
pub use sequence::Sequence;
pub use table::{Table, TableIter};
pub use transaction::Transaction;
