//! Schema descriptions of the three relation kinds: tables, indexes and
//! sequences.
//!
//! These are plain, cloneable values. Cross-relation references
//! ([`Owner`], `rowid_sequence_name`) are names resolved through the
//! catalog, never direct pointers, which keeps the catalog cheap to clone
//! per writable transaction.

use crate::error::{Error, Result};
use crate::expr::TableExpression;
use basalt_codec::DataType;
use basalt_primitives::{Namespace, SortOrder};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// Relation names starting with `__` are reserved for system relations.
pub fn relation_name_is_system(name: &str) -> bool {
    name.starts_with("__")
}

/// Double-quotes an identifier for canonical SQL output.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// One column of a table: its slot, type, nullability and default.
#[derive(Debug, Clone)]
pub struct ColumnConstraint {
    /// Slot in the encoded row. Contiguous from 0, assigned by insertion
    /// order and never reassigned.
    pub position: u16,
    pub column: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub default: Option<Arc<dyn TableExpression>>,
}

/// The ordered column list of a table, with a by-name lookup.
#[derive(Debug, Clone, Default)]
pub struct ColumnConstraints {
    columns: Vec<ColumnConstraint>,
    by_name: HashMap<String, usize>,
    allow_extra: bool,
}

impl ColumnConstraints {
    /// Appends a column at the next position.
    pub fn push(
        &mut self,
        column: impl Into<String>,
        data_type: DataType,
        not_null: bool,
        default: Option<Arc<dyn TableExpression>>,
    ) -> Result<()> {
        let column = column.into();
        if column.is_empty() {
            return Err(Error::invalid_schema("column name cannot be empty"));
        }
        if self.by_name.contains_key(&column) {
            return Err(Error::invalid_schema(format!(
                "duplicate column `{column}`"
            )));
        }
        if self.columns.len() >= u16::MAX as usize {
            return Err(Error::invalid_schema("too many columns"));
        }
        let position = self.columns.len() as u16;
        self.by_name.insert(column.clone(), self.columns.len());
        self.columns.push(ColumnConstraint {
            position,
            column,
            data_type,
            not_null,
            default,
        });
        Ok(())
    }

    pub fn get(&self, column: &str) -> Option<&ColumnConstraint> {
        self.by_name.get(column).map(|&i| &self.columns[i])
    }

    pub fn by_position(&self, position: u16) -> Option<&ColumnConstraint> {
        self.columns.get(position as usize)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnConstraint> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether rows may carry columns beyond the declared ones.
    pub fn allow_extra(&self) -> bool {
        self.allow_extra
    }

    pub fn set_allow_extra(&mut self, allow: bool) {
        self.allow_extra = allow;
    }

    pub(crate) fn mark_not_null(&mut self, column: &str) {
        if let Some(&i) = self.by_name.get(column) {
            self.columns[i].not_null = true;
        }
    }
}

impl<'a> IntoIterator for &'a ColumnConstraints {
    type Item = &'a ColumnConstraint;
    type IntoIter = std::slice::Iter<'a, ColumnConstraint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A table-level constraint.
#[derive(Debug, Clone)]
pub struct TableConstraint {
    /// Unique within the table. Generated when the definition left it
    /// empty.
    pub name: String,
    pub kind: TableConstraintKind,
}

#[derive(Debug, Clone)]
pub enum TableConstraintKind {
    PrimaryKey {
        columns: Vec<String>,
        sort_order: SortOrder,
    },
    Unique {
        columns: Vec<String>,
        sort_order: SortOrder,
    },
    Check {
        expr: Arc<dyn TableExpression>,
    },
}

impl TableConstraint {
    pub fn primary_key(columns: Vec<String>, sort_order: SortOrder) -> Self {
        TableConstraint {
            name: String::new(),
            kind: TableConstraintKind::PrimaryKey { columns, sort_order },
        }
    }

    pub fn unique(columns: Vec<String>, sort_order: SortOrder) -> Self {
        TableConstraint {
            name: String::new(),
            kind: TableConstraintKind::Unique { columns, sort_order },
        }
    }

    pub fn check(expr: Arc<dyn TableExpression>) -> Self {
        TableConstraint {
            name: String::new(),
            kind: TableConstraintKind::Check { expr },
        }
    }

    pub fn columns(&self) -> &[String] {
        match &self.kind {
            TableConstraintKind::PrimaryKey { columns, .. }
            | TableConstraintKind::Unique { columns, .. } => columns,
            TableConstraintKind::Check { .. } => &[],
        }
    }

    pub fn is_primary_key(&self) -> bool {
        matches!(self.kind, TableConstraintKind::PrimaryKey { .. })
    }
}

/// The primary key of a table, derived from its PRIMARY KEY constraint.
#[derive(Debug, Clone)]
pub struct PrimaryKey {
    pub columns: Vec<String>,
    pub types: Vec<DataType>,
    pub sort_order: SortOrder,
}

/// Description of a table.
#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    /// Unique across every relation kind in the catalog.
    pub table_name: String,
    /// Namespace the table's rows live under.
    pub store_namespace: Namespace,
    /// Read-only tables reject every write that does not come from the
    /// catalog writer itself.
    pub read_only: bool,
    pub column_constraints: ColumnConstraints,
    pub table_constraints: Vec<TableConstraint>,
    /// Sequence generating row keys when no primary key is declared.
    pub rowid_sequence_name: Option<String>,
}

impl TableInfo {
    pub fn new(table_name: impl Into<String>) -> Self {
        TableInfo {
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    /// Appends a column. See [`ColumnConstraints::push`].
    pub fn add_column(
        &mut self,
        column: impl Into<String>,
        data_type: DataType,
        not_null: bool,
        default: Option<Arc<dyn TableExpression>>,
    ) -> Result<()> {
        self.column_constraints.push(column, data_type, not_null, default)
    }

    /// Adds a table constraint, generating a name when absent and
    /// validating column references.
    ///
    /// Primary-key columns become NOT NULL, and at most one primary key
    /// may exist.
    pub fn add_table_constraint(&mut self, mut constraint: TableConstraint) -> Result<()> {
        match &constraint.kind {
            TableConstraintKind::PrimaryKey { columns, .. } => {
                if self.table_constraints.iter().any(|c| c.is_primary_key()) {
                    return Err(Error::invalid_schema(format!(
                        "table `{}` already has a primary key",
                        self.table_name
                    )));
                }
                self.check_constraint_columns(columns)?;
            }
            TableConstraintKind::Unique { columns, .. } => {
                self.check_constraint_columns(columns)?;
            }
            TableConstraintKind::Check { expr } => expr.validate(self)?,
        }

        if constraint.name.is_empty() {
            constraint.name = self.generate_constraint_name(&constraint.kind);
        }
        if self.table_constraints.iter().any(|c| c.name == constraint.name) {
            return Err(Error::invalid_schema(format!(
                "duplicate constraint name `{}`",
                constraint.name
            )));
        }

        if let TableConstraintKind::PrimaryKey { columns, .. } = &constraint.kind {
            for column in columns.clone() {
                self.column_constraints.mark_not_null(&column);
            }
        }
        self.table_constraints.push(constraint);
        Ok(())
    }

    fn check_constraint_columns(&self, columns: &[String]) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::invalid_schema("constraint requires at least one column"));
        }
        if columns.len() > 64 {
            return Err(Error::invalid_schema("constraint spans more than 64 columns"));
        }
        for column in columns {
            if self.column_constraints.get(column).is_none() {
                return Err(Error::invalid_schema(format!(
                    "unknown column `{column}` in constraint on table `{}`",
                    self.table_name
                )));
            }
        }
        Ok(())
    }

    fn generate_constraint_name(&self, kind: &TableConstraintKind) -> String {
        let base = match kind {
            TableConstraintKind::PrimaryKey { .. } => format!("{}_pk", self.table_name),
            TableConstraintKind::Check { .. } => format!("{}_check", self.table_name),
            TableConstraintKind::Unique { columns, .. } => {
                format!("{}_{}_unique", self.table_name, columns.join("_"))
            }
        };
        let mut name = base.clone();
        let mut n = 0;
        while self.table_constraints.iter().any(|c| c.name == name) {
            n += 1;
            name = format!("{base}{n}");
        }
        name
    }

    /// The primary key, when one is declared.
    pub fn primary_key(&self) -> Option<PrimaryKey> {
        self.table_constraints.iter().find_map(|c| match &c.kind {
            TableConstraintKind::PrimaryKey { columns, sort_order } => Some(PrimaryKey {
                columns: columns.clone(),
                types: columns
                    .iter()
                    .map(|col| {
                        self.column_constraints
                            .get(col)
                            .map(|cc| cc.data_type)
                            .unwrap_or(DataType::Any)
                    })
                    .collect(),
                sort_order: *sort_order,
            }),
            _ => None,
        })
    }

    /// Regenerates the canonical CREATE TABLE statement.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE {} (", quote_ident(&self.table_name));
        let mut first = true;
        for cc in &self.column_constraints {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            let _ = write!(sql, "{} {}", quote_ident(&cc.column), cc.data_type);
            if cc.not_null {
                sql.push_str(" NOT NULL");
            }
            if let Some(default) = &cc.default {
                let _ = write!(sql, " DEFAULT {default}");
            }
        }
        for tc in &self.table_constraints {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            let _ = write!(sql, "CONSTRAINT {} ", quote_ident(&tc.name));
            match &tc.kind {
                TableConstraintKind::PrimaryKey { columns, sort_order } => {
                    sql.push_str("PRIMARY KEY (");
                    write_key_columns(&mut sql, columns, *sort_order);
                    sql.push(')');
                }
                TableConstraintKind::Unique { columns, sort_order } => {
                    sql.push_str("UNIQUE (");
                    write_key_columns(&mut sql, columns, *sort_order);
                    sql.push(')');
                }
                TableConstraintKind::Check { expr } => {
                    let _ = write!(sql, "CHECK ({expr})");
                }
            }
        }
        sql.push(')');
        sql
    }
}

fn write_key_columns(sql: &mut String, columns: &[String], sort_order: SortOrder) {
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let dir = if sort_order.is_desc(i) { "DESC" } else { "ASC" };
        let _ = write!(sql, "{} {dir}", quote_ident(column));
    }
}

/// Back-reference from an index or sequence to the relation that owns it.
///
/// When `columns` is set, the owned index backs a UNIQUE table constraint
/// and cannot be dropped on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub table_name: String,
    pub columns: Option<Vec<String>>,
}

impl Owner {
    pub fn table(table_name: impl Into<String>) -> Self {
        Owner {
            table_name: table_name.into(),
            columns: None,
        }
    }

    pub fn constraint(table_name: impl Into<String>, columns: Vec<String>) -> Self {
        Owner {
            table_name: table_name.into(),
            columns: Some(columns),
        }
    }
}

/// Description of a secondary index.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub index_name: String,
    pub store_namespace: Namespace,
    /// Indexed columns of the owner table, in key order.
    pub columns: Vec<String>,
    pub sort_order: SortOrder,
    pub unique: bool,
    pub owner: Owner,
}

impl IndexInfo {
    pub fn new(table_name: impl Into<String>, columns: Vec<String>) -> Self {
        IndexInfo {
            index_name: String::new(),
            store_namespace: Namespace::default(),
            columns,
            sort_order: SortOrder::ASC,
            unique: false,
            owner: Owner::table(table_name),
        }
    }

    /// Regenerates the canonical CREATE INDEX statement.
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("CREATE ");
        if self.unique {
            sql.push_str("UNIQUE ");
        }
        let _ = write!(
            sql,
            "INDEX {} ON {} (",
            quote_ident(&self.index_name),
            quote_ident(&self.owner.table_name)
        );
        write_key_columns(&mut sql, &self.columns, self.sort_order);
        sql.push(')');
        sql
    }
}

/// Description of a sequence.
#[derive(Debug, Clone)]
pub struct SequenceInfo {
    /// Unique across every relation kind in the catalog.
    pub name: String,
    pub increment_by: i64,
    pub min: i64,
    pub max: i64,
    pub start: i64,
    /// How many values may be served per persisted lease. `0` behaves
    /// like `1` and is normalized away at creation.
    pub cache: u64,
    pub cycle: bool,
    pub owner: Option<Owner>,
}

impl SequenceInfo {
    /// An ascending sequence over the full BIGINT range.
    pub fn new(name: impl Into<String>) -> Self {
        SequenceInfo {
            name: name.into(),
            increment_by: 1,
            min: 1,
            max: i64::MAX,
            start: 1,
            cache: 1,
            cycle: false,
            owner: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.increment_by == 0 {
            return Err(Error::invalid_schema(format!(
                "sequence `{}`: increment cannot be 0",
                self.name
            )));
        }
        if self.min > self.max {
            return Err(Error::invalid_schema(format!(
                "sequence `{}`: min value {} exceeds max value {}",
                self.name, self.min, self.max
            )));
        }
        if self.start < self.min || self.start > self.max {
            return Err(Error::invalid_schema(format!(
                "sequence `{}`: start value {} must lie in {}..={}",
                self.name, self.start, self.min, self.max
            )));
        }
        Ok(())
    }

    /// Regenerates the canonical CREATE SEQUENCE statement.
    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "CREATE SEQUENCE {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START WITH {} CACHE {}",
            quote_ident(&self.name),
            self.increment_by,
            self.min,
            self.max,
            self.start,
            self.cache
        );
        if self.cycle {
            sql.push_str(" CYCLE");
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn two_column_table() -> TableInfo {
        let mut info = TableInfo::new("t");
        info.add_column("a", DataType::Integer, false, None).unwrap();
        info.add_column("b", DataType::Text, false, None).unwrap();
        info
    }

    #[test]
    fn positions_follow_add_order() {
        let info = two_column_table();
        assert_eq!(info.column_constraints.get("a").unwrap().position, 0);
        assert_eq!(info.column_constraints.get("b").unwrap().position, 1);
        assert!(info.column_constraints.get("c").is_none());
    }

    #[test]
    fn duplicate_column_rejected() {
        let mut info = two_column_table();
        assert!(info
            .add_column("a", DataType::Bigint, false, None)
            .is_err());
    }

    #[test]
    fn primary_key_is_derived_and_not_null() {
        let mut info = two_column_table();
        info.add_table_constraint(TableConstraint::primary_key(
            vec!["a".into()],
            SortOrder::ASC,
        ))
        .unwrap();

        let pk = info.primary_key().unwrap();
        assert_eq!(pk.columns, vec!["a".to_owned()]);
        assert_eq!(pk.types, vec![DataType::Integer]);
        assert!(info.column_constraints.get("a").unwrap().not_null);

        // A second primary key is rejected.
        let err = info
            .add_table_constraint(TableConstraint::primary_key(
                vec!["b".into()],
                SortOrder::ASC,
            ))
            .unwrap_err();
        assert!(err.is_invalid_schema());
    }

    #[test]
    fn unknown_constraint_column_rejected() {
        let mut info = two_column_table();
        let err = info
            .add_table_constraint(TableConstraint::unique(vec!["zzz".into()], SortOrder::ASC))
            .unwrap_err();
        assert!(err.is_invalid_schema());
    }

    #[test]
    fn generated_constraint_names() {
        let mut info = two_column_table();
        info.add_table_constraint(TableConstraint::primary_key(
            vec!["a".into()],
            SortOrder::ASC,
        ))
        .unwrap();
        info.add_table_constraint(TableConstraint::unique(vec!["b".into()], SortOrder::ASC))
            .unwrap();
        let names: Vec<_> = info.table_constraints.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["t_pk", "t_b_unique"]);
    }

    #[test]
    fn sequence_validation() {
        let mut info = SequenceInfo::new("s");
        info.validate().unwrap();
        info.increment_by = 0;
        assert!(info.validate().is_err());
        info.increment_by = 1;
        info.start = 0;
        assert!(info.validate().is_err());
        info.start = 1;
        info.min = 10;
        info.max = 5;
        assert!(info.validate().is_err());
    }

    #[test]
    fn table_sql_is_canonical() {
        let mut info = two_column_table();
        info.column_constraints.mark_not_null("a");
        info.add_table_constraint(TableConstraint::primary_key(
            vec!["a".into()],
            SortOrder::ASC,
        ))
        .unwrap();
        assert_eq!(
            info.to_sql(),
            "CREATE TABLE \"t\" (\"a\" INTEGER NOT NULL, \"b\" TEXT, \
             CONSTRAINT \"t_pk\" PRIMARY KEY (\"a\" ASC))"
        );
    }

    #[test]
    fn index_sql_is_canonical() {
        let mut info = IndexInfo::new("t", vec!["b".into(), "a".into()]);
        info.index_name = "i".into();
        info.unique = true;
        info.sort_order = SortOrder::ASC.with_desc(1);
        assert_eq!(
            info.to_sql(),
            "CREATE UNIQUE INDEX \"i\" ON \"t\" (\"b\" ASC, \"a\" DESC)"
        );
    }
}
