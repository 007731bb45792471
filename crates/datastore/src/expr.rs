//! The expression seam between the storage layer and the SQL frontend.
//!
//! Column defaults and CHECK constraints are stored as values of this
//! trait. The planner hands in whatever expression tree it parsed; the
//! storage layer only needs evaluation against the current transaction,
//! validation against a table, and a SQL rendering for the catalog.
//!
//! Evaluation receives its environment (the transaction) by argument and
//! never captures catalog state, so expressions stay inert values inside
//! the cloneable catalog.
//!
//! A small set of expressions ships here (literals, column references,
//! binary comparison/arithmetic and `NEXT VALUE FOR`), enough for
//! defaults, simple checks and the canonical catalog reader.

use crate::error::{Error, Result};
use crate::row::OwnedRow;
use crate::schema::{quote_ident, TableInfo};
use crate::transaction::Transaction;
use basalt_codec::{DataType, Value};
use std::fmt;
use std::sync::Arc;

/// Parses expression text into an expression tree. Configured on the
/// database by the SQL frontend; the catalog reader falls back to it for
/// text outside its canonical grammar.
pub type ExpressionParser = Arc<dyn Fn(&str) -> Result<Arc<dyn TableExpression>> + Send + Sync>;

pub trait TableExpression: fmt::Debug + fmt::Display + Send + Sync {
    /// Evaluates the expression, optionally against a row.
    fn eval(&self, tx: &mut Transaction, row: Option<&OwnedRow>) -> Result<Value>;

    /// Checks that the expression is usable with the given table.
    fn validate(&self, info: &TableInfo) -> Result<()> {
        let _ = info;
        Ok(())
    }
}

/// A constant value.
#[derive(Debug, Clone)]
pub struct Literal(pub Value);

impl TableExpression for Literal {
    fn eval(&self, _tx: &mut Transaction, _row: Option<&OwnedRow>) -> Result<Value> {
        Ok(self.0.clone())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A reference to a column of the evaluated row.
#[derive(Debug, Clone)]
pub struct ColumnRef(pub String);

impl TableExpression for ColumnRef {
    fn eval(&self, _tx: &mut Transaction, row: Option<&OwnedRow>) -> Result<Value> {
        let row = row.ok_or_else(|| {
            Error::invalid_schema(format!("column `{}` referenced outside a row context", self.0))
        })?;
        Ok(row.get(&self.0).cloned().unwrap_or(Value::Null))
    }

    fn validate(&self, info: &TableInfo) -> Result<()> {
        if info.column_constraints.get(&self.0).is_none() {
            return Err(Error::invalid_schema(format!(
                "unknown column `{}` on table `{}`",
                self.0, info.table_name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_ident(&self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
        }
    }

    fn is_comparison(self) -> bool {
        !matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul)
    }
}

/// A binary comparison or arithmetic expression.
#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub left: Arc<dyn TableExpression>,
    pub op: BinaryOp,
    pub right: Arc<dyn TableExpression>,
}

impl BinaryExpr {
    pub fn new(
        left: Arc<dyn TableExpression>,
        op: BinaryOp,
        right: Arc<dyn TableExpression>,
    ) -> Self {
        BinaryExpr { left, op, right }
    }
}

impl TableExpression for BinaryExpr {
    fn eval(&self, tx: &mut Transaction, row: Option<&OwnedRow>) -> Result<Value> {
        let left = self.left.eval(tx, row)?;
        let right = self.right.eval(tx, row)?;
        if left.is_null() || right.is_null() {
            return Ok(Value::Null);
        }
        if self.op.is_comparison() {
            let ord = compare(&left, &right)?;
            let result = match self.op {
                BinaryOp::Eq => ord == std::cmp::Ordering::Equal,
                BinaryOp::Ne => ord != std::cmp::Ordering::Equal,
                BinaryOp::Lt => ord == std::cmp::Ordering::Less,
                BinaryOp::Le => ord != std::cmp::Ordering::Greater,
                BinaryOp::Gt => ord == std::cmp::Ordering::Greater,
                BinaryOp::Ge => ord != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Boolean(result))
        } else {
            arithmetic(&left, self.op, &right)
        }
    }

    fn validate(&self, info: &TableInfo) -> Result<()> {
        self.left.validate(info)?;
        self.right.validate(info)
    }
}

impl fmt::Display for BinaryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op.symbol(), self.right)
    }
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering> {
    use Value::*;
    let mismatch = || Error::TypeMismatch {
        column: Box::from(""),
        expected: left.data_type(),
        got: right.data_type(),
    };
    match (left, right) {
        (Boolean(a), Boolean(b)) => Ok(a.cmp(b)),
        (Text(a), Text(b)) => Ok(a.cmp(b)),
        (Bytea(a), Bytea(b)) => Ok(a.cmp(b)),
        (Double(_), _) | (_, Double(_)) => {
            let a = to_f64(left).ok_or_else(mismatch)?;
            let b = to_f64(right).ok_or_else(mismatch)?;
            a.partial_cmp(&b).ok_or(Error::InvalidRange("NaN is not comparable"))
        }
        _ => {
            let a = left.as_i64().ok_or_else(mismatch)?;
            let b = right.as_i64().ok_or_else(mismatch)?;
            Ok(a.cmp(&b))
        }
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match *value {
        Value::Double(v) => Some(v),
        Value::Integer(v) => Some(v as f64),
        Value::Bigint(v) => Some(v as f64),
        _ => None,
    }
}

fn arithmetic(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    let overflow = || Error::ValueOutOfRange {
        column: Box::from(""),
        value: format!("{left} {} {right}", op.symbol()).into_boxed_str(),
    };
    if matches!(left, Value::Double(_)) || matches!(right, Value::Double(_)) {
        let (a, b) = match (to_f64(left), to_f64(right)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(Error::TypeMismatch {
                    column: Box::from(""),
                    expected: DataType::DoublePrecision,
                    got: if to_f64(left).is_none() {
                        left.data_type()
                    } else {
                        right.data_type()
                    },
                })
            }
        };
        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            _ => unreachable!(),
        };
        return Ok(Value::Double(result));
    }
    let mismatch = |v: &Value| Error::TypeMismatch {
        column: Box::from(""),
        expected: DataType::Bigint,
        got: v.data_type(),
    };
    let a = left.as_i64().ok_or_else(|| mismatch(left))?;
    let b = right.as_i64().ok_or_else(|| mismatch(right))?;
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        _ => unreachable!(),
    }
    .ok_or_else(overflow)?;
    Ok(Value::Bigint(result))
}

/// `NEXT VALUE FOR <sequence>`: draws the next value of a catalog
/// sequence when evaluated.
#[derive(Debug, Clone)]
pub struct NextValueFor(pub String);

impl TableExpression for NextValueFor {
    fn eval(&self, tx: &mut Transaction, _row: Option<&OwnedRow>) -> Result<Value> {
        let sequence = tx.catalog().get_sequence(&self.0)?;
        sequence.next(tx).map(Value::Bigint)
    }
}

impl fmt::Display for NextValueFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NEXT VALUE FOR {}", quote_ident(&self.0))
    }
}
