//! Reader for the canonical CREATE statements the catalog writes into
//! the `sql` column of `__catalog`.
//!
//! This is not a SQL frontend: it accepts exactly the grammar the
//! `to_sql` methods emit (identifiers always double-quoted, explicit
//! ASC/DESC, explicit CONSTRAINT names, literal defaults and simple
//! binary expressions). Expression text outside that grammar is handed
//! to the expression parser hook configured on the database, which is
//! how a full SQL frontend plugs richer expressions into catalog
//! loading.

use crate::error::{Error, Result};
use crate::expr::{BinaryExpr, BinaryOp, ColumnRef, ExpressionParser, Literal, NextValueFor, TableExpression};
use crate::schema::{IndexInfo, Owner, SequenceInfo, TableConstraint, TableConstraintKind, TableInfo};
use basalt_codec::{DataType, Value};
use basalt_primitives::SortOrder;
use std::sync::Arc;

/// Parses a canonical `CREATE TABLE` statement.
pub(crate) fn parse_table(sql: &str, hook: Option<ExpressionParser>) -> Result<TableInfo> {
    Parser::new(sql, hook)?.create_table()
}

/// Parses a canonical `CREATE [UNIQUE] INDEX` statement.
pub(crate) fn parse_index(sql: &str) -> Result<IndexInfo> {
    Parser::new(sql, None)?.create_index()
}

/// Parses a canonical `CREATE SEQUENCE` statement.
pub(crate) fn parse_sequence(sql: &str) -> Result<SequenceInfo> {
    Parser::new(sql, None)?.create_sequence()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// A double-quoted identifier.
    Ident(String),
    /// A bare keyword.
    Word(String),
    Number(String),
    Str(String),
    Blob(Vec<u8>),
    LParen,
    RParen,
    Comma,
    Op(&'static str),
}

struct Spanned {
    tok: Tok,
    start: usize,
    end: usize,
}

struct Parser<'a> {
    sql: &'a str,
    toks: Vec<Spanned>,
    pos: usize,
    hook: Option<ExpressionParser>,
}

fn bad(sql: &str, what: impl Into<String>) -> Error {
    Error::invalid_schema(format!("cannot read catalog statement `{sql}`: {}", what.into()))
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str, hook: Option<ExpressionParser>) -> Result<Parser<'a>> {
        Ok(Parser {
            sql,
            toks: tokenize(sql)?,
            pos: 0,
            hook,
        })
    }

    fn err(&self, what: impl Into<String>) -> Error {
        bad(self.sql, what)
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|s| &s.tok)
    }

    fn next(&mut self) -> Option<&Spanned> {
        let i = self.pos;
        if i >= self.toks.len() {
            return None;
        }
        self.pos += 1;
        Some(&self.toks[i])
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Word(w)) if w.eq_ignore_ascii_case(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.err(format!("expected {word}")))
        }
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.err(format!("expected {tok:?}")))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next().map(|s| s.tok.clone()) {
            Some(Tok::Ident(name)) => Ok(name),
            other => Err(self.err(format!("expected identifier, got {other:?}"))),
        }
    }

    fn integer<T: TryFrom<i64>>(&mut self) -> Result<T> {
        let negative = self.eat(&Tok::Op("-"));
        match self.next().map(|s| s.tok.clone()) {
            Some(Tok::Number(text)) => {
                let value: i64 = text
                    .parse()
                    .map_err(|_| bad(self.sql, format!("bad integer `{text}`")))?;
                let value = if negative { -value } else { value };
                T::try_from(value).map_err(|_| bad(self.sql, format!("integer `{value}` out of range")))
            }
            other => Err(self.err(format!("expected integer, got {other:?}"))),
        }
    }

    fn create_table(mut self) -> Result<TableInfo> {
        self.expect_word("CREATE")?;
        self.expect_word("TABLE")?;
        let mut info = TableInfo::new(self.ident()?);
        self.expect(Tok::LParen)?;
        loop {
            if self.eat_word("CONSTRAINT") {
                let name = self.ident()?;
                let kind = self.constraint_kind()?;
                info.add_table_constraint(TableConstraint { name, kind })?;
            } else if matches!(self.peek(), Some(Tok::Word(_))) {
                // Unnamed table constraint.
                let kind = self.constraint_kind()?;
                info.add_table_constraint(TableConstraint {
                    name: String::new(),
                    kind,
                })?;
            } else {
                let column = self.ident()?;
                let data_type = self.data_type()?;
                let mut not_null = false;
                let mut default = None;
                loop {
                    if self.eat_word("NOT") {
                        self.expect_word("NULL")?;
                        not_null = true;
                    } else if self.eat_word("DEFAULT") {
                        default = Some(self.expression()?);
                    } else {
                        break;
                    }
                }
                info.add_column(column, data_type, not_null, default)?;
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen)?;
        Ok(info)
    }

    fn constraint_kind(&mut self) -> Result<TableConstraintKind> {
        if self.eat_word("PRIMARY") {
            self.expect_word("KEY")?;
            let (columns, sort_order) = self.key_columns()?;
            Ok(TableConstraintKind::PrimaryKey { columns, sort_order })
        } else if self.eat_word("UNIQUE") {
            let (columns, sort_order) = self.key_columns()?;
            Ok(TableConstraintKind::Unique { columns, sort_order })
        } else if self.eat_word("CHECK") {
            self.expect(Tok::LParen)?;
            let expr = self.expression()?;
            self.expect(Tok::RParen)?;
            Ok(TableConstraintKind::Check { expr })
        } else {
            Err(self.err("expected PRIMARY KEY, UNIQUE or CHECK"))
        }
    }

    fn key_columns(&mut self) -> Result<(Vec<String>, SortOrder)> {
        self.expect(Tok::LParen)?;
        let mut columns = Vec::new();
        let mut sort_order = SortOrder::ASC;
        loop {
            let column = self.ident()?;
            if self.eat_word("DESC") {
                sort_order = sort_order.with_desc(columns.len());
            } else {
                self.eat_word("ASC");
            }
            columns.push(column);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen)?;
        Ok((columns, sort_order))
    }

    fn data_type(&mut self) -> Result<DataType> {
        let word = match self.next().map(|s| s.tok.clone()) {
            Some(Tok::Word(w)) => w.to_ascii_uppercase(),
            other => return Err(self.err(format!("expected a type, got {other:?}"))),
        };
        match word.as_str() {
            "BOOLEAN" => Ok(DataType::Boolean),
            "INTEGER" => Ok(DataType::Integer),
            "BIGINT" => Ok(DataType::Bigint),
            "TEXT" => Ok(DataType::Text),
            "BYTEA" => Ok(DataType::Bytea),
            "DOUBLE" => {
                self.expect_word("PRECISION")?;
                Ok(DataType::DoublePrecision)
            }
            other => Err(self.err(format!("unknown type `{other}`"))),
        }
    }

    fn create_index(mut self) -> Result<IndexInfo> {
        self.expect_word("CREATE")?;
        let unique = self.eat_word("UNIQUE");
        self.expect_word("INDEX")?;
        let index_name = self.ident()?;
        self.expect_word("ON")?;
        let table_name = self.ident()?;
        let (columns, sort_order) = self.key_columns()?;
        Ok(IndexInfo {
            index_name,
            store_namespace: Default::default(),
            columns,
            sort_order,
            unique,
            owner: Owner::table(table_name),
        })
    }

    fn create_sequence(mut self) -> Result<SequenceInfo> {
        self.expect_word("CREATE")?;
        self.expect_word("SEQUENCE")?;
        let mut info = SequenceInfo::new(self.ident()?);
        loop {
            if self.eat_word("INCREMENT") {
                self.expect_word("BY")?;
                info.increment_by = self.integer()?;
            } else if self.eat_word("MINVALUE") {
                info.min = self.integer()?;
            } else if self.eat_word("MAXVALUE") {
                info.max = self.integer()?;
            } else if self.eat_word("START") {
                self.expect_word("WITH")?;
                info.start = self.integer()?;
            } else if self.eat_word("CACHE") {
                info.cache = self.integer::<i64>()? as u64;
            } else if self.eat_word("CYCLE") {
                info.cycle = true;
            } else if self.peek().is_none() {
                break;
            } else {
                return Err(self.err(format!("unexpected token {:?}", self.peek())));
            }
        }
        Ok(info)
    }

    /// Parses an expression of the canonical grammar; anything richer is
    /// captured verbatim and handed to the configured expression parser.
    fn expression(&mut self) -> Result<Arc<dyn TableExpression>> {
        let checkpoint = self.pos;
        match self.try_expression() {
            Ok(expr) if self.at_expression_end() => Ok(expr),
            _ => {
                self.pos = checkpoint;
                let raw = self.capture_raw()?;
                match &self.hook {
                    Some(hook) => hook(&raw),
                    None => Err(self.err(format!(
                        "expression `{raw}` needs an expression parser"
                    ))),
                }
            }
        }
    }

    fn at_expression_end(&self) -> bool {
        matches!(self.peek(), None | Some(Tok::Comma | Tok::RParen))
            || matches!(self.peek(), Some(Tok::Word(w))
                if w.eq_ignore_ascii_case("NOT") || w.eq_ignore_ascii_case("DEFAULT"))
    }

    fn try_expression(&mut self) -> Result<Arc<dyn TableExpression>> {
        let left = self.primary()?;
        let op = match self.peek() {
            Some(Tok::Op(op)) => match *op {
                "=" => BinaryOp::Eq,
                "<>" => BinaryOp::Ne,
                "<" => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">" => BinaryOp::Gt,
                ">=" => BinaryOp::Ge,
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                "*" => BinaryOp::Mul,
                _ => return Ok(left),
            },
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.primary()?;
        Ok(Arc::new(BinaryExpr::new(left, op, right)))
    }

    fn primary(&mut self) -> Result<Arc<dyn TableExpression>> {
        if self.eat(&Tok::LParen) {
            let inner = self.try_expression()?;
            self.expect(Tok::RParen)?;
            return Ok(inner);
        }
        if matches!(self.peek(), Some(Tok::Word(w)) if w.eq_ignore_ascii_case("NEXT")) {
            self.pos += 1;
            self.expect_word("VALUE")?;
            self.expect_word("FOR")?;
            return Ok(Arc::new(NextValueFor(self.ident()?)));
        }
        if let Some(Tok::Ident(_)) = self.peek() {
            return Ok(Arc::new(ColumnRef(self.ident()?)));
        }
        self.literal().map(|v| Arc::new(Literal(v)) as Arc<dyn TableExpression>)
    }

    fn literal(&mut self) -> Result<Value> {
        let negative = self.eat(&Tok::Op("-"));
        let spanned = self
            .next()
            .map(|s| s.tok.clone())
            .ok_or_else(|| bad(self.sql, "unexpected end of statement"))?;
        let value = match spanned {
            Tok::Number(text) => parse_number(&text, negative)
                .ok_or_else(|| bad(self.sql, format!("bad number `{text}`")))?,
            Tok::Str(s) if !negative => Value::Text(s),
            Tok::Blob(b) if !negative => Value::Bytea(b),
            Tok::Word(w) if !negative && w.eq_ignore_ascii_case("TRUE") => Value::Boolean(true),
            Tok::Word(w) if !negative && w.eq_ignore_ascii_case("FALSE") => Value::Boolean(false),
            Tok::Word(w) if !negative && w.eq_ignore_ascii_case("NULL") => Value::Null,
            other => return Err(self.err(format!("expected literal, got {other:?}"))),
        };
        Ok(value)
    }

    /// Grabs the raw text of an expression up to the next top-level comma
    /// or the closing parenthesis.
    fn capture_raw(&mut self) -> Result<String> {
        let start = self
            .toks
            .get(self.pos)
            .ok_or_else(|| bad(self.sql, "unexpected end of statement"))?
            .start;
        let mut end = start;
        let mut depth = 0usize;
        while let Some(spanned) = self.toks.get(self.pos) {
            match spanned.tok {
                Tok::LParen => depth += 1,
                Tok::RParen if depth == 0 => break,
                Tok::RParen => depth -= 1,
                Tok::Comma if depth == 0 => break,
                _ => {}
            }
            end = spanned.end;
            self.pos += 1;
        }
        Ok(self.sql[start..end].to_owned())
    }
}

fn parse_number(text: &str, negative: bool) -> Option<Value> {
    if text.contains(['.', 'e', 'E']) {
        let v: f64 = text.parse().ok()?;
        Some(Value::Double(if negative { -v } else { v }))
    } else {
        let v: i64 = text.parse().ok()?;
        Some(Value::Bigint(if negative { -v } else { v }))
    }
}

fn tokenize(sql: &str) -> Result<Vec<Spanned>> {
    let bytes = sql.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'(' => {
                toks.push(Spanned { tok: Tok::LParen, start, end: i + 1 });
                i += 1;
            }
            b')' => {
                toks.push(Spanned { tok: Tok::RParen, start, end: i + 1 });
                i += 1;
            }
            b',' => {
                toks.push(Spanned { tok: Tok::Comma, start, end: i + 1 });
                i += 1;
            }
            b'"' => {
                let mut name = String::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        Some(b'"') if bytes.get(i + 1) == Some(&b'"') => {
                            name.push('"');
                            i += 2;
                        }
                        Some(b'"') => {
                            i += 1;
                            break;
                        }
                        Some(_) => {
                            let ch = sql[i..].chars().next().unwrap();
                            name.push(ch);
                            i += ch.len_utf8();
                        }
                        None => return Err(bad(sql, "unterminated identifier")),
                    }
                }
                toks.push(Spanned { tok: Tok::Ident(name), start, end: i });
            }
            b'\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        Some(b'\'') if bytes.get(i + 1) == Some(&b'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some(b'\'') => {
                            i += 1;
                            break;
                        }
                        Some(_) => {
                            let ch = sql[i..].chars().next().unwrap();
                            text.push(ch);
                            i += ch.len_utf8();
                        }
                        None => return Err(bad(sql, "unterminated string")),
                    }
                }
                toks.push(Spanned { tok: Tok::Str(text), start, end: i });
            }
            b'X' | b'x' if bytes.get(i + 1) == Some(&b'\'') => {
                i += 2;
                let hex_start = i;
                while i < bytes.len() && bytes[i] != b'\'' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(bad(sql, "unterminated blob literal"));
                }
                let hex = &sql[hex_start..i];
                i += 1;
                if hex.len() % 2 != 0 {
                    return Err(bad(sql, "odd-length blob literal"));
                }
                let blob = (0..hex.len())
                    .step_by(2)
                    .map(|j| u8::from_str_radix(&hex[j..j + 2], 16))
                    .collect::<std::result::Result<Vec<u8>, _>>()
                    .map_err(|_| bad(sql, "bad blob literal"))?;
                toks.push(Spanned { tok: Tok::Blob(blob), start, end: i });
            }
            b'<' | b'>' | b'=' => {
                let op = match (c, bytes.get(i + 1)) {
                    (b'<', Some(b'=')) => "<=",
                    (b'<', Some(b'>')) => "<>",
                    (b'>', Some(b'=')) => ">=",
                    (b'<', _) => "<",
                    (b'>', _) => ">",
                    (b'=', _) => "=",
                    _ => unreachable!(),
                };
                i += op.len();
                toks.push(Spanned { tok: Tok::Op(op), start, end: i });
            }
            b'+' | b'-' | b'*' => {
                let op = match c {
                    b'+' => "+",
                    b'-' => "-",
                    _ => "*",
                };
                i += 1;
                toks.push(Spanned { tok: Tok::Op(op), start, end: i });
            }
            b'0'..=b'9' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit()
                        || bytes[i] == b'.'
                        || bytes[i] == b'e'
                        || bytes[i] == b'E'
                        || ((bytes[i] == b'+' || bytes[i] == b'-')
                            && matches!(bytes[i - 1], b'e' | b'E')))
                {
                    i += 1;
                }
                toks.push(Spanned {
                    tok: Tok::Number(sql[start..i].to_owned()),
                    start,
                    end: i,
                });
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                toks.push(Spanned {
                    tok: Tok::Word(sql[start..i].to_owned()),
                    start,
                    end: i,
                });
            }
            other => return Err(bad(sql, format!("unexpected byte 0x{other:02x}"))),
        }
    }
    Ok(toks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn table_roundtrip() {
        let mut info = TableInfo::new("orders");
        info.add_column("id", DataType::Integer, true, None).unwrap();
        info.add_column(
            "qty",
            DataType::Bigint,
            false,
            Some(Arc::new(Literal(Value::Bigint(1)))),
        )
        .unwrap();
        info.add_column("note", DataType::Text, false, None).unwrap();
        info.add_table_constraint(TableConstraint::primary_key(
            vec!["id".into()],
            SortOrder::ASC,
        ))
        .unwrap();
        info.add_table_constraint(TableConstraint::unique(
            vec!["note".into()],
            SortOrder::ASC,
        ))
        .unwrap();
        info.add_table_constraint(TableConstraint::check(Arc::new(BinaryExpr::new(
            Arc::new(ColumnRef("qty".into())),
            BinaryOp::Gt,
            Arc::new(Literal(Value::Bigint(0))),
        ))))
        .unwrap();

        let sql = info.to_sql();
        let parsed = parse_table(&sql, None).unwrap();
        assert_eq!(parsed.to_sql(), sql);
        assert_eq!(parsed.table_name, "orders");
        assert_eq!(parsed.column_constraints.len(), 3);
        assert!(parsed.column_constraints.get("id").unwrap().not_null);
        assert!(parsed.column_constraints.get("qty").unwrap().default.is_some());
        assert_eq!(parsed.table_constraints.len(), 3);
    }

    #[test]
    fn quoted_identifiers_roundtrip() {
        let mut info = TableInfo::new("odd \"name\"");
        info.add_column("weird col", DataType::Text, false, None).unwrap();
        let sql = info.to_sql();
        let parsed = parse_table(&sql, None).unwrap();
        assert_eq!(parsed.table_name, "odd \"name\"");
        assert!(parsed.column_constraints.get("weird col").is_some());
    }

    #[test]
    fn index_roundtrip() {
        let mut info = IndexInfo::new("t", vec!["b".into(), "a".into()]);
        info.index_name = "t_b_a_idx".into();
        info.unique = true;
        info.sort_order = SortOrder::ASC.with_desc(0);
        let sql = info.to_sql();
        let parsed = parse_index(&sql).unwrap();
        assert_eq!(parsed.to_sql(), sql);
        assert!(parsed.unique);
        assert!(parsed.sort_order.is_desc(0));
        assert!(!parsed.sort_order.is_desc(1));
        assert_eq!(parsed.owner.table_name, "t");
    }

    #[test]
    fn sequence_roundtrip() {
        let mut info = SequenceInfo::new("s");
        info.increment_by = -3;
        info.min = -100;
        info.max = 100;
        info.start = 100;
        info.cache = 32;
        info.cycle = true;
        let sql = info.to_sql();
        let parsed = parse_sequence(&sql).unwrap();
        assert_eq!(parsed.to_sql(), sql);
        assert_eq!(parsed.increment_by, -3);
        assert_eq!(parsed.min, -100);
        assert_eq!(parsed.cache, 32);
        assert!(parsed.cycle);
    }

    #[test]
    fn default_literals_of_every_type() {
        let sql = "CREATE TABLE \"t\" (\
            \"a\" INTEGER DEFAULT -5, \
            \"b\" DOUBLE PRECISION DEFAULT 2.5, \
            \"c\" TEXT DEFAULT 'it''s', \
            \"d\" BYTEA DEFAULT X'AB01', \
            \"e\" BOOLEAN DEFAULT TRUE)";
        let parsed = parse_table(sql, None).unwrap();
        let default_of = |col: &str| {
            parsed
                .column_constraints
                .get(col)
                .unwrap()
                .default
                .as_ref()
                .unwrap()
                .to_string()
        };
        assert_eq!(default_of("a"), "-5");
        assert_eq!(default_of("b"), "2.5");
        assert_eq!(default_of("c"), "'it''s'");
        assert_eq!(default_of("d"), "X'AB01'");
        assert_eq!(default_of("e"), "TRUE");
    }

    #[test]
    fn next_value_for_roundtrips() {
        let sql = "CREATE TABLE \"t\" (\"id\" BIGINT DEFAULT NEXT VALUE FOR \"t_seq\")";
        let parsed = parse_table(sql, None).unwrap();
        let default = parsed
            .column_constraints
            .get("id")
            .unwrap()
            .default
            .as_ref()
            .unwrap()
            .to_string();
        assert_eq!(default, "NEXT VALUE FOR \"t_seq\"");
    }

    #[test]
    fn unknown_expression_goes_through_the_hook() {
        // Three-term expressions are outside the canonical grammar.
        let sql = "CREATE TABLE \"t\" (\"a\" INTEGER, CONSTRAINT \"c\" CHECK (\"a\" + 1 + 2))";
        assert!(parse_table(sql, None).is_err());

        let hook: ExpressionParser = Arc::new(|raw: &str| {
            assert_eq!(raw, "\"a\" + 1 + 2");
            Ok(Arc::new(Literal(Value::Boolean(true))) as Arc<dyn TableExpression>)
        });
        let parsed = parse_table(sql, Some(hook)).unwrap();
        assert_eq!(parsed.table_constraints.len(), 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_table("CREATE TABLE t (a INTEGER)", None).is_err()); // unquoted ident
        assert!(parse_sequence("CREATE SEQUENCE \"s\" FROBNICATE").is_err());
    }
}
