//! Table storage and the statement grammar understood by the memory store.
//!
//! ```text
//! CREATE TABLE <table> (<col>, <col>, ...)
//! INSERT INTO <table> VALUES (?, ?, ...)
//! SELECT * FROM <table> [WHERE <col> = ?]
//! SELECT count(*) FROM <table> [WHERE <col> = ?]
//! DELETE FROM <table> [WHERE <col> = ?]
//! ```
//!
//! The first column of every table is its unique key.

use crate::error::ExecError;
use crate::udbc::connection::RawResult;
use crate::udbc::value::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub(crate) type Tables = HashMap<String, Table>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Filter {
    All,
    Eq { column: String, value: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    CreateTable { table: String, columns: Vec<String> },
    Insert { table: String, row: Vec<Value> },
    Select { table: String, filter: Filter },
    Count { table: String, filter: Filter },
    Delete { table: String, filter: Filter },
}

impl Command {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::CreateTable { .. } | Command::Insert { .. } | Command::Delete { .. }
        )
    }

    pub fn parse(sql: &str, args: &[Value]) -> Result<Self, ExecError> {
        let normalized: String = sql
            .chars()
            .map(|c| if matches!(c, '(' | ')' | ',') { ' ' } else { c })
            .collect();
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        let upper: Vec<String> = tokens.iter().map(|t| t.to_ascii_uppercase()).collect();
        let kw: Vec<&str> = upper.iter().map(String::as_str).collect();

        let syntax = || ExecError::Fatal(format!("syntax error in statement: {}", sql.trim()));

        match kw.as_slice() {
            ["CREATE", "TABLE", _, cols @ ..] if !cols.is_empty() => Ok(Command::CreateTable {
                table: tokens[2].to_string(),
                columns: tokens[3..].iter().map(|c| c.to_string()).collect(),
            }),
            ["INSERT", "INTO", _, "VALUES", placeholders @ ..] => {
                if placeholders.len() != args.len() {
                    return Err(ExecError::Fatal(format!(
                        "{} placeholders but {} parameters",
                        placeholders.len(),
                        args.len()
                    )));
                }
                Ok(Command::Insert {
                    table: tokens[2].to_string(),
                    row: args.to_vec(),
                })
            }
            ["SELECT", "*", "FROM", _, rest @ ..] => Ok(Command::Select {
                table: tokens[3].to_string(),
                filter: Self::filter(rest, &tokens[4..], args).ok_or_else(syntax)?,
            }),
            ["SELECT", "COUNT", "*", "FROM", _, rest @ ..] => Ok(Command::Count {
                table: tokens[4].to_string(),
                filter: Self::filter(rest, &tokens[5..], args).ok_or_else(syntax)?,
            }),
            ["DELETE", "FROM", _, rest @ ..] => Ok(Command::Delete {
                table: tokens[2].to_string(),
                filter: Self::filter(rest, &tokens[3..], args).ok_or_else(syntax)?,
            }),
            _ => Err(syntax()),
        }
    }

    fn filter(kw: &[&str], tokens: &[&str], args: &[Value]) -> Option<Filter> {
        match kw {
            [] => Some(Filter::All),
            ["WHERE", _, "=", "?"] => Some(Filter::Eq {
                column: tokens[1].to_string(),
                value: args.first()?.clone(),
            }),
            _ => None,
        }
    }

    /// Applies the command to `tables`.
    pub fn apply(&self, tables: &mut Tables) -> Result<RawResult, ExecError> {
        match self {
            Command::CreateTable { table, columns } => {
                tables.entry(table.clone()).or_insert_with(|| Table {
                    columns: columns.clone(),
                    rows: Vec::new(),
                });
                Ok(RawResult::default())
            }
            Command::Insert { table, row } => {
                let t = lookup_mut(tables, table)?;
                if row.len() != t.columns.len() {
                    return Err(ExecError::Fatal(format!(
                        "table {} has {} columns but {} values were supplied",
                        table,
                        t.columns.len(),
                        row.len()
                    )));
                }
                let key = &row[0];
                if !key.is_null() && t.rows.iter().any(|r| &r[0] == key) {
                    return Err(ExecError::ConstraintViolation(format!(
                        "duplicate key {:?} in table {}",
                        key, table
                    )));
                }
                t.rows.push(row.clone());
                Ok(RawResult {
                    rows_affected: 1,
                    last_insert_id: Some(t.rows.len() as u64),
                    ..Default::default()
                })
            }
            Command::Select { table, filter } => {
                let t = lookup(tables, table)?;
                let matcher = Matcher::new(t, filter)?;
                Ok(RawResult {
                    columns: t.columns.clone(),
                    rows: t.rows.iter().filter(|r| matcher.matches(r)).cloned().collect(),
                    ..Default::default()
                })
            }
            Command::Count { table, filter } => {
                let t = lookup(tables, table)?;
                let matcher = Matcher::new(t, filter)?;
                let count = t.rows.iter().filter(|r| matcher.matches(r)).count();
                Ok(RawResult {
                    columns: vec!["count".to_string()],
                    rows: vec![vec![Value::I64(count as i64)]],
                    ..Default::default()
                })
            }
            Command::Delete { table, filter } => {
                let t = lookup_mut(tables, table)?;
                let matcher = Matcher::new(t, filter)?;
                let before = t.rows.len();
                let kept: Vec<Vec<Value>> = t
                    .rows
                    .iter()
                    .filter(|r| !matcher.matches(r))
                    .cloned()
                    .collect();
                t.rows = kept;
                Ok(RawResult {
                    rows_affected: (before - t.rows.len()) as u64,
                    ..Default::default()
                })
            }
        }
    }
}

struct Matcher<'a> {
    index: Option<usize>,
    value: Option<&'a Value>,
}

impl<'a> Matcher<'a> {
    fn new(table: &Table, filter: &'a Filter) -> Result<Self, ExecError> {
        match filter {
            Filter::All => Ok(Self {
                index: None,
                value: None,
            }),
            Filter::Eq { column, value } => {
                let index = table
                    .columns
                    .iter()
                    .position(|c| c == column)
                    .ok_or_else(|| ExecError::Fatal(format!("no such column: {}", column)))?;
                Ok(Self {
                    index: Some(index),
                    value: Some(value),
                })
            }
        }
    }

    fn matches(&self, row: &[Value]) -> bool {
        match (self.index, self.value) {
            (Some(i), Some(v)) => row.get(i) == Some(v),
            _ => true,
        }
    }
}

fn lookup<'a>(tables: &'a Tables, table: &str) -> Result<&'a Table, ExecError> {
    tables
        .get(table)
        .ok_or_else(|| ExecError::Fatal(format!("no such table: {}", table)))
}

fn lookup_mut<'a>(tables: &'a mut Tables, table: &str) -> Result<&'a mut Table, ExecError> {
    tables
        .get_mut(table)
        .ok_or_else(|| ExecError::Fatal(format!("no such table: {}", table)))
}
