use crate::error::DbError;
use crate::udbc::value::{Value, to_values};
use serde::Serialize;
use std::sync::Arc;

/// Result shape a statement is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Rows,
    Scalar,
    None,
}

/// An opaque statement text with positional parameters.
///
/// Statements are immutable once built and cheap to clone, so the same value
/// can be re-issued on retry or shared between tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: Arc<str>,
    params: Arc<[Value]>,
    shape: ResultShape,
    idempotent: bool,
}

impl Statement {
    pub fn new(sql: impl Into<Arc<str>>, shape: ResultShape) -> Self {
        Self {
            sql: sql.into(),
            params: Arc::from(Vec::new()),
            shape,
            idempotent: false,
        }
    }

    /// A statement returning rows.
    pub fn query(sql: impl Into<Arc<str>>) -> Self {
        Self::new(sql, ResultShape::Rows)
    }

    /// A statement returning a single value.
    pub fn scalar(sql: impl Into<Arc<str>>) -> Self {
        Self::new(sql, ResultShape::Scalar)
    }

    /// A statement whose only result is the affected-row count.
    pub fn execute(sql: impl Into<Arc<str>>) -> Self {
        Self::new(sql, ResultShape::None)
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        let mut params = self.params.to_vec();
        params.push(value.into());
        self.params = params.into();
        self
    }

    /// Replaces the parameters with the serialized fields of `args`.
    pub fn bind_all<T: Serialize>(mut self, args: &T) -> Result<Self, DbError> {
        self.params = to_values(args)?.into();
        Ok(self)
    }

    /// Declares that running this statement twice has the same effect as
    /// running it once, allowing automatic retry on transient errors.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn shape(&self) -> ResultShape {
        self.shape
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }
}
