use crate::error::DbError;
use crate::udbc::connection::RawResult;
use crate::udbc::deserializer::{RowDeserializer, ValueDeserializer};
use crate::udbc::statement::ResultShape;
use crate::udbc::value::Value;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// One result row: column name to value, in store column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Value of the named column. `None` means the column does not exist,
    /// `Some(Value::Null)` means the store returned an absent value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Deserializes the row into `R` by column name.
    pub fn deserialize<R: DeserializeOwned>(&self) -> Result<R, DbError> {
        R::deserialize(RowDeserializer::new(self))
    }
}

/// The typed, ordered output of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Arc<[String]>,
    rows: Vec<Row>,
    rows_affected: u64,
    last_insert_id: Option<u64>,
}

impl ResultSet {
    /// Maps a raw store response into the expected shape.
    pub fn from_raw(raw: RawResult, shape: ResultShape) -> Result<Self, DbError> {
        let RawResult {
            columns,
            rows,
            rows_affected,
            last_insert_id,
        } = raw;
        let columns: Arc<[String]> = columns.into();

        let rows = match shape {
            ResultShape::None => Vec::new(),
            ResultShape::Scalar if rows.len() > 1 => {
                return Err(DbError::ShapeMismatch(format!(
                    "scalar statement returned {} rows",
                    rows.len()
                )));
            }
            ResultShape::Scalar if columns.len() != 1 && !rows.is_empty() => {
                return Err(DbError::ShapeMismatch(format!(
                    "scalar statement returned {} columns",
                    columns.len()
                )));
            }
            ResultShape::Scalar | ResultShape::Rows => rows,
        };

        let rows = rows
            .into_iter()
            .map(|values| {
                if values.len() != columns.len() {
                    return Err(DbError::ShapeMismatch(format!(
                        "row has {} values for {} columns",
                        values.len(),
                        columns.len()
                    )));
                }
                Ok(Row {
                    columns: columns.clone(),
                    values,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            columns,
            rows,
            rows_affected,
            last_insert_id,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|r| r.get_index(0))
    }

    /// 将行数据映射为目标类型
    pub fn deserialize<R: DeserializeOwned>(&self) -> Result<Vec<R>, DbError> {
        self.rows.iter().map(Row::deserialize).collect()
    }

    /// Deserializes the scalar value into `R`; a missing row reads as `Null`.
    pub fn deserialize_scalar<R: DeserializeOwned>(&self) -> Result<R, DbError> {
        let value = self.scalar().unwrap_or(&Value::Null);
        R::deserialize(ValueDeserializer { value })
    }
}
