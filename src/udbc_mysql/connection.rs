use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Row as MyRow};

use crate::error::ExecError;
use crate::udbc::connection::{Connection, RawResult};
use crate::udbc::value::Value;
use crate::udbc_mysql::value_codec::{classify, from_mysql_value, to_mysql_value};

/// A single MySQL session. Exclusive access comes from the pool checkout,
/// so no lock is needed around the inner `Conn`.
pub struct MysqlConnection {
    conn: Option<Conn>,
}

impl MysqlConnection {
    pub fn new(conn: Conn) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&mut self) -> Result<&mut Conn, ExecError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ExecError::Fatal("mysql connection is closed".into()))
    }

    fn map_row(row: &MyRow) -> Vec<Value> {
        let cols = row.columns_ref();
        (0..row.len())
            .map(|i| match row.as_ref(i) {
                Some(v) => from_mysql_value(v, cols.get(i)),
                None => Value::Null,
            })
            .collect()
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<RawResult, ExecError> {
        let params = args
            .iter()
            .map(to_mysql_value)
            .collect::<Result<Vec<_>, _>>()?;
        let conn = self.conn()?;
        let rows: Vec<MyRow> = conn
            .exec(sql, mysql_async::Params::Positional(params))
            .await
            .map_err(classify)?;

        let columns = rows
            .first()
            .map(|r| {
                r.columns_ref()
                    .iter()
                    .map(|c| c.name_str().to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(RawResult {
            columns,
            rows: rows.iter().map(Self::map_row).collect(),
            rows_affected: conn.affected_rows(),
            last_insert_id: conn.last_insert_id(),
        })
    }

    async fn begin(&mut self) -> Result<(), ExecError> {
        self.conn()?.query_drop("BEGIN").await.map_err(classify)
    }

    async fn commit(&mut self) -> Result<(), ExecError> {
        self.conn()?.query_drop("COMMIT").await.map_err(classify)
    }

    async fn rollback(&mut self) -> Result<(), ExecError> {
        self.conn()?.query_drop("ROLLBACK").await.map_err(classify)
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        match self.conn.take() {
            Some(conn) => conn.disconnect().await.map_err(classify),
            None => Ok(()),
        }
    }
}
