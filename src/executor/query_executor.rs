use crate::error::DbError;
use crate::executor::retry::RetryPolicy;
use crate::pool::Pool;
use crate::transaction::{Transaction, TransactionManager};
use crate::udbc::connection::RawResult;
use crate::udbc::result::ResultSet;
use crate::udbc::statement::Statement;
use backon::Retryable;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 数据库客户端，封装了连接池操作
///
/// Standalone statements run on a short-lived connection that is released on
/// every exit path; statements passed with a transaction run on its bound
/// connection and never touch the pool.
#[derive(Clone, Debug)]
pub struct QueryExecutor {
    pool: Pool,
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(pool: Pool) -> Self {
        let retry = RetryPolicy::from_config(pool.config());
        Self { pool, retry }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn transactions(&self) -> TransactionManager {
        TransactionManager::new(self.pool.clone())
    }

    pub async fn begin(&self) -> Result<Transaction, DbError> {
        self.transactions().begin().await
    }

    /// Executes `stmt`, inside `tx` when one is given.
    pub async fn run(
        &self,
        stmt: &Statement,
        tx: Option<&mut Transaction>,
    ) -> Result<ResultSet, DbError> {
        match tx {
            Some(tx) => tx.execute(stmt).await,
            None => self.run_standalone(stmt).await,
        }
    }

    async fn run_standalone(&self, stmt: &Statement) -> Result<ResultSet, DbError> {
        let raw = (|| self.run_once(stmt))
            .retry(self.retry.builder())
            .when(|e: &DbError| e.is_transient() && stmt.is_idempotent())
            .notify(|e: &DbError, delay: Duration| {
                warn!(
                    limit = self.retry.limit,
                    delay_ms = delay.as_millis() as u64,
                    "transient error, retrying: {}",
                    e
                );
            })
            .await?;
        ResultSet::from_raw(raw, stmt.shape())
    }

    /// One attempt on a short-lived connection, released on every path.
    async fn run_once(&self, stmt: &Statement) -> Result<RawResult, DbError> {
        let mut conn = self.pool.acquire().await?;
        let connection = conn.id();
        let start = Instant::now();
        let result = conn.execute(stmt).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.pool.release(conn)?;

        match result {
            Ok(raw) => {
                debug!(
                    "Preparing query: sql={}, params={:?}, elapsed_ms={}, rows={}, affected={}",
                    stmt.sql(),
                    stmt.params(),
                    elapsed_ms,
                    raw.rows.len(),
                    raw.rows_affected
                );
                Ok(raw)
            }
            Err(source) => {
                debug!(
                    "Preparing query: sql={}, params={:?}, elapsed_ms={}, error={}",
                    stmt.sql(),
                    stmt.params(),
                    elapsed_ms,
                    source
                );
                Err(DbError::QueryFailed { connection, source })
            }
        }
    }

    /// Runs a row-returning query and deserializes every row into `R`.
    /// Reads issued this way are treated as idempotent.
    pub async fn query<R, T>(&self, sql: &str, args: &T) -> Result<Vec<R>, DbError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let stmt = Statement::query(sql).idempotent().bind_all(args)?;
        self.run(&stmt, None).await?.deserialize()
    }

    /// Runs a statement and returns the affected-row count.
    pub async fn execute<T>(&self, sql: &str, args: &T) -> Result<u64, DbError>
    where
        T: Serialize,
    {
        let stmt = Statement::execute(sql).bind_all(args)?;
        Ok(self.run(&stmt, None).await?.rows_affected())
    }

    /// Runs a single-value query and deserializes the value into `R`.
    pub async fn scalar<R, T>(&self, sql: &str, args: &T) -> Result<R, DbError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let stmt = Statement::scalar(sql).idempotent().bind_all(args)?;
        self.run(&stmt, None).await?.deserialize_scalar()
    }
}
