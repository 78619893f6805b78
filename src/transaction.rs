use crate::error::DbError;
use crate::pool::{Pool, PooledConnection};
use crate::udbc::result::ResultSet;
use crate::udbc::statement::Statement;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Transaction state machine:
/// `Active -> {Committed, RolledBack, Failed}`, `Failed -> RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
    Failed,
}

impl TxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Committed | TxState::RolledBack)
    }
}

/// Starts transactions on connections taken from a pool.
#[derive(Clone, Debug)]
pub struct TransactionManager {
    pool: Pool,
}

impl TransactionManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Acquires a connection and issues the store's transaction start.
    pub async fn begin(&self) -> Result<Transaction, DbError> {
        let mut conn = self.pool.acquire().await?;
        let id = TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed));
        if let Err(source) = conn.begin().await {
            let connection = conn.id();
            self.pool.release(conn)?;
            warn!(transaction = %id, connection = %connection, "begin failed: {}", source);
            return Err(DbError::TransactionStartFailed {
                transaction: id,
                connection,
                source,
            });
        }
        debug!(transaction = %id, connection = %conn.id(), "transaction started");
        Ok(Transaction {
            id,
            state: TxState::Active,
            conn: Some(conn),
            pool: self.pool.clone(),
            started_at: Instant::now(),
        })
    }

    /// Runs `f` inside a transaction: commits when it returns `Ok`, rolls back
    /// when it returns `Err`.
    ///
    /// If `f` leaves the transaction failed, it is rolled back and the error
    /// `f` returned (or `TransactionFailed`) is surfaced.
    pub async fn scope<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: AsyncFnOnce(&mut Transaction) -> Result<T, DbError>,
    {
        let mut tx = self.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                if tx.state() == TxState::Failed {
                    let reason = tx.failure_reason();
                    tx.rollback().await?;
                    return Err(reason);
                }
                if tx.state() == TxState::Active {
                    tx.commit().await?;
                }
                Ok(value)
            }
            Err(e) => {
                if !tx.state().is_terminal() {
                    if let Err(rollback_err) = tx.rollback().await {
                        error!(transaction = %tx.id(), "rollback after error failed: {}", rollback_err);
                    }
                }
                Err(e)
            }
        }
    }
}

/// A transactional scope bound to one checked-out connection.
///
/// The connection is released exactly once: on commit, on rollback, or, if the
/// transaction is dropped unfinished, after a rollback scheduled on the runtime.
pub struct Transaction {
    id: TransactionId,
    state: TxState,
    conn: Option<PooledConnection>,
    pool: Pool,
    started_at: Instant,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    fn failure_reason(&self) -> DbError {
        DbError::TransactionFailed {
            transaction: self.id,
            reason: "a statement failed earlier in the transaction".into(),
        }
    }

    fn closed(&self) -> DbError {
        error!(transaction = %self.id, state = ?self.state, "operation on a closed transaction");
        DbError::TransactionClosed {
            transaction: self.id,
            state: self.state,
        }
    }

    /// Runs `stmt` on the bound connection. Never retried.
    pub async fn execute(&mut self, stmt: &Statement) -> Result<ResultSet, DbError> {
        match self.state {
            TxState::Active => {}
            TxState::Failed => return Err(self.failure_reason()),
            TxState::Committed | TxState::RolledBack => return Err(self.closed()),
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(self.failure_reason());
        };

        let connection = conn.id();
        let start = Instant::now();
        let result = conn.execute(stmt).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(raw) => {
                debug!(transaction = %self.id, sql = stmt.sql(), elapsed_ms, rows = raw.rows.len(), affected = raw.rows_affected, "execute");
                ResultSet::from_raw(raw, stmt.shape())
            }
            Err(source) => {
                self.state = TxState::Failed;
                warn!(transaction = %self.id, sql = stmt.sql(), elapsed_ms, "statement failed, transaction marked failed: {}", source);
                Err(DbError::QueryFailed { connection, source })
            }
        }
    }

    /// Commits and releases the connection. On failure the transaction becomes
    /// `Failed` after a best-effort rollback and the connection is released
    /// (closed instead of reused if the rollback failed too).
    pub async fn commit(&mut self) -> Result<(), DbError> {
        match self.state {
            TxState::Active => {}
            TxState::Failed => return Err(self.failure_reason()),
            TxState::Committed | TxState::RolledBack => return Err(self.closed()),
        }
        let Some(mut conn) = self.conn.take() else {
            return Err(self.failure_reason());
        };

        match conn.commit().await {
            Ok(()) => {
                self.state = TxState::Committed;
                self.pool.release(conn)?;
                info!(transaction = %self.id, elapsed_ms = self.started_at.elapsed().as_millis() as u64, "transaction committed");
                Ok(())
            }
            Err(source) => {
                self.state = TxState::Failed;
                let connection = conn.id();
                let rolled_back = match conn.rollback().await {
                    Ok(()) => {
                        conn.mark_healthy();
                        true
                    }
                    Err(e) => {
                        conn.mark_broken();
                        warn!(transaction = %self.id, "rollback after failed commit failed: {}", e);
                        false
                    }
                };
                self.pool.release(conn)?;
                warn!(transaction = %self.id, rolled_back, "commit failed: {}", source);
                Err(DbError::CommitFailed {
                    transaction: self.id,
                    connection,
                    rolled_back,
                    source,
                })
            }
        }
    }

    /// Rolls back and releases the connection. Allowed from `Active` and `Failed`.
    pub async fn rollback(&mut self) -> Result<(), DbError> {
        if self.state.is_terminal() {
            return Err(self.closed());
        }
        self.state = TxState::RolledBack;
        // A failed commit already rolled back and released the connection.
        let Some(mut conn) = self.conn.take() else {
            debug!(transaction = %self.id, "transaction finalized after failed commit");
            return Ok(());
        };

        let connection = conn.id();
        match conn.rollback().await {
            Ok(()) => {
                conn.mark_healthy();
                self.pool.release(conn)?;
                info!(transaction = %self.id, "transaction rolled back");
                Ok(())
            }
            Err(source) => {
                conn.mark_broken();
                self.pool.release(conn)?;
                warn!(transaction = %self.id, "rollback failed: {}", source);
                Err(DbError::RollbackFailed {
                    transaction: self.id,
                    connection,
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("connection", &self.conn.as_ref().map(PooledConnection::id))
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let id = self.id;
        warn!(transaction = %id, state = ?self.state, "transaction dropped unfinished, rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                handle.spawn(async move {
                    match conn.rollback().await {
                        Ok(()) => conn.mark_healthy(),
                        Err(e) => {
                            conn.mark_broken();
                            warn!(transaction = %id, "rollback of dropped transaction failed: {}", e);
                        }
                    }
                    if let Err(e) = pool.release(conn) {
                        error!(transaction = %id, "release of dropped transaction failed: {}", e);
                    }
                });
            }
            Err(_) => {
                // No runtime to roll back on: the session cannot be trusted for reuse.
                conn.mark_broken();
            }
        }
    }
}
