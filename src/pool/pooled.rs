use crate::error::ExecError;
use crate::pool::PoolInner;
use crate::udbc::connection::{Connection, ConnectionId, ConnectionState, RawResult};
use crate::udbc::statement::Statement;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// What the pool needs back when a checkout ends.
pub(crate) struct Checkin {
    pub id: ConnectionId,
    pub conn: Box<dyn Connection>,
    pub created_at: Instant,
    pub broken: bool,
}

/// An exclusively owned connection checked out of a [`Pool`](crate::pool::Pool).
///
/// Returned to the pool by [`Pool::release`](crate::pool::Pool::release), or
/// implicitly when dropped.
pub struct PooledConnection {
    id: ConnectionId,
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    state: ConnectionState,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    pub(crate) fn new(
        id: ConnectionId,
        conn: Box<dyn Connection>,
        created_at: Instant,
        pool: Arc<PoolInner>,
    ) -> Self {
        Self {
            id,
            conn: Some(conn),
            created_at,
            state: ConnectionState::InUse,
            pool,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_broken(&self) -> bool {
        self.state == ConnectionState::Broken
    }

    /// Marks the connection unusable; it is closed instead of reused on release.
    pub fn mark_broken(&mut self) {
        if self.state != ConnectionState::Broken {
            warn!(connection = %self.id, "connection marked broken");
            self.state = ConnectionState::Broken;
        }
    }

    /// Clears a broken mark after the session proved usable again.
    pub(crate) fn mark_healthy(&mut self) {
        self.state = ConnectionState::InUse;
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    pub async fn execute(&mut self, stmt: &Statement) -> Result<RawResult, ExecError> {
        let result = self.conn_mut()?.execute(stmt.sql(), stmt.params()).await;
        self.observe(result)
    }

    pub async fn begin(&mut self) -> Result<(), ExecError> {
        let result = self.conn_mut()?.begin().await;
        self.observe(result)
    }

    pub async fn commit(&mut self) -> Result<(), ExecError> {
        let result = self.conn_mut()?.commit().await;
        self.observe(result)
    }

    pub async fn rollback(&mut self) -> Result<(), ExecError> {
        let result = self.conn_mut()?.rollback().await;
        self.observe(result)
    }

    fn conn_mut(&mut self) -> Result<&mut Box<dyn Connection>, ExecError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ExecError::Fatal(format!("{} already returned to pool", self.id)))
    }

    fn observe<T>(&mut self, result: Result<T, ExecError>) -> Result<T, ExecError> {
        if let Err(e) = &result {
            if e.breaks_connection() {
                self.mark_broken();
            }
        }
        result
    }

    pub(crate) fn take(&mut self) -> Option<Checkin> {
        self.conn.take().map(|conn| Checkin {
            id: self.id,
            conn,
            created_at: self.created_at,
            broken: self.is_broken(),
        })
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("age", &self.age())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(checkin) = self.take() {
            if let Err(e) = self.pool.checkin(checkin) {
                error!(connection = %self.id, "implicit release failed: {}", e);
            }
        }
    }
}
