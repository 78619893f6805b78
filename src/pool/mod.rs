//! Bounded connection pool.
//!
//! All bookkeeping (idle stack, outstanding set, size, closed flag) sits behind a
//! single mutex that is never held across an `.await`. Waiters park on a
//! [`Notify`] registered before the lock is dropped, so a release between the
//! check and the wait is never missed. Retired connections are closed by a
//! supervisor task fed through a channel, which keeps `release` non-blocking.

mod pooled;
mod stats;

pub use pooled::PooledConnection;
pub use stats::{ConnectionInfo, PoolStats, PoolStatus};

use crate::error::{ConnectError, DbError};
use crate::executor::RetryPolicy;
use crate::models::pool_config::PoolConfig;
use crate::udbc::connection::{Connection, ConnectionId, ConnectionState};
use crate::udbc::driver::Driver;
use backon::Retryable;
use pooled::Checkin;
use stats::AtomicPoolStats;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A cheaply cloneable handle to a bounded pool of store connections.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    driver: Arc<dyn Driver>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    /// Signalled whenever a connection or a slot becomes available.
    available: Notify,
    /// Signalled when the last outstanding connection comes back after shutdown.
    drained: Notify,
    retire_tx: mpsc::UnboundedSender<Retired>,
    stats: AtomicPoolStats,
}

struct PoolState {
    idle: Vec<IdleEntry>,
    /// Checked-out connections and when they were opened.
    outstanding: HashMap<ConnectionId, Instant>,
    /// Idle + outstanding + slots reserved by in-flight opens.
    size: usize,
    closed: bool,
}

struct IdleEntry {
    id: ConnectionId,
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

struct Retired {
    id: ConnectionId,
    conn: Box<dyn Connection>,
    reason: &'static str,
}

enum Checkout {
    Ready(IdleEntry),
    Open,
    Wait,
    Closed,
}

impl Pool {
    /// Creates a pool over `driver` and opens `min_idle` connections.
    pub async fn new(driver: Arc<dyn Driver>, config: PoolConfig) -> Result<Self, DbError> {
        config.validate()?;
        let (retire_tx, retire_rx) = mpsc::unbounded_channel();
        tokio::spawn(supervise(retire_rx, driver.name().to_string()));

        let inner = Arc::new(PoolInner {
            driver,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(config.max_size),
                outstanding: HashMap::with_capacity(config.max_size),
                size: 0,
                closed: false,
            }),
            config,
            available: Notify::new(),
            drained: Notify::new(),
            retire_tx,
            stats: AtomicPoolStats::default(),
        });

        for _ in 0..inner.config.min_idle {
            match inner.open().await {
                Ok(conn) => {
                    let now = Instant::now();
                    let mut state = inner.lock_state();
                    state.size += 1;
                    state.idle.push(IdleEntry {
                        id: next_connection_id(),
                        conn,
                        created_at: now,
                        last_used: now,
                    });
                }
                Err(e) => {
                    warn!(driver = inner.driver.name(), "warm-up connection failed: {}", e);
                    break;
                }
            }
        }

        info!(
            driver = inner.driver.name(),
            max_size = inner.config.max_size,
            min_idle = inner.config.min_idle,
            "pool started"
        );
        Ok(Self { inner })
    }

    /// 创建连接池
    pub async fn connect(driver: impl Driver + 'static, config: PoolConfig) -> Result<Self, DbError> {
        Self::new(Arc::new(driver), config).await
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn driver(&self) -> &dyn Driver {
        self.inner.driver.as_ref()
    }

    /// Acquires a connection, waiting at most the configured `acquire_timeout`.
    pub async fn acquire(&self) -> Result<PooledConnection, DbError> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    /// Acquires a connection, waiting at most `timeout`.
    ///
    /// Cancelling the returned future never leaks a connection: nothing leaves
    /// the idle set until the checkout is complete, and a wake-up consumed by a
    /// cancelled waiter is passed on to the next one.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection, DbError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.try_checkout() {
                Checkout::Ready(entry) => {
                    self.inner.stats.record_acquisition(true);
                    debug!(connection = %entry.id, "connection acquired from idle set");
                    return Ok(PooledConnection::new(
                        entry.id,
                        entry.conn,
                        entry.created_at,
                        self.inner.clone(),
                    ));
                }
                Checkout::Open => return self.open_reserved(deadline, timeout).await,
                Checkout::Closed => return Err(DbError::PoolClosed),
                Checkout::Wait => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.inner.stats.record_exhausted();
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    max_size = self.inner.config.max_size,
                    "pool exhausted"
                );
                return Err(DbError::PoolExhausted(timeout));
            }
        }
    }

    /// Opens a connection into a slot already counted in `size`. The open,
    /// connect retries included, is bounded by the acquire deadline.
    async fn open_reserved(
        &self,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> Result<PooledConnection, DbError> {
        let mut slot = ReservedSlot {
            inner: &*self.inner,
            armed: true,
        };
        let conn = match tokio::time::timeout_at(deadline, self.inner.open()).await {
            Ok(opened) => opened?,
            Err(_) => {
                self.inner.stats.record_exhausted();
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "connection open did not finish within acquire timeout"
                );
                return Err(DbError::PoolExhausted(timeout));
            }
        };
        let id = next_connection_id();
        let created_at = Instant::now();
        {
            let mut state = self.inner.lock_state();
            if state.closed {
                state.size -= 1;
                slot.armed = false;
                drop(state);
                self.inner.retire(id, conn, "shutdown");
                return Err(DbError::PoolClosed);
            }
            state.outstanding.insert(id, created_at);
        }
        slot.armed = false;
        self.inner.stats.record_acquisition(false);
        debug!(connection = %id, "new connection opened");
        Ok(PooledConnection::new(id, conn, created_at, self.inner.clone()))
    }

    /// Returns a connection to the pool. Broken connections are closed and
    /// their slot freed for a replacement.
    pub fn release(&self, mut conn: PooledConnection) -> Result<(), DbError> {
        if !conn.belongs_to(&self.inner) {
            let id = conn.id();
            error!(connection = %id, "release of a connection owned by another pool");
            return Err(DbError::InvalidRelease {
                connection: id,
                reason: "connection belongs to another pool".into(),
            });
        }
        match conn.take() {
            Some(checkin) => self.inner.checkin(checkin),
            None => Err(DbError::InvalidRelease {
                connection: conn.id(),
                reason: "connection already released".into(),
            }),
        }
    }

    /// Stops accepting acquisitions, waits up to `drain_timeout` for checked-out
    /// connections to come back, then closes the idle ones.
    ///
    /// Connections still checked out when the drain period ends are closed as
    /// soon as they are released.
    pub async fn shutdown(&self) -> Result<(), DbError> {
        {
            let mut state = self.inner.lock_state();
            if !state.closed {
                state.closed = true;
                info!(
                    driver = self.inner.driver.name(),
                    outstanding = state.outstanding.len(),
                    "pool shutting down"
                );
            }
        }
        self.inner.available.notify_waiters();

        let deadline = tokio::time::Instant::now() + self.inner.config.drain_timeout;
        let mut result = Ok(());
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.lock_state().outstanding.is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let outstanding = self.inner.lock_state().outstanding.len();
                if outstanding > 0 {
                    warn!(outstanding, "pool drain timed out");
                    result = Err(DbError::ShutdownTimedOut { outstanding });
                }
                break;
            }
        }

        let idle = {
            let mut state = self.inner.lock_state();
            let idle = std::mem::take(&mut state.idle);
            state.size -= idle.len();
            idle
        };
        for mut entry in idle {
            if let Err(e) = entry.conn.close().await {
                warn!(connection = %entry.id, "close failed: {}", e);
            }
            self.inner.stats.record_closed();
        }
        result
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock_state();
        PoolStatus {
            size: state.size,
            idle: state.idle.len(),
            in_use: state.outstanding.len(),
            max_size: self.inner.config.max_size,
            closed: state.closed,
        }
    }

    /// Per-connection view of everything the pool currently holds.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let state = self.inner.lock_state();
        let idle = state.idle.iter().map(|entry| ConnectionInfo {
            id: entry.id,
            state: ConnectionState::Idle,
            age: entry.created_at.elapsed(),
            idle_for: Some(entry.last_used.elapsed()),
        });
        let in_use = state.outstanding.iter().map(|(id, created_at)| ConnectionInfo {
            id: *id,
            state: ConnectionState::InUse,
            age: created_at.elapsed(),
            idle_for: None,
        });
        idle.chain(in_use).collect()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("driver", &self.inner.driver.name())
            .field("status", &self.status())
            .finish()
    }
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_checkout(&self) -> Checkout {
        let mut expired = Vec::new();
        let outcome = {
            let mut state = self.lock_state();
            if state.closed {
                Checkout::Closed
            } else {
                loop {
                    match state.idle.pop() {
                        Some(entry) => match self.expiry(&entry) {
                            Some(reason) => {
                                state.size -= 1;
                                expired.push((entry, reason));
                            }
                            None => {
                                state.outstanding.insert(entry.id, entry.created_at);
                                break Checkout::Ready(entry);
                            }
                        },
                        None if state.size < self.config.max_size => {
                            state.size += 1;
                            break Checkout::Open;
                        }
                        None => break Checkout::Wait,
                    }
                }
            }
        };

        for (entry, reason) in expired {
            match reason {
                "max_lifetime" => self.stats.record_lifetime_expired(),
                _ => self.stats.record_idle_expired(),
            }
            self.retire(entry.id, entry.conn, reason);
        }
        outcome
    }

    fn expiry(&self, entry: &IdleEntry) -> Option<&'static str> {
        if entry.created_at.elapsed() >= self.config.max_lifetime {
            Some("max_lifetime")
        } else if entry.last_used.elapsed() >= self.config.idle_ttl {
            Some("idle_ttl")
        } else {
            None
        }
    }

    async fn open(&self) -> Result<Box<dyn Connection>, ConnectError> {
        let retries = self.driver.connect_retries();
        let policy = RetryPolicy::new(retries, self.config.retry_backoff);
        let opened = (|| self.driver.open())
            .retry(policy.builder())
            .notify(|e: &ConnectError, delay: Duration| {
                warn!(
                    retries,
                    delay_ms = delay.as_millis() as u64,
                    "open failed, retrying: {}",
                    e
                );
            })
            .await;
        match opened {
            Ok(conn) => {
                self.stats.record_created();
                Ok(conn)
            }
            Err(e) => {
                error!(attempts = retries + 1, "open failed: {}", e);
                Err(e)
            }
        }
    }

    pub(crate) fn checkin(&self, checkin: Checkin) -> Result<(), DbError> {
        let Checkin {
            id,
            conn,
            created_at,
            broken,
        } = checkin;

        let mut state = self.lock_state();
        if state.outstanding.remove(&id).is_none() {
            drop(state);
            error!(connection = %id, "release of a connection that is not checked out");
            self.retire(id, conn, "invalid release");
            return Err(DbError::InvalidRelease {
                connection: id,
                reason: "connection is not checked out".into(),
            });
        }

        let reason = if broken {
            self.stats.record_broken();
            Some("broken")
        } else if state.closed {
            Some("shutdown")
        } else if created_at.elapsed() >= self.config.max_lifetime {
            self.stats.record_lifetime_expired();
            Some("max_lifetime")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                state.size -= 1;
                let drained = state.closed && state.outstanding.is_empty();
                drop(state);
                self.retire(id, conn, reason);
                if drained {
                    self.drained.notify_waiters();
                }
            }
            None => {
                state.idle.push(IdleEntry {
                    id,
                    conn,
                    created_at,
                    last_used: Instant::now(),
                });
                drop(state);
                debug!(connection = %id, "connection returned to idle set");
            }
        }
        self.available.notify_one();
        Ok(())
    }

    /// Hands a connection to the supervisor for closing.
    fn retire(&self, id: ConnectionId, conn: Box<dyn Connection>, reason: &'static str) {
        self.stats.record_closed();
        debug!(connection = %id, reason, "retiring connection");
        // The supervisor only stops once every pool handle is gone.
        let _ = self.retire_tx.send(Retired { id, conn, reason });
    }
}

/// Gives a reserved slot back if opening the connection fails or is cancelled.
struct ReservedSlot<'a> {
    inner: &'a PoolInner,
    armed: bool,
}

impl Drop for ReservedSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock_state().size -= 1;
            self.inner.available.notify_one();
        }
    }
}

fn next_connection_id() -> ConnectionId {
    ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

async fn supervise(mut rx: mpsc::UnboundedReceiver<Retired>, driver: String) {
    while let Some(mut retired) = rx.recv().await {
        match retired.conn.close().await {
            Ok(()) => debug!(driver = %driver, connection = %retired.id, reason = retired.reason, "connection closed"),
            Err(e) => warn!(driver = %driver, connection = %retired.id, reason = retired.reason, "close failed: {}", e),
        }
    }
    debug!(driver = %driver, "pool supervisor stopped");
}
