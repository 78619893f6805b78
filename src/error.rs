use crate::transaction::{TransactionId, TxState};
use crate::udbc::connection::ConnectionId;
use std::time::Duration;
use thiserror::Error;

/// Failure to establish a connection to the backing store.
#[derive(Error, Debug, Clone)]
#[error("connect to {driver} failed: {message}")]
pub struct ConnectError {
    pub driver: String,
    pub message: String,
}

impl ConnectError {
    pub fn new(driver: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            message: message.into(),
        }
    }
}

/// Store-reported execution failure, classified by the adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Expected to succeed if the same operation is retried unchanged
    /// (connection reset, deadlock, lock wait timeout).
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl ExecError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecError::Transient(_))
    }

    /// Whether the connection that produced this error can no longer be trusted.
    /// Constraint violations leave the session usable.
    pub fn breaks_connection(&self) -> bool {
        !matches!(self, ExecError::ConstraintViolation(_))
    }

    /// The store's diagnostic message.
    pub fn message(&self) -> &str {
        match self {
            ExecError::Transient(m) | ExecError::Fatal(m) | ExecError::ConstraintViolation(m) => m,
        }
    }
}

/// Errors surfaced by the pool, transaction manager and executor.
#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("pool exhausted: no connection available within {}ms", .0.as_millis())]
    PoolExhausted(Duration),
    #[error("pool closed")]
    PoolClosed,
    #[error("invalid release of {connection}: {reason}")]
    InvalidRelease {
        connection: ConnectionId,
        reason: String,
    },
    #[error("query failed on {connection}: {source}")]
    QueryFailed {
        connection: ConnectionId,
        #[source]
        source: ExecError,
    },
    #[error("{transaction} failed to start on {connection}: {source}")]
    TransactionStartFailed {
        transaction: TransactionId,
        connection: ConnectionId,
        #[source]
        source: ExecError,
    },
    #[error("{transaction} is failed and must be rolled back: {reason}")]
    TransactionFailed {
        transaction: TransactionId,
        reason: String,
    },
    #[error("{transaction} is closed ({state:?})")]
    TransactionClosed {
        transaction: TransactionId,
        state: TxState,
    },
    #[error("commit of {transaction} on {connection} failed (rolled back: {rolled_back}): {source}")]
    CommitFailed {
        transaction: TransactionId,
        connection: ConnectionId,
        rolled_back: bool,
        #[source]
        source: ExecError,
    },
    #[error("rollback of {transaction} on {connection} failed: {source}")]
    RollbackFailed {
        transaction: TransactionId,
        connection: ConnectionId,
        #[source]
        source: ExecError,
    },
    #[error("shutdown timed out with {outstanding} connection(s) still checked out")]
    ShutdownTimedOut { outstanding: usize },
    #[error("result shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Value error: {0}")]
    Value(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Unknown pool: {0}")]
    UnknownPool(String),
}

impl DbError {
    /// True when the failure came from a transient store error.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::QueryFailed { source, .. } if source.is_transient())
    }

    /// Caller misuse rather than a store failure.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            DbError::InvalidRelease { .. } | DbError::TransactionClosed { .. }
        )
    }
}

impl serde::de::Error for DbError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        DbError::Value(msg.to_string())
    }
}

impl serde::ser::Error for DbError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        DbError::Value(msg.to_string())
    }
}
