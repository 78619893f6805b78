use crate::error::ExecError;
use crate::udbc::value::Value;
use async_trait::async_trait;
use std::fmt;

/// Opaque identity of a pooled connection, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Lifecycle state of a connection as seen by the pool. A closed connection
/// has left the pool and is no longer reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InUse,
    /// Failed in a way that makes the session untrustworthy; closed on release.
    Broken,
}

/// Raw response of a single statement, before shape mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
    pub last_insert_id: Option<u64>,
}

/// A single session with the backing store.
///
/// Implementations hold no internal lock: the pool hands a connection to
/// exactly one owner at a time and every method takes `&mut self`.
#[async_trait]
pub trait Connection: Send {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<RawResult, ExecError>;

    // ---------- transaction ----------
    async fn begin(&mut self) -> Result<(), ExecError>;
    async fn commit(&mut self) -> Result<(), ExecError>;
    async fn rollback(&mut self) -> Result<(), ExecError>;

    async fn close(&mut self) -> Result<(), ExecError>;
}
