pub mod error;
pub mod executor;
pub mod manager;
pub mod models;
pub mod pool;
pub mod transaction;
pub mod udbc;
pub mod udbc_memory;
#[cfg(feature = "mysql")]
pub mod udbc_mysql;

pub use error::{ConnectError, DbError, ExecError};
pub use executor::{QueryExecutor, RetryPolicy};
pub use manager::PoolManager;
pub use models::pool_config::PoolConfig;
pub use pool::{ConnectionInfo, Pool, PoolStats, PoolStatus, PooledConnection};
pub use udbc::connection::{ConnectionId, ConnectionState};
pub use transaction::{Transaction, TransactionId, TransactionManager, TxState};
pub use udbc::result::{ResultSet, Row};
pub use udbc::statement::{ResultShape, Statement};
pub use udbc::value::Value;
