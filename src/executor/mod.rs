pub mod query_executor;
pub mod retry;

pub use query_executor::QueryExecutor;
pub use retry::RetryPolicy;
