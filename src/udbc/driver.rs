use crate::error::ConnectError;
use crate::udbc::connection::Connection;
use async_trait::async_trait;

/// Store adapter: opens new sessions for the pool.
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn r#type(&self) -> &str;

    async fn open(&self) -> Result<Box<dyn Connection>, ConnectError>;

    /// Extra attempts the pool makes when `open` fails before giving up.
    fn connect_retries(&self) -> u32 {
        0
    }
}
