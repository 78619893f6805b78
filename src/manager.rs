use dashmap::DashMap;
use tracing::info;

use crate::error::DbError;
use crate::executor::QueryExecutor;
use crate::pool::Pool;
use crate::transaction::TransactionManager;

/// 数据库连接池管理器
///
/// Holds one named pool per backing store. The registry is an ordinary value
/// handed to whoever needs it; there is no process-wide instance.
#[derive(Default)]
pub struct PoolManager {
    pools: DashMap<String, Pool>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册数据库连接池, replacing and returning any pool already under `name`.
    pub fn register(&self, name: impl Into<String>, pool: Pool) -> Option<Pool> {
        let name = name.into();
        info!(pool = %name, driver = pool.driver().name(), "pool registered");
        self.pools.insert(name, pool)
    }

    pub fn pool(&self, name: &str) -> Result<Pool, DbError> {
        self.pools
            .get(name)
            .map(|v| v.value().clone())
            .ok_or_else(|| DbError::UnknownPool(name.to_string()))
    }

    /// 获取用于执行原生语句的客户端
    pub fn executor(&self, name: &str) -> Result<QueryExecutor, DbError> {
        self.pool(name).map(QueryExecutor::new)
    }

    pub fn transactions(&self, name: &str) -> Result<TransactionManager, DbError> {
        self.pool(name).map(TransactionManager::new)
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.iter().map(|e| e.key().clone()).collect()
    }

    /// Removes the pool and shuts it down.
    pub async fn remove(&self, name: &str) -> Result<(), DbError> {
        let (_, pool) = self
            .pools
            .remove(name)
            .ok_or_else(|| DbError::UnknownPool(name.to_string()))?;
        pool.shutdown().await
    }

    /// Shuts every registered pool down, returning the first error seen.
    pub async fn shutdown_all(&self) -> Result<(), DbError> {
        let pools: Vec<(String, Pool)> = self
            .pools
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        self.pools.clear();

        let mut first_err = None;
        for (name, pool) in pools {
            if let Err(e) = pool.shutdown().await {
                tracing::warn!(pool = %name, "shutdown failed: {}", e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
