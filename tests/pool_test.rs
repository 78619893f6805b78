use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use upool::udbc::connection::Connection;
use upool::udbc::driver::Driver;
use upool::udbc_memory::MemoryDriver;
use upool::{ConnectError, ConnectionState, DbError, Pool, PoolConfig};

/// Memory driver whose handshake takes `delay`.
struct SlowDriver {
    inner: MemoryDriver,
    delay: Duration,
}

#[async_trait]
impl Driver for SlowDriver {
    fn name(&self) -> &str {
        "slow"
    }

    fn r#type(&self) -> &str {
        "memory"
    }

    async fn open(&self) -> Result<Box<dyn Connection>, ConnectError> {
        tokio::time::sleep(self.delay).await;
        self.inner.open().await
    }
}

async fn pool_with(config: PoolConfig) -> (MemoryDriver, Pool) {
    let driver = MemoryDriver::new();
    let pool = Pool::connect(driver.clone(), config).await.unwrap();
    (driver, pool)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_open_connections_never_exceed_max_size() {
    let (driver, pool) = pool_with(PoolConfig::new().max_size(3)).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let conn = pool.acquire().await.unwrap();
            let status = pool.status();
            assert!(status.size <= 3, "{:?}", status);
            assert!(status.in_use <= 3, "{:?}", status);
            tokio::time::sleep(Duration::from_millis(5)).await;
            pool.release(conn).unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert!(driver.peak_open() <= 3);
    assert!(driver.opened() <= 3);
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, status.size);
    assert_eq!(pool.stats().acquisitions, 20);
}

#[tokio::test]
async fn test_acquire_times_out_when_exhausted() {
    let (driver, pool) = pool_with(
        PoolConfig::new()
            .max_size(1)
            .acquire_timeout(Duration::from_millis(100)),
    )
    .await;

    let held = pool.acquire().await.unwrap();
    let start = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    let elapsed = start.elapsed();
    assert!(matches!(err, DbError::PoolExhausted(_)), "{:?}", err);
    assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1), "{:?}", elapsed);
    assert_eq!(pool.stats().exhausted_count, 1);

    pool.release(held).unwrap();
    let again = pool.acquire().await.unwrap();
    assert_eq!(driver.opened(), 1);
    pool.release(again).unwrap();
    assert_eq!(pool.stats().reused_count, 1);
}

#[tokio::test]
async fn test_waiter_receives_released_connection() {
    let (_driver, pool) = pool_with(PoolConfig::new().max_size(1)).await;
    let held = pool.acquire().await.unwrap();
    let held_id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.release(held).unwrap();

    let conn = waiter.await.unwrap().unwrap();
    assert_eq!(conn.id(), held_id);
}

#[tokio::test]
async fn test_cancelled_acquire_leaks_nothing() {
    let (_driver, pool) = pool_with(
        PoolConfig::new()
            .max_size(1)
            .acquire_timeout(Duration::from_millis(200)),
    )
    .await;
    let held = pool.acquire().await.unwrap();

    let cancelled = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
    assert!(cancelled.is_err());

    pool.release(held).unwrap();
    let conn = pool.acquire().await.unwrap();
    let status = pool.status();
    assert_eq!((status.size, status.in_use, status.idle), (1, 1, 0));
    pool.release(conn).unwrap();
}

#[tokio::test]
async fn test_min_idle_warm_up() {
    let (driver, pool) = pool_with(PoolConfig::new().max_size(4).min_idle(2)).await;
    assert_eq!(driver.opened(), 2);
    assert_eq!(pool.status().idle, 2);
}

#[tokio::test]
async fn test_release_to_foreign_pool_rejected() {
    let (_a_driver, pool_a) = pool_with(PoolConfig::new()).await;
    let (_b_driver, pool_b) = pool_with(PoolConfig::new()).await;

    let conn = pool_a.acquire().await.unwrap();
    let err = pool_b.release(conn).unwrap_err();
    assert!(matches!(err, DbError::InvalidRelease { .. }), "{:?}", err);
    assert!(err.is_misuse());

    // The rejected connection still went back to the pool that owns it.
    assert_eq!(pool_a.status().idle, 1);
    assert_eq!(pool_a.status().in_use, 0);
    assert_eq!(pool_b.status().size, 0);
}

#[tokio::test]
async fn test_dropped_connection_returns_to_pool() {
    let (_driver, pool) = pool_with(PoolConfig::new()).await;
    let conn = pool.acquire().await.unwrap();
    drop(conn);
    assert_eq!(pool.status().idle, 1);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_broken_connection_is_not_reused() {
    let (driver, pool) = pool_with(PoolConfig::new()).await;
    let mut conn = pool.acquire().await.unwrap();
    let broken_id = conn.id();
    conn.mark_broken();
    pool.release(conn).unwrap();

    assert_eq!(pool.status().size, 0);
    assert_eq!(pool.stats().broken_count, 1);

    let fresh = pool.acquire().await.unwrap();
    assert_ne!(fresh.id(), broken_id);
    assert_eq!(driver.opened(), 2);
}

#[tokio::test]
async fn test_expired_idle_connection_is_replaced() {
    let (driver, pool) = pool_with(PoolConfig::new().idle_ttl(Duration::from_millis(50))).await;
    let conn = pool.acquire().await.unwrap();
    let first = conn.id();
    pool.release(conn).unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    let conn = pool.acquire().await.unwrap();
    assert_ne!(conn.id(), first);
    assert_eq!(driver.opened(), 2);
    assert_eq!(pool.stats().idle_expired_count, 1);
    assert_eq!(pool.status().size, 1);
}

#[tokio::test]
async fn test_connection_past_max_lifetime_closed_on_release() {
    let (_driver, pool) = pool_with(PoolConfig::new().max_lifetime(Duration::from_millis(30))).await;
    let conn = pool.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.release(conn).unwrap();
    assert_eq!(pool.status().size, 0);
    assert_eq!(pool.stats().lifetime_expired_count, 1);
}

#[tokio::test]
async fn test_connect_retries() {
    let driver = MemoryDriver::new().with_connect_retries(2);
    let pool = Pool::connect(
        driver.clone(),
        PoolConfig::new().retry_backoff(Duration::from_millis(5)),
    )
    .await
    .unwrap();

    driver.fail_connects(2);
    let conn = pool.acquire().await.unwrap();
    assert_eq!(driver.opened(), 1);
    pool.release(conn).unwrap();
}

#[tokio::test]
async fn test_connect_failure_frees_slot() {
    let (driver, pool) = pool_with(PoolConfig::new().max_size(1)).await;
    driver.fail_connects(1);

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, DbError::Connect(_)), "{:?}", err);
    assert_eq!(pool.status().size, 0);

    let conn = pool.acquire().await.unwrap();
    pool.release(conn).unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_idle_and_rejects_acquire() {
    let (driver, pool) = pool_with(PoolConfig::new().min_idle(2)).await;
    pool.shutdown().await.unwrap();

    assert!(pool.is_closed());
    assert_eq!(driver.closed(), 2);
    assert_eq!(pool.status().size, 0);
    assert!(matches!(pool.acquire().await, Err(DbError::PoolClosed)));
}

#[tokio::test]
async fn test_shutdown_waits_for_outstanding_connection() {
    let (_driver, pool) = pool_with(PoolConfig::new().drain_timeout(Duration::from_secs(2))).await;
    let conn = pool.acquire().await.unwrap();

    let releaser = {
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pool.release(conn).unwrap();
        })
    };
    pool.shutdown().await.unwrap();
    releaser.await.unwrap();
    assert_eq!(pool.status().size, 0);
}

#[tokio::test]
async fn test_shutdown_times_out_with_outstanding_connection() {
    let (_driver, pool) = pool_with(PoolConfig::new().drain_timeout(Duration::from_millis(50))).await;
    let conn = pool.acquire().await.unwrap();

    let err = pool.shutdown().await.unwrap_err();
    assert!(matches!(err, DbError::ShutdownTimedOut { outstanding: 1 }), "{:?}", err);

    // Released after the drain period: closed rather than kept.
    pool.release(conn).unwrap();
    assert_eq!(pool.status().size, 0);
    assert_eq!(pool.status().idle, 0);
}

#[tokio::test]
async fn test_pool_accepts_shared_driver() {
    let driver = Arc::new(MemoryDriver::new());
    let pool = Pool::new(driver, PoolConfig::new()).await.unwrap();
    assert_eq!(pool.driver().r#type(), "memory");
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let err = Pool::connect(MemoryDriver::new(), PoolConfig::new().max_size(0))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Config(_)));
}

#[tokio::test]
async fn test_shutdown_wakes_waiters_with_pool_closed() {
    let (_driver, pool) = pool_with(
        PoolConfig::new()
            .max_size(1)
            .drain_timeout(Duration::from_millis(50)),
    )
    .await;
    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let shutdown = pool.shutdown().await;
    assert!(matches!(shutdown, Err(DbError::ShutdownTimedOut { .. })));
    assert!(matches!(waiter.await.unwrap(), Err(DbError::PoolClosed)));
    pool.release(held).unwrap();
}

#[tokio::test]
async fn test_slow_open_bounded_by_acquire_timeout() {
    let driver = SlowDriver {
        inner: MemoryDriver::new(),
        delay: Duration::from_secs(3),
    };
    let pool = Pool::connect(
        driver,
        PoolConfig::new()
            .max_size(1)
            .acquire_timeout(Duration::from_millis(100)),
    )
    .await
    .unwrap();

    let start = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    let elapsed = start.elapsed();
    assert!(matches!(err, DbError::PoolExhausted(_)), "{:?}", err);
    assert!(elapsed < Duration::from_millis(500), "{:?}", elapsed);

    // The reserved slot was given back.
    assert_eq!(pool.status().size, 0);
    assert_eq!(pool.stats().exhausted_count, 1);
}

#[tokio::test]
async fn test_open_within_acquire_timeout_succeeds() {
    let driver = SlowDriver {
        inner: MemoryDriver::new(),
        delay: Duration::from_millis(20),
    };
    let pool = Pool::connect(
        driver,
        PoolConfig::new().acquire_timeout(Duration::from_secs(2)),
    )
    .await
    .unwrap();

    let conn = pool.acquire().await.unwrap();
    pool.release(conn).unwrap();
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test]
async fn test_connections_snapshot() {
    let (_driver, pool) = pool_with(PoolConfig::new().min_idle(2)).await;
    let held = pool.acquire().await.unwrap();

    let mut connections = pool.connections();
    connections.sort_by_key(|c| c.id);
    assert_eq!(connections.len(), 2);

    let in_use: Vec<_> = connections
        .iter()
        .filter(|c| c.state == ConnectionState::InUse)
        .collect();
    assert_eq!(in_use.len(), 1);
    assert_eq!(in_use[0].id, held.id());
    assert_eq!(in_use[0].idle_for, None);

    let idle: Vec<_> = connections
        .iter()
        .filter(|c| c.state == ConnectionState::Idle)
        .collect();
    assert_eq!(idle.len(), 1);
    assert!(idle[0].idle_for.is_some());

    pool.release(held).unwrap();
    assert!(
        pool.connections()
            .iter()
            .all(|c| c.state == ConnectionState::Idle)
    );
}
