use std::time::{Duration, Instant};
use upool::udbc_memory::{FaultPoint, MemoryDriver};
use upool::{DbError, ExecError, Pool, PoolConfig, QueryExecutor, Statement, TransactionManager, TxState};

async fn setup(max_size: usize) -> (MemoryDriver, Pool, TransactionManager, QueryExecutor) {
    let driver = MemoryDriver::new();
    let pool = Pool::connect(driver.clone(), PoolConfig::new().max_size(max_size))
        .await
        .unwrap();
    let db = QueryExecutor::new(pool.clone());
    db.execute("CREATE TABLE accounts (id, owner, balance)", &())
        .await
        .unwrap();
    (driver, pool.clone(), TransactionManager::new(pool), db)
}

fn insert(id: i64, owner: &str, balance: i64) -> Statement {
    Statement::execute("INSERT INTO accounts VALUES (?, ?, ?)")
        .bind(id)
        .bind(owner)
        .bind(balance)
}

async fn count(db: &QueryExecutor) -> i64 {
    db.scalar("SELECT count(*) FROM accounts", &()).await.unwrap()
}

#[tokio::test]
async fn test_commit_makes_writes_visible() {
    let (_driver, pool, txm, db) = setup(2).await;

    let mut tx = txm.begin().await.unwrap();
    tx.execute(&insert(1, "alice", 100)).await.unwrap();

    let inside = tx
        .execute(&Statement::scalar("SELECT count(*) FROM accounts"))
        .await
        .unwrap();
    assert_eq!(inside.scalar().and_then(|v| v.as_i64()), Some(1));
    assert_eq!(count(&db).await, 0);

    tx.commit().await.unwrap();
    assert_eq!(tx.state(), TxState::Committed);
    assert_eq!(count(&db).await, 1);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_rollback_discards_writes() {
    let (_driver, pool, txm, db) = setup(2).await;

    let mut tx = txm.begin().await.unwrap();
    tx.execute(&insert(1, "alice", 100)).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(tx.state(), TxState::RolledBack);
    assert_eq!(count(&db).await, 0);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_fatal_error_fails_transaction_until_rollback() {
    let (driver, pool, txm, db) = setup(1).await;

    let mut tx = txm.begin().await.unwrap();
    tx.execute(&insert(1, "alice", 100)).await.unwrap();

    driver.inject(FaultPoint::Execute, ExecError::Fatal("disk full".into()));
    let err = tx.execute(&insert(2, "bob", 50)).await.unwrap_err();
    assert!(matches!(err, DbError::QueryFailed { source: ExecError::Fatal(_), .. }), "{:?}", err);
    assert_eq!(tx.state(), TxState::Failed);

    let err = tx.execute(&insert(3, "carol", 10)).await.unwrap_err();
    assert!(matches!(err, DbError::TransactionFailed { .. }), "{:?}", err);
    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, DbError::TransactionFailed { .. }), "{:?}", err);

    tx.rollback().await.unwrap();
    assert_eq!(tx.state(), TxState::RolledBack);

    let status = pool.status();
    assert_eq!((status.idle, status.in_use), (1, 0));
    assert_eq!(driver.closed(), 0);
    assert_eq!(count(&db).await, 0);
}

#[tokio::test]
async fn test_finished_transaction_rejects_operations() {
    let (_driver, _pool, txm, _db) = setup(1).await;

    let mut tx = txm.begin().await.unwrap();
    tx.commit().await.unwrap();

    let err = tx.execute(&insert(1, "alice", 100)).await.unwrap_err();
    assert!(matches!(err, DbError::TransactionClosed { state: TxState::Committed, .. }), "{:?}", err);
    assert!(err.is_misuse());
    assert!(matches!(tx.commit().await, Err(DbError::TransactionClosed { .. })));
    assert!(matches!(tx.rollback().await, Err(DbError::TransactionClosed { .. })));
}

#[tokio::test]
async fn test_commit_failure_with_successful_rollback() {
    let (driver, pool, txm, db) = setup(1).await;

    let mut tx = txm.begin().await.unwrap();
    tx.execute(&insert(1, "alice", 100)).await.unwrap();
    driver.inject(FaultPoint::Commit, ExecError::Transient("connection reset".into()));

    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, DbError::CommitFailed { rolled_back: true, .. }), "{:?}", err);
    assert_eq!(tx.state(), TxState::Failed);

    // The connection was rolled back and handed back exactly once.
    let status = pool.status();
    assert_eq!((status.size, status.idle, status.in_use), (1, 1, 0));
    tx.rollback().await.unwrap();
    assert_eq!(tx.state(), TxState::RolledBack);
    assert_eq!(pool.status().idle, 1);
    assert_eq!(count(&db).await, 0);
}

#[tokio::test]
async fn test_commit_failure_with_failed_rollback_closes_connection() {
    let (driver, pool, txm, _db) = setup(1).await;

    let mut tx = txm.begin().await.unwrap();
    driver.inject(FaultPoint::Commit, ExecError::Fatal("lost".into()));
    driver.inject(FaultPoint::Rollback, ExecError::Fatal("lost".into()));

    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, DbError::CommitFailed { rolled_back: false, .. }), "{:?}", err);
    assert_eq!(pool.status().size, 0);
    assert_eq!(pool.stats().broken_count, 1);

    tx.rollback().await.unwrap();
    assert_eq!(pool.status().size, 0);
}

#[tokio::test]
async fn test_rollback_failure_closes_connection() {
    let (driver, pool, txm, _db) = setup(1).await;

    let mut tx = txm.begin().await.unwrap();
    driver.inject(FaultPoint::Rollback, ExecError::Fatal("lost".into()));
    let err = tx.rollback().await.unwrap_err();
    assert!(matches!(err, DbError::RollbackFailed { .. }), "{:?}", err);
    assert_eq!(tx.state(), TxState::RolledBack);
    assert_eq!(pool.status().size, 0);
}

#[tokio::test]
async fn test_begin_failure_releases_connection() {
    let (driver, pool, txm, _db) = setup(1).await;
    driver.inject(FaultPoint::Begin, ExecError::Fatal("read only".into()));

    let err = txm.begin().await.unwrap_err();
    assert!(matches!(err, DbError::TransactionStartFailed { .. }), "{:?}", err);
    assert_eq!(pool.status().in_use, 0);

    let mut tx = txm.begin().await.unwrap();
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_dropped_transaction_is_rolled_back() {
    let (_driver, pool, txm, db) = setup(1).await;

    let mut tx = txm.begin().await.unwrap();
    tx.execute(&insert(1, "alice", 100)).await.unwrap();
    drop(tx);

    let mut waited = Duration::ZERO;
    while pool.status().idle == 0 && waited < Duration::from_secs(1) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert_eq!(pool.status().idle, 1);
    assert_eq!(count(&db).await, 0);
}

#[tokio::test]
async fn test_scope_commits_on_success() {
    let (_driver, _pool, txm, db) = setup(1).await;

    let total = txm
        .scope(async |tx| {
            tx.execute(&insert(1, "alice", 100)).await?;
            tx.execute(&insert(2, "bob", 50)).await?;
            Ok::<_, DbError>(150)
        })
        .await
        .unwrap();

    assert_eq!(total, 150);
    assert_eq!(count(&db).await, 2);
}

#[tokio::test]
async fn test_scope_rolls_back_on_error() {
    let (driver, pool, txm, db) = setup(1).await;
    db.execute("INSERT INTO accounts VALUES (?, ?, ?)", &(1i64, "alice", 100i64))
        .await
        .unwrap();

    let err = txm
        .scope(async |tx| {
            tx.execute(&insert(2, "bob", 50)).await?;
            tx.execute(&insert(1, "again", 0)).await?;
            Ok::<_, DbError>(())
        })
        .await
        .unwrap_err();

    assert!(
        matches!(err, DbError::QueryFailed { source: ExecError::ConstraintViolation(_), .. }),
        "{:?}",
        err
    );
    assert_eq!(count(&db).await, 1);
    assert_eq!(pool.status().idle, 1);
    assert_eq!(driver.closed(), 0);
}

#[tokio::test]
async fn test_executor_runs_statement_inside_transaction() {
    let (_driver, _pool, _txm, db) = setup(2).await;

    let mut tx = db.begin().await.unwrap();
    db.run(&insert(1, "alice", 100), Some(&mut tx)).await.unwrap();
    assert_eq!(count(&db).await, 0);
    tx.commit().await.unwrap();
    assert_eq!(count(&db).await, 1);
}

#[tokio::test]
async fn test_open_transaction_holds_its_connection() {
    let driver = MemoryDriver::new();
    let pool = Pool::connect(
        driver,
        PoolConfig::new()
            .max_size(1)
            .acquire_timeout(Duration::from_millis(100)),
    )
    .await
    .unwrap();
    let txm = TransactionManager::new(pool.clone());
    let db = QueryExecutor::new(pool.clone());

    let mut tx = txm.begin().await.unwrap();

    let contender = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            (pool.acquire().await.map(drop), start.elapsed())
        })
    };
    let (result, elapsed) = contender.await.unwrap();
    assert!(matches!(result, Err(DbError::PoolExhausted(_))), "{:?}", result);
    assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1), "{:?}", elapsed);

    let err = db
        .run(&Statement::execute("CREATE TABLE t (id)"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::PoolExhausted(_)), "{:?}", err);

    tx.commit().await.unwrap();
    let conn = pool.acquire().await.unwrap();
    pool.release(conn).unwrap();
}
