use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};
use upool::udbc_memory::MemoryDriver;
use upool::{DbError, Pool, PoolConfig, PoolManager, Statement};

#[derive(Serialize, Deserialize, Debug)]
struct User {
    id: i64,
    name: String,
    age: i32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PoolConfig::new()
        .max_size(4)
        .min_idle(1)
        .acquire_timeout(Duration::from_secs(2));
    let manager = PoolManager::new();
    manager.register("main", Pool::connect(MemoryDriver::new(), config).await?);

    let db = manager.executor("main")?;
    db.execute("CREATE TABLE users (id, name, age)", &()).await?;
    db.execute(
        "INSERT INTO users VALUES (?, ?, ?)",
        &User {
            id: 1,
            name: "jason".into(),
            age: 25,
        },
    )
    .await?;

    // 转账式事务：两条写入要么都生效，要么都不生效
    let txm = manager.transactions("main")?;
    let inserted = txm
        .scope(async |tx| {
            tx.execute(&Statement::execute("INSERT INTO users VALUES (?, ?, ?)").bind(2i64).bind("lucy").bind(31))
                .await?;
            tx.execute(&Statement::execute("INSERT INTO users VALUES (?, ?, ?)").bind(3i64).bind("tom").bind(19))
                .await?;
            Ok::<_, DbError>(2)
        })
        .await?;
    tracing::info!(inserted, "transaction committed");

    let duplicate = txm
        .scope(async |tx| {
            tx.execute(&Statement::execute("INSERT INTO users VALUES (?, ?, ?)").bind(4i64).bind("ann").bind(40))
                .await?;
            tx.execute(&Statement::execute("INSERT INTO users VALUES (?, ?, ?)").bind(1i64).bind("dup").bind(0))
                .await?;
            Ok::<_, DbError>(())
        })
        .await;
    if let Err(e) = duplicate {
        tracing::warn!("transaction rolled back: {}", e);
    }

    let users: Vec<User> = db.query("SELECT * FROM users", &()).await?;
    let count: i64 = db.scalar("SELECT count(*) FROM users", &()).await?;
    println!("{} users: {:?}", count, users);
    println!("{:?}", manager.pool("main")?.stats());

    manager.shutdown_all().await?;
    Ok(())
}
