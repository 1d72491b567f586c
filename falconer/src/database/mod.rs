//! Persistence layer: embedded SQLite via sqlx.
//!
//! Each logical bucket of the store is a two-column table holding JSON
//! documents, owned by a small repository type.

pub mod repositories;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};

use crate::Result;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialise the connection pool with WAL mode and sane defaults.
pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(DEFAULT_POOL_SIZE)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Apply pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// In-memory pool for tests; a single connection keeps every query on the
/// same memory database.
#[cfg(test)]
pub(crate) async fn memory_pool() -> DbPool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("memory options")
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("memory pool");

    run_migrations(&pool).await.expect("migrations");
    pool
}
