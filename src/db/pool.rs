//! SQLite connection pool.
//!
//! Every orchestration loop shares this one pool. WAL journaling keeps
//! the monitor's reads flowing while the scheduler and executor make
//! their frequent small status updates.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Upper bound on pooled connections. SQLite serializes writes anyway,
/// so a handful of connections is plenty for the timer loops.
const MAX_CONNECTIONS: u32 = 5;

/// Open (creating if necessary) the database at `db_path` and return a
/// WAL-mode pool over it.
pub async fn create_pool(db_path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        // Timer loops overlap; wait for the writer instead of erroring
        .busy_timeout(Duration::from_secs(30))
        // Checkpoint every ~4MB so the WAL file stays small
        .pragma("wal_autocheckpoint", "1000");

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    let (journal_mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;
    if !journal_mode.eq_ignore_ascii_case("wal") {
        log::warn!(
            "[db] Expected WAL journal mode, database reports '{}'",
            journal_mode
        );
    }

    Ok(pool)
}
