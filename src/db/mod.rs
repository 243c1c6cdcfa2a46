//! Local SQLite persistence: pool construction and schema migrations.

pub mod pool;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Migrations in application order. Applied rows are tracked by name in
/// the `_migrations` table, so restarts skip what already ran.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Default database file location inside a data directory.
pub fn default_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("mirror-sync.db")
}

/// Open the database, creating it and its parent directory if needed,
/// and bring the schema up to date.
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DbError::Migration(format!("cannot create database directory: {}", e)))?;
    }

    let pool = pool::create_pool(db_path).await?;
    apply_migrations(&pool).await?;

    Ok(pool)
}

/// Apply every migration that has not run yet.
async fn apply_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    for &(name, sql) in MIGRATIONS {
        let done: Option<(i64,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        if done.is_some() {
            continue;
        }

        log::info!("[db] Applying migration {}", name);
        for statement in split_statements(sql) {
            sqlx::query(&statement).execute(&mut *conn).await?;
        }

        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Split a migration file into executable statements.
///
/// `--` comments are stripped, and a `;` only terminates a statement at
/// parenthesis depth zero, so semicolons inside expressions like
/// `strftime('%s', 'now')` survive.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut buf = String::new();
    let mut depth = 0usize;

    for raw in sql.lines() {
        let code = raw.split_once("--").map_or(raw, |(before, _)| before);

        for ch in code.chars() {
            match ch {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ';' if depth == 0 => {
                    flush(&mut statements, &mut buf);
                    continue;
                }
                _ => {}
            }
            buf.push(ch);
        }
        buf.push('\n');
    }
    flush(&mut statements, &mut buf);

    statements
}

fn flush(statements: &mut Vec<String>, buf: &mut String) {
    let stmt = buf.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
    buf.clear();
}
