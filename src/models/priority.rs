//! Pull scheduling configuration model.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Priority tier of a pull-type project.
///
/// Governs dispatch order and the re-sync interval after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Critical,
    High,
    Normal,
    Low,
}

impl PriorityTier {
    /// Dispatch rank; higher dispatches first.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Normal => 2,
            Self::Low => 1,
        }
    }

    /// Interval until the next scheduled run after a success, in seconds.
    pub fn sync_interval_secs(&self) -> i64 {
        match self {
            Self::Critical => 300,
            Self::High => 900,
            Self::Normal => 3600,
            Self::Low => 21600,
        }
    }
}

impl From<&str> for PriorityTier {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Normal,
        }
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Per-project pull scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PullSyncConfig {
    pub id: i64,

    /// Owning project (unique).
    pub project_id: i64,

    /// Priority tier: `critical`, `high`, `normal`, `low`.
    pub priority: String,

    /// Whether the project participates in scheduled pulls.
    pub enabled: bool,

    /// Local working-copy path used by the executor.
    pub local_path: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl PullSyncConfig {
    /// Parse the priority string into an enum.
    pub fn priority_enum(&self) -> PriorityTier {
        PriorityTier::from(self.priority.as_str())
    }
}

/// Create a normal-priority config for a project.
pub async fn create_default(
    pool: &DbPool,
    project_id: i64,
    now: i64,
) -> Result<PullSyncConfig, sqlx::Error> {
    sqlx::query_as::<_, PullSyncConfig>(
        r#"
        INSERT INTO pull_sync_configs (project_id, priority, enabled, created_at, updated_at)
        VALUES (?, 'normal', 1, ?, ?)
        RETURNING *
        "#,
    )
    .bind(project_id)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Look up the config belonging to a project.
pub async fn get_by_project(
    pool: &DbPool,
    project_id: i64,
) -> Result<Option<PullSyncConfig>, sqlx::Error> {
    sqlx::query_as::<_, PullSyncConfig>("SELECT * FROM pull_sync_configs WHERE project_id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await
}

/// Change a project's priority tier.
pub async fn set_priority(
    pool: &DbPool,
    project_id: i64,
    priority: PriorityTier,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE pull_sync_configs SET priority = ?, updated_at = ? WHERE project_id = ?",
    )
    .bind(priority.to_string())
    .bind(now)
    .bind(project_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Enable or disable scheduled pulls for a project.
pub async fn set_enabled(
    pool: &DbPool,
    project_id: i64,
    enabled: bool,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE pull_sync_configs SET enabled = ?, updated_at = ? WHERE project_id = ?",
    )
    .bind(enabled)
    .bind(now)
    .bind(project_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
