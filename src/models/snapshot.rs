//! Repository snapshot model.
//!
//! A snapshot is a point-in-time observation of one side of a project.
//! Only the latest observation per (project, side) is kept; every scan
//! overwrites it.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which instance a snapshot observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSide {
    Source,
    Target,
}

impl From<&str> for SnapshotSide {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "target" => Self::Target,
            _ => Self::Source,
        }
    }
}

impl std::fmt::Display for SnapshotSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Point-in-time observation of one repository side.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProjectSnapshot {
    pub id: i64,

    /// Observed project.
    pub project_id: i64,

    /// Side: `source`, `target`.
    pub side: String,

    /// Head commit SHA of the default branch.
    pub head_sha: Option<String>,

    /// Total commits on the default branch.
    pub commit_count: i64,

    /// Number of branches.
    pub branch_count: i64,

    /// Repository size in bytes.
    pub size_bytes: i64,

    /// Last recorded activity (Unix).
    pub last_activity_at: Option<i64>,

    /// Default branch name.
    pub default_branch: Option<String>,

    /// When this observation was taken (Unix).
    pub captured_at: i64,
}

impl ProjectSnapshot {
    /// Parse the side string into an enum.
    pub fn side_enum(&self) -> SnapshotSide {
        SnapshotSide::from(self.side.as_str())
    }
}

/// Input for recording an observation.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub project_id: i64,
    pub side: SnapshotSide,
    pub head_sha: Option<String>,
    pub commit_count: i64,
    pub branch_count: i64,
    pub size_bytes: i64,
    pub last_activity_at: Option<i64>,
    pub default_branch: Option<String>,
    pub captured_at: i64,
}

/// Record an observation, replacing the previous one for the same side.
pub async fn upsert_snapshot(pool: &DbPool, snapshot: &NewSnapshot) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO project_snapshots (project_id, side, head_sha, commit_count, branch_count, size_bytes, last_activity_at, default_branch, captured_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, side) DO UPDATE SET
            head_sha = excluded.head_sha,
            commit_count = excluded.commit_count,
            branch_count = excluded.branch_count,
            size_bytes = excluded.size_bytes,
            last_activity_at = excluded.last_activity_at,
            default_branch = excluded.default_branch,
            captured_at = excluded.captured_at
        "#,
    )
    .bind(snapshot.project_id)
    .bind(snapshot.side.to_string())
    .bind(&snapshot.head_sha)
    .bind(snapshot.commit_count)
    .bind(snapshot.branch_count)
    .bind(snapshot.size_bytes)
    .bind(snapshot.last_activity_at)
    .bind(&snapshot.default_branch)
    .bind(snapshot.captured_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Latest observation of one side of a project.
pub async fn get_snapshot(
    pool: &DbPool,
    project_id: i64,
    side: SnapshotSide,
) -> Result<Option<ProjectSnapshot>, sqlx::Error> {
    sqlx::query_as::<_, ProjectSnapshot>(
        "SELECT * FROM project_snapshots WHERE project_id = ? AND side = ?",
    )
    .bind(project_id)
    .bind(side.to_string())
    .fetch_optional(pool)
    .await
}
