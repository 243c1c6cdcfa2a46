//! Mirrored project model.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// How a project is synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMethod {
    /// Target pulls from source on a schedule.
    Pull,
    /// Source pushes to target through a configured remote mirror.
    PushMirror,
}

impl From<&str> for SyncMethod {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "push-mirror" | "push_mirror" => Self::PushMirror,
            _ => Self::Pull,
        }
    }
}

impl std::fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pull => write!(f, "pull"),
            Self::PushMirror => write!(f, "push-mirror"),
        }
    }
}

/// Provisioning / sync state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Discovered on the source but not yet provisioned on the target.
    Pending,
    /// Target-side repository exists, mirror link not yet configured.
    TargetCreated,
    /// Mirror link established, first sync not necessarily done.
    MirrorConfigured,
    /// Fully provisioned and converging.
    Active,
    /// A sync execution is in flight.
    Syncing,
    /// Provisioning is broken and needs operator attention.
    Failed,
    /// Absent from the source listing on the last full scan.
    Missing,
    /// Still absent on a later full scan.
    Deleted,
}

impl From<&str> for ProjectStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => Self::Pending,
            "target_created" => Self::TargetCreated,
            "mirror_configured" => Self::MirrorConfigured,
            "active" => Self::Active,
            "syncing" => Self::Syncing,
            "failed" => Self::Failed,
            "missing" => Self::Missing,
            "deleted" => Self::Deleted,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::TargetCreated => "target_created",
            Self::MirrorConfigured => "mirror_configured",
            Self::Active => "active",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Missing => "missing",
            Self::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

/// A project mirrored from the source instance to the target instance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncProject {
    /// Local project ID.
    pub id: i64,

    /// Path with namespace on the source instance (unique key).
    pub source_path: String,

    /// Remote project ID on the source instance.
    pub source_project_id: Option<i64>,

    /// Remote project ID on the target instance, once provisioned.
    pub target_project_id: Option<i64>,

    /// Sync method: `pull`, `push-mirror`.
    pub sync_method: String,

    /// Whether this project participates in syncing at all.
    pub enabled: bool,

    /// Provisioning / sync status.
    pub status: String,

    /// Remote mirror ID on the source instance, once configured.
    pub mirror_id: Option<i64>,

    /// Default branch observed on the source.
    pub default_branch: Option<String>,

    /// Last provisioning or sync error.
    pub last_error: Option<String>,

    /// Row creation time (Unix).
    pub created_at: i64,

    /// Last row update time (Unix).
    pub updated_at: i64,
}

impl SyncProject {
    /// Parse the sync method string into an enum.
    pub fn sync_method_enum(&self) -> SyncMethod {
        SyncMethod::from(self.sync_method.as_str())
    }

    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> ProjectStatus {
        ProjectStatus::from(self.status.as_str())
    }

    /// Whether this project should have a live, schedulable task.
    pub fn is_syncable(&self) -> bool {
        self.enabled
            && !matches!(
                self.status_enum(),
                ProjectStatus::Failed | ProjectStatus::Missing | ProjectStatus::Deleted
            )
    }
}

/// Input for registering a newly discovered project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub source_path: String,
    pub source_project_id: Option<i64>,
    pub sync_method: SyncMethod,
    pub default_branch: Option<String>,
}

/// Register a discovered project in `pending` state. Returns its local ID.
pub async fn create_project(
    pool: &DbPool,
    input: &NewProject,
    now: i64,
) -> Result<i64, sqlx::Error> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sync_projects (source_path, source_project_id, sync_method, enabled, status, default_branch, created_at, updated_at)
        VALUES (?, ?, ?, 1, 'pending', ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&input.source_path)
    .bind(input.source_project_id)
    .bind(input.sync_method.to_string())
    .bind(&input.default_branch)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Look up a project by local ID.
pub async fn get_project(pool: &DbPool, id: i64) -> Result<Option<SyncProject>, sqlx::Error> {
    sqlx::query_as::<_, SyncProject>("SELECT * FROM sync_projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Look up a project by its source path.
pub async fn get_by_source_path(
    pool: &DbPool,
    source_path: &str,
) -> Result<Option<SyncProject>, sqlx::Error> {
    sqlx::query_as::<_, SyncProject>("SELECT * FROM sync_projects WHERE source_path = ?")
        .bind(source_path)
        .fetch_optional(pool)
        .await
}

/// All projects that are still tracked (not flagged deleted).
pub async fn list_known(pool: &DbPool) -> Result<Vec<SyncProject>, sqlx::Error> {
    sqlx::query_as::<_, SyncProject>(
        "SELECT * FROM sync_projects WHERE status != 'deleted' ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

/// All enabled projects.
pub async fn list_enabled(pool: &DbPool) -> Result<Vec<SyncProject>, sqlx::Error> {
    sqlx::query_as::<_, SyncProject>("SELECT * FROM sync_projects WHERE enabled = 1 ORDER BY id")
        .fetch_all(pool)
        .await
}

/// Projects in a given status, optionally restricted to enabled ones.
pub async fn list_by_status(
    pool: &DbPool,
    status: ProjectStatus,
    enabled_only: bool,
) -> Result<Vec<SyncProject>, sqlx::Error> {
    let query = if enabled_only {
        "SELECT * FROM sync_projects WHERE status = ? AND enabled = 1 ORDER BY id"
    } else {
        "SELECT * FROM sync_projects WHERE status = ? ORDER BY id"
    };

    sqlx::query_as::<_, SyncProject>(query)
        .bind(status.to_string())
        .fetch_all(pool)
        .await
}

/// Update a project's status.
pub async fn update_status(
    pool: &DbPool,
    id: i64,
    status: ProjectStatus,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sync_projects SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Update a project's status and record an error message.
pub async fn set_status_error(
    pool: &DbPool,
    id: i64,
    status: ProjectStatus,
    error: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sync_projects SET status = ?, last_error = ?, updated_at = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record a configured mirror: store its ID, clear the error, advance status.
pub async fn mark_mirror_configured(
    pool: &DbPool,
    id: i64,
    mirror_id: i64,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sync_projects SET status = 'mirror_configured', mirror_id = ?, last_error = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(mirror_id)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Flag a project absent from the source: `missing` on first notice,
/// `deleted` once it was already missing.
pub async fn mark_absent(pool: &DbPool, id: i64, now: i64) -> Result<ProjectStatus, sqlx::Error> {
    let current: Option<(String,)> =
        sqlx::query_as("SELECT status FROM sync_projects WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    let next = match current.map(|(s,)| ProjectStatus::from(s.as_str())) {
        Some(ProjectStatus::Missing) | Some(ProjectStatus::Deleted) => ProjectStatus::Deleted,
        _ => ProjectStatus::Missing,
    };

    update_status(pool, id, next, now).await?;
    Ok(next)
}
