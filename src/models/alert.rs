//! Divergence alert model.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// What divergence an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SyncDelay,
    CommitDiff,
    BranchDiff,
    SizeDiff,
    TargetMissing,
}

impl From<&str> for AlertType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sync_delay" => Self::SyncDelay,
            "commit_diff" => Self::CommitDiff,
            "branch_diff" => Self::BranchDiff,
            "size_diff" => Self::SizeDiff,
            _ => Self::TargetMissing,
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SyncDelay => "sync_delay",
            Self::CommitDiff => "commit_diff",
            Self::BranchDiff => "branch_diff",
            Self::SizeDiff => "size_diff",
            Self::TargetMissing => "target_missing",
        };
        write!(f, "{}", s)
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl From<&str> for AlertSeverity {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Lifecycle status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Muted,
}

impl From<&str> for AlertStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "acknowledged" => Self::Acknowledged,
            "resolved" => Self::Resolved,
            "muted" => Self::Muted,
            _ => Self::Active,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Resolved => write!(f, "resolved"),
            Self::Muted => write!(f, "muted"),
        }
    }
}

/// A raised divergence notification.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonitorAlert {
    pub id: i64,

    /// Project the alert concerns.
    pub project_id: i64,

    /// Type: `sync_delay`, `commit_diff`, `branch_diff`, `size_diff`, `target_missing`.
    pub alert_type: String,

    /// Severity: `critical`, `high`, `medium`, `low`.
    pub severity: String,

    /// Status: `active`, `acknowledged`, `resolved`, `muted`.
    pub status: String,

    /// Human-readable summary.
    pub message: Option<String>,

    /// Free-text metadata (JSON or plain text).
    pub details: Option<String>,

    /// When the condition was observed (Unix).
    pub triggered_at: i64,

    /// When the alert was resolved (Unix).
    pub resolved_at: Option<i64>,

    /// Advisory end of a mute; no background sweep consumes it.
    pub muted_until: Option<i64>,

    pub created_at: i64,
}

impl MonitorAlert {
    /// Retention window for resolved alerts, in days.
    pub const RESOLVED_RETENTION_DAYS: i64 = 30;

    /// Suppression window for repeated (project, type) conditions, in minutes.
    pub const DEDUP_WINDOW_MINUTES: i64 = 60;

    /// Parse the alert type string into an enum.
    pub fn alert_type_enum(&self) -> AlertType {
        AlertType::from(self.alert_type.as_str())
    }

    /// Parse the severity string into an enum.
    pub fn severity_enum(&self) -> AlertSeverity {
        AlertSeverity::from(self.severity.as_str())
    }

    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> AlertStatus {
        AlertStatus::from(self.status.as_str())
    }
}

/// Input for raising a new alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub project_id: i64,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: Option<String>,
    pub triggered_at: i64,
}

/// Insert a new `active` alert. Returns its ID.
pub async fn insert_alert(pool: &DbPool, alert: &NewAlert) -> Result<i64, sqlx::Error> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO monitor_alerts (project_id, alert_type, severity, status, message, details, triggered_at, created_at)
        VALUES (?, ?, ?, 'active', ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(alert.project_id)
    .bind(alert.alert_type.to_string())
    .bind(alert.severity.to_string())
    .bind(&alert.message)
    .bind(&alert.details)
    .bind(alert.triggered_at)
    .bind(alert.triggered_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Look up an alert by ID.
pub async fn get_alert(pool: &DbPool, id: i64) -> Result<Option<MonitorAlert>, sqlx::Error> {
    sqlx::query_as::<_, MonitorAlert>("SELECT * FROM monitor_alerts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Latest `active` alert of a given type for a project triggered at or
/// after `since`. Used for deduplication.
pub async fn find_recent_active(
    pool: &DbPool,
    project_id: i64,
    alert_type: AlertType,
    since: i64,
) -> Result<Option<MonitorAlert>, sqlx::Error> {
    sqlx::query_as::<_, MonitorAlert>(
        r#"
        SELECT * FROM monitor_alerts
        WHERE project_id = ? AND alert_type = ? AND status = 'active' AND triggered_at >= ?
        ORDER BY triggered_at DESC
        LIMIT 1
        "#,
    )
    .bind(project_id)
    .bind(alert_type.to_string())
    .bind(since)
    .fetch_optional(pool)
    .await
}

/// All `active` alerts.
pub async fn list_active(pool: &DbPool) -> Result<Vec<MonitorAlert>, sqlx::Error> {
    sqlx::query_as::<_, MonitorAlert>(
        "SELECT * FROM monitor_alerts WHERE status = 'active' ORDER BY triggered_at",
    )
    .fetch_all(pool)
    .await
}

/// Resolve an alert. Returns false when it does not exist or was already
/// resolved.
pub async fn resolve(pool: &DbPool, id: i64, now: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE monitor_alerts SET status = 'resolved', resolved_at = ? WHERE id = ? AND status != 'resolved'",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Acknowledge an active alert. Returns false when not active.
pub async fn acknowledge(pool: &DbPool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE monitor_alerts SET status = 'acknowledged' WHERE id = ? AND status = 'active'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mute an alert until `muted_until` (advisory). Returns false when the
/// alert does not exist or is resolved.
pub async fn mute(pool: &DbPool, id: i64, muted_until: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE monitor_alerts SET status = 'muted', muted_until = ? WHERE id = ? AND status != 'resolved'",
    )
    .bind(muted_until)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Delete resolved alerts older than `cutoff`. Returns how many went.
pub async fn delete_resolved_before(pool: &DbPool, cutoff: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM monitor_alerts WHERE status = 'resolved' AND resolved_at < ?",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
