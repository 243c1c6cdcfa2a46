//! Sync task model.
//!
//! Exactly one task exists per project. The scheduler owns the
//! `waiting -> pending` transition; the executor owns `pending -> running`
//! and `running -> waiting`; the lifecycle manager owns `disabled`.

use crate::db::pool::DbPool;
use crate::models::project::SyncMethod;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of sync work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Target pulls from the source working copy.
    Pull,
    /// Source pushes through its remote mirror.
    Push,
}

impl From<&str> for TaskKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "push" => Self::Push,
            _ => Self::Pull,
        }
    }
}

impl From<SyncMethod> for TaskKind {
    fn from(method: SyncMethod) -> Self {
        match method {
            SyncMethod::Pull => Self::Pull,
            SyncMethod::PushMirror => Self::Push,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pull => write!(f, "pull"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// Scheduling status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Eligible for dispatch once due.
    Waiting,
    /// Claimed by the scheduler, about to execute.
    Pending,
    /// Executing.
    Running,
    /// Project is no longer syncable.
    Disabled,
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "disabled" => Self::Disabled,
            _ => Self::Waiting,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// What put the task on the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Scheduled,
    Webhook,
    Manual,
}

impl From<&str> for TriggerSource {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "webhook" => Self::Webhook,
            "manual" => Self::Manual,
            _ => Self::Scheduled,
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Webhook => write!(f, "webhook"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Classified cause of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Execution exceeded the stuck-task timeout and was reset.
    Timeout,
    /// A running task had no start time; state was normalized.
    InvalidState,
    /// Collaborator network/API failure.
    Network,
    /// The sync execution itself reported failure.
    Execution,
}

impl From<&str> for TaskErrorKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "timeout" => Self::Timeout,
            "invalid_state" => Self::InvalidState,
            "network" => Self::Network,
            _ => Self::Execution,
        }
    }
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::InvalidState => "invalid_state",
            Self::Network => "network",
            Self::Execution => "execution",
        };
        write!(f, "{}", s)
    }
}

/// Schedulable unit of sync work, 1:1 with a project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncTask {
    /// Local task ID.
    pub id: i64,

    /// Owning project (unique).
    pub project_id: i64,

    /// Task type: `pull`, `push`.
    pub task_type: String,

    /// Status: `waiting`, `pending`, `running`, `disabled`.
    pub status: String,

    /// When the task next becomes due (Unix, nullable when disabled).
    pub next_run_at: Option<i64>,

    /// When the task last started a run.
    pub last_run_at: Option<i64>,

    /// Start time of the in-flight run, set on `pending -> running`.
    pub started_at: Option<i64>,

    /// Completion time of the last run.
    pub completed_at: Option<i64>,

    /// Outcome of the last run: `success`, `failed`.
    pub last_result: Option<String>,

    /// Failures since the last success.
    pub consecutive_failures: i64,

    /// Classified cause of the last failure.
    pub error_type: Option<String>,

    /// Human-readable message for the last failure.
    pub error_message: Option<String>,

    /// What scheduled the pending run: `scheduled`, `webhook`, `manual`.
    pub triggered_by: String,

    /// Row creation time (Unix).
    pub created_at: i64,

    /// Last row update time (Unix).
    pub updated_at: i64,
}

impl SyncTask {
    /// Failure count at which the scheduler stops dispatching a task.
    pub const MAX_CONSECUTIVE_FAILURES: i64 = 5;

    /// Parse the task type string into an enum.
    pub fn kind(&self) -> TaskKind {
        TaskKind::from(self.task_type.as_str())
    }

    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> TaskStatus {
        TaskStatus::from(self.status.as_str())
    }

    /// Parse the trigger source string into an enum.
    pub fn trigger_enum(&self) -> TriggerSource {
        TriggerSource::from(self.triggered_by.as_str())
    }

    /// Whether the failure gate still allows dispatch.
    pub fn below_failure_limit(&self) -> bool {
        self.consecutive_failures < Self::MAX_CONSECUTIVE_FAILURES
    }
}

/// Create the task for a project. Starts `waiting` and immediately due.
pub async fn create_for_project(
    pool: &DbPool,
    project_id: i64,
    kind: TaskKind,
    now: i64,
) -> Result<SyncTask, sqlx::Error> {
    sqlx::query_as::<_, SyncTask>(
        r#"
        INSERT INTO sync_tasks (project_id, task_type, status, next_run_at, consecutive_failures, triggered_by, created_at, updated_at)
        VALUES (?, ?, 'waiting', ?, 0, 'scheduled', ?, ?)
        RETURNING *
        "#,
    )
    .bind(project_id)
    .bind(kind.to_string())
    .bind(now)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Look up a task by ID.
pub async fn get_task(pool: &DbPool, id: i64) -> Result<Option<SyncTask>, sqlx::Error> {
    sqlx::query_as::<_, SyncTask>("SELECT * FROM sync_tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Look up the task belonging to a project.
pub async fn get_by_project(
    pool: &DbPool,
    project_id: i64,
) -> Result<Option<SyncTask>, sqlx::Error> {
    sqlx::query_as::<_, SyncTask>("SELECT * FROM sync_tasks WHERE project_id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await
}

/// All tasks in a given status.
pub async fn list_by_status(
    pool: &DbPool,
    status: TaskStatus,
) -> Result<Vec<SyncTask>, sqlx::Error> {
    sqlx::query_as::<_, SyncTask>("SELECT * FROM sync_tasks WHERE status = ? ORDER BY id")
        .bind(status.to_string())
        .fetch_all(pool)
        .await
}

/// Claim a waiting task for dispatch (`waiting -> pending`).
///
/// Atomic: returns false when another pass already claimed the task or its
/// status changed underneath us.
pub async fn claim_for_dispatch(pool: &DbPool, id: i64, now: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE sync_tasks SET status = 'pending', updated_at = ? WHERE id = ? AND status = 'waiting'",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Roll a claimed task back to `waiting` after a failed hand-off.
pub async fn release_claim(pool: &DbPool, id: i64, now: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sync_tasks SET status = 'waiting', updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Begin execution (`pending -> running`), stamping the start time.
///
/// Returns false if the task was not in `pending`, which means the claim
/// was lost (e.g. recovery or lifecycle touched it in between).
pub async fn mark_running(pool: &DbPool, id: i64, now: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE sync_tasks
        SET status = 'running', started_at = ?, last_run_at = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a successful run: back to `waiting`, failures reset, errors
/// cleared, next run scheduled.
pub async fn record_success(
    pool: &DbPool,
    id: i64,
    next_run_at: i64,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE sync_tasks
        SET status = 'waiting', completed_at = ?, last_result = 'success',
            consecutive_failures = 0, error_type = NULL, error_message = NULL,
            started_at = NULL, next_run_at = ?, triggered_by = 'scheduled', updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(now)
    .bind(next_run_at)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a failed run: back to `waiting` with the failure counter bumped
/// and the error classified, next attempt scheduled with backoff.
pub async fn record_failure(
    pool: &DbPool,
    id: i64,
    kind: TaskErrorKind,
    message: &str,
    next_run_at: i64,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE sync_tasks
        SET status = 'waiting', completed_at = ?, last_result = 'failed',
            consecutive_failures = consecutive_failures + 1,
            error_type = ?, error_message = ?,
            started_at = NULL, next_run_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(now)
    .bind(kind.to_string())
    .bind(message)
    .bind(next_run_at)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Reset a wedged `running` task back to eligibility.
///
/// Clears both timestamps, bumps the failure counter and records why. Used
/// only by recovery; never disables or deletes.
pub async fn reset_stuck(
    pool: &DbPool,
    id: i64,
    kind: TaskErrorKind,
    message: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE sync_tasks
        SET status = 'waiting', started_at = NULL, completed_at = NULL,
            consecutive_failures = consecutive_failures + 1,
            error_type = ?, error_message = ?, next_run_at = ?, updated_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(kind.to_string())
    .bind(message)
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Disable a task whose project is no longer syncable.
pub async fn disable(pool: &DbPool, id: i64, reason: &str, now: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE sync_tasks
        SET status = 'disabled', next_run_at = NULL, error_message = ?, updated_at = ?
        WHERE id = ? AND status != 'disabled'
        "#,
    )
    .bind(reason)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Re-enable a disabled task, making it due immediately.
pub async fn reenable(pool: &DbPool, id: i64, now: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE sync_tasks
        SET status = 'waiting', next_run_at = ?, consecutive_failures = 0,
            error_type = NULL, error_message = NULL, updated_at = ?
        WHERE id = ? AND status = 'disabled'
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Pull a waiting task's next run forward to now, e.g. for a webhook or a
/// manual trigger. Returns false when the task is not in `waiting`.
pub async fn request_run_now(
    pool: &DbPool,
    project_id: i64,
    trigger: TriggerSource,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE sync_tasks
        SET next_run_at = ?, triggered_by = ?, updated_at = ?
        WHERE project_id = ? AND status = 'waiting'
        "#,
    )
    .bind(now)
    .bind(trigger.to_string())
    .bind(now)
    .bind(project_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::project::{self, NewProject, SyncMethod};
    use tempfile::tempdir;

    async fn setup_test_db() -> (DbPool, i64) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        std::mem::forget(dir);
        let pool = db::initialize(&db_path).await.unwrap();

        let project_id = project::create_project(
            &pool,
            &NewProject {
                source_path: "group/app".to_string(),
                source_project_id: Some(1),
                sync_method: SyncMethod::Pull,
                default_branch: None,
            },
            1000,
        )
        .await
        .unwrap();

        (pool, project_id)
    }

    #[test]
    fn test_task_kind_from_sync_method() {
        assert_eq!(TaskKind::from(SyncMethod::Pull), TaskKind::Pull);
        assert_eq!(TaskKind::from(SyncMethod::PushMirror), TaskKind::Push);
    }

    #[tokio::test]
    async fn test_create_for_project_defaults() {
        let (pool, project_id) = setup_test_db().await;

        let task = create_for_project(&pool, project_id, TaskKind::Pull, 2000)
            .await
            .unwrap();

        assert_eq!(task.status_enum(), TaskStatus::Waiting);
        assert_eq!(task.next_run_at, Some(2000));
        assert_eq!(task.consecutive_failures, 0);
        assert_eq!(task.kind(), TaskKind::Pull);
        assert!(task.below_failure_limit());
    }

    #[tokio::test]
    async fn test_claim_is_atomic() {
        let (pool, project_id) = setup_test_db().await;
        let task = create_for_project(&pool, project_id, TaskKind::Pull, 2000)
            .await
            .unwrap();

        assert!(claim_for_dispatch(&pool, task.id, 2100).await.unwrap());
        // Second claim must lose.
        assert!(!claim_for_dispatch(&pool, task.id, 2100).await.unwrap());

        release_claim(&pool, task.id, 2200).await.unwrap();
        assert!(claim_for_dispatch(&pool, task.id, 2300).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_lifecycle_success() {
        let (pool, project_id) = setup_test_db().await;
        let task = create_for_project(&pool, project_id, TaskKind::Pull, 2000)
            .await
            .unwrap();

        claim_for_dispatch(&pool, task.id, 2100).await.unwrap();
        assert!(mark_running(&pool, task.id, 2200).await.unwrap());
        // mark_running from a non-pending state loses the claim
        assert!(!mark_running(&pool, task.id, 2200).await.unwrap());

        record_success(&pool, task.id, 5000, 2300).await.unwrap();

        let task = get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(task.status_enum(), TaskStatus::Waiting);
        assert_eq!(task.next_run_at, Some(5000));
        assert_eq!(task.last_result.as_deref(), Some("success"));
        assert_eq!(task.consecutive_failures, 0);
        assert!(task.started_at.is_none());
    }

    #[tokio::test]
    async fn test_record_failure_bumps_counter() {
        let (pool, project_id) = setup_test_db().await;
        let task = create_for_project(&pool, project_id, TaskKind::Pull, 2000)
            .await
            .unwrap();

        for i in 0..SyncTask::MAX_CONSECUTIVE_FAILURES {
            record_failure(&pool, task.id, TaskErrorKind::Network, "fetch failed", 9000, 2300 + i)
                .await
                .unwrap();
        }

        let task = get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(task.consecutive_failures, SyncTask::MAX_CONSECUTIVE_FAILURES);
        assert!(!task.below_failure_limit());
        assert_eq!(task.error_type.as_deref(), Some("network"));
    }

    #[tokio::test]
    async fn test_disable_and_reenable() {
        let (pool, project_id) = setup_test_db().await;
        let task = create_for_project(&pool, project_id, TaskKind::Pull, 2000)
            .await
            .unwrap();

        disable(&pool, task.id, "project disabled", 3000).await.unwrap();

        let disabled = get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(disabled.status_enum(), TaskStatus::Disabled);
        assert!(disabled.next_run_at.is_none());
        assert_eq!(disabled.error_message.as_deref(), Some("project disabled"));

        reenable(&pool, task.id, 4000).await.unwrap();
        let task = get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(task.status_enum(), TaskStatus::Waiting);
        assert_eq!(task.next_run_at, Some(4000));
    }

    #[tokio::test]
    async fn test_request_run_now_only_when_waiting() {
        let (pool, project_id) = setup_test_db().await;
        let task = create_for_project(&pool, project_id, TaskKind::Pull, 2000)
            .await
            .unwrap();

        assert!(request_run_now(&pool, project_id, TriggerSource::Webhook, 2500)
            .await
            .unwrap());

        let task_row = get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(task_row.trigger_enum(), TriggerSource::Webhook);
        assert_eq!(task_row.next_run_at, Some(2500));

        claim_for_dispatch(&pool, task.id, 2600).await.unwrap();
        assert!(!request_run_now(&pool, project_id, TriggerSource::Manual, 2700)
            .await
            .unwrap());
    }
}
