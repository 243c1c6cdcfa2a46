//! Bounded sync execution pool.
//!
//! Owns the `pending -> running -> waiting` half of the task state
//! machine. The scheduler hands claimed tasks to [`ExecutorPool`]; the
//! pool runs the transport collaborator under a concurrency bound and
//! records the outcome with rescheduling and backoff.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::priority::{self, PriorityTier};
use crate::models::project::{self, ProjectStatus, SyncProject};
use crate::models::task::{self, SyncTask, TaskErrorKind};
use crate::remote::SyncExecutor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;

/// First backoff step after a failed run, in seconds.
const BACKOFF_BASE_SECS: i64 = 300;

/// Backoff ceiling, in seconds.
const BACKOFF_CAP_SECS: i64 = 6 * 3600;

/// Fallback re-sync interval when a task has no priority config.
const DEFAULT_INTERVAL_SECS: i64 = 3600;

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Exponential backoff for the next attempt after `failures` consecutive
/// failures (post-increment count).
fn backoff_secs(failures: i64) -> i64 {
    let shift = (failures - 1).clamp(0, 16) as u32;
    (BACKOFF_BASE_SECS << shift).min(BACKOFF_CAP_SECS)
}

/// Bounded pool running sync executions.
#[derive(Clone)]
pub struct ExecutorPool {
    pool: DbPool,
    executor: Arc<dyn SyncExecutor>,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
}

impl ExecutorPool {
    /// `max_parallel` is the hard ceiling on in-flight executions. The
    /// scheduler applies its own (tighter, time-of-day) budget on top.
    pub fn new(pool: DbPool, executor: Arc<dyn SyncExecutor>, max_parallel: usize) -> Self {
        Self {
            pool,
            executor,
            permits: Arc::new(Semaphore::new(max_parallel)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Live count of in-flight executions. Read straight from the pool on
    /// every scheduling decision; never cached by callers.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Hand a claimed task to the pool.
    ///
    /// Fails synchronously when the pool is saturated so the scheduler can
    /// roll the claim back instead of dropping the task.
    pub fn try_dispatch(&self, project: SyncProject, sync_task: SyncTask) -> Result<(), AppError> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| AppError::sync_with_task("executor pool saturated", sync_task.id))?;

        let db = self.pool.clone();
        let executor = self.executor.clone();
        let active = self.active.clone();

        active.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let _permit = permit;
            run_task(&db, executor.as_ref(), &project, &sync_task).await;
            active.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(())
    }
}

/// Execute one task and record its outcome. Never panics or propagates;
/// failures land on the task row.
async fn run_task(pool: &DbPool, executor: &dyn SyncExecutor, p: &SyncProject, t: &SyncTask) {
    let started = now();

    // pending -> running; a lost claim means recovery or lifecycle got
    // here first and the run must not proceed
    match task::mark_running(pool, t.id, started).await {
        Ok(true) => {}
        Ok(false) => {
            log::warn!("[executor] Task {} lost its claim, skipping run", t.id);
            return;
        }
        Err(e) => {
            log::warn!("[executor] Failed to mark task {} running: {}", t.id, e);
            return;
        }
    }

    if let Err(e) = project::update_status(pool, p.id, ProjectStatus::Syncing, started).await {
        log::warn!("[executor] Failed to mark project {} syncing: {}", p.id, e);
    }

    let result = executor.execute(p, t).await;
    let finished = now();

    let record = match result {
        Ok(outcome) if outcome.success => {
            log::info!(
                "[executor] Task {} synced {} ({} changes)",
                t.id,
                p.source_path,
                outcome.changes
            );
            let interval = success_interval(pool, p.id).await;
            task::record_success(pool, t.id, finished + interval, finished).await
        }
        Ok(outcome) => {
            let message = outcome
                .message
                .unwrap_or_else(|| "sync execution reported failure".to_string());
            record_failed_run(pool, t, TaskErrorKind::Execution, &message, finished).await
        }
        Err(e) => {
            let kind = match &e {
                AppError::Network { .. } | AppError::RemoteApi { .. } => TaskErrorKind::Network,
                _ => TaskErrorKind::Execution,
            };
            record_failed_run(pool, t, kind, &e.to_string(), finished).await
        }
    };

    if let Err(e) = record {
        log::warn!("[executor] Failed to record outcome for task {}: {}", t.id, e);
    }

    if let Err(e) = project::update_status(pool, p.id, ProjectStatus::Active, finished).await {
        log::warn!("[executor] Failed to restore project {} status: {}", p.id, e);
    }
}

/// Re-sync interval after a success, from the project's priority tier.
async fn success_interval(pool: &DbPool, project_id: i64) -> i64 {
    match priority::get_by_project(pool, project_id).await {
        Ok(Some(config)) => config.priority_enum().sync_interval_secs(),
        Ok(None) => DEFAULT_INTERVAL_SECS,
        Err(e) => {
            log::warn!(
                "[executor] Failed to load priority config for project {}: {}",
                project_id,
                e
            );
            PriorityTier::Normal.sync_interval_secs()
        }
    }
}

async fn record_failed_run(
    pool: &DbPool,
    t: &SyncTask,
    kind: TaskErrorKind,
    message: &str,
    finished: i64,
) -> Result<(), sqlx::Error> {
    let failures_after = t.consecutive_failures + 1;
    let next_run = finished + backoff_secs(failures_after);

    log::warn!(
        "[executor] Task {} failed ({}): {}, retry in {}s",
        t.id,
        kind,
        message,
        next_run - finished
    );

    task::record_failure(pool, t.id, kind, message, next_run, finished).await
}
