//! Task scheduler.
//!
//! Periodically selects due pull tasks under a time-of-day concurrency
//! budget and hands them to the executor pool. Owns only the
//! `waiting -> pending` transition; everything after the hand-off belongs
//! to the pool.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::project;
use crate::models::task::{self, SyncTask};
use crate::services::executor::ExecutorPool;
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Peak window as "HH-HH" local hours, start inclusive, end exclusive.
    /// Wrap-around windows ("22-06") are allowed. Unparseable values mean
    /// "never peak".
    pub peak_hours: String,

    /// Concurrent executions allowed inside the peak window.
    pub peak_concurrency: usize,

    /// Concurrent executions allowed outside it.
    pub off_peak_concurrency: usize,

    /// Seconds between scheduling ticks.
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            peak_hours: "08-18".to_string(),
            peak_concurrency: 2,
            off_peak_concurrency: 6,
            tick_interval_secs: 60,
        }
    }
}

/// What one scheduling tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    /// Capacity the tick started with (limit minus live active count).
    pub capacity: i64,

    /// Tasks handed to the executor pool.
    pub dispatched: usize,

    /// Tasks that were eligible but could not be handed off.
    pub skipped: usize,
}

/// Decide whether `hour` falls inside the "HH-HH" peak window.
///
/// Malformed input deliberately reads as "not peak": a broken config must
/// not stop the scheduler, it just runs at off-peak capacity.
pub fn is_peak_hour(window: &str, hour: u32) -> bool {
    let Some((start_s, end_s)) = window.split_once('-') else {
        return false;
    };
    let (Ok(start), Ok(end)) = (start_s.trim().parse::<u32>(), end_s.trim().parse::<u32>())
    else {
        return false;
    };
    if start > 23 || end > 24 {
        return false;
    }

    if start <= end {
        hour >= start && hour < end
    } else {
        // Window wraps midnight
        hour >= start || hour < end
    }
}

/// Priority- and staleness-ordered task dispatcher.
#[derive(Clone)]
pub struct SyncScheduler {
    pool: DbPool,
    executor: ExecutorPool,
    config: SchedulerConfig,
}

impl SyncScheduler {
    pub fn new(pool: DbPool, executor: ExecutorPool, config: SchedulerConfig) -> Self {
        Self {
            pool,
            executor,
            config,
        }
    }

    /// Live number of in-flight executions.
    pub fn active_task_count(&self) -> usize {
        self.executor.active_count()
    }

    /// Manual trigger: run one scheduling pass immediately.
    pub async fn schedule_pull_tasks(&self) -> Result<TickSummary, AppError> {
        let hour = chrono::Local::now().hour();
        self.tick_at_hour(hour).await
    }

    /// One scheduling pass at the current local hour.
    pub async fn tick(&self) -> Result<TickSummary, AppError> {
        self.tick_at_hour(chrono::Local::now().hour()).await
    }

    /// One scheduling pass, with the local hour passed in for testability.
    pub async fn tick_at_hour(&self, hour: u32) -> Result<TickSummary, AppError> {
        let ts = now();

        let peak = is_peak_hour(&self.config.peak_hours, hour);
        let limit = if peak {
            self.config.peak_concurrency
        } else {
            self.config.off_peak_concurrency
        } as i64;

        // Active count is read from the pool itself, never tracked here
        let capacity = limit - self.executor.active_count() as i64;

        let mut summary = TickSummary {
            capacity,
            ..TickSummary::default()
        };

        if capacity <= 0 {
            log::debug!(
                "[scheduler] No capacity (limit {}, peak={}), skipping tick",
                limit,
                peak
            );
            return Ok(summary);
        }

        let candidates = self.eligible_pull_tasks(ts, capacity).await?;

        for t in candidates {
            // Atomic claim; a lost race just means someone else has it
            if !task::claim_for_dispatch(&self.pool, t.id, ts).await? {
                continue;
            }

            let Some(p) = project::get_project(&self.pool, t.project_id).await? else {
                task::release_claim(&self.pool, t.id, ts).await?;
                summary.skipped += 1;
                continue;
            };

            match self.executor.try_dispatch(p, t.clone()) {
                Ok(()) => summary.dispatched += 1,
                Err(e) => {
                    // Never a silent drop: roll the claim back and count it
                    log::warn!("[scheduler] Hand-off failed for task {}: {}", t.id, e);
                    task::release_claim(&self.pool, t.id, ts).await?;
                    summary.skipped += 1;
                }
            }
        }

        if summary.dispatched > 0 || summary.skipped > 0 {
            log::info!(
                "[scheduler] Dispatched {} task(s), skipped {}, capacity was {}",
                summary.dispatched,
                summary.skipped,
                summary.capacity
            );
        }

        Ok(summary)
    }

    /// Due pull tasks, best first: priority rank descending, then oldest
    /// due. Only tasks under the failure gate with an enabled priority
    /// config and an enabled project qualify.
    async fn eligible_pull_tasks(&self, ts: i64, limit: i64) -> Result<Vec<SyncTask>, AppError> {
        let tasks = sqlx::query_as::<_, SyncTask>(
            r#"
            SELECT t.*
            FROM sync_tasks t
            JOIN sync_projects p ON p.id = t.project_id
            JOIN pull_sync_configs c ON c.project_id = t.project_id
            WHERE t.task_type = 'pull'
              AND t.status = 'waiting'
              AND t.next_run_at IS NOT NULL
              AND t.next_run_at <= ?
              AND t.consecutive_failures < ?
              AND c.enabled = 1
              AND p.enabled = 1
            ORDER BY
              CASE c.priority
                WHEN 'critical' THEN 4
                WHEN 'high' THEN 3
                WHEN 'normal' THEN 2
                ELSE 1
              END DESC,
              t.next_run_at ASC
            LIMIT ?
            "#,
        )
        .bind(ts)
        .bind(SyncTask::MAX_CONSECUTIVE_FAILURES)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::AppError;
    use crate::models::priority::{self, PriorityTier};
    use crate::models::project::{NewProject, SyncMethod, SyncProject};
    use crate::models::task::{TaskKind, TaskStatus};
    use crate::remote::{SyncExecutor, SyncOutcome};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Notify;

    struct HoldExecutor {
        hold: Arc<Notify>,
    }

    #[async_trait]
    impl SyncExecutor for HoldExecutor {
        async fn execute(
            &self,
            _project: &SyncProject,
            _task: &SyncTask,
        ) -> Result<SyncOutcome, AppError> {
            self.hold.notified().await;
            Ok(SyncOutcome {
                success: true,
                head_sha: None,
                changes: 0,
                message: None,
            })
        }
    }

    async fn setup(off_peak: usize, pool_cap: usize) -> (SyncScheduler, DbPool, Arc<Notify>) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        std::mem::forget(dir);
        let pool = db::initialize(&db_path).await.unwrap();

        let hold = Arc::new(Notify::new());
        let executor = ExecutorPool::new(
            pool.clone(),
            Arc::new(HoldExecutor { hold: hold.clone() }),
            pool_cap,
        );

        let config = SchedulerConfig {
            peak_hours: String::new(),
            peak_concurrency: 1,
            off_peak_concurrency: off_peak,
            tick_interval_secs: 60,
        };

        (
            SyncScheduler::new(pool.clone(), executor, config),
            pool,
            hold,
        )
    }

    async fn add_task(
        pool: &DbPool,
        path: &str,
        tier: PriorityTier,
        next_run_at: i64,
    ) -> SyncTask {
        let project_id = crate::models::project::create_project(
            pool,
            &NewProject {
                source_path: path.to_string(),
                source_project_id: Some(1),
                sync_method: SyncMethod::Pull,
                default_branch: None,
            },
            1000,
        )
        .await
        .unwrap();
        priority::create_default(pool, project_id, 1000).await.unwrap();
        priority::set_priority(pool, project_id, tier, 1000).await.unwrap();

        let t = task::create_for_project(pool, project_id, TaskKind::Pull, next_run_at)
            .await
            .unwrap();
        sqlx::query("UPDATE sync_tasks SET next_run_at = ? WHERE id = ?")
            .bind(next_run_at)
            .bind(t.id)
            .execute(pool)
            .await
            .unwrap();

        task::get_task(pool, t.id).await.unwrap().unwrap()
    }

    #[test]
    fn test_is_peak_hour_plain_window() {
        assert!(is_peak_hour("08-18", 8));
        assert!(is_peak_hour("08-18", 17));
        assert!(!is_peak_hour("08-18", 18));
        assert!(!is_peak_hour("08-18", 7));
    }

    #[test]
    fn test_is_peak_hour_wraps_midnight() {
        assert!(is_peak_hour("22-06", 23));
        assert!(is_peak_hour("22-06", 2));
        assert!(!is_peak_hour("22-06", 12));
    }

    #[test]
    fn test_malformed_peak_window_is_never_peak() {
        assert!(!is_peak_hour("", 12));
        assert!(!is_peak_hour("banana", 12));
        assert!(!is_peak_hour("8:18", 12));
        assert!(!is_peak_hour("25-99", 12));
    }

    #[tokio::test]
    async fn test_dispatch_order_priority_then_staleness() {
        let (scheduler, pool, _hold) = setup(10, 10).await;
        let ts = now();

        // A: critical, due 5 minutes ago
        let a = add_task(&pool, "group/a", PriorityTier::Critical, ts - 300).await;
        // B: high, due 1 hour ago
        let b = add_task(&pool, "group/b", PriorityTier::High, ts - 3600).await;
        // C: normal, due 10 minutes ago
        let c = add_task(&pool, "group/c", PriorityTier::Normal, ts - 600).await;

        let eligible = scheduler.eligible_pull_tasks(ts, 10).await.unwrap();
        let ids: Vec<i64> = eligible.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn test_staleness_breaks_ties_within_priority() {
        let (scheduler, pool, _hold) = setup(10, 10).await;
        let ts = now();

        let newer = add_task(&pool, "group/a", PriorityTier::Normal, ts - 60).await;
        let older = add_task(&pool, "group/b", PriorityTier::Normal, ts - 600).await;

        let eligible = scheduler.eligible_pull_tasks(ts, 10).await.unwrap();
        let ids: Vec<i64> = eligible.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }

    #[tokio::test]
    async fn test_eligibility_filters() {
        let (scheduler, pool, _hold) = setup(10, 10).await;
        let ts = now();

        // Not due yet
        add_task(&pool, "group/future", PriorityTier::Normal, ts + 3600).await;

        // Over the failure gate
        let failing = add_task(&pool, "group/failing", PriorityTier::Normal, ts - 60).await;
        sqlx::query("UPDATE sync_tasks SET consecutive_failures = ? WHERE id = ?")
            .bind(SyncTask::MAX_CONSECUTIVE_FAILURES)
            .bind(failing.id)
            .execute(&pool)
            .await
            .unwrap();

        // Priority config disabled
        let disabled = add_task(&pool, "group/disabled", PriorityTier::Normal, ts - 60).await;
        priority::set_enabled(&pool, disabled.project_id, false, ts)
            .await
            .unwrap();

        // Eligible
        let ok = add_task(&pool, "group/ok", PriorityTier::Normal, ts - 60).await;

        let eligible = scheduler.eligible_pull_tasks(ts, 10).await.unwrap();
        let ids: Vec<i64> = eligible.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![ok.id]);
    }

    #[tokio::test]
    async fn test_tick_dispatches_within_capacity() {
        let (scheduler, pool, hold) = setup(2, 10).await;
        let ts = now();

        add_task(&pool, "group/a", PriorityTier::Critical, ts - 300).await;
        add_task(&pool, "group/b", PriorityTier::High, ts - 3600).await;
        let c = add_task(&pool, "group/c", PriorityTier::Normal, ts - 600).await;

        let summary = scheduler.tick_at_hour(12).await.unwrap();
        assert_eq!(summary.capacity, 2);
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.skipped, 0);

        // The lowest-ranked task was left waiting
        let c = task::get_task(&pool, c.id).await.unwrap().unwrap();
        assert_eq!(c.status_enum(), TaskStatus::Waiting);

        // Executions are in flight; a new tick sees zero capacity
        for _ in 0..100 {
            if scheduler.active_task_count() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let summary = scheduler.tick_at_hour(12).await.unwrap();
        assert_eq!(summary.capacity, 0);
        assert_eq!(summary.dispatched, 0);

        hold.notify_waiters();
        hold.notify_waiters();
        for _ in 0..100 {
            if scheduler.active_task_count() == 0 {
                break;
            }
            hold.notify_waiters();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_failed_handoff_rolls_back_to_waiting() {
        // Scheduler budget larger than the pool's hard cap forces a
        // saturation failure on the second hand-off
        let (scheduler, pool, hold) = setup(5, 1).await;
        let ts = now();

        add_task(&pool, "group/a", PriorityTier::Critical, ts - 300).await;
        let b = add_task(&pool, "group/b", PriorityTier::Normal, ts - 600).await;

        let summary = scheduler.tick_at_hour(12).await.unwrap();
        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.skipped, 1);

        let b = task::get_task(&pool, b.id).await.unwrap().unwrap();
        assert_eq!(b.status_enum(), TaskStatus::Waiting);

        hold.notify_waiters();
        for _ in 0..100 {
            if scheduler.active_task_count() == 0 {
                break;
            }
            hold.notify_waiters();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}
