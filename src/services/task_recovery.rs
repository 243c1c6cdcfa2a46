//! Stuck-task recovery.
//!
//! A task left in `running` past the execution timeout means the run was
//! lost (crashed worker, dropped future). Recovery restores eligibility;
//! it never deletes or disables anything.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::task::{self, TaskErrorKind, TaskStatus};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Minutes a run may stay `running` before it counts as stuck.
    pub stuck_timeout_minutes: i64,

    /// Seconds between recovery passes. Must be well under the timeout.
    pub tick_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stuck_timeout_minutes: 30,
            tick_interval_secs: 600,
        }
    }
}

/// What one recovery pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoverySummary {
    /// Running tasks examined.
    pub scanned: usize,

    /// Tasks reset back to `waiting`.
    pub recovered: usize,
}

/// Detects and resets wedged running tasks.
#[derive(Clone)]
pub struct TaskRecovery {
    pool: DbPool,
    config: RecoveryConfig,
}

impl TaskRecovery {
    pub fn new(pool: DbPool, config: RecoveryConfig) -> Self {
        Self { pool, config }
    }

    /// One recovery pass over all running tasks. Per-item failures are
    /// logged and do not stop the pass.
    pub async fn run_pass(&self) -> Result<RecoverySummary, AppError> {
        let ts = now();
        let timeout_secs = self.config.stuck_timeout_minutes * 60;

        let running = task::list_by_status(&self.pool, TaskStatus::Running).await?;
        let mut summary = RecoverySummary {
            scanned: running.len(),
            ..RecoverySummary::default()
        };

        for t in running {
            let reset = match t.started_at {
                Some(started_at) => {
                    let elapsed = ts - started_at;
                    if elapsed <= timeout_secs {
                        continue;
                    }
                    let message = format!(
                        "execution exceeded the {} minute timeout (ran {} minutes)",
                        self.config.stuck_timeout_minutes,
                        elapsed / 60
                    );
                    task::reset_stuck(&self.pool, t.id, TaskErrorKind::Timeout, &message, ts).await
                }
                // running with no start time violates the state machine;
                // normalize it the same way
                None => {
                    task::reset_stuck(
                        &self.pool,
                        t.id,
                        TaskErrorKind::InvalidState,
                        "running task had no start time",
                        ts,
                    )
                    .await
                }
            };

            match reset {
                Ok(()) => {
                    log::warn!("[recovery] Reset stuck task {} back to waiting", t.id);
                    summary.recovered += 1;
                }
                Err(e) => {
                    log::warn!("[recovery] Failed to reset task {}: {}", t.id, e);
                }
            }
        }

        Ok(summary)
    }
}
