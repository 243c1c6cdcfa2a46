//! Task lifecycle management.
//!
//! Keeps the set of schedulable tasks consistent with the set of enabled,
//! syncable projects: creates missing tasks, disables tasks of projects
//! that stopped being syncable. Both passes are best-effort per item.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::priority;
use crate::models::project;
use crate::models::task::{self, TaskKind, TaskStatus};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// What one lifecycle pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleSummary {
    /// Tasks created for projects that lacked one.
    pub created: usize,

    /// Tasks disabled because their project is no longer syncable.
    pub disabled: usize,
}

/// Reconciles tasks against project state.
#[derive(Clone)]
pub struct TaskLifecycle {
    pool: DbPool,
}

impl TaskLifecycle {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// One lifecycle pass: create missing tasks, then disable orphaned
    /// ones. One item's failure never aborts the batch.
    pub async fn run_pass(&self) -> Result<LifecycleSummary, AppError> {
        let mut summary = LifecycleSummary::default();
        summary.created = self.create_missing_tasks().await?;
        summary.disabled = self.disable_orphaned_tasks().await?;
        Ok(summary)
    }

    /// Pass (a): every enabled, syncable project gets a task with the
    /// kind derived from its sync method. Pull projects additionally get
    /// a default priority config.
    async fn create_missing_tasks(&self) -> Result<usize, AppError> {
        let ts = now();
        let mut created = 0usize;

        let projects = project::list_enabled(&self.pool).await?;
        for p in projects {
            if !p.is_syncable() {
                continue;
            }

            let result = async {
                if task::get_by_project(&self.pool, p.id).await?.is_some() {
                    return Ok::<bool, sqlx::Error>(false);
                }

                let kind = TaskKind::from(p.sync_method_enum());
                task::create_for_project(&self.pool, p.id, kind, ts).await?;

                if kind == TaskKind::Pull
                    && priority::get_by_project(&self.pool, p.id).await?.is_none()
                {
                    priority::create_default(&self.pool, p.id, ts).await?;
                }

                Ok(true)
            }
            .await;

            match result {
                Ok(true) => {
                    log::info!("[lifecycle] Created task for {}", p.source_path);
                    created += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!(
                        "[lifecycle] Failed to create task for {}: {}",
                        p.source_path,
                        e
                    );
                }
            }
        }

        Ok(created)
    }

    /// Pass (b): tasks whose project is disabled, failed, missing or
    /// deleted get flipped to `disabled` with the reason recorded.
    async fn disable_orphaned_tasks(&self) -> Result<usize, AppError> {
        let ts = now();
        let mut disabled = 0usize;

        let tasks = sqlx::query_as::<_, task::SyncTask>(
            "SELECT * FROM sync_tasks WHERE status != 'disabled' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        for t in tasks {
            let result = async {
                let Some(p) = project::get_project(&self.pool, t.project_id).await? else {
                    task::disable(&self.pool, t.id, "project record is gone", ts).await?;
                    return Ok::<bool, sqlx::Error>(true);
                };

                if p.is_syncable() {
                    return Ok(false);
                }

                let reason = if !p.enabled {
                    "project is disabled".to_string()
                } else {
                    format!("project status is {}", p.status)
                };
                task::disable(&self.pool, t.id, &reason, ts).await?;
                Ok(true)
            }
            .await;

            match result {
                Ok(true) => {
                    log::info!("[lifecycle] Disabled task {} for project {}", t.id, t.project_id);
                    disabled += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!("[lifecycle] Failed to disable task {}: {}", t.id, e);
                }
            }
        }

        Ok(disabled)
    }
}
