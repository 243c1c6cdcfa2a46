//! Mirror provisioning compensation.
//!
//! Projects can get stuck between "target repository created" and "mirror
//! link configured" when provisioning is interrupted. This pass retries
//! the missing step for all such projects, at startup and on a timer.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::project::{self, ProjectStatus};
use crate::remote::{MirrorProvisioner, ProjectFetcher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Compensation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationConfig {
    /// Seconds between compensation passes.
    pub tick_interval_secs: u64,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1800,
        }
    }
}

/// What one compensation pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompensationSummary {
    /// Candidate projects examined.
    pub examined: usize,

    /// Mirrors successfully configured.
    pub configured: usize,

    /// Projects skipped (provisioning not ready, or already done).
    pub skipped: usize,

    /// Projects whose mirror configuration failed.
    pub failed: usize,
}

/// Retries the mirror-configuration step for half-provisioned projects.
#[derive(Clone)]
pub struct MirrorCompensation {
    pool: DbPool,
    target_fetcher: Arc<dyn ProjectFetcher>,
    provisioner: Arc<dyn MirrorProvisioner>,
}

impl MirrorCompensation {
    pub fn new(
        pool: DbPool,
        target_fetcher: Arc<dyn ProjectFetcher>,
        provisioner: Arc<dyn MirrorProvisioner>,
    ) -> Self {
        Self {
            pool,
            target_fetcher,
            provisioner,
        }
    }

    /// One compensation pass. A failing project is recorded and skipped;
    /// the batch always finishes.
    pub async fn run_pass(&self) -> Result<CompensationSummary, AppError> {
        let candidates =
            project::list_by_status(&self.pool, ProjectStatus::TargetCreated, true).await?;

        let mut summary = CompensationSummary {
            examined: candidates.len(),
            ..CompensationSummary::default()
        };

        for p in candidates {
            let ts = now();

            // Mirror already exists: only the status was left behind
            if p.mirror_id.is_some() {
                if let Err(e) =
                    project::update_status(&self.pool, p.id, ProjectStatus::MirrorConfigured, ts)
                        .await
                {
                    log::warn!(
                        "[compensation] Failed to advance {} past configured mirror: {}",
                        p.source_path,
                        e
                    );
                }
                summary.skipped += 1;
                continue;
            }

            // Without a target-side record the mirror has nothing to point
            // at yet; leave the project for a later pass
            let Some(target_id) = p.target_project_id else {
                summary.skipped += 1;
                continue;
            };

            match self.target_fetcher.get_project(target_id).await {
                Ok(_) => {}
                Err(e) if e.is_remote_not_found() => {
                    log::debug!(
                        "[compensation] Target record for {} not visible yet",
                        p.source_path
                    );
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    log::warn!(
                        "[compensation] Could not verify target record for {}: {}",
                        p.source_path,
                        e
                    );
                    summary.skipped += 1;
                    continue;
                }
            }

            match self.provisioner.configure_mirror(&p).await {
                Ok(mirror_id) => {
                    if let Err(e) =
                        project::mark_mirror_configured(&self.pool, p.id, mirror_id, ts).await
                    {
                        log::warn!(
                            "[compensation] Mirror {} configured but not recorded for {}: {}",
                            mirror_id,
                            p.source_path,
                            e
                        );
                        continue;
                    }
                    log::info!(
                        "[compensation] Configured mirror {} for {}",
                        mirror_id,
                        p.source_path
                    );
                    summary.configured += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    if let Err(db_err) = project::set_status_error(
                        &self.pool,
                        p.id,
                        ProjectStatus::Failed,
                        &message,
                        ts,
                    )
                    .await
                    {
                        log::warn!(
                            "[compensation] Failed to record failure for {}: {}",
                            p.source_path,
                            db_err
                        );
                    }
                    log::warn!(
                        "[compensation] Mirror configuration failed for {}: {}",
                        p.source_path,
                        message
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}
