//! Alert lifecycle management.
//!
//! Turns evaluator output into persisted alerts: deduplicates on creation,
//! resolves on demand, auto-resolves when the underlying condition clears,
//! and cleans up resolved alerts past the retention window.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::alert::{self, MonitorAlert, NewAlert};
use crate::models::diff::ProjectDiff;
use crate::services::threshold::{self, AlertCandidate, MonitorThresholds};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Persists and maintains divergence alerts.
#[derive(Clone)]
pub struct SyncMonitor {
    pool: DbPool,
    thresholds: MonitorThresholds,
}

impl SyncMonitor {
    pub fn new(pool: DbPool, thresholds: MonitorThresholds) -> Self {
        Self { pool, thresholds }
    }

    /// Raise an alert unless an active one of the same (project, type)
    /// was triggered inside the dedup window. Returns true when created.
    pub async fn create_alert(&self, candidate: &AlertCandidate) -> Result<bool, AppError> {
        let ts = now();
        let window_start = ts - MonitorAlert::DEDUP_WINDOW_MINUTES * 60;

        let existing = alert::find_recent_active(
            &self.pool,
            candidate.project_id,
            candidate.alert_type,
            window_start,
        )
        .await?;

        if existing.is_some() {
            log::debug!(
                "[monitor] Suppressing duplicate {} alert for {}",
                candidate.alert_type,
                candidate.source_path
            );
            return Ok(false);
        }

        alert::insert_alert(
            &self.pool,
            &NewAlert {
                project_id: candidate.project_id,
                alert_type: candidate.alert_type,
                severity: candidate.severity,
                message: candidate.message.clone(),
                details: None,
                triggered_at: ts,
            },
        )
        .await?;

        log::info!(
            "[monitor] Raised {} alert ({}) for {}",
            candidate.alert_type,
            candidate.severity,
            candidate.source_path
        );

        Ok(true)
    }

    /// Resolve an alert by ID. False when it does not exist or is already
    /// resolved.
    pub async fn resolve_alert(&self, id: i64) -> Result<bool, AppError> {
        Ok(alert::resolve(&self.pool, id, now()).await?)
    }

    /// Mute an alert for an advisory duration. There is no unmute sweep;
    /// the duration is metadata for operators and the re-evaluation path.
    pub async fn mute_alert(&self, id: i64, duration_minutes: i64) -> Result<bool, AppError> {
        let muted_until = now() + duration_minutes * 60;
        Ok(alert::mute(&self.pool, id, muted_until).await?)
    }

    /// Resolve every active alert whose condition no longer holds in the
    /// given diff set. Projects without a diff in the set are left alone.
    /// Returns the number resolved; calling again with the same diffs
    /// resolves nothing further.
    pub async fn auto_resolve_alerts(&self, diffs: &[ProjectDiff]) -> Result<usize, AppError> {
        let by_project: HashMap<i64, &ProjectDiff> =
            diffs.iter().map(|d| (d.project_id, d)).collect();

        let active = alert::list_active(&self.pool).await?;
        let mut resolved = 0usize;

        for a in active {
            let Some(diff) = by_project.get(&a.project_id) else {
                continue;
            };

            let still_firing = threshold::evaluate(diff, &self.thresholds)
                .iter()
                .any(|c| c.alert_type == a.alert_type_enum());

            if !still_firing {
                if alert::resolve(&self.pool, a.id, now()).await? {
                    log::info!(
                        "[monitor] Auto-resolved {} alert for project {}",
                        a.alert_type,
                        a.project_id
                    );
                    resolved += 1;
                }
            }
        }

        Ok(resolved)
    }

    /// Scan-pipeline entry: evaluate the batch, raise what is new, then
    /// auto-resolve what cleared. Returns (created, resolved).
    pub async fn process_scan_diffs(
        &self,
        diffs: &[ProjectDiff],
    ) -> Result<(usize, usize), AppError> {
        let candidates = threshold::evaluate_batch(diffs, &self.thresholds);

        let mut created = 0usize;
        for candidate in &candidates {
            match self.create_alert(candidate).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => {
                    log::warn!(
                        "[monitor] Failed to raise alert for {}: {}",
                        candidate.source_path,
                        e
                    );
                }
            }
        }

        let resolved = self.auto_resolve_alerts(diffs).await?;

        Ok((created, resolved))
    }

    /// Delete resolved alerts past the retention window. Returns how many
    /// were removed.
    pub async fn cleanup_resolved(&self) -> Result<u64, AppError> {
        let cutoff = now() - MonitorAlert::RESOLVED_RETENTION_DAYS * 24 * 3600;
        let deleted = alert::delete_resolved_before(&self.pool, cutoff).await?;

        if deleted > 0 {
            log::info!("[monitor] Cleaned up {} resolved alerts", deleted);
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::alert::{AlertSeverity, AlertStatus, AlertType};
    use crate::models::diff::{DiffDetails, SyncState};
    use crate::models::project::{self, NewProject, SyncMethod};
    use crate::models::snapshot::{ProjectSnapshot, SnapshotSide};
    use tempfile::tempdir;

    async fn setup() -> (SyncMonitor, DbPool, i64) {
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

        let monitor = SyncMonitor::new(pool.clone(), MonitorThresholds::default());
        (monitor, pool, project_id)
    }

    fn candidate(project_id: i64, alert_type: AlertType) -> AlertCandidate {
        AlertCandidate {
            project_id,
            source_path: "group/app".to_string(),
            alert_type,
            severity: AlertSeverity::High,
            message: "divergence".to_string(),
        }
    }

    fn snapshot(side: SnapshotSide) -> ProjectSnapshot {
        ProjectSnapshot {
            id: 0,
            project_id: 1,
            side: side.to_string(),
            head_sha: Some("abc".to_string()),
            commit_count: 100,
            branch_count: 5,
            size_bytes: 1_000_000,
            last_activity_at: Some(10_000),
            default_branch: None,
            captured_at: 10_000,
        }
    }

    fn diff(project_id: i64, details: DiffDetails) -> ProjectDiff {
        ProjectDiff {
            project_id,
            source_path: "group/app".to_string(),
            source: Some(snapshot(SnapshotSide::Source)),
            target: Some(snapshot(SnapshotSide::Target)),
            details,
            state: SyncState::Outdated,
            calculated_at: 20_000,
        }
    }

    #[tokio::test]
    async fn test_create_alert_deduplicates_within_window() {
        let (monitor, pool, project_id) = setup().await;

        assert!(monitor
            .create_alert(&candidate(project_id, AlertType::CommitDiff))
            .await
            .unwrap());
        assert!(!monitor
            .create_alert(&candidate(project_id, AlertType::CommitDiff))
            .await
            .unwrap());

        // A different type is its own dedup key
        assert!(monitor
            .create_alert(&candidate(project_id, AlertType::BranchDiff))
            .await
            .unwrap());

        let active = alert::list_active(&pool).await.unwrap();
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn test_resolved_alert_does_not_suppress_new_one() {
        let (monitor, pool, project_id) = setup().await;

        monitor
            .create_alert(&candidate(project_id, AlertType::CommitDiff))
            .await
            .unwrap();

        let active = alert::list_active(&pool).await.unwrap();
        monitor.resolve_alert(active[0].id).await.unwrap();

        assert!(monitor
            .create_alert(&candidate(project_id, AlertType::CommitDiff))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_resolve_alert_not_found_is_false() {
        let (monitor, _pool, _project_id) = setup().await;
        assert!(!monitor.resolve_alert(999).await.unwrap());
    }

    #[tokio::test]
    async fn test_mute_alert_sets_advisory_deadline() {
        let (monitor, pool, project_id) = setup().await;

        monitor
            .create_alert(&candidate(project_id, AlertType::SizeDiff))
            .await
            .unwrap();
        let id = alert::list_active(&pool).await.unwrap()[0].id;

        assert!(monitor.mute_alert(id, 120).await.unwrap());

        let muted = alert::get_alert(&pool, id).await.unwrap().unwrap();
        assert_eq!(muted.status_enum(), AlertStatus::Muted);
        let muted_until = muted.muted_until.unwrap();
        assert!(muted_until > now() + 110 * 60);

        assert!(!monitor.mute_alert(999, 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_auto_resolve_clears_recovered_conditions() {
        let (monitor, pool, project_id) = setup().await;

        monitor
            .create_alert(&candidate(project_id, AlertType::CommitDiff))
            .await
            .unwrap();

        // Condition cleared: commit divergence below threshold
        let clean = diff(
            project_id,
            DiffDetails {
                commit_sha_matches: true,
                ..DiffDetails::default()
            },
        );

        let resolved = monitor.auto_resolve_alerts(&[clean.clone()]).await.unwrap();
        assert_eq!(resolved, 1);

        // Idempotent: a second pass with the same diffs resolves nothing
        let resolved = monitor.auto_resolve_alerts(&[clean]).await.unwrap();
        assert_eq!(resolved, 0);

        assert!(alert::list_active(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_resolve_keeps_still_firing_alerts() {
        let (monitor, pool, project_id) = setup().await;

        monitor
            .create_alert(&candidate(project_id, AlertType::CommitDiff))
            .await
            .unwrap();

        let still_bad = diff(
            project_id,
            DiffDetails {
                commit_behind: 50,
                ..DiffDetails::default()
            },
        );

        let resolved = monitor.auto_resolve_alerts(&[still_bad]).await.unwrap();
        assert_eq!(resolved, 0);
        assert_eq!(alert::list_active(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_resolve_skips_projects_without_diff() {
        let (monitor, pool, project_id) = setup().await;

        monitor
            .create_alert(&candidate(project_id, AlertType::CommitDiff))
            .await
            .unwrap();

        let resolved = monitor.auto_resolve_alerts(&[]).await.unwrap();
        assert_eq!(resolved, 0);
        assert_eq!(alert::list_active(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_process_scan_diffs_creates_and_resolves() {
        let (monitor, pool, project_id) = setup().await;

        // First scan: commit divergence fires
        let bad = diff(
            project_id,
            DiffDetails {
                commit_behind: 31,
                ..DiffDetails::default()
            },
        );
        let (created, resolved) = monitor.process_scan_diffs(&[bad]).await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(resolved, 0);

        // Next scan: condition cleared
        let clean = diff(
            project_id,
            DiffDetails {
                commit_sha_matches: true,
                ..DiffDetails::default()
            },
        );
        let (created, resolved) = monitor.process_scan_diffs(&[clean]).await.unwrap();
        assert_eq!(created, 0);
        assert_eq!(resolved, 1);

        assert!(alert::list_active(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_synced_diff_produces_no_alerts() {
        let (monitor, _pool, project_id) = setup().await;

        let synced = diff(
            project_id,
            DiffDetails {
                commit_sha_matches: true,
                ..DiffDetails::default()
            },
        );

        let (created, _) = monitor.process_scan_diffs(&[synced]).await.unwrap();
        assert_eq!(created, 0);
    }

    #[tokio::test]
    async fn test_cleanup_resolved_respects_retention() {
        let (monitor, pool, project_id) = setup().await;

        monitor
            .create_alert(&candidate(project_id, AlertType::CommitDiff))
            .await
            .unwrap();
        let id = alert::list_active(&pool).await.unwrap()[0].id;
        monitor.resolve_alert(id).await.unwrap();

        // Freshly resolved: retained
        assert_eq!(monitor.cleanup_resolved().await.unwrap(), 0);

        // Age the resolution stamp past the window
        let old = now() - (MonitorAlert::RESOLVED_RETENTION_DAYS + 1) * 24 * 3600;
        sqlx::query("UPDATE monitor_alerts SET resolved_at = ? WHERE id = ?")
            .bind(old)
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(monitor.cleanup_resolved().await.unwrap(), 1);
    }
}
