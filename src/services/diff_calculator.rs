//! Snapshot diff engine.
//!
//! Compares the latest source and target observations of a project and
//! classifies the divergence.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::diff::{DiffDetails, ProjectDiff, SyncState};
use crate::models::project;
use crate::models::snapshot::{self, ProjectSnapshot, SnapshotSide};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default size divergence tolerance, in percent.
pub const DEFAULT_SIZE_TOLERANCE_PERCENT: f64 = 10.0;

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Computes and classifies divergence between project sides.
#[derive(Clone)]
pub struct DiffCalculator {
    pool: DbPool,

    /// Size divergence beyond this percentage classifies as inconsistent.
    pub size_tolerance_percent: f64,
}

impl DiffCalculator {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            size_tolerance_percent: DEFAULT_SIZE_TOLERANCE_PERCENT,
        }
    }

    pub fn with_tolerance(pool: DbPool, size_tolerance_percent: f64) -> Self {
        Self {
            pool,
            size_tolerance_percent,
        }
    }

    /// Diff one project. None when the project is unknown.
    pub async fn calculate_diff(&self, project_id: i64) -> Result<Option<ProjectDiff>, AppError> {
        let Some(project) = project::get_project(&self.pool, project_id).await? else {
            return Ok(None);
        };

        let source = snapshot::get_snapshot(&self.pool, project_id, SnapshotSide::Source).await?;
        let target = snapshot::get_snapshot(&self.pool, project_id, SnapshotSide::Target).await?;

        Ok(Some(build_diff(
            project_id,
            &project.source_path,
            source,
            target,
            self.size_tolerance_percent,
            now(),
        )))
    }

    /// Diff every known project. One project's failure is logged and
    /// skipped; the batch always completes.
    pub async fn calculate_all(&self) -> Result<Vec<ProjectDiff>, AppError> {
        let projects = project::list_known(&self.pool).await?;
        let mut diffs = Vec::with_capacity(projects.len());

        for p in projects {
            match self.calculate_diff(p.id).await {
                Ok(Some(diff)) => diffs.push(diff),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("[diff] Failed to diff project {}: {}", p.source_path, e);
                }
            }
        }

        Ok(diffs)
    }
}

/// Assemble the diff for one project from its snapshots.
pub fn build_diff(
    project_id: i64,
    source_path: &str,
    source: Option<ProjectSnapshot>,
    target: Option<ProjectSnapshot>,
    size_tolerance_percent: f64,
    calculated_at: i64,
) -> ProjectDiff {
    let (details, state) = match (&source, &target) {
        (Some(src), Some(tgt)) => {
            let details = compute_details(src, tgt);
            let state = classify(&details, size_tolerance_percent);
            (details, state)
        }
        // Target never observed: provisioning has not caught up yet
        (Some(_), None) => (DiffDetails::default(), SyncState::Pending),
        // Nothing usable on either side
        _ => (DiffDetails::default(), SyncState::Failed),
    };

    ProjectDiff {
        project_id,
        source_path: source_path.to_string(),
        source,
        target,
        details,
        state,
        calculated_at,
    }
}

/// Numeric divergence between two observations.
fn compute_details(source: &ProjectSnapshot, target: &ProjectSnapshot) -> DiffDetails {
    let size_diff_percent = if source.size_bytes == 0 {
        0.0
    } else {
        (source.size_bytes - target.size_bytes).abs() as f64 / source.size_bytes as f64 * 100.0
    };

    let sync_delay_minutes = match (source.last_activity_at, target.last_activity_at) {
        (Some(src), Some(tgt)) => (src - tgt) / 60,
        _ => 0,
    };

    DiffDetails {
        commit_sha_matches: source.head_sha == target.head_sha,
        commit_behind: source.commit_count - target.commit_count,
        branch_diff: target.branch_count - source.branch_count,
        size_diff_percent,
        sync_delay_minutes,
    }
}

/// Classification priority: structural divergence wins over staleness.
fn classify(details: &DiffDetails, size_tolerance_percent: f64) -> SyncState {
    if details.branch_diff.abs() > 0 || details.size_diff_percent > size_tolerance_percent {
        SyncState::Inconsistent
    } else if !details.commit_sha_matches {
        SyncState::Outdated
    } else {
        SyncState::Synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::project::{self, NewProject, SyncMethod};
    use crate::models::snapshot::NewSnapshot;
    use tempfile::tempdir;

    fn snap(
        project_id: i64,
        side: SnapshotSide,
        sha: &str,
        commits: i64,
        branches: i64,
        size: i64,
        activity: i64,
    ) -> ProjectSnapshot {
        ProjectSnapshot {
            id: 0,
            project_id,
            side: side.to_string(),
            head_sha: Some(sha.to_string()),
            commit_count: commits,
            branch_count: branches,
            size_bytes: size,
            last_activity_at: Some(activity),
            default_branch: Some("main".to_string()),
            captured_at: activity,
        }
    }

    #[test]
    fn test_identical_snapshots_are_synced() {
        let source = snap(1, SnapshotSide::Source, "abc", 120, 5, 1_000_000, 10_000);
        let target = snap(1, SnapshotSide::Target, "abc", 120, 5, 1_000_000, 10_000);

        let diff = build_diff(1, "group/app", Some(source), Some(target), 10.0, 20_000);
        assert_eq!(diff.state, SyncState::Synced);
        assert!(diff.details.commit_sha_matches);
        assert_eq!(diff.details.commit_behind, 0);
        assert_eq!(diff.details.branch_diff, 0);
        assert_eq!(diff.details.size_diff_percent, 0.0);
    }

    #[test]
    fn test_sha_mismatch_is_outdated() {
        let source = snap(1, SnapshotSide::Source, "abc", 120, 5, 1_000_000, 10_000);
        let target = snap(1, SnapshotSide::Target, "def", 100, 5, 1_000_000, 10_000);

        let diff = build_diff(1, "group/app", Some(source), Some(target), 10.0, 20_000);
        assert_eq!(diff.state, SyncState::Outdated);
        assert!(!diff.details.commit_sha_matches);
        assert_eq!(diff.details.commit_behind, 20);
        assert_eq!(diff.details.branch_diff, 0);
        assert_eq!(diff.details.size_diff_percent, 0.0);
    }

    #[test]
    fn test_branch_divergence_is_inconsistent() {
        let source = snap(1, SnapshotSide::Source, "abc", 120, 5, 1_000_000, 10_000);
        let target = snap(1, SnapshotSide::Target, "abc", 120, 7, 1_000_000, 10_000);

        let diff = build_diff(1, "group/app", Some(source), Some(target), 10.0, 20_000);
        assert_eq!(diff.state, SyncState::Inconsistent);
        assert_eq!(diff.details.branch_diff, 2);
    }

    #[test]
    fn test_size_divergence_beyond_tolerance_is_inconsistent() {
        let source = snap(1, SnapshotSide::Source, "abc", 120, 5, 1_000_000, 10_000);
        let target = snap(1, SnapshotSide::Target, "abc", 120, 5, 800_000, 10_000);

        let diff = build_diff(1, "group/app", Some(source.clone()), Some(target), 10.0, 20_000);
        assert_eq!(diff.state, SyncState::Inconsistent);
        assert!((diff.details.size_diff_percent - 20.0).abs() < f64::EPSILON);

        // Same shapes within tolerance stay structural-clean
        let close_target = snap(1, SnapshotSide::Target, "abc", 120, 5, 950_000, 10_000);
        let diff = build_diff(1, "group/app", Some(source), Some(close_target), 10.0, 20_000);
        assert_eq!(diff.state, SyncState::Synced);
    }

    #[test]
    fn test_inconsistent_wins_over_outdated() {
        let source = snap(1, SnapshotSide::Source, "abc", 120, 5, 1_000_000, 10_000);
        let target = snap(1, SnapshotSide::Target, "def", 100, 9, 1_000_000, 10_000);

        let diff = build_diff(1, "group/app", Some(source), Some(target), 10.0, 20_000);
        assert_eq!(diff.state, SyncState::Inconsistent);
    }

    #[test]
    fn test_missing_target_is_pending_with_default_details() {
        let source = snap(1, SnapshotSide::Source, "abc", 120, 5, 1_000_000, 10_000);

        let diff = build_diff(1, "group/app", Some(source), None, 10.0, 20_000);
        assert_eq!(diff.state, SyncState::Pending);
        assert_eq!(diff.details, DiffDetails::default());
    }

    #[test]
    fn test_missing_both_sides_is_failed() {
        let diff = build_diff(1, "group/app", None, None, 10.0, 20_000);
        assert_eq!(diff.state, SyncState::Failed);
    }

    #[test]
    fn test_zero_source_size_has_zero_size_diff() {
        let source = snap(1, SnapshotSide::Source, "abc", 10, 1, 0, 10_000);
        let target = snap(1, SnapshotSide::Target, "abc", 10, 1, 500, 10_000);

        let diff = build_diff(1, "group/app", Some(source), Some(target), 10.0, 20_000);
        assert_eq!(diff.details.size_diff_percent, 0.0);
        assert_eq!(diff.state, SyncState::Synced);
    }

    #[test]
    fn test_sync_delay_minutes() {
        let source = snap(1, SnapshotSide::Source, "abc", 10, 1, 100, 10_000);
        let target = snap(1, SnapshotSide::Target, "def", 10, 1, 100, 10_000 - 4 * 3600);

        let diff = build_diff(1, "group/app", Some(source), Some(target), 10.0, 20_000);
        assert_eq!(diff.details.sync_delay_minutes, 240);
    }

    #[test]
    fn test_negative_commit_behind_still_diverges() {
        // Target ahead of source: SHAs differ, counts inverted
        let source = snap(1, SnapshotSide::Source, "abc", 100, 5, 1_000_000, 10_000);
        let target = snap(1, SnapshotSide::Target, "def", 120, 5, 1_000_000, 10_000);

        let diff = build_diff(1, "group/app", Some(source), Some(target), 10.0, 20_000);
        assert_eq!(diff.details.commit_behind, -20);
        assert_eq!(diff.state, SyncState::Outdated);
    }

    #[tokio::test]
    async fn test_calculate_diff_from_database() {
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

        crate::models::snapshot::upsert_snapshot(
            &pool,
            &NewSnapshot {
                project_id,
                side: SnapshotSide::Source,
                head_sha: Some("abc".to_string()),
                commit_count: 120,
                branch_count: 5,
                size_bytes: 1_000_000,
                last_activity_at: Some(10_000),
                default_branch: Some("main".to_string()),
                captured_at: 10_000,
            },
        )
        .await
        .unwrap();

        let calc = DiffCalculator::new(pool.clone());

        // Target side not observed yet
        let diff = calc.calculate_diff(project_id).await.unwrap().unwrap();
        assert_eq!(diff.state, SyncState::Pending);

        // Unknown project
        assert!(calc.calculate_diff(999).await.unwrap().is_none());

        let all = calc.calculate_all().await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
