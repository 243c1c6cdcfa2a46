//! Alert threshold evaluator.
//!
//! Pure mapping from a computed diff to zero or more alert candidates.
//! Persistence and deduplication happen in the sync monitor; this module
//! only decides which conditions hold.

use crate::models::alert::{AlertSeverity, AlertType};
use crate::models::diff::ProjectDiff;
use serde::{Deserialize, Serialize};

/// Numeric thresholds the evaluator applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorThresholds {
    /// Sync delay that raises a high-severity alert, in minutes.
    pub sync_delay_warning_minutes: i64,

    /// Sync delay that escalates to critical, in hours.
    pub critical_delay_hours: i64,

    /// Commit divergence baseline; alerts fire past twice this value.
    pub commit_diff_alert: i64,

    /// Size divergence that raises a low-severity alert, in percent.
    pub size_diff_tolerance_percent: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            sync_delay_warning_minutes: 60,
            critical_delay_hours: 24,
            commit_diff_alert: 10,
            size_diff_tolerance_percent: 10.0,
        }
    }
}

/// A condition the evaluator found to hold for one project.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub project_id: i64,
    pub source_path: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
}

/// Evaluate one diff against the thresholds.
///
/// A missing target snapshot short-circuits: nothing else is worth
/// reporting for a project that is not provisioned yet.
pub fn evaluate(diff: &ProjectDiff, thresholds: &MonitorThresholds) -> Vec<AlertCandidate> {
    let mut candidates = Vec::new();

    if diff.target.is_none() {
        candidates.push(AlertCandidate {
            project_id: diff.project_id,
            source_path: diff.source_path.clone(),
            alert_type: AlertType::TargetMissing,
            severity: AlertSeverity::Critical,
            message: format!("{}: target repository is missing", diff.source_path),
        });
        return candidates;
    }

    let details = &diff.details;

    let critical_delay_minutes = thresholds.critical_delay_hours * 60;
    if details.sync_delay_minutes > critical_delay_minutes {
        candidates.push(AlertCandidate {
            project_id: diff.project_id,
            source_path: diff.source_path.clone(),
            alert_type: AlertType::SyncDelay,
            severity: AlertSeverity::Critical,
            message: format!(
                "{}: target is {} minutes behind source activity",
                diff.source_path, details.sync_delay_minutes
            ),
        });
    } else if details.sync_delay_minutes > thresholds.sync_delay_warning_minutes {
        candidates.push(AlertCandidate {
            project_id: diff.project_id,
            source_path: diff.source_path.clone(),
            alert_type: AlertType::SyncDelay,
            severity: AlertSeverity::High,
            message: format!(
                "{}: target is {} minutes behind source activity",
                diff.source_path, details.sync_delay_minutes
            ),
        });
    }

    if details.commit_behind.abs() > thresholds.commit_diff_alert * 2 {
        candidates.push(AlertCandidate {
            project_id: diff.project_id,
            source_path: diff.source_path.clone(),
            alert_type: AlertType::CommitDiff,
            severity: AlertSeverity::High,
            message: format!(
                "{}: commit counts diverge by {}",
                diff.source_path, details.commit_behind
            ),
        });
    }

    if details.branch_diff != 0 {
        candidates.push(AlertCandidate {
            project_id: diff.project_id,
            source_path: diff.source_path.clone(),
            alert_type: AlertType::BranchDiff,
            severity: AlertSeverity::Medium,
            message: format!(
                "{}: branch counts diverge by {}",
                diff.source_path, details.branch_diff
            ),
        });
    }

    if details.size_diff_percent > thresholds.size_diff_tolerance_percent {
        candidates.push(AlertCandidate {
            project_id: diff.project_id,
            source_path: diff.source_path.clone(),
            alert_type: AlertType::SizeDiff,
            severity: AlertSeverity::Low,
            message: format!(
                "{}: repository sizes diverge by {:.1}%",
                diff.source_path, details.size_diff_percent
            ),
        });
    }

    candidates
}

/// Evaluate a whole scan batch. An empty batch yields an empty result.
pub fn evaluate_batch(
    diffs: &[ProjectDiff],
    thresholds: &MonitorThresholds,
) -> Vec<AlertCandidate> {
    diffs
        .iter()
        .flat_map(|diff| evaluate(diff, thresholds))
        .collect()
}
