//! Computed divergence between the two sides of a project.
//!
//! Diffs are ephemeral: recomputed on every scan and kept only in the TTL
//! cache, never persisted.

use crate::models::snapshot::ProjectSnapshot;
use serde::{Deserialize, Serialize};

/// Convergence classification of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Both sides agree.
    Synced,
    /// Head SHAs differ but structure matches.
    Outdated,
    /// Branch counts or sizes diverge beyond tolerance.
    Inconsistent,
    /// No target-side observation yet.
    Pending,
    /// Neither side could be observed usefully.
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Synced => "synced",
            Self::Outdated => "outdated",
            Self::Inconsistent => "inconsistent",
            Self::Pending => "pending",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Numeric divergence measures between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffDetails {
    /// Whether the head SHAs are identical.
    pub commit_sha_matches: bool,

    /// source commits minus target commits. Negative values still count
    /// as divergence.
    pub commit_behind: i64,

    /// target branches minus source branches.
    pub branch_diff: i64,

    /// |source size - target size| as a percentage of source size.
    pub size_diff_percent: f64,

    /// Minutes between the two sides' last activity.
    pub sync_delay_minutes: i64,
}

impl Default for DiffDetails {
    fn default() -> Self {
        Self {
            commit_sha_matches: false,
            commit_behind: 0,
            branch_diff: 0,
            size_diff_percent: 0.0,
            sync_delay_minutes: 0,
        }
    }
}

/// Divergence report for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDiff {
    /// Local project ID.
    pub project_id: i64,

    /// Source path, carried for display and alert messages.
    pub source_path: String,

    /// Latest source-side observation, if any.
    pub source: Option<ProjectSnapshot>,

    /// Latest target-side observation, if any.
    pub target: Option<ProjectSnapshot>,

    /// Numeric divergence measures.
    pub details: DiffDetails,

    /// Classification.
    pub state: SyncState,

    /// When the diff was computed (Unix).
    pub calculated_at: i64,
}

impl ProjectDiff {
    /// Whether the two sides agree.
    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_details_are_neutral() {
        let details = DiffDetails::default();
        assert!(!details.commit_sha_matches);
        assert_eq!(details.commit_behind, 0);
        assert_eq!(details.branch_diff, 0);
        assert_eq!(details.size_diff_percent, 0.0);
        assert_eq!(details.sync_delay_minutes, 0);
    }

    #[test]
    fn test_sync_state_serializes_snake_case() {
        let json = serde_json::to_string(&SyncState::Inconsistent).unwrap();
        assert_eq!(json, "\"inconsistent\"");
        assert_eq!(SyncState::Pending.to_string(), "pending");
    }
}
