//! Remote instance collaborators.
//!
//! The orchestration core talks to the two GitLab instances, and to the
//! actual VCS transport, only through the traits in this module. The REST
//! implementation lives in [`gitlab`]; the transport executor is supplied
//! by the embedding application.

pub mod gitlab;

use crate::error::AppError;
use crate::models::project::SyncProject;
use crate::models::task::SyncTask;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Authoritative detail for one project on one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProjectDetail {
    /// Project ID on that instance.
    pub remote_id: i64,

    /// Path with namespace (e.g., "group/app").
    pub path_with_namespace: String,

    /// Head commit SHA of the default branch.
    pub head_sha: Option<String>,

    /// Total commits on the default branch.
    pub commit_count: i64,

    /// Number of branches.
    pub branch_count: i64,

    /// Repository size in bytes.
    pub size_bytes: i64,

    /// Last recorded activity (Unix).
    pub last_activity_at: Option<i64>,

    /// Default branch name.
    pub default_branch: Option<String>,
}

/// Summary row from a candidate listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProjectSummary {
    pub remote_id: i64,
    pub path_with_namespace: String,
    pub default_branch: Option<String>,
    pub last_activity_at: Option<i64>,
}

/// Filter for candidate listings.
#[derive(Debug, Clone, Default)]
pub struct ProjectListQuery {
    /// Only projects active after this instant (Unix). None lists all.
    pub updated_after: Option<i64>,

    /// Page size hint; the fetcher may clamp it.
    pub per_page: Option<u32>,
}

/// Read access to one instance's project state.
#[async_trait]
pub trait ProjectFetcher: Send + Sync {
    /// Detail for a project addressed by path with namespace.
    async fn get_project_by_path(&self, path: &str) -> Result<RemoteProjectDetail, AppError>;

    /// Detail for a project addressed by its remote ID.
    async fn get_project(&self, remote_id: i64) -> Result<RemoteProjectDetail, AppError>;

    /// Candidate projects matching the filter, all pages.
    async fn list_projects(
        &self,
        query: &ProjectListQuery,
    ) -> Result<Vec<RemoteProjectSummary>, AppError>;
}

/// Establishes or repairs the mirror link for a project.
#[async_trait]
pub trait MirrorProvisioner: Send + Sync {
    /// Returns the remote mirror ID on success.
    async fn configure_mirror(&self, project: &SyncProject) -> Result<i64, AppError>;
}

/// Outcome of one sync execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Whether the synchronization succeeded.
    pub success: bool,

    /// Head SHA on the target after the run.
    pub head_sha: Option<String>,

    /// Number of refs/commits moved.
    pub changes: i64,

    /// Optional detail, e.g. the failure reason.
    pub message: Option<String>,
}

/// Performs the actual clone/fetch/push for one task.
///
/// The core only decides when to call this and what to do with the
/// outcome; the transport itself is the embedder's concern.
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    async fn execute(
        &self,
        project: &SyncProject,
        task: &SyncTask,
    ) -> Result<SyncOutcome, AppError>;
}
