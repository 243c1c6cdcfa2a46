//! Reconciliation scans.
//!
//! A scan refreshes both sides' snapshots, recomputes diffs for every
//! known project, discovers and retires projects (full scans only), feeds
//! the alert pipeline and publishes results to the TTL cache. Scans are
//! idempotent; re-running one is always safe.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::diff::{ProjectDiff, SyncState};
use crate::models::project::{self, NewProject, SyncMethod, SyncProject};
use crate::models::snapshot::{self, NewSnapshot, SnapshotSide};
use crate::remote::{ProjectFetcher, ProjectListQuery, RemoteProjectDetail};
use crate::services::cache::CacheStore;
use crate::services::diff_calculator::DiffCalculator;
use crate::services::sync_monitor::SyncMonitor;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Cache key prefix for per-project diffs.
pub const DIFF_CACHE_PREFIX: &str = "diff:";

/// Cache key for the latest scan result.
pub const SCAN_STATS_CACHE_KEY: &str = "scan:last_result";

/// Advisory lock key guarding the scan job.
const SCAN_LOCK_KEY: &str = "lock:scan";

/// Maximum number of scan log rows to keep.
const MAX_SCAN_LOG_ENTRIES: i64 = 50;

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Seconds between incremental scans.
    pub incremental_interval_secs: u64,

    /// Seconds between full scans.
    pub full_interval_secs: u64,

    /// TTL for cached per-project diffs, in minutes.
    pub diff_cache_ttl_minutes: u64,

    /// TTL for the cached scan result, in minutes.
    pub stats_cache_ttl_minutes: u64,

    /// TTL bounding a leaked scan lock, in minutes.
    pub lock_ttl_minutes: u64,

    /// Sync method newly discovered projects start with.
    pub default_sync_method: SyncMethod,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            incremental_interval_secs: 900,
            full_interval_secs: 86400,
            diff_cache_ttl_minutes: 15,
            stats_cache_ttl_minutes: 60,
            lock_ttl_minutes: 30,
            default_sync_method: SyncMethod::Pull,
        }
    }
}

/// Scan scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Only source projects active since the last scan cursor.
    Incremental,
    /// Everything, plus discovery of new and absent projects.
    Full,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Outcome of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// `incremental` or `full`.
    pub scan_type: String,

    /// `success` or `failed`.
    pub status: String,

    /// Candidate projects returned by the source listing.
    pub projects_scanned: usize,

    /// Snapshots written (both sides).
    pub snapshots_updated: usize,

    /// Projects discovered and registered this scan.
    pub new_projects: usize,

    /// Diffs that are not `synced`.
    pub changes_detected: usize,

    /// Scan start (Unix).
    pub started_at: i64,

    /// Scan end (Unix).
    pub finished_at: i64,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,

    /// Whole-scan failure message, if any.
    pub error: Option<String>,

    /// Per-item failures that were skipped over.
    pub errors: Vec<String>,
}

impl ScanResult {
    fn new(mode: ScanMode, started_at: i64) -> Self {
        Self {
            scan_type: mode.to_string(),
            status: "failed".to_string(),
            projects_scanned: 0,
            snapshots_updated: 0,
            new_projects: 0,
            changes_detected: 0,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            error: None,
            errors: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Scan log row for status display.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScanLogEntry {
    pub id: i64,
    pub scan_type: String,
    pub status: String,
    pub message: Option<String>,
    pub projects_scanned: i64,
    pub new_projects: i64,
    pub changes_detected: i64,
    pub duration_ms: Option<i64>,
    pub timestamp: i64,
}

/// Orchestrates reconciliation scans.
#[derive(Clone)]
pub struct ProjectMonitor {
    pool: DbPool,
    cache: CacheStore,
    source: Arc<dyn ProjectFetcher>,
    target: Arc<dyn ProjectFetcher>,
    diff_calculator: DiffCalculator,
    monitor: SyncMonitor,
    config: ScanConfig,

    /// Activity cursor for incremental scans. In-memory by design: after
    /// a restart the first incremental scan lists everything, which is
    /// idempotent.
    cursor: Arc<Mutex<Option<i64>>>,
}

impl ProjectMonitor {
    pub fn new(
        pool: DbPool,
        cache: CacheStore,
        source: Arc<dyn ProjectFetcher>,
        target: Arc<dyn ProjectFetcher>,
        diff_calculator: DiffCalculator,
        monitor: SyncMonitor,
        config: ScanConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            source,
            target,
            diff_calculator,
            monitor,
            config,
            cursor: Arc::new(Mutex::new(None)),
        }
    }

    /// Run one scan. Never propagates: any failure is folded into a
    /// `failed` result so the calling timer survives.
    pub async fn scan(&self, mode: ScanMode) -> ScanResult {
        let started_at = now();
        let clock = Instant::now();
        let mut result = ScanResult::new(mode, started_at);

        let Some(_lock) = self
            .cache
            .acquire_lock(SCAN_LOCK_KEY, self.config.lock_ttl_minutes)
        else {
            log::warn!("[scan] A scan is already running, skipping this {} scan", mode);
            result.error = Some("scan already in progress".to_string());
            return result;
        };

        log::info!("[scan] Starting {} scan", mode);

        match self.run_scan(mode, started_at, &mut result).await {
            Ok(()) => {
                result.status = "success".to_string();
                *self.cursor.lock().expect("cursor mutex poisoned") = Some(started_at);
            }
            Err(e) => {
                log::warn!("[scan] {} scan failed: {}", mode, e);
                result.error = Some(e.to_string());
            }
        }

        result.finished_at = now();
        result.duration_ms = clock.elapsed().as_millis() as i64;

        if let Ok(value) = serde_json::to_value(&result) {
            self.cache
                .set(SCAN_STATS_CACHE_KEY, value, self.config.stats_cache_ttl_minutes);
        }

        if let Err(e) = self.log_scan(&result).await {
            log::warn!("[scan] Failed to record scan log entry: {}", e);
        }

        log::info!(
            "[scan] {} scan {}: {} scanned, {} snapshots, {} new, {} changed in {}ms",
            mode,
            result.status,
            result.projects_scanned,
            result.snapshots_updated,
            result.new_projects,
            result.changes_detected,
            result.duration_ms
        );

        result
    }

    /// The fallible scan body. Per-item failures land in `result.errors`;
    /// only listing/batch failures abort.
    async fn run_scan(
        &self,
        mode: ScanMode,
        started_at: i64,
        result: &mut ScanResult,
    ) -> Result<(), AppError> {
        let cursor = *self.cursor.lock().expect("cursor mutex poisoned");

        let query = ProjectListQuery {
            updated_after: match mode {
                ScanMode::Incremental => cursor,
                ScanMode::Full => None,
            },
            per_page: Some(100),
        };

        let listed = self.source.list_projects(&query).await?;
        result.projects_scanned = listed.len();

        // Refresh source snapshots, registering unknown projects on full
        // scans
        let mut refreshed: Vec<SyncProject> = Vec::new();
        for summary in &listed {
            let known = project::get_by_source_path(&self.pool, &summary.path_with_namespace)
                .await?;

            let p = match known {
                Some(p) => p,
                None => {
                    if mode != ScanMode::Full {
                        continue;
                    }
                    let id = project::create_project(
                        &self.pool,
                        &NewProject {
                            source_path: summary.path_with_namespace.clone(),
                            source_project_id: Some(summary.remote_id),
                            sync_method: self.config.default_sync_method,
                            default_branch: summary.default_branch.clone(),
                        },
                        started_at,
                    )
                    .await?;
                    result.new_projects += 1;
                    log::info!("[scan] Discovered new project {}", summary.path_with_namespace);

                    match project::get_project(&self.pool, id).await? {
                        Some(p) => p,
                        None => continue,
                    }
                }
            };

            match self.refresh_source_snapshot(&p, started_at).await {
                Ok(()) => result.snapshots_updated += 1,
                Err(e) => {
                    result
                        .errors
                        .push(format!("source snapshot {}: {}", p.source_path, e));
                }
            }
            refreshed.push(p);
        }

        // Refresh target snapshots for provisioned projects. Full scans
        // cover everything known; incremental ones stay with the subset
        // the listing touched.
        let target_candidates = match mode {
            ScanMode::Full => project::list_known(&self.pool).await?,
            ScanMode::Incremental => refreshed,
        };

        for p in &target_candidates {
            let Some(target_id) = p.target_project_id else {
                continue;
            };
            match self.refresh_target_snapshot(p, target_id, started_at).await {
                Ok(()) => result.snapshots_updated += 1,
                Err(e) => {
                    result
                        .errors
                        .push(format!("target snapshot {}: {}", p.source_path, e));
                }
            }
        }

        // Full scans retire projects the source no longer lists
        if mode == ScanMode::Full {
            let listed_paths: HashSet<&str> = listed
                .iter()
                .map(|s| s.path_with_namespace.as_str())
                .collect();

            for p in project::list_known(&self.pool).await? {
                if listed_paths.contains(p.source_path.as_str()) {
                    continue;
                }
                match project::mark_absent(&self.pool, p.id, started_at).await {
                    Ok(status) => {
                        log::warn!("[scan] Project {} is absent from source, now {}", p.source_path, status);
                    }
                    Err(e) => {
                        result
                            .errors
                            .push(format!("retire {}: {}", p.source_path, e));
                    }
                }
            }
        }

        // Batch diff over the union of known projects
        let diffs = self.diff_calculator.calculate_all().await?;
        result.changes_detected = diffs.iter().filter(|d| d.state != SyncState::Synced).count();

        for diff in &diffs {
            if let Ok(value) = serde_json::to_value(diff) {
                self.cache.set(
                    &format!("{}{}", DIFF_CACHE_PREFIX, diff.project_id),
                    value,
                    self.config.diff_cache_ttl_minutes,
                );
            }
        }

        // Alert pipeline: raise what fires, auto-resolve what cleared
        let (created, resolved) = self.monitor.process_scan_diffs(&diffs).await?;
        if created > 0 || resolved > 0 {
            log::info!("[scan] Alerts: {} raised, {} auto-resolved", created, resolved);
        }

        Ok(())
    }

    /// Latest diff for a project, from cache when fresh.
    pub async fn get_diff(&self, project_id: i64) -> Result<Option<ProjectDiff>, AppError> {
        let key = format!("{}{}", DIFF_CACHE_PREFIX, project_id);
        if let Some(value) = self.cache.get(&key) {
            if let Ok(diff) = serde_json::from_value::<ProjectDiff>(value) {
                return Ok(Some(diff));
            }
        }

        let diff = self.diff_calculator.calculate_diff(project_id).await?;
        if let Some(diff) = &diff {
            if let Ok(value) = serde_json::to_value(diff) {
                self.cache
                    .set(&key, value, self.config.diff_cache_ttl_minutes);
            }
        }

        Ok(diff)
    }

    async fn refresh_source_snapshot(
        &self,
        p: &SyncProject,
        captured_at: i64,
    ) -> Result<(), AppError> {
        let detail = self.source.get_project_by_path(&p.source_path).await?;
        self.store_snapshot(p.id, SnapshotSide::Source, &detail, captured_at)
            .await
    }

    async fn refresh_target_snapshot(
        &self,
        p: &SyncProject,
        target_id: i64,
        captured_at: i64,
    ) -> Result<(), AppError> {
        let detail = self.target.get_project(target_id).await?;
        self.store_snapshot(p.id, SnapshotSide::Target, &detail, captured_at)
            .await
    }

    async fn store_snapshot(
        &self,
        project_id: i64,
        side: SnapshotSide,
        detail: &RemoteProjectDetail,
        captured_at: i64,
    ) -> Result<(), AppError> {
        snapshot::upsert_snapshot(
            &self.pool,
            &NewSnapshot {
                project_id,
                side,
                head_sha: detail.head_sha.clone(),
                commit_count: detail.commit_count,
                branch_count: detail.branch_count,
                size_bytes: detail.size_bytes,
                last_activity_at: detail.last_activity_at,
                default_branch: detail.default_branch.clone(),
                captured_at,
            },
        )
        .await?;

        Ok(())
    }

    /// Append a scan log row and prune old ones.
    async fn log_scan(&self, result: &ScanResult) -> Result<(), AppError> {
        let message = result
            .error
            .clone()
            .or_else(|| (!result.errors.is_empty()).then(|| result.errors.join("; ")));

        sqlx::query(
            r#"
            INSERT INTO scan_log (scan_type, status, message, projects_scanned, new_projects, changes_detected, duration_ms, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.scan_type)
        .bind(&result.status)
        .bind(&message)
        .bind(result.projects_scanned as i64)
        .bind(result.new_projects as i64)
        .bind(result.changes_detected as i64)
        .bind(result.duration_ms)
        .bind(result.finished_at)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM scan_log WHERE id NOT IN (
                SELECT id FROM scan_log ORDER BY timestamp DESC LIMIT ?
            )
            "#,
        )
        .bind(MAX_SCAN_LOG_ENTRIES)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Recent scan log entries, newest first.
    pub async fn recent_scans(&self, limit: i64) -> Result<Vec<ScanLogEntry>, AppError> {
        let entries = sqlx::query_as::<_, ScanLogEntry>(
            "SELECT * FROM scan_log ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
