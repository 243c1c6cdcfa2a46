//! Background runtime.
//!
//! Wires the orchestration services together and runs their timer loops
//! in one background task. A loop body failing is logged and the loop
//! keeps ticking; nothing short of [`RuntimeCommand::Stop`] ends it.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::diff::ProjectDiff;
use crate::models::task::{self, TriggerSource};
use crate::remote::{MirrorProvisioner, ProjectFetcher, SyncExecutor};
use crate::services::cache::CacheStore;
use crate::services::compensation::{CompensationConfig, MirrorCompensation};
use crate::services::diff_calculator::DiffCalculator;
use crate::services::executor::ExecutorPool;
use crate::services::project_monitor::{ProjectMonitor, ScanConfig, ScanMode, ScanResult};
use crate::services::scheduler::{SchedulerConfig, SyncScheduler, TickSummary};
use crate::services::sync_monitor::SyncMonitor;
use crate::services::task_lifecycle::TaskLifecycle;
use crate::services::task_recovery::{RecoveryConfig, TaskRecovery};
use crate::services::threshold::MonitorThresholds;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time;

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Aggregate configuration for the background runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub scan: ScanConfig,
    pub recovery: RecoveryConfig,
    pub compensation: CompensationConfig,
    pub thresholds: MonitorThresholds,

    /// Hard ceiling for in-flight executions; the scheduler's time-of-day
    /// budget applies underneath it.
    pub max_parallel_executions: usize,

    /// Seconds between task lifecycle passes.
    pub lifecycle_interval_secs: u64,

    /// Seconds between alert/cache housekeeping passes.
    pub cleanup_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            scan: ScanConfig::default(),
            recovery: RecoveryConfig::default(),
            compensation: CompensationConfig::default(),
            thresholds: MonitorThresholds::default(),
            max_parallel_executions: 8,
            lifecycle_interval_secs: 600,
            cleanup_interval_secs: 6 * 3600,
        }
    }
}

/// Commands the background loop accepts.
#[derive(Debug)]
pub enum RuntimeCommand {
    /// Run a scan out of band.
    TriggerScan(ScanMode),

    /// Run a scheduling pass out of band.
    SchedulePullTasks,

    /// Stop all loops.
    Stop,
}

/// Collaborators the runtime needs from the embedding application.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ProjectFetcher>,
    pub target: Arc<dyn ProjectFetcher>,
    pub provisioner: Arc<dyn MirrorProvisioner>,
    pub executor: Arc<dyn SyncExecutor>,
}

/// Lightweight handle for talking to the running orchestration core.
///
/// Cloneable; exposes the in-process operations an HTTP layer or CLI
/// would call, plus the command channel into the background loop.
#[derive(Clone)]
pub struct RuntimeHandle {
    command_tx: mpsc::Sender<RuntimeCommand>,
    pool: DbPool,
    monitor: ProjectMonitor,
    scheduler: SyncScheduler,
    alerts: SyncMonitor,
}

impl RuntimeHandle {
    /// Run a scan now and wait for its result.
    pub async fn scan(&self, mode: ScanMode) -> ScanResult {
        self.monitor.scan(mode).await
    }

    /// Queue a scan without waiting for it.
    pub async fn trigger_scan(&self, mode: ScanMode) -> Result<(), AppError> {
        self.command_tx
            .send(RuntimeCommand::TriggerScan(mode))
            .await
            .map_err(|_| AppError::internal("Runtime is not running"))
    }

    /// Run a scheduling pass now.
    pub async fn schedule_pull_tasks(&self) -> Result<TickSummary, AppError> {
        self.scheduler.schedule_pull_tasks().await
    }

    /// Live count of in-flight sync executions.
    pub fn active_task_count(&self) -> usize {
        self.scheduler.active_task_count()
    }

    /// Resolve an alert. False when it does not exist.
    pub async fn resolve_alert(&self, id: i64) -> Result<bool, AppError> {
        self.alerts.resolve_alert(id).await
    }

    /// Mute an alert for an advisory number of minutes.
    pub async fn mute_alert(&self, id: i64, minutes: i64) -> Result<bool, AppError> {
        self.alerts.mute_alert(id, minutes).await
    }

    /// Latest diff for a project, from cache when fresh.
    pub async fn calculate_diff(&self, project_id: i64) -> Result<Option<ProjectDiff>, AppError> {
        self.monitor.get_diff(project_id).await
    }

    /// Pull a project's next sync forward to now (webhook/manual path).
    pub async fn request_sync(
        &self,
        project_id: i64,
        trigger: TriggerSource,
    ) -> Result<bool, AppError> {
        Ok(task::request_run_now(&self.pool, project_id, trigger, now()).await?)
    }

    /// Stop the background loops.
    pub async fn stop(&self) -> Result<(), AppError> {
        self.command_tx
            .send(RuntimeCommand::Stop)
            .await
            .map_err(|_| AppError::internal("Runtime is not running"))
    }
}

/// Build the service graph and start the background loops.
///
/// Every loop runs once immediately at startup (the compensation and
/// lifecycle passes in particular are expected to repair state left over
/// from a previous run), then on its interval.
pub fn start_background(
    pool: DbPool,
    collaborators: Collaborators,
    config: RuntimeConfig,
) -> RuntimeHandle {
    let cache = CacheStore::new();

    let executor_pool = ExecutorPool::new(
        pool.clone(),
        collaborators.executor.clone(),
        config.max_parallel_executions,
    );
    let scheduler = SyncScheduler::new(pool.clone(), executor_pool, config.scheduler.clone());
    let alerts = SyncMonitor::new(pool.clone(), config.thresholds.clone());
    let diff_calculator = DiffCalculator::new(pool.clone());
    let monitor = ProjectMonitor::new(
        pool.clone(),
        cache.clone(),
        collaborators.source.clone(),
        collaborators.target.clone(),
        diff_calculator,
        alerts.clone(),
        config.scan.clone(),
    );
    let recovery = TaskRecovery::new(pool.clone(), config.recovery.clone());
    let lifecycle = TaskLifecycle::new(pool.clone());
    let compensation = MirrorCompensation::new(
        pool.clone(),
        collaborators.target.clone(),
        collaborators.provisioner.clone(),
    );

    let (command_tx, mut command_rx) = mpsc::channel::<RuntimeCommand>(16);

    let handle = RuntimeHandle {
        command_tx,
        pool,
        monitor: monitor.clone(),
        scheduler: scheduler.clone(),
        alerts: alerts.clone(),
    };

    let loop_cache = cache;
    tokio::spawn(async move {
        let mut scheduler_tick =
            time::interval(Duration::from_secs(config.scheduler.tick_interval_secs));
        let mut recovery_tick =
            time::interval(Duration::from_secs(config.recovery.tick_interval_secs));
        let mut lifecycle_tick =
            time::interval(Duration::from_secs(config.lifecycle_interval_secs));
        let mut compensation_tick =
            time::interval(Duration::from_secs(config.compensation.tick_interval_secs));
        let mut incremental_tick =
            time::interval(Duration::from_secs(config.scan.incremental_interval_secs));
        let mut full_tick = time::interval(Duration::from_secs(config.scan.full_interval_secs));
        let mut cleanup_tick = time::interval(Duration::from_secs(config.cleanup_interval_secs));

        log::info!("[runtime] Background loops started");

        loop {
            tokio::select! {
                _ = scheduler_tick.tick() => {
                    if let Err(e) = scheduler.tick().await {
                        log::warn!("[runtime] Scheduler tick failed: {}", e);
                    }
                }
                _ = recovery_tick.tick() => {
                    if let Err(e) = recovery.run_pass().await {
                        log::warn!("[runtime] Recovery pass failed: {}", e);
                    }
                }
                _ = lifecycle_tick.tick() => {
                    if let Err(e) = lifecycle.run_pass().await {
                        log::warn!("[runtime] Lifecycle pass failed: {}", e);
                    }
                }
                _ = compensation_tick.tick() => {
                    if let Err(e) = compensation.run_pass().await {
                        log::warn!("[runtime] Compensation pass failed: {}", e);
                    }
                }
                _ = incremental_tick.tick() => {
                    // scan() never propagates; failed scans come back as
                    // failed results
                    monitor.scan(ScanMode::Incremental).await;
                }
                _ = full_tick.tick() => {
                    monitor.scan(ScanMode::Full).await;
                }
                _ = cleanup_tick.tick() => {
                    if let Err(e) = alerts.cleanup_resolved().await {
                        log::warn!("[runtime] Alert cleanup failed: {}", e);
                    }
                    let swept = loop_cache.sweep_expired();
                    if swept > 0 {
                        log::debug!("[runtime] Swept {} expired cache entries", swept);
                    }
                }
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        RuntimeCommand::TriggerScan(mode) => {
                            log::info!("[runtime] Manual {} scan triggered", mode);
                            monitor.scan(mode).await;
                        }
                        RuntimeCommand::SchedulePullTasks => {
                            log::info!("[runtime] Manual scheduling pass triggered");
                            if let Err(e) = scheduler.tick().await {
                                log::warn!("[runtime] Manual scheduling pass failed: {}", e);
                            }
                        }
                        RuntimeCommand::Stop => {
                            log::info!("[runtime] Stopping background loops");
                            break;
                        }
                    }
                }
            }
        }

        log::info!("[runtime] Background loops stopped");
    });

    handle
}
