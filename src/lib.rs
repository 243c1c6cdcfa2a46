//! Mirror Sync - orchestration core for keeping projects on a target
//! GitLab instance converged with their source-side counterparts.
//!
//! The crate owns the sync brain: the task state machine and
//! priority-aware scheduler, the reconciliation scans that classify
//! divergence, the alert lifecycle, and the recovery loops that repair
//! stuck work. The HTTP surface, webhook parsing and the git transport
//! itself are the embedding application's concern; they plug in through
//! the traits in [`remote`].

pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod runtime;
pub mod services;

pub use error::AppError;
pub use runtime::{start_background, Collaborators, RuntimeConfig, RuntimeHandle};
pub use services::project_monitor::{ScanMode, ScanResult};
