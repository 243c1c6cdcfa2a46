//! Data models and their persistence queries.

pub mod alert;
pub mod diff;
pub mod priority;
pub mod project;
pub mod snapshot;
pub mod task;
