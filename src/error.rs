//! Application error types.
//!
//! Every orchestration service reports failures as [`AppError`]. The
//! variants serialize to structured JSON so an embedding application can
//! forward them to its own surface unchanged.

use serde::Serialize;
use thiserror::Error;

/// Application-level errors.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {message}")]
    Database { message: String },

    /// A GitLab instance rejected or failed an API request.
    #[error("Remote API error: {message}")]
    RemoteApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Network-level failure before any API response arrived.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Invalid input or configuration.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Sync orchestration failed.
    #[error("Sync error: {message}")]
    Sync {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<i64>,
    },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a remote API error with no response context.
    pub fn remote_api(message: impl Into<String>) -> Self {
        Self::RemoteApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a remote API error carrying the status code and endpoint.
    pub fn remote_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::RemoteApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Whether the remote answered 404 for the addressed resource.
    /// Callers use this to tell "not provisioned yet" from real failures.
    pub fn is_remote_not_found(&self) -> bool {
        matches!(
            self,
            Self::RemoteApi {
                status_code: Some(404),
                ..
            }
        )
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error naming the missing ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a sync error.
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
            task_id: None,
        }
    }

    /// Create a sync error tied to a task.
    pub fn sync_with_task(message: impl Into<String>, task_id: i64) -> Self {
        Self::Sync {
            message: message.into(),
            task_id: Some(task_id),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

// Conversions from the library error types the services touch.

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts and refused connections never reached the API; only a
        // status error means the instance itself answered.
        if err.is_timeout() {
            Self::network("request timed out")
        } else if err.is_connect() {
            Self::network("could not connect to instance")
        } else if err.is_status() {
            Self::remote_api(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_serialize_tagged() {
        let json = serde_json::to_string(&AppError::database("disk I/O error")).unwrap();
        assert!(json.contains("\"type\":\"Database\""));
        assert!(json.contains("disk I/O error"));
    }

    #[test]
    fn test_remote_api_context_and_404_detection() {
        let err = AppError::remote_api_full("Resource not found", 404, "/projects/42");
        assert!(err.is_remote_not_found());

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"status_code\":404"));
        assert!(json.contains("/projects/42"));

        assert!(!AppError::remote_api_full("Access denied", 403, "/projects/42")
            .is_remote_not_found());
        assert!(!AppError::remote_api("no response context").is_remote_not_found());
    }

    #[test]
    fn test_absent_context_is_omitted_from_json() {
        let json = serde_json::to_string(&AppError::sync("hand-off failed")).unwrap();
        assert!(!json.contains("task_id"));

        let json =
            serde_json::to_string(&AppError::sync_with_task("executor pool saturated", 7)).unwrap();
        assert!(json.contains("\"task_id\":7"));
    }

    #[test]
    fn test_not_found_carries_resource_and_id() {
        let json = serde_json::to_string(&AppError::not_found_with_id("SyncTask", "123")).unwrap();
        assert!(json.contains("\"resource\":\"SyncTask\""));
        assert!(json.contains("\"id\":\"123\""));
    }

    #[test]
    fn test_display_matches_variant_prefix() {
        let err = AppError::sync_with_task("executor pool saturated", 7);
        assert_eq!(err.to_string(), "Sync error: executor pool saturated");
    }
}
