//! Controller-specific error types.
//!
//! This module defines the errors a reconciliation pass or the operator
//! runtime can report. Which of them are retried is decided by
//! [`ControllerError::is_retryable`].

use crate::planner::ValidationError;
use kube::Error as KubeError;
use platform_client::PlatformError;
use thiserror::Error;

/// Errors that can occur in the StorageOS Cluster Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error outside a platform call (startup, watch setup)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Platform object store error, including compare-and-set conflicts
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// The cluster spec cannot be planned. Not retried until the spec changes.
    #[error("Invalid cluster spec: {0}")]
    Validation(#[from] ValidationError),

    /// Dependent objects are still being removed
    #[error("Teardown of {cluster} incomplete: {remaining} object(s) remaining")]
    TeardownIncomplete { cluster: String, remaining: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the control loop should retry the pass with backoff.
    ///
    /// Validation failures wait for a spec change instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ControllerError::Validation(_) | ControllerError::InvalidConfig(_)
        )
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "kube",
            ControllerError::Platform(PlatformError::Conflict(_)) => "conflict",
            ControllerError::Platform(_) => "platform",
            ControllerError::Validation(_) => "validation",
            ControllerError::TeardownIncomplete { .. } => "teardown_incomplete",
            ControllerError::InvalidConfig(_) => "config",
            ControllerError::Metrics(_) => "metrics",
            ControllerError::Io(_) => "io",
            ControllerError::Watch(_) => "watch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let validation = ControllerError::Validation(ValidationError::NodeCount { nodes: 0 });
        assert!(!validation.is_retryable());
        assert_eq!(validation.kind(), "validation");

        let conflict = ControllerError::Platform(PlatformError::Conflict("stale".to_string()));
        assert!(conflict.is_retryable());
        assert_eq!(conflict.kind(), "conflict");

        let forbidden = ControllerError::Platform(PlatformError::Forbidden("rbac".to_string()));
        assert!(forbidden.is_retryable());

        let teardown = ControllerError::TeardownIncomplete {
            cluster: "storageos/c".to_string(),
            remaining: 2,
        };
        assert!(teardown.is_retryable());
        assert_eq!(
            teardown.to_string(),
            "Teardown of storageos/c incomplete: 2 object(s) remaining"
        );
    }
}
