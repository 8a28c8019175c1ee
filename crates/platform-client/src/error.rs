//! Platform client errors

use thiserror::Error;

/// Errors returned by platform object store operations
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed or the object already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The API server rejected the object as invalid
    #[error("Invalid object: {0}")]
    Invalid(String),

    /// The operator is not allowed to perform the request
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Any other API or transport failure (network, rate limit, server error)
    #[error("Kubernetes API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PlatformError {
    /// Whether the error means the object was not there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }

    /// Whether the write lost a compare-and-set race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PlatformError::Conflict(_))
    }
}

impl From<kube::Error> for PlatformError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) => match response.code {
                404 => PlatformError::NotFound(err.to_string()),
                409 => PlatformError::Conflict(err.to_string()),
                422 => PlatformError::Invalid(err.to_string()),
                403 => PlatformError::Forbidden(err.to_string()),
                _ => PlatformError::Api(err.to_string()),
            },
            _ => PlatformError::Api(err.to_string()),
        }
    }
}
