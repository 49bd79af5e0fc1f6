//! Gateway errors

use thiserror::Error;

/// Errors that can occur when talking to a collaborator gateway.
///
/// The enrollment engine treats `Http`, `Api` and `NotFound` as transient
/// (requeue), while `NotSupported` and `AccountNotFound` carry specific
/// branch semantics in the step library.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway API returned an error
    #[error("API error: {0}")]
    Api(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication failed (invalid token, wrong BMC credentials, etc.)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The BMC has no account with the given username
    #[error("BMC account not found: {0}")]
    AccountNotFound(String),

    /// The hardware does not support the requested operation
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Kubernetes API error (provisioning-system gateway)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Remote shell command failed
    #[error("Shell error: {0}")]
    Shell(String),
}
