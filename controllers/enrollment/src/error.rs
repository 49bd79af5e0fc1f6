//! Controller-specific error types.
//!
//! This module defines error types specific to the Enrollment Controller
//! that are not covered by upstream library errors.

use gateways::GatewayError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Enrollment Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// A collaborator gateway call failed
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required field is missing from the record
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Status update lost the optimistic-concurrency race repeatedly
    #[error("Status update conflict: {0}")]
    StatusConflict(String),

    /// A workflow step exhausted its wall-clock budget
    #[error("Step timeout: {0}")]
    StepTimeout(String),

    /// The provisioning system reported an error on the host record
    #[error("Provisioning system reported: {0}")]
    HostReported(String),

    /// No instance type in the catalog matches the host's hardware
    #[error("No matching instance type: {0}")]
    NoMatchingInstanceType(String),

    /// A storage NIC recorded in DCIM does not line up with the inspected
    /// NIC inventory
    #[error("Storage NIC mismatch: {0}")]
    StorageNicMismatch(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
