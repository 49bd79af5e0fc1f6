//! Enrollment CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the host enrollment controller:
//! - HostEnrollment: one record per physical host being enrolled into the fleet
//! - BareMetalHost: the subset of the provisioning system's host schema the
//!   controller reads and writes at its boundary
//!
//! The `conditions` module holds the pure condition-store accessors used by
//! the reconciliation engine.

pub mod bare_metal_host;
pub mod conditions;
pub mod host_enrollment;

pub use bare_metal_host::*;
pub use conditions::*;
pub use host_enrollment::*;
