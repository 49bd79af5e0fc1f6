//! HostEnrollment CRD
//!
//! One HostEnrollment record per physical host being brought into (or removed
//! from) the fleet. The spec identifies the host in the racks; the status is
//! owned exclusively by the enrollment controller.

use crate::conditions::EnrollmentCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer preventing HostEnrollment deletion until disenrollment ran.
pub const DISENROLL_FINALIZER: &str = "enroll.microscaler.io/disenroll";

/// Label prefix for hardware labels stamped onto the provisioning host record.
pub const LABEL_PREFIX: &str = "enroll.microscaler.io";

/// Label namespaces must carry to be eligible as enrollment targets.
pub const HOST_POOL_LABEL: &str = "enroll.microscaler.io/host-pool";

/// Namespace annotation carrying the provisioning endpoint (Ironic) IP.
pub const IRONIC_IP_ANNOTATION: &str = "enroll.microscaler.io/ironic-ip";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "enroll.microscaler.io",
    version = "v1alpha1",
    kind = "HostEnrollment",
    status = "HostEnrollmentStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HostEnrollmentSpec {
    /// Device identifier in the DCIM inventory
    pub device: String,

    /// Rack identifier the device is installed in
    pub rack: String,

    /// Region the rack belongs to (keys the secret-store paths)
    pub region: String,

    /// Optional cluster grouping for hosts destined for a named cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    /// Optional availability zone within the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

/// Coarse progress indicator, separate from the per-step conditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum EnrollmentPhase {
    /// Record created, engine has not run yet
    #[default]
    Pending,

    /// Enrollment workflow started
    Starting,

    /// Discovering the BMC and rotating its credentials
    GetBMCInterface,

    /// Applying firmware-level BMC configuration
    UpdateBMCConfig,

    /// Registered with the provisioning system, awaiting inspection/validation
    Enrolling,

    /// Attaching hardware labels and instance-type match
    BMHLabels,

    /// Enrollment complete, host ready for workload placement
    Ready,

    /// Disenrollment in progress
    Disenrolling,

    /// Terminal failure, operator intervention required
    Failed,
}

/// Tri-state for firmware features and account rotation.
///
/// `NotSupported` is a terminal observation about the hardware, not an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum TriState {
    /// Feature applied / account rotated
    Enabled,

    /// Not applied yet (or rotation still pending)
    #[default]
    Disabled,

    /// Hardware does not support the feature
    NotSupported,
}

/// Everything the engine learned about the host's BMC.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BmcDetails {
    /// MAC address of the BMC interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    /// BMC network address in its native form (https URL or IP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// BMC address in the provisioning system's native driver format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metal_address: Option<String>,

    /// Name of the in-cluster Secret holding the active BMC credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<String>,

    /// Detected hardware type (vendor family)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_type: Option<String>,

    /// Whether a new admin account was created on the BMC
    #[serde(default)]
    pub new_admin_account: TriState,

    /// Whether the KCS management interface was enabled
    #[serde(default)]
    pub kcs: TriState,

    /// Whether the HCI management interface was enabled
    #[serde(default)]
    pub hci: TriState,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostEnrollmentStatus {
    /// Current phase
    #[serde(default)]
    pub phase: EnrollmentPhase,

    /// Per-step conditions, one per condition type
    #[serde(default)]
    pub conditions: Vec<EnrollmentCondition>,

    /// BMC discovery and configuration state
    #[serde(default)]
    pub bmc: BmcDetails,

    /// MAC address of the PXE boot NIC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mac_address: Option<String>,

    /// Data-plane IP of the host once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip_address: Option<String>,

    /// Provisioning endpoint IP serving this host's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ironic_ip_address: Option<String>,

    /// Namespace the host record was placed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    /// Durable message for terminal failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HostEnrollment {
    /// Name of the BMC credentials Secret paired with this host.
    pub fn bmc_secret_name(&self) -> String {
        format!("{}-bmc-secret", self.spec.device)
    }
}
