//! BareMetalHost boundary types
//!
//! The subset of the provisioning system's host schema (metal3.io) that the
//! enrollment controller reads and writes. Fields the controller never
//! touches are deliberately omitted.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "metal3.io",
    version = "v1alpha1",
    kind = "BareMetalHost",
    status = "BareMetalHostStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostSpec {
    /// Whether the host should be powered on
    #[serde(default)]
    pub online: bool,

    /// MAC address of the PXE boot NIC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mac_address: Option<String>,

    /// UEFI or legacy boot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mode: Option<String>,

    /// Out-of-band management endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc: Option<BmcAccess>,

    /// Image to provision onto the host, absent while inspecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<HostImage>,

    /// Hint selecting the root disk during provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device_hints: Option<RootDeviceHints>,

    /// Set once a workload consumes the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_ref: Option<ConsumerRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BmcAccess {
    /// Driver-native BMC address (e.g. "idrac-virtualmedia://10.0.0.5/...")
    pub address: String,

    /// Name of the Secret holding the BMC credentials
    pub credentials_name: String,

    /// Skip TLS verification when talking to the BMC
    #[serde(default)]
    pub disable_certificate_verification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostImage {
    /// Image URL
    pub url: String,

    /// Image checksum URL or value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RootDeviceHints {
    /// Linux device name, e.g. "/dev/sda"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// Reference to the workload object consuming a host.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRef {
    /// Kind of the consuming object
    pub kind: String,

    /// Name of the consuming object
    pub name: String,

    /// Namespace of the consuming object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// The provisioning system's lifecycle state for a host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningState {
    /// Host record created, nothing happened yet
    #[default]
    None,
    /// Provisioning system is registering the BMC
    Registering,
    /// Hardware inspection in progress
    Inspecting,
    /// Inspected and ready for an image
    Available,
    /// Cleaning up before becoming available
    Preparing,
    /// Image write in progress
    Provisioning,
    /// Image written and host booted into it
    Provisioned,
    /// Image removal in progress
    Deprovisioning,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostStatus {
    /// Provisioning lifecycle state
    #[serde(default)]
    pub provisioning: ProvisioningStatus,

    /// Error reported by the provisioning system, empty when healthy
    #[serde(default)]
    pub error_message: String,

    /// Consecutive error count reported by the provisioning system
    #[serde(default)]
    pub error_count: i64,

    /// Inspected hardware inventory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<HardwareDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningStatus {
    /// Current state
    #[serde(default)]
    pub state: ProvisioningState,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HardwareDetails {
    /// Inspected NICs
    #[serde(default)]
    pub nics: Vec<NicDetails>,

    /// Physical memory in MiB
    #[serde(default)]
    pub ram_mebibytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NicDetails {
    /// Interface name as seen by the inspection ramdisk
    #[serde(default)]
    pub name: String,

    /// Interface MAC address
    #[serde(default)]
    pub mac: String,

    /// IP observed during inspection, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl BareMetalHost {
    /// Current provisioning state, `None` when status is absent.
    pub fn provisioning_state(&self) -> ProvisioningState {
        self.status
            .as_ref()
            .map(|s| s.provisioning.state)
            .unwrap_or_default()
    }

    /// Error message reported by the provisioning system, if any.
    pub fn reported_error(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.error_message.as_str())
            .filter(|m| !m.is_empty())
    }

    /// Whether a workload currently consumes this host.
    pub fn is_consumed(&self) -> bool {
        self.spec.consumer_ref.is_some()
    }
}
