//! Gateway clients for the enrollment controller's collaborators
//!
//! Every external system sits behind a trait: the BMC (Redfish), DCIM
//! (NetBox), IPAM/DHCP, the secret store (Vault), the instance-type catalog,
//! the provisioning system (Kubernetes resources) and a remote shell. The
//! reconciliation engine only sees the traits; the `test-util` feature adds
//! in-memory mocks for all of them.

pub mod bmc;
pub mod catalog;
pub mod dcim;
pub mod error;
pub mod ipam;
pub mod metal;
pub mod secrets;
pub mod shell;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use bmc::{BmcClient, BmcSession, CpuInfo, GpuInfo, HardwareType, RedfishClient};
pub use catalog::{CatalogClient, InstanceTypeSpec, RestCatalogClient};
pub use dcim::{DcimClient, NetBoxDcimClient};
pub use error::GatewayError;
pub use ipam::{
    AddressRange, DhcpProxy, DhcpReservation, IpamClient, RangeKind, RestDhcpProxy, RestIpamClient,
};
pub use metal::{HostPoolNamespace, KubeMetalClient, MetalClient};
pub use secrets::{factory_path, rotated_path, BmcCredentials, SecretStore, VaultSecretStore};
pub use shell::{RemoteShell, SshShell};
