//! Mock gateways for unit testing
//!
//! In-memory implementations of every gateway trait so the reconciliation
//! engine can be driven end to end without a cluster, a BMC or any REST
//! collaborator. Each mock records the calls it receives; tests assert on
//! those logs to prove a path touched (or did not touch) a collaborator.

use crate::bmc::{BmcClient, BmcSession, CpuInfo, GpuInfo, HardwareType};
use crate::catalog::{CatalogClient, InstanceTypeSpec};
use crate::dcim::DcimClient;
use crate::error::GatewayError;
use crate::ipam::{AddressRange, DhcpProxy, DhcpReservation, IpamClient, RangeKind};
use crate::metal::{HostPoolNamespace, MetalClient};
use crate::secrets::{BmcCredentials, SecretStore};
use crate::shell::RemoteShell;
use crds::{
    BareMetalHost, BareMetalHostStatus, HardwareDetails, HostImage, ProvisioningState,
    ProvisioningStatus,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Mock BMC driver.
///
/// Accounts live in a shared map keyed by username so rotation flows can be
/// asserted: `update_account` only succeeds for usernames already present,
/// mirroring real Redfish behavior.
#[derive(Clone)]
pub struct MockBmc {
    hardware_type: Arc<Mutex<HardwareType>>,
    accounts: Arc<Mutex<HashMap<String, String>>>,
    fail_account_apply: Arc<Mutex<bool>>,
    kcs_supported: Arc<Mutex<bool>>,
    hci_supported: Arc<Mutex<bool>>,
    host_mac: Arc<Mutex<Option<String>>>,
    cpu: Arc<Mutex<CpuInfo>>,
    gpu: Arc<Mutex<GpuInfo>>,
    hbm_mode: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockBmc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBmc {
    /// Create a mock Dell PowerEdge BMC with a factory root account.
    pub fn new() -> Self {
        let mut accounts = HashMap::new();
        accounts.insert("root".to_string(), "calvin".to_string());
        Self {
            hardware_type: Arc::new(Mutex::new(HardwareType::DellPowerEdge)),
            accounts: Arc::new(Mutex::new(accounts)),
            fail_account_apply: Arc::new(Mutex::new(false)),
            kcs_supported: Arc::new(Mutex::new(true)),
            hci_supported: Arc::new(Mutex::new(true)),
            host_mac: Arc::new(Mutex::new(Some("aa:bb:cc:dd:ee:01".to_string()))),
            cpu: Arc::new(Mutex::new(CpuInfo {
                id: "8480+".to_string(),
                vendor: "Intel".to_string(),
                sockets: 2,
                cores: 56,
                threads: 2,
            })),
            gpu: Arc::new(Mutex::new(GpuInfo::default())),
            hbm_mode: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Change the detected hardware family.
    pub fn set_hardware_type(&self, hardware_type: HardwareType) {
        *self.hardware_type.lock().unwrap() = hardware_type;
    }

    /// Make the next account create/update fail.
    pub fn fail_account_apply(&self, fail: bool) {
        *self.fail_account_apply.lock().unwrap() = fail;
    }

    /// Mark the KCS interface as unsupported.
    pub fn set_kcs_supported(&self, supported: bool) {
        *self.kcs_supported.lock().unwrap() = supported;
    }

    /// Mark the HCI interface as unsupported.
    pub fn set_hci_supported(&self, supported: bool) {
        *self.hci_supported.lock().unwrap() = supported;
    }

    /// Set the host MAC the BMC reports, `None` to hide it.
    pub fn set_host_mac(&self, mac: Option<String>) {
        *self.host_mac.lock().unwrap() = mac;
    }

    /// Set the CPU inventory.
    pub fn set_cpu(&self, cpu: CpuInfo) {
        *self.cpu.lock().unwrap() = cpu;
    }

    /// Set the GPU inventory.
    pub fn set_gpu(&self, gpu: GpuInfo) {
        *self.gpu.lock().unwrap() = gpu;
    }

    /// Set the HBM mode reported by the BIOS.
    pub fn set_hbm_mode(&self, mode: Option<String>) {
        *self.hbm_mode.lock().unwrap() = mode;
    }

    /// Password currently stored for a username, if the account exists.
    pub fn password_of(&self, username: &str) -> Option<String> {
        self.accounts.lock().unwrap().get(username).cloned()
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait::async_trait]
impl BmcClient for MockBmc {
    async fn open_session(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn BmcSession>, GatewayError> {
        self.record(format!("open_session({}, {})", address, username));
        let accounts = self.accounts.lock().unwrap();
        match accounts.get(username) {
            Some(stored) if stored == password => {}
            _ => {
                return Err(GatewayError::Authentication(format!(
                    "mock BMC rejected {}",
                    username
                )));
            }
        }
        drop(accounts);
        Ok(Box::new(MockBmcSession { bmc: self.clone() }))
    }
}

/// Session handed out by [`MockBmc`]. All state lives on the parent mock.
pub struct MockBmcSession {
    bmc: MockBmc,
}

#[async_trait::async_trait]
impl BmcSession for MockBmcSession {
    fn hardware_type(&self) -> HardwareType {
        *self.bmc.hardware_type.lock().unwrap()
    }

    async fn update_account(&self, username: &str, password: &str) -> Result<(), GatewayError> {
        self.bmc.record(format!("update_account({})", username));
        if *self.bmc.fail_account_apply.lock().unwrap() {
            return Err(GatewayError::Api("account update failed".to_string()));
        }
        let mut accounts = self.bmc.accounts.lock().unwrap();
        match accounts.get_mut(username) {
            Some(stored) => {
                *stored = password.to_string();
                Ok(())
            }
            None => Err(GatewayError::AccountNotFound(username.to_string())),
        }
    }

    async fn create_account(&self, username: &str, password: &str) -> Result<(), GatewayError> {
        self.bmc.record(format!("create_account({})", username));
        if *self.bmc.fail_account_apply.lock().unwrap() {
            return Err(GatewayError::Api("account create failed".to_string()));
        }
        self.bmc
            .accounts
            .lock()
            .unwrap()
            .insert(username.to_string(), password.to_string());
        Ok(())
    }

    async fn sanitize_boot_order(&self) -> Result<(), GatewayError> {
        self.bmc.record("sanitize_boot_order");
        Ok(())
    }

    async fn configure_ntp(&self) -> Result<(), GatewayError> {
        self.bmc.record("configure_ntp");
        Ok(())
    }

    async fn verify_firmware_resilience(&self) -> Result<(), GatewayError> {
        self.bmc.record("verify_firmware_resilience");
        Ok(())
    }

    async fn enable_kcs(&self) -> Result<(), GatewayError> {
        self.bmc.record("enable_kcs");
        if *self.bmc.kcs_supported.lock().unwrap() {
            Ok(())
        } else {
            Err(GatewayError::NotSupported("kcs".to_string()))
        }
    }

    async fn enable_hci(&self) -> Result<(), GatewayError> {
        self.bmc.record("enable_hci");
        if *self.bmc.hci_supported.lock().unwrap() {
            Ok(())
        } else {
            Err(GatewayError::NotSupported("hci".to_string()))
        }
    }

    async fn host_mac(&self) -> Result<Option<String>, GatewayError> {
        self.bmc.record("host_mac");
        Ok(self.bmc.host_mac.lock().unwrap().clone())
    }

    async fn provisioning_address(&self) -> Result<String, GatewayError> {
        self.bmc.record("provisioning_address");
        Ok("idrac-virtualmedia://10.0.0.5/redfish/v1/Systems/System.Embedded.1".to_string())
    }

    async fn cpu_info(&self) -> Result<CpuInfo, GatewayError> {
        self.bmc.record("cpu_info");
        Ok(self.bmc.cpu.lock().unwrap().clone())
    }

    async fn gpu_info(&self) -> Result<GpuInfo, GatewayError> {
        self.bmc.record("gpu_info");
        Ok(self.bmc.gpu.lock().unwrap().clone())
    }

    async fn hbm_mode(&self) -> Result<Option<String>, GatewayError> {
        self.bmc.record("hbm_mode");
        Ok(self.bmc.hbm_mode.lock().unwrap().clone())
    }
}

/// Mock DCIM client with canned topology answers.
#[derive(Clone)]
pub struct MockDcim {
    interface_macs: Arc<Mutex<HashMap<(String, String), String>>>,
    bmc_urls: Arc<Mutex<HashMap<String, String>>>,
    storage_macs: Arc<Mutex<HashMap<String, Vec<String>>>>,
    cluster_sizes: Arc<Mutex<HashMap<String, u32>>>,
    network_modes: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockDcim {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDcim {
    /// Create an empty mock DCIM.
    pub fn new() -> Self {
        Self {
            interface_macs: Arc::new(Mutex::new(HashMap::new())),
            bmc_urls: Arc::new(Mutex::new(HashMap::new())),
            storage_macs: Arc::new(Mutex::new(HashMap::new())),
            cluster_sizes: Arc::new(Mutex::new(HashMap::new())),
            network_modes: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register an interface MAC (for test setup).
    pub fn add_interface_mac(&self, device: &str, interface: &str, mac: &str) {
        self.interface_macs
            .lock()
            .unwrap()
            .insert((device.to_string(), interface.to_string()), mac.to_string());
    }

    /// Register a BMC URL (for test setup).
    pub fn add_bmc_url(&self, device: &str, url: &str) {
        self.bmc_urls
            .lock()
            .unwrap()
            .insert(device.to_string(), url.to_string());
    }

    /// Register storage NIC MACs (for test setup).
    pub fn add_storage_macs(&self, device: &str, macs: Vec<String>) {
        self.storage_macs
            .lock()
            .unwrap()
            .insert(device.to_string(), macs);
    }

    /// Register a cluster size (for test setup).
    pub fn add_cluster(&self, cluster: &str, size: u32, network_mode: &str) {
        self.cluster_sizes
            .lock()
            .unwrap()
            .insert(cluster.to_string(), size);
        self.network_modes
            .lock()
            .unwrap()
            .insert(cluster.to_string(), network_mode.to_string());
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DcimClient for MockDcim {
    async fn interface_mac(&self, device: &str, interface: &str) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("interface_mac({}, {})", device, interface));
        self.interface_macs
            .lock()
            .unwrap()
            .get(&(device.to_string(), interface.to_string()))
            .cloned()
            .ok_or_else(|| {
                GatewayError::NotFound(format!("interface {} on device {}", interface, device))
            })
    }

    async fn bmc_url(&self, device: &str) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("bmc_url({})", device));
        self.bmc_urls
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("device {}", device)))
    }

    async fn storage_interface_macs(&self, device: &str) -> Result<Vec<String>, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("storage_interface_macs({})", device));
        Ok(self
            .storage_macs
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .unwrap_or_default())
    }

    async fn cluster_size(&self, cluster: &str, _zone: Option<&str>) -> Result<u32, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("cluster_size({})", cluster));
        self.cluster_sizes
            .lock()
            .unwrap()
            .get(cluster)
            .copied()
            .ok_or_else(|| GatewayError::NotFound(format!("cluster group {}", cluster)))
    }

    async fn cluster_network_mode(
        &self,
        cluster: &str,
        _zone: Option<&str>,
    ) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("cluster_network_mode({})", cluster));
        self.network_modes
            .lock()
            .unwrap()
            .get(cluster)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("cluster group {}", cluster)))
    }
}

/// Mock IPAM with one range per (rack, kind) and simple sequential allocation.
#[derive(Clone)]
pub struct MockIpam {
    ranges: Arc<Mutex<HashMap<(String, RangeKind), AddressRange>>>,
    reservations: Arc<Mutex<HashMap<(String, String), DhcpReservation>>>,
    next_octet: Arc<Mutex<u8>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockIpam {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIpam {
    /// Create an empty mock IPAM.
    pub fn new() -> Self {
        Self {
            ranges: Arc::new(Mutex::new(HashMap::new())),
            reservations: Arc::new(Mutex::new(HashMap::new())),
            next_octet: Arc::new(Mutex::new(10)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register an address range (for test setup).
    pub fn add_range(&self, rack: &str, kind: RangeKind, range: AddressRange) {
        self.ranges
            .lock()
            .unwrap()
            .insert((rack.to_string(), kind), range);
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IpamClient for MockIpam {
    async fn find_range(&self, rack: &str, kind: RangeKind) -> Result<AddressRange, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("find_range({}, {})", rack, kind.as_str()));
        self.ranges
            .lock()
            .unwrap()
            .get(&(rack.to_string(), kind))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("{} range of rack {}", kind.as_str(), rack)))
    }

    async fn find_reservation(
        &self,
        scope: &str,
        mac: &str,
    ) -> Result<Option<DhcpReservation>, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("find_reservation({}, {})", scope, mac));
        Ok(self
            .reservations
            .lock()
            .unwrap()
            .get(&(scope.to_string(), mac.to_string()))
            .cloned())
    }

    async fn next_free_address(&self, range: &AddressRange) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("next_free_address({})", range.ref_id));
        let mut octet = self.next_octet.lock().unwrap();
        *octet += 1;
        Ok(format!("10.20.0.{}", *octet))
    }

    async fn create_reservation(
        &self,
        scope: &str,
        mac: &str,
        address: &str,
        _name: &str,
    ) -> Result<DhcpReservation, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create_reservation({}, {}, {})", scope, mac, address));
        let reservation = DhcpReservation {
            ref_id: format!("res-{}-{}", scope, mac),
            mac: mac.to_string(),
            address: address.to_string(),
        };
        self.reservations
            .lock()
            .unwrap()
            .insert((scope.to_string(), mac.to_string()), reservation.clone());
        Ok(reservation)
    }

    async fn set_reservation_options(
        &self,
        reservation: &DhcpReservation,
        boot_filename: &str,
        next_server: &str,
    ) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(format!(
            "set_reservation_options({}, {}, {})",
            reservation.ref_id, boot_filename, next_server
        ));
        Ok(())
    }

    async fn delete_reservation(&self, reservation: &DhcpReservation) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete_reservation({})", reservation.ref_id));
        self.reservations
            .lock()
            .unwrap()
            .retain(|_, r| r.ref_id != reservation.ref_id);
        Ok(())
    }
}

/// Mock DHCP proxy recording boot mappings.
#[derive(Clone, Default)]
pub struct MockDhcpProxy {
    mappings: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockDhcpProxy {
    /// Create an empty mock proxy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered boot mappings, mac to next-server.
    pub fn mappings(&self) -> HashMap<String, String> {
        self.mappings.lock().unwrap().clone()
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DhcpProxy for MockDhcpProxy {
    async fn register_boot_mapping(
        &self,
        mac: &str,
        next_server: &str,
    ) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("register_boot_mapping({}, {})", mac, next_server));
        self.mappings
            .lock()
            .unwrap()
            .insert(mac.to_string(), next_server.to_string());
        Ok(())
    }
}

/// Mock secret store keyed by path.
#[derive(Clone)]
pub struct MockSecretStore {
    secrets: Arc<Mutex<HashMap<String, BmcCredentials>>>,
    ssh_key: Arc<Mutex<String>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSecretStore {
    /// Create an empty mock store with a placeholder SSH key.
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(Mutex::new(HashMap::new())),
            ssh_key: Arc::new(Mutex::new("-----BEGIN TEST KEY-----".to_string())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Seed credentials at a path (for test setup).
    pub fn add_credentials(&self, path: &str, credentials: BmcCredentials) {
        self.secrets
            .lock()
            .unwrap()
            .insert(path.to_string(), credentials);
    }

    /// Read credentials without going through the trait (for assertions).
    pub fn stored(&self, path: &str) -> Option<BmcCredentials> {
        self.secrets.lock().unwrap().get(path).cloned()
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SecretStore for MockSecretStore {
    async fn get_credentials(&self, path: &str) -> Result<Option<BmcCredentials>, GatewayError> {
        self.calls.lock().unwrap().push(format!("get({})", path));
        Ok(self.secrets.lock().unwrap().get(path).cloned())
    }

    async fn put_credentials(
        &self,
        path: &str,
        credentials: &BmcCredentials,
    ) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(format!("put({})", path));
        self.secrets
            .lock()
            .unwrap()
            .insert(path.to_string(), credentials.clone());
        Ok(())
    }

    async fn delete_credentials(&self, path: &str) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(format!("delete({})", path));
        self.secrets.lock().unwrap().remove(path);
        Ok(())
    }

    async fn ssh_private_key(&self) -> Result<String, GatewayError> {
        self.calls.lock().unwrap().push("ssh_private_key".to_string());
        Ok(self.ssh_key.lock().unwrap().clone())
    }
}

/// Mock instance-type catalog returning a fixed list.
#[derive(Clone, Default)]
pub struct MockCatalog {
    types: Arc<Mutex<Vec<InstanceTypeSpec>>>,
}

impl MockCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance type (for test setup).
    pub fn add_instance_type(&self, spec: InstanceTypeSpec) {
        self.types.lock().unwrap().push(spec);
    }
}

#[async_trait::async_trait]
impl CatalogClient for MockCatalog {
    async fn bare_metal_instance_types(&self) -> Result<Vec<InstanceTypeSpec>, GatewayError> {
        Ok(self.types.lock().unwrap().clone())
    }
}

/// Mock provisioning system.
///
/// With `auto_ready` enabled the mock advances host records the way the real
/// system would, so a test can drive the whole enrollment loop: a created
/// host becomes `available` with the template hardware inventory, attaching
/// an image moves it to `provisioned`, detaching moves it back to
/// `available`.
#[derive(Clone)]
pub struct MockMetal {
    hosts: Arc<Mutex<HashMap<(String, String), BareMetalHost>>>,
    namespaces: Arc<Mutex<Vec<HostPoolNamespace>>>,
    secrets: Arc<Mutex<HashMap<(String, String), (String, String)>>>,
    secret_owners: Arc<Mutex<HashMap<(String, String), String>>>,
    auto_ready: Arc<Mutex<bool>>,
    inspected_hardware: Arc<Mutex<HardwareDetails>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockMetal {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMetal {
    /// Create an empty mock provisioning system.
    pub fn new() -> Self {
        Self {
            hosts: Arc::new(Mutex::new(HashMap::new())),
            namespaces: Arc::new(Mutex::new(Vec::new())),
            secrets: Arc::new(Mutex::new(HashMap::new())),
            secret_owners: Arc::new(Mutex::new(HashMap::new())),
            auto_ready: Arc::new(Mutex::new(false)),
            inspected_hardware: Arc::new(Mutex::new(HardwareDetails {
                nics: vec![crds::NicDetails {
                    name: "eno1".to_string(),
                    mac: "aa:bb:cc:dd:ee:01".to_string(),
                    ip: Some("10.30.0.7".to_string()),
                }],
                ram_mebibytes: 512 * 1024,
            })),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Advance host records automatically (see type docs).
    pub fn set_auto_ready(&self, auto_ready: bool) {
        *self.auto_ready.lock().unwrap() = auto_ready;
    }

    /// Hardware inventory attached to auto-advanced hosts.
    pub fn set_inspected_hardware(&self, hardware: HardwareDetails) {
        *self.inspected_hardware.lock().unwrap() = hardware;
    }

    /// Register a host-pool namespace (for test setup).
    pub fn add_namespace(&self, name: &str, ironic_ip: Option<&str>) {
        self.namespaces.lock().unwrap().push(HostPoolNamespace {
            name: name.to_string(),
            ironic_ip: ironic_ip.map(str::to_string),
        });
    }

    /// Insert a host record directly (for test setup).
    pub fn add_host(&self, host: BareMetalHost) {
        let namespace = host.metadata.namespace.clone().unwrap_or_default();
        let name = host.metadata.name.clone().unwrap_or_default();
        self.hosts.lock().unwrap().insert((namespace, name), host);
    }

    /// Overwrite a host's provisioning state (for test setup).
    pub fn set_host_state(&self, namespace: &str, name: &str, state: ProvisioningState) {
        let mut hosts = self.hosts.lock().unwrap();
        if let Some(host) = hosts.get_mut(&(namespace.to_string(), name.to_string())) {
            host.status.get_or_insert_with(BareMetalHostStatus::default).provisioning =
                ProvisioningStatus { state };
        }
    }

    /// Report an error on a host record (for test setup).
    pub fn set_host_error(&self, namespace: &str, name: &str, message: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        if let Some(host) = hosts.get_mut(&(namespace.to_string(), name.to_string())) {
            let status = host.status.get_or_insert_with(BareMetalHostStatus::default);
            status.error_message = message.to_string();
            status.error_count += 1;
        }
    }

    /// Credentials secret applied in a namespace, as (username, password).
    pub fn secret(&self, namespace: &str, name: &str) -> Option<(String, String)> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Name of the host record owning a credentials secret, if any.
    pub fn secret_owner(&self, namespace: &str, name: &str) -> Option<String> {
        self.secret_owners
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MetalClient for MockMetal {
    async fn get_host(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BareMetalHost>, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("get_host({}/{})", namespace, name));
        Ok(self
            .hosts
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_host(&self, host: &BareMetalHost) -> Result<BareMetalHost, GatewayError> {
        let namespace = host.metadata.namespace.clone().unwrap_or_default();
        let name = host.metadata.name.clone().unwrap_or_default();
        self.calls
            .lock()
            .unwrap()
            .push(format!("create_host({}/{})", namespace, name));
        let mut host = host.clone();
        host.metadata.uid = Some(format!("uid-{}", name));
        if *self.auto_ready.lock().unwrap() {
            host.status = Some(BareMetalHostStatus {
                provisioning: ProvisioningStatus {
                    state: ProvisioningState::Available,
                },
                hardware: Some(self.inspected_hardware.lock().unwrap().clone()),
                ..BareMetalHostStatus::default()
            });
        }
        self.hosts
            .lock()
            .unwrap()
            .insert((namespace, name), host.clone());
        Ok(host)
    }

    async fn delete_host(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete_host({}/{})", namespace, name));
        self.hosts
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn set_host_image(
        &self,
        namespace: &str,
        name: &str,
        image: Option<HostImage>,
    ) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(format!(
            "set_host_image({}/{}, {})",
            namespace,
            name,
            if image.is_some() { "some" } else { "none" }
        ));
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| GatewayError::NotFound(format!("{}/{}", namespace, name)))?;
        let auto_ready = *self.auto_ready.lock().unwrap();
        host.spec.image = image.clone();
        if auto_ready {
            let state = if image.is_some() {
                ProvisioningState::Provisioned
            } else {
                ProvisioningState::Available
            };
            host.status.get_or_insert_with(BareMetalHostStatus::default).provisioning =
                ProvisioningStatus { state };
        }
        Ok(())
    }

    async fn list_hosts(&self, namespace: &str) -> Result<Vec<BareMetalHost>, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("list_hosts({})", namespace));
        Ok(self
            .hosts
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, host)| host.clone())
            .collect())
    }

    async fn list_host_pool_namespaces(&self) -> Result<Vec<HostPoolNamespace>, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push("list_host_pool_namespaces".to_string());
        Ok(self.namespaces.lock().unwrap().clone())
    }

    async fn apply_credentials_secret(
        &self,
        namespace: &str,
        name: &str,
        username: &str,
        password: &str,
        owner: Option<&BareMetalHost>,
    ) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("apply_credentials_secret({}/{})", namespace, name));
        self.secrets.lock().unwrap().insert(
            (namespace.to_string(), name.to_string()),
            (username.to_string(), password.to_string()),
        );
        if let Some(owner) = owner.and_then(|h| h.metadata.name.clone()) {
            self.secret_owners
                .lock()
                .unwrap()
                .insert((namespace.to_string(), name.to_string()), owner);
        }
        Ok(())
    }

    async fn attach_host_metadata(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("attach_host_metadata({}/{})", namespace, name));
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| GatewayError::NotFound(format!("{}/{}", namespace, name)))?;
        host.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels);
        host.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations);
        Ok(())
    }
}

/// Mock remote shell returning canned output per command prefix.
#[derive(Clone, Default)]
pub struct MockShell {
    responses: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockShell {
    /// Create an empty mock shell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register canned output for commands starting with `prefix`.
    pub fn add_response(&self, prefix: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(prefix.to_string(), output.to_string());
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteShell for MockShell {
    async fn run(
        &self,
        host: &str,
        _private_key: &str,
        command: &str,
    ) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("run({}, {})", host, command));
        let responses = self.responses.lock().unwrap();
        responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .ok_or_else(|| GatewayError::Shell(format!("no canned response for: {}", command)))
    }
}
