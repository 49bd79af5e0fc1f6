//! BMC gateway
//!
//! Redfish-style out-of-band management driver. A session is opened per
//! reconcile invocation with whatever credentials the engine currently
//! believes in; every call is bounded by the HTTP client timeout so a hung
//! BMC blocks a single invocation, never the controller.

use crate::error::GatewayError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Vendor hardware family detected from the BMC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareType {
    /// Dell PowerEdge general-purpose server
    DellPowerEdge,
    /// Dell XE-series accelerator chassis
    DellXe,
    /// Supermicro server
    Supermicro,
    /// Virtual machine BMC (sushy-tools and friends)
    Virtual,
    /// Anything the driver cannot classify
    Unknown,
}

impl HardwareType {
    /// Parse the value previously stored on a HostEnrollment status.
    pub fn parse(s: &str) -> Self {
        match s {
            "dell-poweredge" => Self::DellPowerEdge,
            "dell-xe" => Self::DellXe,
            "supermicro" => Self::Supermicro,
            "virtual" => Self::Virtual,
            _ => Self::Unknown,
        }
    }

    /// Stable string form stored on the HostEnrollment status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DellPowerEdge => "dell-poweredge",
            Self::DellXe => "dell-xe",
            Self::Supermicro => "supermicro",
            Self::Virtual => "virtual",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the BMC exposes writable account management.
    pub fn supports_account_management(&self) -> bool {
        matches!(self, Self::DellPowerEdge | Self::DellXe | Self::Supermicro)
    }

    /// Boot mode the provisioning system should use for this family.
    pub fn boot_mode(&self) -> &'static str {
        match self {
            Self::Virtual => "legacy",
            _ => "UEFI",
        }
    }

    /// Root device hint for image provisioning.
    pub fn root_device_hint(&self) -> &'static str {
        match self {
            Self::DellPowerEdge | Self::DellXe => "/dev/sda",
            Self::Supermicro => "/dev/nvme0n1",
            Self::Virtual | Self::Unknown => "/dev/vda",
        }
    }

    /// Families carrying accelerator NICs that must be enumerated in-band.
    pub fn has_accelerator_nics(&self) -> bool {
        matches!(self, Self::DellXe)
    }
}

/// CPU facts reported by the BMC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuInfo {
    /// Vendor model identifier, e.g. "8480+"
    pub id: String,
    /// Vendor name
    pub vendor: String,
    /// Populated sockets
    pub sockets: u32,
    /// Cores per socket
    pub cores: u32,
    /// Threads per core
    pub threads: u32,
}

/// GPU facts reported by the BMC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuInfo {
    /// GPU model, empty when none present
    pub model: String,
    /// Number of GPUs
    pub count: u32,
}

/// Opens authenticated BMC sessions.
#[async_trait::async_trait]
pub trait BmcClient: Send + Sync {
    /// Open a session against `address` with the given credentials.
    async fn open_session(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn BmcSession>, GatewayError>;
}

/// One authenticated BMC session.
#[async_trait::async_trait]
pub trait BmcSession: Send + Sync {
    /// Hardware family detected during session setup.
    fn hardware_type(&self) -> HardwareType;

    /// Whether the BMC belongs to a virtual machine.
    fn is_virtual(&self) -> bool {
        self.hardware_type() == HardwareType::Virtual
    }

    /// Update the password of an existing account.
    ///
    /// Signals `AccountNotFound` when no account carries the username.
    async fn update_account(&self, username: &str, password: &str) -> Result<(), GatewayError>;

    /// Create a new administrator account.
    async fn create_account(&self, username: &str, password: &str) -> Result<(), GatewayError>;

    /// Force a known-good boot order (PXE first).
    async fn sanitize_boot_order(&self) -> Result<(), GatewayError>;

    /// Point the BMC at the fleet NTP servers.
    async fn configure_ntp(&self) -> Result<(), GatewayError>;

    /// Check Platform Firmware Resilience attestation.
    async fn verify_firmware_resilience(&self) -> Result<(), GatewayError>;

    /// Enable the KCS management interface. Signals `NotSupported`.
    async fn enable_kcs(&self) -> Result<(), GatewayError>;

    /// Enable the HCI management interface. Signals `NotSupported`.
    async fn enable_hci(&self) -> Result<(), GatewayError>;

    /// MAC of the host's PXE NIC as reported by the BMC, when exposed.
    async fn host_mac(&self) -> Result<Option<String>, GatewayError>;

    /// BMC address in the provisioning system's driver-native format.
    async fn provisioning_address(&self) -> Result<String, GatewayError>;

    /// CPU inventory.
    async fn cpu_info(&self) -> Result<CpuInfo, GatewayError>;

    /// GPU inventory.
    async fn gpu_info(&self) -> Result<GpuInfo, GatewayError>;

    /// High-Bandwidth Memory mode, `None` when the platform has no HBM.
    async fn hbm_mode(&self) -> Result<Option<String>, GatewayError>;
}

/// Redfish BMC driver.
pub struct RedfishClient {
    client: Client,
}

impl RedfishClient {
    /// Create a new Redfish driver.
    ///
    /// BMC calls get a longer timeout than metadata APIs; firmware stacks
    /// are slow but must still bound a single reconcile invocation.
    pub fn new(insecure: bool) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(45))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(GatewayError::Http)?;
        Ok(Self { client })
    }
}

#[derive(Debug, Deserialize)]
struct RedfishSystem {
    #[serde(default, rename = "Manufacturer")]
    manufacturer: String,
    #[serde(default, rename = "Model")]
    model: String,
}

fn classify(manufacturer: &str, model: &str) -> HardwareType {
    let manufacturer = manufacturer.to_ascii_lowercase();
    let model = model.to_ascii_lowercase();
    if manufacturer.contains("sushy") || model.contains("virtual") {
        HardwareType::Virtual
    } else if manufacturer.contains("dell") && model.contains("xe") {
        HardwareType::DellXe
    } else if manufacturer.contains("dell") {
        HardwareType::DellPowerEdge
    } else if manufacturer.contains("supermicro") {
        HardwareType::Supermicro
    } else {
        HardwareType::Unknown
    }
}

#[async_trait::async_trait]
impl BmcClient for RedfishClient {
    async fn open_session(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn BmcSession>, GatewayError> {
        let base = address.trim_end_matches('/').to_string();
        let url = format!("{}/redfish/v1/Systems/System.Embedded.1", base);
        debug!("Opening Redfish session against {}", base);

        let response = self
            .client
            .get(&url)
            .basic_auth(username, Some(password))
            .send()
            .await?;

        let status = response.status();
        if status == 401 || status == 403 {
            return Err(GatewayError::Authentication(format!(
                "BMC rejected credentials for {}: {}",
                username, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!(
                "Failed to read system resource: {} - {}",
                status, body
            )));
        }

        let system: RedfishSystem = response.json().await?;
        let hardware_type = classify(&system.manufacturer, &system.model);

        Ok(Box::new(RedfishSession {
            client: self.client.clone(),
            base,
            username: username.to_string(),
            password: password.to_string(),
            hardware_type,
        }))
    }
}

struct RedfishSession {
    client: Client,
    base: String,
    username: String,
    password: String,
    hardware_type: HardwareType,
}

impl RedfishSession {
    async fn get(&self, path: &str) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let status = response.status();
        if status == 404 {
            return Err(GatewayError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("GET {}: {} - {}", path, status, body)));
        }
        Ok(response.json().await?)
    }

    async fn patch(&self, path: &str, body: serde_json::Value) -> Result<(), GatewayError> {
        let response = self
            .client
            .patch(format!("{}{}", self.base, path))
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status == 404 {
            return Err(GatewayError::NotFound(path.to_string()));
        }
        // Redfish signals unsupported attributes with 400 + a MessageId
        if status == 400 {
            let text = response.text().await.unwrap_or_default();
            if text.contains("AttributeNotSupported") || text.contains("ActionNotSupported") {
                return Err(GatewayError::NotSupported(path.to_string()));
            }
            return Err(GatewayError::Api(format!("PATCH {}: 400 - {}", path, text)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("PATCH {}: {} - {}", path, status, body)));
        }
        Ok(())
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("POST {}: {} - {}", path, status, text)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BmcSession for RedfishSession {
    fn hardware_type(&self) -> HardwareType {
        self.hardware_type
    }

    async fn update_account(&self, username: &str, password: &str) -> Result<(), GatewayError> {
        let accounts = self.get("/redfish/v1/AccountService/Accounts").await?;
        let members = accounts["Members"].as_array().cloned().unwrap_or_default();
        for member in members {
            let Some(path) = member["@odata.id"].as_str() else {
                continue;
            };
            let account = self.get(path).await?;
            if account["UserName"].as_str() == Some(username) {
                return self
                    .patch(path, serde_json::json!({ "Password": password }))
                    .await;
            }
        }
        Err(GatewayError::AccountNotFound(username.to_string()))
    }

    async fn create_account(&self, username: &str, password: &str) -> Result<(), GatewayError> {
        self.post(
            "/redfish/v1/AccountService/Accounts",
            serde_json::json!({
                "UserName": username,
                "Password": password,
                "RoleId": "Administrator",
                "Enabled": true,
            }),
        )
        .await
    }

    async fn sanitize_boot_order(&self) -> Result<(), GatewayError> {
        self.patch(
            "/redfish/v1/Systems/System.Embedded.1",
            serde_json::json!({
                "Boot": { "BootSourceOverrideTarget": "Pxe", "BootSourceOverrideEnabled": "Continuous" }
            }),
        )
        .await
    }

    async fn configure_ntp(&self) -> Result<(), GatewayError> {
        self.patch(
            "/redfish/v1/Managers/iDRAC.Embedded.1/NetworkProtocol",
            serde_json::json!({ "NTP": { "ProtocolEnabled": true } }),
        )
        .await
    }

    async fn verify_firmware_resilience(&self) -> Result<(), GatewayError> {
        let attrs = self
            .get("/redfish/v1/Managers/iDRAC.Embedded.1/Oem/Dell/DellAttributes/idrac")
            .await?;
        match attrs["Attributes"]["SecurityCertificate.1.PFRVerified"].as_str() {
            Some("Verified") | None => Ok(()),
            Some(other) => Err(GatewayError::Api(format!(
                "firmware resilience verification reports {}",
                other
            ))),
        }
    }

    async fn enable_kcs(&self) -> Result<(), GatewayError> {
        self.patch(
            "/redfish/v1/Managers/iDRAC.Embedded.1/Oem/Dell/DellAttributes/idrac",
            serde_json::json!({ "Attributes": { "OS-BMC.1.AdminState": "Enabled" } }),
        )
        .await
    }

    async fn enable_hci(&self) -> Result<(), GatewayError> {
        self.patch(
            "/redfish/v1/Managers/iDRAC.Embedded.1/Oem/Dell/DellAttributes/idrac",
            serde_json::json!({ "Attributes": { "HostInterface.1.Enable": "Enabled" } }),
        )
        .await
    }

    async fn host_mac(&self) -> Result<Option<String>, GatewayError> {
        match self
            .get("/redfish/v1/Systems/System.Embedded.1/EthernetInterfaces/NIC.Integrated.1-1-1")
            .await
        {
            Ok(nic) => Ok(nic["MACAddress"].as_str().map(str::to_lowercase)),
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn provisioning_address(&self) -> Result<String, GatewayError> {
        // Driver-native form the provisioning system dials directly
        let host = self
            .base
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        Ok(match self.hardware_type {
            HardwareType::DellPowerEdge | HardwareType::DellXe => {
                format!("idrac-virtualmedia://{}/redfish/v1/Systems/System.Embedded.1", host)
            }
            HardwareType::Virtual => {
                format!("redfish-virtualmedia+http://{}/redfish/v1/Systems/System.Embedded.1", host)
            }
            _ => format!("redfish-virtualmedia://{}/redfish/v1/Systems/System.Embedded.1", host),
        })
    }

    async fn cpu_info(&self) -> Result<CpuInfo, GatewayError> {
        let procs = self
            .get("/redfish/v1/Systems/System.Embedded.1/Processors")
            .await?;
        let members = procs["Members"].as_array().cloned().unwrap_or_default();
        let mut info = CpuInfo::default();
        for member in &members {
            let Some(path) = member["@odata.id"].as_str() else {
                continue;
            };
            let proc = self.get(path).await?;
            if proc["ProcessorType"].as_str() != Some("CPU") {
                continue;
            }
            info.sockets += 1;
            if info.sockets == 1 {
                info.id = proc["Model"].as_str().unwrap_or_default().to_string();
                info.vendor = proc["Manufacturer"].as_str().unwrap_or_default().to_string();
                info.cores = proc["TotalCores"].as_u64().unwrap_or(0) as u32;
                let total_threads = proc["TotalThreads"].as_u64().unwrap_or(0) as u32;
                info.threads = if info.cores > 0 { total_threads / info.cores } else { 1 };
            }
        }
        Ok(info)
    }

    async fn gpu_info(&self) -> Result<GpuInfo, GatewayError> {
        let procs = self
            .get("/redfish/v1/Systems/System.Embedded.1/Processors")
            .await?;
        let members = procs["Members"].as_array().cloned().unwrap_or_default();
        let mut info = GpuInfo::default();
        for member in &members {
            let Some(path) = member["@odata.id"].as_str() else {
                continue;
            };
            let proc = self.get(path).await?;
            if proc["ProcessorType"].as_str() == Some("GPU") {
                info.count += 1;
                if info.model.is_empty() {
                    info.model = proc["Model"].as_str().unwrap_or_default().to_string();
                }
            }
        }
        Ok(info)
    }

    async fn hbm_mode(&self) -> Result<Option<String>, GatewayError> {
        match self
            .get("/redfish/v1/Systems/System.Embedded.1/Bios")
            .await
        {
            Ok(bios) => Ok(bios["Attributes"]["MemoryOpMode"].as_str().map(str::to_string)),
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
