//! DCIM gateway
//!
//! Source of rack/interface/cluster topology facts. The REST implementation
//! talks to a NetBox instance; the enrollment engine only ever asks topology
//! questions, never writes.

use crate::error::GatewayError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Read-only topology facts about devices and clusters.
#[async_trait::async_trait]
pub trait DcimClient: Send + Sync {
    /// MAC address of a named interface on a device.
    async fn interface_mac(&self, device: &str, interface: &str) -> Result<String, GatewayError>;

    /// BMC management URL of a device.
    async fn bmc_url(&self, device: &str) -> Result<String, GatewayError>;

    /// MACs of the device's storage NICs.
    async fn storage_interface_macs(&self, device: &str) -> Result<Vec<String>, GatewayError>;

    /// Number of hosts in a cluster group (optionally scoped to a zone).
    async fn cluster_size(&self, cluster: &str, zone: Option<&str>) -> Result<u32, GatewayError>;

    /// Network mode configured for a cluster group.
    async fn cluster_network_mode(&self, cluster: &str, zone: Option<&str>)
        -> Result<String, GatewayError>;
}

/// NetBox-backed DCIM client.
pub struct NetBoxDcimClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    count: u64,
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct InterfaceRecord {
    #[serde(default)]
    mac_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    #[serde(default)]
    custom_fields: serde_json::Value,
    #[serde(default)]
    oob_ip: Option<NestedIp>,
}

#[derive(Debug, Deserialize)]
struct NestedIp {
    address: String,
}

#[derive(Debug, Deserialize)]
struct ClusterRecord {
    #[serde(default)]
    custom_fields: serde_json::Value,
}

impl NetBoxDcimClient {
    /// Create a new NetBox DCIM client.
    pub fn new(base_url: String, token: String) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(GatewayError::Http)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("DCIM query: {}", path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if status == 401 || status == 403 {
            return Err(GatewayError::Authentication(format!("{} - {}", path, status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("{}: {} - {}", path, status, body)));
        }
        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl DcimClient for NetBoxDcimClient {
    async fn interface_mac(&self, device: &str, interface: &str) -> Result<String, GatewayError> {
        let page: Page<InterfaceRecord> = self
            .get_json(&format!(
                "/api/dcim/interfaces/?device={}&name={}",
                urlencoding::encode(device),
                urlencoding::encode(interface)
            ))
            .await?;
        page.results
            .into_iter()
            .find_map(|i| i.mac_address)
            .map(|m| m.to_lowercase())
            .ok_or_else(|| {
                GatewayError::NotFound(format!("interface {} on device {}", interface, device))
            })
    }

    async fn bmc_url(&self, device: &str) -> Result<String, GatewayError> {
        let page: Page<DeviceRecord> = self
            .get_json(&format!("/api/dcim/devices/?name={}", urlencoding::encode(device)))
            .await?;
        let record = page
            .results
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(format!("device {}", device)))?;
        if let Some(url) = record.custom_fields["bmc_url"].as_str() {
            return Ok(url.to_string());
        }
        let ip = record
            .oob_ip
            .ok_or_else(|| GatewayError::NotFound(format!("BMC address for device {}", device)))?;
        // oob_ip is CIDR-notated
        let host = ip.address.split('/').next().unwrap_or(&ip.address).to_string();
        Ok(format!("https://{}", host))
    }

    async fn storage_interface_macs(&self, device: &str) -> Result<Vec<String>, GatewayError> {
        let page: Page<InterfaceRecord> = self
            .get_json(&format!(
                "/api/dcim/interfaces/?device={}&name__isw=storage",
                urlencoding::encode(device)
            ))
            .await?;
        Ok(page
            .results
            .into_iter()
            .filter_map(|i| i.mac_address)
            .map(|m| m.to_lowercase())
            .collect())
    }

    async fn cluster_size(&self, cluster: &str, zone: Option<&str>) -> Result<u32, GatewayError> {
        let mut path = format!("/api/dcim/devices/?cluster_group={}", urlencoding::encode(cluster));
        if let Some(zone) = zone {
            path.push_str(&format!("&site_group={}", urlencoding::encode(zone)));
        }
        let page: Page<serde_json::Value> = self.get_json(&path).await?;
        Ok(page.count as u32)
    }

    async fn cluster_network_mode(
        &self,
        cluster: &str,
        _zone: Option<&str>,
    ) -> Result<String, GatewayError> {
        let page: Page<ClusterRecord> = self
            .get_json(&format!(
                "/api/virtualization/cluster-groups/?name={}",
                urlencoding::encode(cluster)
            ))
            .await?;
        let record = page
            .results
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(format!("cluster group {}", cluster)))?;
        record.custom_fields["network_mode"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::NotFound(format!("network mode for cluster {}", cluster)))
    }
}
