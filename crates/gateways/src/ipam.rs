//! IPAM/DHCP gateway
//!
//! Manages address ranges, DHCP scopes and reservations for BMC and
//! provisioning networks. The gateway is optional per cluster; virtual/test
//! environments use the DHCP proxy instead, which only keeps a mac-to-boot-
//! endpoint mapping.

use crate::error::GatewayError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Which address range of a rack to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    /// Out-of-band management network
    Bmc,
    /// PXE/provisioning network
    Provisioning,
}

impl RangeKind {
    /// Range type name used by the IPAM API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bmc => "BMC",
            Self::Provisioning => "Provisioning",
        }
    }
}

/// An address range with its DHCP scopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressRange {
    /// Opaque IPAM reference for follow-up calls
    pub ref_id: String,
    /// First address of the range
    pub start: String,
    /// DHCP scope references carved out of the range
    #[serde(default)]
    pub dhcp_scopes: Vec<String>,
}

/// A DHCP reservation inside a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DhcpReservation {
    /// Opaque IPAM reference
    pub ref_id: String,
    /// Reserved MAC address
    pub mac: String,
    /// Reserved IP address
    pub address: String,
}

/// Address range and DHCP reservation management.
#[async_trait::async_trait]
pub trait IpamClient: Send + Sync {
    /// Find a rack's address range of the given kind.
    async fn find_range(&self, rack: &str, kind: RangeKind) -> Result<AddressRange, GatewayError>;

    /// Look up an existing reservation for a MAC inside a scope.
    async fn find_reservation(
        &self,
        scope: &str,
        mac: &str,
    ) -> Result<Option<DhcpReservation>, GatewayError>;

    /// Allocate the next free address of a range.
    async fn next_free_address(&self, range: &AddressRange) -> Result<String, GatewayError>;

    /// Create a reservation for `mac` at `address`.
    async fn create_reservation(
        &self,
        scope: &str,
        mac: &str,
        address: &str,
        name: &str,
    ) -> Result<DhcpReservation, GatewayError>;

    /// Attach iPXE boot options to a reservation.
    async fn set_reservation_options(
        &self,
        reservation: &DhcpReservation,
        boot_filename: &str,
        next_server: &str,
    ) -> Result<(), GatewayError>;

    /// Delete a reservation.
    async fn delete_reservation(&self, reservation: &DhcpReservation) -> Result<(), GatewayError>;
}

/// Minimal boot-mapping registration for virtual/test environments.
#[async_trait::async_trait]
pub trait DhcpProxy: Send + Sync {
    /// Register a mac-to-boot-endpoint mapping.
    async fn register_boot_mapping(&self, mac: &str, next_server: &str)
        -> Result<(), GatewayError>;
}

/// REST IPAM client.
pub struct RestIpamClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl RestIpamClient {
    /// Create a new IPAM client with basic-auth credentials.
    pub fn new(
        base_url: String,
        username: String,
        password: String,
        insecure: bool,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(GatewayError::Http)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, GatewayError> {
        debug!("IPAM {} {}", method, path);
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status == 404 {
            return Err(GatewayError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("{}: {} - {}", path, status, text)));
        }
        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: String,
}

#[async_trait::async_trait]
impl IpamClient for RestIpamClient {
    async fn find_range(&self, rack: &str, kind: RangeKind) -> Result<AddressRange, GatewayError> {
        self.request(
            reqwest::Method::GET,
            &format!(
                "/v1/racks/{}/ranges/{}",
                urlencoding::encode(rack),
                kind.as_str()
            ),
            None,
        )
        .await
    }

    async fn find_reservation(
        &self,
        scope: &str,
        mac: &str,
    ) -> Result<Option<DhcpReservation>, GatewayError> {
        match self
            .request(
                reqwest::Method::GET,
                &format!(
                    "/v1/scopes/{}/reservations/{}",
                    urlencoding::encode(scope),
                    urlencoding::encode(mac)
                ),
                None,
            )
            .await
        {
            Ok(reservation) => Ok(Some(reservation)),
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn next_free_address(&self, range: &AddressRange) -> Result<String, GatewayError> {
        let response: AddressResponse = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/ranges/{}/next-free", urlencoding::encode(&range.ref_id)),
                Some(serde_json::json!({})),
            )
            .await?;
        Ok(response.address)
    }

    async fn create_reservation(
        &self,
        scope: &str,
        mac: &str,
        address: &str,
        name: &str,
    ) -> Result<DhcpReservation, GatewayError> {
        self.request(
            reqwest::Method::POST,
            &format!("/v1/scopes/{}/reservations", urlencoding::encode(scope)),
            Some(serde_json::json!({
                "mac": mac,
                "address": address,
                "name": name,
            })),
        )
        .await
    }

    async fn set_reservation_options(
        &self,
        reservation: &DhcpReservation,
        boot_filename: &str,
        next_server: &str,
    ) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .request(
                reqwest::Method::PUT,
                &format!(
                    "/v1/reservations/{}/options",
                    urlencoding::encode(&reservation.ref_id)
                ),
                Some(serde_json::json!({
                    "bootFilename": boot_filename,
                    "nextServer": next_server,
                })),
            )
            .await?;
        Ok(())
    }

    async fn delete_reservation(&self, reservation: &DhcpReservation) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .request(
                reqwest::Method::DELETE,
                &format!(
                    "/v1/reservations/{}",
                    urlencoding::encode(&reservation.ref_id)
                ),
                None,
            )
            .await?;
        Ok(())
    }
}

/// REST DHCP proxy client.
pub struct RestDhcpProxy {
    client: Client,
    base_url: String,
}

impl RestDhcpProxy {
    /// Create a new DHCP proxy client.
    pub fn new(base_url: String) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(GatewayError::Http)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl DhcpProxy for RestDhcpProxy {
    async fn register_boot_mapping(
        &self,
        mac: &str,
        next_server: &str,
    ) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/boot-mappings", self.base_url))
            .json(&serde_json::json!({ "mac": mac, "nextServer": next_server }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("boot mapping: {} - {}", status, text)));
        }
        Ok(())
    }
}
