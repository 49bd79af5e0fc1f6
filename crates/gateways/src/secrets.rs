//! Secret-store gateway
//!
//! BMC credentials live in a Vault-style KV store, keyed by region and BMC
//! MAC. Factory (vendor default) and rotated admin credentials sit at
//! distinct sub-paths so a rotation can be rolled back by deleting only the
//! rotated entry.

use crate::error::GatewayError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A username/password pair for a BMC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BmcCredentials {
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
}

/// Path of the factory/default credentials for a BMC.
///
/// When the BMC MAC is still unknown (virtual environments seed a shared
/// default), the `virtual/default` path is used instead.
pub fn factory_path(region: &str, mac: Option<&str>) -> String {
    match mac {
        Some(mac) => format!("bmc/{}/{}/factory", region, mac),
        None => "bmc/virtual/default".to_string(),
    }
}

/// Path of the rotated admin credentials for a BMC.
pub fn rotated_path(region: &str, mac: &str) -> String {
    format!("bmc/{}/{}/admin", region, mac)
}

/// Credential storage keyed by path.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Read credentials, `None` when the path holds nothing.
    async fn get_credentials(&self, path: &str) -> Result<Option<BmcCredentials>, GatewayError>;

    /// Write credentials at a path, overwriting any previous value.
    async fn put_credentials(
        &self,
        path: &str,
        credentials: &BmcCredentials,
    ) -> Result<(), GatewayError>;

    /// Delete the credentials at a path. Deleting a missing path succeeds.
    async fn delete_credentials(&self, path: &str) -> Result<(), GatewayError>;

    /// Private key for remote-shell access to enrolled hosts.
    async fn ssh_private_key(&self) -> Result<String, GatewayError>;
}

/// Vault KV v2 secret store.
pub struct VaultSecretStore {
    client: Client,
    base_url: String,
    token: String,
    mount: String,
}

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvReadData,
}

#[derive(Debug, Deserialize)]
struct KvReadData {
    data: serde_json::Value,
}

impl VaultSecretStore {
    /// Create a new Vault client against a KV v2 mount.
    pub fn new(base_url: String, token: String, mount: String) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(GatewayError::Http)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            mount,
        })
    }

    fn data_url(&self, path: &str) -> String {
        format!("{}/v1/{}/data/{}", self.base_url, self.mount, path)
    }
}

#[async_trait::async_trait]
impl SecretStore for VaultSecretStore {
    async fn get_credentials(&self, path: &str) -> Result<Option<BmcCredentials>, GatewayError> {
        debug!("Secret read: {}", path);
        let response = self
            .client
            .get(self.data_url(path))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;
        let status = response.status();
        if status == 404 {
            return Ok(None);
        }
        if status == 403 {
            return Err(GatewayError::Authentication(path.to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("read {}: {} - {}", path, status, text)));
        }
        let body: KvReadResponse = response.json().await?;
        let credentials: BmcCredentials = serde_json::from_value(body.data.data)?;
        Ok(Some(credentials))
    }

    async fn put_credentials(
        &self,
        path: &str,
        credentials: &BmcCredentials,
    ) -> Result<(), GatewayError> {
        debug!("Secret write: {}", path);
        let response = self
            .client
            .post(self.data_url(path))
            .header("X-Vault-Token", &self.token)
            .json(&serde_json::json!({ "data": credentials }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("write {}: {} - {}", path, status, text)));
        }
        Ok(())
    }

    async fn delete_credentials(&self, path: &str) -> Result<(), GatewayError> {
        debug!("Secret delete: {}", path);
        let response = self
            .client
            .delete(format!(
                "{}/v1/{}/metadata/{}",
                self.base_url, self.mount, path
            ))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;
        let status = response.status();
        if status == 404 {
            return Ok(());
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("delete {}: {} - {}", path, status, text)));
        }
        Ok(())
    }

    async fn ssh_private_key(&self) -> Result<String, GatewayError> {
        let response = self
            .client
            .get(self.data_url("ssh/validation-key"))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("ssh key: {} - {}", status, text)));
        }
        let body: KvReadResponse = response.json().await?;
        body.data.data["private_key"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::NotFound("ssh/validation-key".to_string()))
    }
}
