//! Instance-type catalog gateway
//!
//! Read-only view of the fleet's instance-type hardware profiles. Only the
//! bare-metal category matters to enrollment; the engine matches a host's
//! derived hardware signature against these specs.

use crate::error::GatewayError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hardware profile of one instance type.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTypeSpec {
    /// Instance type name, e.g. "bm.gpu.h100.8"
    pub name: String,
    /// CPU model identifier
    #[serde(default)]
    pub cpu_id: String,
    /// Cores per socket
    #[serde(default)]
    pub cpu_cores: u32,
    /// Populated sockets
    #[serde(default)]
    pub cpu_sockets: u32,
    /// Threads per core
    #[serde(default)]
    pub cpu_threads: u32,
    /// GPU model, empty when the type has no GPUs
    #[serde(default)]
    pub gpu_model: String,
    /// GPU count
    #[serde(default)]
    pub gpu_count: u32,
    /// HBM mode, empty when not applicable
    #[serde(default)]
    pub hbm_mode: String,
    /// Memory bucket, e.g. "512Gi"
    #[serde(default)]
    pub memory: String,
}

/// Instance-type catalog queries.
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// All instance types in the bare-metal category.
    async fn bare_metal_instance_types(&self) -> Result<Vec<InstanceTypeSpec>, GatewayError>;
}

/// REST catalog client.
pub struct RestCatalogClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    items: Vec<InstanceTypeSpec>,
}

impl RestCatalogClient {
    /// Create a new catalog client.
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
impl CatalogClient for RestCatalogClient {
    async fn bare_metal_instance_types(&self) -> Result<Vec<InstanceTypeSpec>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/instance-types?category=bare-metal", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("instance types: {} - {}", status, text)));
        }
        let page: CatalogPage = response.json().await?;
        Ok(page.items)
    }
}
