//! Provisioning-system gateway
//!
//! Wraps the provisioning system's declarative resources (BareMetalHost,
//! paired BMC-credentials Secrets, host-pool Namespaces) behind a trait so
//! the step library can be exercised against an in-memory implementation.

use crate::error::GatewayError;
use crds::{BareMetalHost, HostImage, HOST_POOL_LABEL, IRONIC_IP_ANNOTATION};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use std::collections::BTreeMap;
use tracing::debug;

/// A namespace eligible to receive enrolled hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPoolNamespace {
    /// Namespace name
    pub name: String,
    /// Provisioning endpoint IP annotated on the namespace
    pub ironic_ip: Option<String>,
}

/// Provisioning-system resource operations.
#[async_trait::async_trait]
pub trait MetalClient: Send + Sync {
    /// Fetch a host record, `None` when absent.
    async fn get_host(&self, namespace: &str, name: &str)
        -> Result<Option<BareMetalHost>, GatewayError>;

    /// Create a host record, returning it as persisted (uid assigned).
    async fn create_host(&self, host: &BareMetalHost) -> Result<BareMetalHost, GatewayError>;

    /// Delete a host record. Deleting a missing record succeeds.
    async fn delete_host(&self, namespace: &str, name: &str) -> Result<(), GatewayError>;

    /// Patch the host record's image field (attach or detach).
    async fn set_host_image(
        &self,
        namespace: &str,
        name: &str,
        image: Option<HostImage>,
    ) -> Result<(), GatewayError>;

    /// List host records in a namespace.
    async fn list_hosts(&self, namespace: &str) -> Result<Vec<BareMetalHost>, GatewayError>;

    /// List namespaces carrying the host-pool membership label.
    async fn list_host_pool_namespaces(&self) -> Result<Vec<HostPoolNamespace>, GatewayError>;

    /// Create or overwrite a BMC-credentials Secret, optionally owned by a host.
    async fn apply_credentials_secret(
        &self,
        namespace: &str,
        name: &str,
        username: &str,
        password: &str,
        owner: Option<&BareMetalHost>,
    ) -> Result<(), GatewayError>;

    /// Merge labels and annotations onto a host record's metadata.
    async fn attach_host_metadata(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), GatewayError>;
}

/// Kubernetes-backed provisioning-system gateway.
pub struct KubeMetalClient {
    client: Client,
}

impl KubeMetalClient {
    /// Create a new gateway over an existing cluster client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn hosts(&self, namespace: &str) -> Api<BareMetalHost> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait::async_trait]
impl MetalClient for KubeMetalClient {
    async fn get_host(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BareMetalHost>, GatewayError> {
        match self.hosts(namespace).get(name).await {
            Ok(host) => Ok(Some(host)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(GatewayError::Kube(e)),
        }
    }

    async fn create_host(&self, host: &BareMetalHost) -> Result<BareMetalHost, GatewayError> {
        let namespace = host.metadata.namespace.as_deref().unwrap_or("default");
        debug!(
            "Creating BareMetalHost {}/{}",
            namespace,
            host.metadata.name.as_deref().unwrap_or("")
        );
        self.hosts(namespace)
            .create(&PostParams::default(), host)
            .await
            .map_err(GatewayError::Kube)
    }

    async fn delete_host(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        match self
            .hosts(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(GatewayError::Kube(e)),
        }
    }

    async fn set_host_image(
        &self,
        namespace: &str,
        name: &str,
        image: Option<HostImage>,
    ) -> Result<(), GatewayError> {
        let patch = serde_json::json!({ "spec": { "image": image } });
        self.hosts(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(GatewayError::Kube)?;
        Ok(())
    }

    async fn list_hosts(&self, namespace: &str) -> Result<Vec<BareMetalHost>, GatewayError> {
        let list = self
            .hosts(namespace)
            .list(&ListParams::default())
            .await
            .map_err(GatewayError::Kube)?;
        Ok(list.items)
    }

    async fn list_host_pool_namespaces(&self) -> Result<Vec<HostPoolNamespace>, GatewayError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&format!("{}=true", HOST_POOL_LABEL));
        let list = api.list(&params).await.map_err(GatewayError::Kube)?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| {
                let name = ns.metadata.name.clone()?;
                let ironic_ip = ns
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(IRONIC_IP_ANNOTATION))
                    .cloned();
                Some(HostPoolNamespace { name, ironic_ip })
            })
            .collect())
    }

    async fn apply_credentials_secret(
        &self,
        namespace: &str,
        name: &str,
        username: &str,
        password: &str,
        owner: Option<&BareMetalHost>,
    ) -> Result<(), GatewayError> {
        let owner_references = owner.and_then(|host| {
            let uid = host.metadata.uid.clone()?;
            Some(vec![OwnerReference {
                api_version: BareMetalHost::api_version(&()).to_string(),
                kind: BareMetalHost::kind(&()).to_string(),
                name: host.metadata.name.clone()?,
                uid,
                ..OwnerReference::default()
            }])
        });

        let mut string_data = BTreeMap::new();
        string_data.insert("username".to_string(), username.to_string());
        string_data.insert("password".to_string(), password.to_string());

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references,
                ..ObjectMeta::default()
            },
            string_data: Some(string_data),
            ..Secret::default()
        };

        let api = self.secrets(namespace);
        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                api.replace(name, &PostParams::default(), &secret)
                    .await
                    .map_err(GatewayError::Kube)?;
                Ok(())
            }
            Err(e) => Err(GatewayError::Kube(e)),
        }
    }

    async fn attach_host_metadata(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), GatewayError> {
        let patch = serde_json::json!({
            "metadata": {
                "labels": labels,
                "annotations": annotations,
            }
        });
        self.hosts(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(GatewayError::Kube)?;
        Ok(())
    }
}
