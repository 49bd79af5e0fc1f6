//! Controller wiring: builds the gateway clients from configuration,
//! assembles the reconciler and runs the watcher task.

use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::{Gateways, Reconciler};
use crate::store::KubeRecordStore;
use crate::watcher::Watcher;
use crds::HostEnrollment;
use gateways::{
    DhcpProxy, IpamClient, KubeMetalClient, NetBoxDcimClient, RedfishClient, RestCatalogClient,
    RestDhcpProxy, RestIpamClient, SshShell, VaultSecretStore,
};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller that owns the watcher task.
pub struct Controller {
    watcher_task: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Build all gateway clients and spawn the watcher.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        let client = Client::try_default().await?;

        let store = Arc::new(KubeRecordStore::new(client.clone()));
        let metal = Arc::new(KubeMetalClient::new(client.clone()));
        let bmc = Arc::new(RedfishClient::new(config.engine.bmc_insecure)?);
        let dcim = Arc::new(NetBoxDcimClient::new(
            config.netbox_url.clone(),
            config.netbox_token.clone(),
        )?);
        let secrets = Arc::new(VaultSecretStore::new(
            config.vault_url.clone(),
            config.vault_token.clone(),
            config.vault_mount.clone(),
        )?);
        let catalog = Arc::new(RestCatalogClient::new(config.catalog_url.clone())?);
        let shell = Arc::new(SshShell::new(config.ssh_user.clone()));

        let ipam: Option<Arc<dyn IpamClient>> = match config.ipam.as_ref() {
            Some(ipam) => Some(Arc::new(RestIpamClient::new(
                ipam.url.clone(),
                ipam.username.clone(),
                ipam.password.clone(),
                ipam.insecure,
            )?)),
            None => None,
        };
        let dhcp_proxy: Option<Arc<dyn DhcpProxy>> = match config.dhcp_proxy_url.as_ref() {
            Some(url) => Some(Arc::new(RestDhcpProxy::new(url.clone())?)),
            None => None,
        };

        let reconciler = Arc::new(Reconciler::new(
            Gateways {
                store,
                metal,
                bmc,
                dcim,
                ipam,
                dhcp_proxy,
                secrets,
                catalog,
                shell,
            },
            config.engine.clone(),
        ));

        let api: Api<HostEnrollment> = match config.watch_namespace.as_deref() {
            Some(namespace) => {
                info!("Watching HostEnrollment records in namespace {}", namespace);
                Api::namespaced(client, namespace)
            }
            None => {
                info!("Watching HostEnrollment records in all namespaces");
                Api::all(client)
            }
        };

        let watcher = Watcher::new(reconciler, api, config.concurrency);
        let watcher_task = tokio::spawn(async move { watcher.watch().await });

        Ok(Self { watcher_task })
    }

    /// Run until the watcher exits.
    pub async fn run(self) -> Result<(), ControllerError> {
        match self.watcher_task.await {
            Ok(result) => result,
            Err(e) => Err(ControllerError::Watch(format!("watcher task failed: {}", e))),
        }
    }
}
