//! HostEnrollment record persistence.
//!
//! The reconciliation engine mutates a record in memory and hands it to the
//! store once per pass. The store compares against the live object and skips
//! the write when nothing changed, so repeated polling passes do not generate
//! no-op status updates (which would re-trigger the watch).

use crate::error::ControllerError;
use crds::{HostEnrollment, DISENROLL_FINALIZER};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

/// How often a lost optimistic-concurrency race is retried before giving up.
const STATUS_UPDATE_ATTEMPTS: u32 = 3;

/// Writes HostEnrollment records; the watcher hands the engine the live
/// object, so the store never needs to read one.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist the record's status.
    ///
    /// Uses optimistic concurrency: the live object's resourceVersion is
    /// re-read on every attempt and a 409 triggers a retry. A no-op status is
    /// never written.
    async fn save_status(&self, record: &HostEnrollment) -> Result<(), ControllerError>;

    /// Add the disenroll finalizer unless already present.
    async fn ensure_finalizer(&self, record: &HostEnrollment) -> Result<(), ControllerError>;

    /// Remove the disenroll finalizer, letting deletion proceed.
    async fn remove_finalizer(&self, record: &HostEnrollment) -> Result<(), ControllerError>;
}

/// Kubernetes-backed record store.
pub struct KubeRecordStore {
    client: Client,
}

impl KubeRecordStore {
    /// Create a new store over an existing cluster client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<HostEnrollment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn record_keys(record: &HostEnrollment) -> Result<(String, String), ControllerError> {
    let namespace = record
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| ControllerError::MissingField("metadata.namespace".to_string()))?;
    let name = record
        .metadata
        .name
        .clone()
        .ok_or_else(|| ControllerError::MissingField("metadata.name".to_string()))?;
    Ok((namespace, name))
}

#[async_trait::async_trait]
impl RecordStore for KubeRecordStore {
    async fn save_status(&self, record: &HostEnrollment) -> Result<(), ControllerError> {
        let (namespace, name) = record_keys(record)?;
        let api = self.api(&namespace);
        let desired = record.status.clone().unwrap_or_default();

        for attempt in 1..=STATUS_UPDATE_ATTEMPTS {
            let mut live = api.get(&name).await?;
            if live.status.as_ref() == Some(&desired) {
                debug!("Status of {}/{} unchanged, skipping update", namespace, name);
                return Ok(());
            }
            live.status = Some(desired.clone());

            match api.replace_status(&name, &PostParams::default(), serde_json::to_vec(&live)?).await
            {
                Ok(_) => return Ok(()),
                Err(kube::Error::Api(ae)) if ae.code == 409 && attempt < STATUS_UPDATE_ATTEMPTS => {
                    debug!(
                        "Status update conflict for {}/{} (attempt {}), retrying",
                        namespace, name, attempt
                    );
                }
                Err(e) => return Err(ControllerError::Kube(e)),
            }
        }
        Err(ControllerError::StatusConflict(format!("{}/{}", namespace, name)))
    }

    async fn ensure_finalizer(&self, record: &HostEnrollment) -> Result<(), ControllerError> {
        let (namespace, name) = record_keys(record)?;
        if record.finalizers().iter().any(|f| f == DISENROLL_FINALIZER) {
            return Ok(());
        }
        let mut finalizers = record.finalizers().to_vec();
        finalizers.push(DISENROLL_FINALIZER.to_string());
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        self.api(&namespace)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, record: &HostEnrollment) -> Result<(), ControllerError> {
        let (namespace, name) = record_keys(record)?;
        let finalizers: Vec<&String> = record
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != DISENROLL_FINALIZER)
            .collect();
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        self.api(&namespace)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
