//! Shared fixtures for engine tests.

use crate::config::EngineSettings;
use crate::error::ControllerError;
use crate::reconciler::{Gateways, Reconciler};
use crate::store::RecordStore;
use crds::{HostEnrollment, HostEnrollmentSpec, DISENROLL_FINALIZER};
use gateways::mock::{
    MockBmc, MockCatalog, MockDcim, MockDhcpProxy, MockIpam, MockMetal, MockSecretStore, MockShell,
};
use kube::api::ObjectMeta;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Record store backed by a map, with the same skip-on-no-op semantics as
/// the cluster-backed store.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<Mutex<HashMap<(String, String), HostEnrollment>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record (for test setup).
    pub fn insert(&self, record: HostEnrollment) {
        let key = key_of(&record);
        self.records.lock().unwrap().insert(key, record);
    }

    /// Stored copy of a record.
    pub fn record(&self, namespace: &str, name: &str) -> Option<HostEnrollment> {
        self.records
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

fn key_of(record: &HostEnrollment) -> (String, String) {
    (
        record.metadata.namespace.clone().unwrap_or_default(),
        record.metadata.name.clone().unwrap_or_default(),
    )
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn save_status(&self, record: &HostEnrollment) -> Result<(), ControllerError> {
        let key = key_of(record);
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&key) {
            Some(stored) => stored.status = record.status.clone(),
            None => {
                records.insert(key, record.clone());
            }
        }
        Ok(())
    }

    async fn ensure_finalizer(&self, record: &HostEnrollment) -> Result<(), ControllerError> {
        let key = key_of(record);
        let mut records = self.records.lock().unwrap();
        let stored = records.entry(key).or_insert_with(|| record.clone());
        let finalizers = stored.metadata.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == DISENROLL_FINALIZER) {
            finalizers.push(DISENROLL_FINALIZER.to_string());
        }
        Ok(())
    }

    async fn remove_finalizer(&self, record: &HostEnrollment) -> Result<(), ControllerError> {
        let key = key_of(record);
        let mut records = self.records.lock().unwrap();
        if let Some(stored) = records.get_mut(&key) {
            if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != DISENROLL_FINALIZER);
            }
        }
        Ok(())
    }
}

/// An engine wired to mock gateways, with handles onto every mock so tests
/// can seed state and assert calls.
pub struct Harness {
    pub store: InMemoryRecordStore,
    pub metal: MockMetal,
    pub bmc: MockBmc,
    pub dcim: MockDcim,
    pub ipam: MockIpam,
    pub dhcp_proxy: MockDhcpProxy,
    pub secrets: MockSecretStore,
    pub catalog: MockCatalog,
    pub shell: MockShell,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let store = InMemoryRecordStore::new();
        let metal = MockMetal::new();
        let bmc = MockBmc::new();
        let dcim = MockDcim::new();
        let ipam = MockIpam::new();
        let dhcp_proxy = MockDhcpProxy::new();
        let secrets = MockSecretStore::new();
        let catalog = MockCatalog::new();
        let shell = MockShell::new();

        let reconciler = Reconciler::new(
            Gateways {
                store: Arc::new(store.clone()),
                metal: Arc::new(metal.clone()),
                bmc: Arc::new(bmc.clone()),
                dcim: Arc::new(dcim.clone()),
                ipam: Some(Arc::new(ipam.clone())),
                dhcp_proxy: Some(Arc::new(dhcp_proxy.clone())),
                secrets: Arc::new(secrets.clone()),
                catalog: Arc::new(catalog.clone()),
                shell: Arc::new(shell.clone()),
            },
            settings,
        );

        Self {
            store,
            metal,
            bmc,
            dcim,
            ipam,
            dhcp_proxy,
            secrets,
            catalog,
            shell,
            reconciler,
        }
    }
}

/// A minimal HostEnrollment record in namespace `default`.
pub fn test_enrollment(name: &str, device: &str, rack: &str, region: &str) -> HostEnrollment {
    let mut record = HostEnrollment::new(
        name,
        HostEnrollmentSpec {
            device: device.to_string(),
            rack: rack.to_string(),
            region: region.to_string(),
            cluster: None,
            availability_zone: None,
        },
    );
    record.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        ..ObjectMeta::default()
    };
    record
}
