//! Provisioning-system registration (the BMHStarting step).
//!
//! Picks the least-loaded host-pool namespace, wires network boot for the
//! host's PXE NIC, mirrors the active BMC credentials into the target
//! namespace, and creates the host record. Re-running the step after a
//! partial pass is safe: every sub-operation checks for existing state
//! before creating anything.

use crate::error::ControllerError;
use crate::placement;
use crate::reconciler::Reconciler;
use crate::steps::{StepReport, BOOT_FILENAME};
use chrono::{DateTime, Utc};
use crds::{
    BareMetalHost, BareMetalHostSpec, BmcAccess, HostEnrollment, HostEnrollmentStatus,
    RootDeviceHints,
};
use gateways::{GatewayError, HardwareType, RangeKind};
use kube::api::ObjectMeta;
use tracing::info;

impl Reconciler {
    /// Register the host with the provisioning system.
    pub(crate) async fn bmh_starting(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let device = record.spec.device.clone();
        self.select_namespace(record).await?;

        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
        let namespace = status
            .target_namespace
            .clone()
            .ok_or_else(|| ControllerError::MissingField("status.targetNamespace".to_string()))?;
        let secret_name = record.bmc_secret_name();

        if self.metal.get_host(&namespace, &device).await?.is_some() {
            let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
            status.bmc.credentials_secret = Some(secret_name);
            return Ok(StepReport::complete_with("host record already registered"));
        }

        self.wire_network_boot(record).await?;

        let credentials = self.active_credentials(record).await?;
        self.metal
            .apply_credentials_secret(
                &namespace,
                &secret_name,
                &credentials.username,
                &credentials.password,
                None,
            )
            .await?;

        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
        status.bmc.credentials_secret = Some(secret_name.clone());

        let hardware_type =
            HardwareType::parse(status.bmc.hardware_type.as_deref().unwrap_or_default());
        let boot_mac = status
            .boot_mac_address
            .clone()
            .ok_or_else(|| ControllerError::MissingField("status.bootMacAddress".to_string()))?;
        let metal_address = status
            .bmc
            .metal_address
            .clone()
            .ok_or_else(|| ControllerError::MissingField("status.bmc.metalAddress".to_string()))?;

        let host = BareMetalHost {
            metadata: ObjectMeta {
                name: Some(device.clone()),
                namespace: Some(namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: BareMetalHostSpec {
                online: true,
                boot_mac_address: Some(boot_mac),
                boot_mode: Some(hardware_type.boot_mode().to_string()),
                bmc: Some(BmcAccess {
                    address: metal_address,
                    credentials_name: secret_name.clone(),
                    disable_certificate_verification: self.settings.bmc_insecure,
                }),
                image: None,
                root_device_hints: Some(RootDeviceHints {
                    device_name: Some(hardware_type.root_device_hint().to_string()),
                }),
                consumer_ref: None,
            },
            status: None,
        };
        let created = self.metal.create_host(&host).await?;
        // The secret predates the host; re-apply it so the host record owns
        // it and deletion cascades
        self.metal
            .apply_credentials_secret(
                &namespace,
                &secret_name,
                &credentials.username,
                &credentials.password,
                Some(&created),
            )
            .await?;
        info!("Registered host record {}/{}", namespace, device);

        Ok(StepReport::complete())
    }

    /// Pick the least-loaded host-pool namespace, once per record.
    async fn select_namespace(&self, record: &mut HostEnrollment) -> Result<(), ControllerError> {
        if record
            .status
            .as_ref()
            .is_some_and(|s| s.target_namespace.is_some())
        {
            return Ok(());
        }

        let namespaces = self.metal.list_host_pool_namespaces().await?;
        let mut loads = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            let count = self.metal.list_hosts(&namespace.name).await?.len();
            loads.push((namespace, count));
        }
        let selected = placement::select_target_namespace(&loads).ok_or_else(|| {
            ControllerError::Gateway(GatewayError::NotFound(
                "no host-pool namespaces available".to_string(),
            ))
        })?;

        info!(
            "Placing device {} into namespace {} ({} hosts)",
            record.spec.device,
            selected.name,
            loads
                .iter()
                .find(|(ns, _)| ns.name == selected.name)
                .map(|(_, c)| *c)
                .unwrap_or_default()
        );
        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
        status.target_namespace = Some(selected.name.clone());
        status.ironic_ip_address = selected.ironic_ip.clone();
        Ok(())
    }

    /// Point the host's PXE NIC at the namespace's provisioning endpoint.
    async fn wire_network_boot(&self, record: &mut HostEnrollment) -> Result<(), ControllerError> {
        let boot_mac = record
            .status
            .as_ref()
            .and_then(|s| s.boot_mac_address.clone())
            .ok_or_else(|| ControllerError::MissingField("status.bootMacAddress".to_string()))?;
        let ironic_ip = record
            .status
            .as_ref()
            .and_then(|s| s.ironic_ip_address.clone());

        if let Some(ipam) = self.ipam.as_ref() {
            let range = ipam
                .find_range(&record.spec.rack, RangeKind::Provisioning)
                .await?;
            let scope = range.dhcp_scopes.first().cloned().ok_or_else(|| {
                ControllerError::Gateway(GatewayError::NotFound(format!(
                    "DHCP scope for rack {}",
                    record.spec.rack
                )))
            })?;

            let reservation = match ipam.find_reservation(&scope, &boot_mac).await? {
                Some(reservation) => reservation,
                None => {
                    let address = ipam.next_free_address(&range).await?;
                    ipam.create_reservation(&scope, &boot_mac, &address, &record.spec.device)
                        .await?
                }
            };
            if let Some(ironic_ip) = &ironic_ip {
                ipam.set_reservation_options(&reservation, BOOT_FILENAME, ironic_ip)
                    .await?;
            }
            let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
            status.host_ip_address = Some(reservation.address);
        } else if let (Some(proxy), Some(ironic_ip)) = (self.dhcp_proxy.as_ref(), &ironic_ip) {
            proxy.register_boot_mapping(&boot_mac, ironic_ip).await?;
        }
        Ok(())
    }
}
