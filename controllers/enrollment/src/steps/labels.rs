//! Hardware labeling and instance-type matching (the AddLabels step).
//!
//! Combines three sources of hardware facts: the inspection inventory on the
//! host record (memory, NICs), the BMC (CPU, GPU, HBM mode), and DCIM
//! (storage NICs, cluster topology). The derived signature must match a
//! catalog instance type exactly before the host is labeled schedulable.

use crate::error::ControllerError;
use crate::placement::{self, HardwareSignature};
use crate::reconciler::Reconciler;
use crate::steps::StepReport;
use chrono::{DateTime, Utc};
use crds::{HostEnrollment, HostEnrollmentStatus, LABEL_PREFIX};
use gateways::HardwareType;
use std::collections::BTreeMap;
use tracing::info;

/// Command enumerating accelerator NIC devices on a freshly imaged host.
const ACCEL_NIC_COMMAND: &str = "ls -1 /sys/class/infiniband";

impl Reconciler {
    /// Attach hardware labels and the matching instance type to the host.
    pub(crate) async fn add_labels(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let device = record.spec.device.clone();
        let host = self.registered_host(record).await?;
        let namespace = host.metadata.namespace.clone().unwrap_or_default();
        let hardware = host
            .status
            .as_ref()
            .and_then(|s| s.hardware.clone())
            .ok_or_else(|| {
                ControllerError::MissingField(format!("inspection inventory of host {}", device))
            })?;

        let session = self.open_bmc_session(record).await?;
        let cpu = session.cpu_info().await?;
        let gpu = session.gpu_info().await?;
        let hbm_mode = session.hbm_mode().await?.unwrap_or_default();

        let signature = HardwareSignature {
            cpu_id: cpu.id.clone(),
            cpu_count: cpu.sockets * cpu.cores * cpu.threads,
            gpu_model: gpu.model.clone(),
            gpu_count: gpu.count,
            hbm_mode,
            memory: placement::memory_bucket(hardware.ram_mebibytes),
        };
        let labels = placement::hardware_labels(&signature, &cpu);

        let boot_mac = record
            .status
            .as_ref()
            .and_then(|s| s.boot_mac_address.clone());
        let hardware_type = HardwareType::parse(
            record
                .status
                .as_ref()
                .and_then(|s| s.bmc.hardware_type.as_deref())
                .unwrap_or_default(),
        );

        let storage_macs = if hardware_type == HardwareType::Virtual {
            // Virtual rigs have no DCIM records; every inspected NIC but the
            // boot NIC carries storage traffic
            hardware
                .nics
                .iter()
                .filter(|nic| Some(&nic.mac) != boot_mac.as_ref())
                .map(|nic| nic.mac.clone())
                .collect()
        } else {
            let macs = self.dcim.storage_interface_macs(&device).await?;
            for mac in &macs {
                if Some(mac) == boot_mac.as_ref() {
                    return Err(ControllerError::StorageNicMismatch(format!(
                        "storage NIC {} of device {} collides with the boot NIC",
                        mac, device
                    )));
                }
                if !hardware.nics.iter().any(|nic| &nic.mac == mac) {
                    return Err(ControllerError::StorageNicMismatch(format!(
                        "storage NIC {} of device {} is absent from the inspection inventory",
                        mac, device
                    )));
                }
            }
            macs
        };
        let mut annotations = BTreeMap::new();
        for (i, mac) in storage_macs.iter().enumerate() {
            annotations.insert(format!("{}/storage-nic-{}", LABEL_PREFIX, i), mac.clone());
        }

        // Host IP observed by the inspection ramdisk on the boot NIC
        let host_ip = hardware
            .nics
            .iter()
            .find(|nic| Some(&nic.mac) == boot_mac.as_ref())
            .and_then(|nic| nic.ip.clone())
            .or_else(|| record.status.as_ref().and_then(|s| s.host_ip_address.clone()));
        if hardware_type.has_accelerator_nics() {
            if let Some(ip) = &host_ip {
                let key = self.secrets.ssh_private_key().await?;
                let output = self.shell.run(ip, &key, ACCEL_NIC_COMMAND).await?;
                for (i, nic) in output.lines().filter(|l| !l.is_empty()).enumerate() {
                    annotations
                        .insert(format!("{}/accel-nic-{}", LABEL_PREFIX, i), nic.to_string());
                }
            }
        }

        // The raw hardware facts go on first: a host the catalog cannot
        // place still shows what it is
        self.metal
            .attach_host_metadata(&namespace, &device, labels, annotations)
            .await?;

        let types = self.catalog.bare_metal_instance_types().await?;
        let matched = placement::match_instance_type(&signature, &types).ok_or_else(|| {
            ControllerError::NoMatchingInstanceType(format!("device {}: {:?}", device, signature))
        })?;

        let mut type_labels = placement::instance_type_labels(&matched.name);
        if let Some(cluster) = record.spec.cluster.clone() {
            let zone = record.spec.availability_zone.as_deref();
            let size = self.dcim.cluster_size(&cluster, zone).await?;
            let mode = self.dcim.cluster_network_mode(&cluster, zone).await?;
            type_labels.extend(placement::cluster_labels(&cluster, size, &mode));
        }
        self.metal
            .attach_host_metadata(&namespace, &device, type_labels, BTreeMap::new())
            .await?;

        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
        status.host_ip_address = host_ip;
        info!("Labeled device {} as instance type {}", device, matched.name);

        Ok(StepReport::complete_with(format!("instance type {}", matched.name)))
    }
}
