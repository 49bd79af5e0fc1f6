//! BMC discovery and credential rotation (the GetBMCInterface step).
//!
//! Discovers the BMC's MAC and management address through DCIM, opens a
//! session with the factory credentials, detects the hardware family, and
//! rotates the factory credentials into a dedicated admin account.
//!
//! Rotation writes the new credentials to the secret store BEFORE applying
//! them to the BMC, so a crash between the two steps can never lose a
//! password the BMC already accepts. If the BMC rejects the new account the
//! stored entry is rolled back, leaving the factory credentials active.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::steps::{StepReport, ADMIN_USERNAME, BMC_INTERFACE, BOOT_INTERFACE};
use chrono::{DateTime, Utc};
use crds::{HostEnrollment, HostEnrollmentStatus, TriState};
use gateways::{rotated_path, BmcCredentials, BmcSession, GatewayError, RangeKind};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

/// Length of generated BMC admin passwords.
const PASSWORD_LENGTH: usize = 24;

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

impl Reconciler {
    /// Discover the BMC, detect the hardware family, rotate credentials.
    pub(crate) async fn get_bmc_interface(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let device = record.spec.device.clone();
        let region = record.spec.region.clone();
        let rack = record.spec.rack.clone();
        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);

        // BMC MAC from DCIM; virtual rigs carry no BMC interface there and
        // fall back to the shared default credentials path
        if status.bmc.mac.is_none() {
            match self.dcim.interface_mac(&device, BMC_INTERFACE).await {
                Ok(mac) => status.bmc.mac = Some(mac),
                Err(GatewayError::NotFound(_)) => {
                    debug!("Device {} has no BMC interface in DCIM, assuming virtual", device);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if status.bmc.address.is_none() {
            let mac = status.bmc.mac.clone();
            let address = match self.dcim.bmc_url(&device).await {
                Ok(url) => url,
                // Racks without a DCIM-managed BMC URL carry the address as a
                // DHCP reservation in the rack's BMC range
                Err(e @ GatewayError::NotFound(_)) => {
                    let (Some(mac), Some(ipam)) = (mac.as_deref(), self.ipam.as_ref()) else {
                        return Err(e.into());
                    };
                    let range = ipam.find_range(&rack, RangeKind::Bmc).await?;
                    let mut address = None;
                    for scope in &range.dhcp_scopes {
                        if let Some(reservation) = ipam.find_reservation(scope, mac).await? {
                            address = Some(reservation.address);
                            break;
                        }
                    }
                    address.ok_or_else(|| {
                        GatewayError::NotFound(format!("BMC reservation for {}", mac))
                    })?
                }
                Err(e) => return Err(e.into()),
            };
            let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
            status.bmc.address = Some(address);
        }

        let session = self.open_bmc_session(record).await?;
        let hardware_type = session.hardware_type();

        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
        status.bmc.hardware_type = Some(hardware_type.as_str().to_string());

        if self.settings.rotation_enabled && status.bmc.new_admin_account == TriState::Disabled {
            let mac = status.bmc.mac.clone();
            match mac {
                Some(mac) if hardware_type.supports_account_management() => {
                    self.rotate_credentials(&region, &mac, session.as_ref()).await?;
                    let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
                    status.bmc.new_admin_account = TriState::Enabled;
                    // Confirm the BMC accepts the rotated credentials before
                    // the factory ones are considered retired
                    self.open_bmc_session(record).await?;
                    info!("Rotated BMC credentials for device {}", device);
                }
                _ => {
                    status.bmc.new_admin_account = TriState::NotSupported;
                    debug!(
                        "Device {} ({:?}) does not support account rotation",
                        device, hardware_type
                    );
                }
            }
        }

        let metal_address = session.provisioning_address().await?;
        let boot_mac = match session.host_mac().await? {
            Some(mac) => mac,
            None => self.dcim.interface_mac(&device, BOOT_INTERFACE).await?,
        };

        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
        status.bmc.metal_address = Some(metal_address);
        if status.boot_mac_address.is_none() {
            status.boot_mac_address = Some(boot_mac);
        }

        Ok(StepReport::complete())
    }

    /// Store new admin credentials, then apply them to the BMC.
    async fn rotate_credentials(
        &self,
        region: &str,
        mac: &str,
        session: &dyn BmcSession,
    ) -> Result<(), ControllerError> {
        let credentials = BmcCredentials {
            username: ADMIN_USERNAME.to_string(),
            password: generate_password(),
        };
        let path = rotated_path(region, mac);
        self.secrets.put_credentials(&path, &credentials).await?;

        let applied = match session
            .update_account(&credentials.username, &credentials.password)
            .await
        {
            Err(GatewayError::AccountNotFound(_)) => {
                session
                    .create_account(&credentials.username, &credentials.password)
                    .await
            }
            other => other,
        };

        if let Err(e) = applied {
            // The BMC never accepted the new password; remove the stored
            // entry so the factory path stays authoritative
            self.secrets.delete_credentials(&path).await?;
            return Err(e.into());
        }
        Ok(())
    }
}
