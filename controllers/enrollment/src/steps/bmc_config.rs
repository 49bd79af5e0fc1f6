//! Firmware-level BMC configuration (the UpdateBMCConfig step).
//!
//! Runs with whatever credentials rotation left active. The KCS and HCI
//! management interfaces are tri-state: not every family supports them, and
//! an unsupported interface is a terminal observation, not a failure.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::steps::StepReport;
use chrono::{DateTime, Utc};
use crds::{HostEnrollment, HostEnrollmentStatus, TriState};
use gateways::GatewayError;
use tracing::debug;

impl Reconciler {
    /// Apply boot order, NTP, firmware attestation and management interfaces.
    pub(crate) async fn update_bmc_config(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let session = self.open_bmc_session(record).await?;

        session.sanitize_boot_order().await?;
        session.configure_ntp().await?;
        session.verify_firmware_resilience().await?;

        let kcs = match session.enable_kcs().await {
            Ok(()) => TriState::Enabled,
            Err(GatewayError::NotSupported(_)) => TriState::NotSupported,
            Err(e) => return Err(e.into()),
        };
        let hci = match session.enable_hci().await {
            Ok(()) => TriState::Enabled,
            Err(GatewayError::NotSupported(_)) => TriState::NotSupported,
            Err(e) => return Err(e.into()),
        };

        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
        status.bmc.kcs = kcs;
        status.bmc.hci = hci;
        debug!(
            "BMC of device {} configured (kcs: {:?}, hci: {:?})",
            record.spec.device, kcs, hci
        );

        Ok(StepReport::complete())
    }
}
