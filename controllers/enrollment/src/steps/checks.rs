//! Guard and bookkeeping steps: pre-enrollment checks, workflow start and
//! completion, and the pre-disenrollment checks run before a host record is
//! torn down.

use crate::error::ControllerError;
use crate::reconciler::{condition_done, Reconciler};
use crate::steps::StepReport;
use chrono::{DateTime, Utc};
use crds::{ConditionType, HostEnrollment, ProvisioningState};
use tracing::{info, warn};

impl Reconciler {
    /// Validate the record before enrollment touches any collaborator.
    pub(crate) async fn pre_enrollment_checks(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        for (field, value) in [
            ("spec.device", &record.spec.device),
            ("spec.rack", &record.spec.rack),
            ("spec.region", &record.spec.region),
        ] {
            if value.trim().is_empty() {
                return Err(ControllerError::MissingField(field.to_string()));
            }
        }
        if record.spec.availability_zone.is_some() && record.spec.cluster.is_none() {
            return Err(ControllerError::MissingField(
                "spec.cluster (required when availabilityZone is set)".to_string(),
            ));
        }

        // A record resumed mid-workflow must not re-enroll a host that a
        // workload claimed in the meantime
        let registered = record
            .status
            .as_ref()
            .and_then(|s| s.target_namespace.clone());
        if let Some(namespace) = registered {
            if !condition_done(record, ConditionType::Completed) {
                if let Some(host) = self.metal.get_host(&namespace, &record.spec.device).await? {
                    if host.is_consumed() {
                        return Ok(StepReport::skip(format!(
                            "host {}/{} is consumed by a workload",
                            namespace, record.spec.device
                        )));
                    }
                }
            }
        }
        Ok(StepReport::complete())
    }

    /// Mark the workflow as underway.
    pub(crate) async fn starting(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        info!("Starting enrollment of device {}", record.spec.device);
        Ok(StepReport::complete())
    }

    /// Terminal success marker. The engine moved the phase to Ready already;
    /// clear any stale error from earlier retries.
    pub(crate) async fn completed(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        if let Some(status) = record.status.as_mut() {
            status.error_message = None;
        }
        info!("Device {} enrolled", record.spec.device);
        Ok(StepReport::complete())
    }

    /// Decide whether the host record may be deleted, and delete it.
    ///
    /// A host consumed by a workload blocks disenrollment. When no host
    /// record was ever created (or it is already gone) there is nothing to
    /// do and no collaborator is contacted.
    pub(crate) async fn pre_disenrollment_checks(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let Some(namespace) = record
            .status
            .as_ref()
            .and_then(|s| s.target_namespace.clone())
        else {
            return Ok(StepReport::complete_with("no host record was registered"));
        };

        let Some(host) = self.metal.get_host(&namespace, &record.spec.device).await? else {
            return Ok(StepReport::complete_with("host record already gone"));
        };

        if let Some(message) = host.reported_error() {
            return Err(ControllerError::HostReported(message.to_string()));
        }

        // A host mid-cleaning finishes on its own; deleting it now would
        // abort the wipe
        if host.provisioning_state() == ProvisioningState::Deprovisioning {
            return Ok(StepReport::retry(self.settings.poll_delay));
        }

        if host.is_consumed() {
            return Ok(StepReport::skip(format!(
                "host {}/{} is consumed by a workload",
                namespace, record.spec.device
            )));
        }

        let state = host.provisioning_state();
        // TODO: confirm with fleet owners whether a provisioned host should
        // block deletion; this guard admits every state today
        if state != ProvisioningState::Provisioning || state != ProvisioningState::Provisioned {
            warn!(
                "Deleting host record {}/{} in state {:?}",
                namespace, record.spec.device, state
            );
            self.release_network_reservation(record).await?;
            self.metal.delete_host(&namespace, &record.spec.device).await?;
        }

        // Deletion is asynchronous; poll until the record is gone
        Ok(StepReport::retry(self.settings.poll_delay))
    }

    /// Release the boot DHCP reservation taken during registration, if any.
    async fn release_network_reservation(
        &self,
        record: &HostEnrollment,
    ) -> Result<(), ControllerError> {
        let Some(ipam) = self.ipam.as_ref() else {
            return Ok(());
        };
        let Some(mac) = record
            .status
            .as_ref()
            .and_then(|s| s.boot_mac_address.clone())
        else {
            return Ok(());
        };

        let range = ipam
            .find_range(&record.spec.rack, gateways::RangeKind::Provisioning)
            .await?;
        for scope in &range.dhcp_scopes {
            if let Some(reservation) = ipam.find_reservation(scope, &mac).await? {
                ipam.delete_reservation(&reservation).await?;
            }
        }
        Ok(())
    }
}
