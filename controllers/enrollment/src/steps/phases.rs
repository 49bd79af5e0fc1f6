//! Polling steps that follow the provisioning system's state machine:
//! registration, inspection, validation provisioning, deprovisioning, and
//! the final enrolled check.
//!
//! Any error the provisioning system reports on the host record surfaces
//! verbatim so operators see the original message, not a paraphrase.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::steps::StepReport;
use chrono::{DateTime, Utc};
use crds::{BareMetalHost, HostEnrollment, ProvisioningState};
use gateways::GatewayError;
use tracing::debug;

impl Reconciler {
    /// Fetch the registered host record, failing when it is missing.
    pub(crate) async fn registered_host(
        &self,
        record: &HostEnrollment,
    ) -> Result<BareMetalHost, ControllerError> {
        let namespace = record
            .status
            .as_ref()
            .and_then(|s| s.target_namespace.clone())
            .ok_or_else(|| ControllerError::MissingField("status.targetNamespace".to_string()))?;
        self.metal
            .get_host(&namespace, &record.spec.device)
            .await?
            .ok_or_else(|| {
                ControllerError::Gateway(GatewayError::NotFound(format!(
                    "host record {}/{}",
                    namespace, record.spec.device
                )))
            })
    }

    fn checked_state(&self, host: &BareMetalHost) -> Result<ProvisioningState, ControllerError> {
        if let Some(message) = host.reported_error() {
            return Err(ControllerError::HostReported(message.to_string()));
        }
        Ok(host.provisioning_state())
    }

    /// Wait until the provisioning system accepted the registration.
    pub(crate) async fn bmh_registering(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let host = self.registered_host(record).await?;
        match self.checked_state(&host)? {
            ProvisioningState::None | ProvisioningState::Registering => {
                Ok(StepReport::retry(self.settings.poll_delay))
            }
            state => {
                debug!("Device {} registered (state {:?})", record.spec.device, state);
                Ok(StepReport::complete())
            }
        }
    }

    /// Wait for hardware inspection to finish.
    pub(crate) async fn bmh_inspecting(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let host = self.registered_host(record).await?;
        match self.checked_state(&host)? {
            ProvisioningState::Available
            | ProvisioningState::Provisioning
            | ProvisioningState::Provisioned => Ok(StepReport::complete()),
            state => {
                debug!("Device {} still inspecting (state {:?})", record.spec.device, state);
                Ok(StepReport::retry(self.settings.poll_delay))
            }
        }
    }

    /// Provision the validation image and wait for it to boot.
    pub(crate) async fn bmh_provisioning(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let host = self.registered_host(record).await?;
        match self.checked_state(&host)? {
            ProvisioningState::Provisioned => Ok(StepReport::complete()),
            ProvisioningState::Available if host.spec.image.is_none() => {
                let namespace = host.metadata.namespace.clone().unwrap_or_default();
                self.metal
                    .set_host_image(
                        &namespace,
                        &record.spec.device,
                        Some(self.settings.validation_image.clone()),
                    )
                    .await?;
                debug!("Validation image attached to device {}", record.spec.device);
                Ok(StepReport::retry(self.settings.poll_delay))
            }
            _ => Ok(StepReport::retry(self.settings.poll_delay)),
        }
    }

    /// Remove the validation image again and wait for cleaning.
    pub(crate) async fn bmh_deprovisioning(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let host = self.registered_host(record).await?;
        match self.checked_state(&host)? {
            ProvisioningState::Available | ProvisioningState::Preparing => {
                Ok(StepReport::complete())
            }
            ProvisioningState::Provisioned if host.spec.image.is_some() => {
                let namespace = host.metadata.namespace.clone().unwrap_or_default();
                self.metal
                    .set_host_image(&namespace, &record.spec.device, None)
                    .await?;
                debug!("Validation image detached from device {}", record.spec.device);
                Ok(StepReport::retry(self.settings.poll_delay))
            }
            _ => Ok(StepReport::retry(self.settings.poll_delay)),
        }
    }

    /// Verify the host record ended up clean and unconsumed.
    pub(crate) async fn bmh_enrolled(
        &self,
        record: &mut HostEnrollment,
        _now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        let host = self.registered_host(record).await?;
        if host.is_consumed() {
            return Ok(StepReport::skip(format!(
                "host record for {} is already consumed by a workload",
                record.spec.device
            )));
        }
        // Unlike the earlier polling steps, a reported error here is not
        // final; the provisioning system clears it once the host settles
        let clean = host.reported_error().is_none()
            && host.status.as_ref().map(|s| s.error_count).unwrap_or_default() == 0;
        match host.provisioning_state() {
            ProvisioningState::Available if clean => Ok(StepReport::complete()),
            _ => Ok(StepReport::retry(self.settings.poll_delay)),
        }
    }
}
