//! Reconciliation engine for HostEnrollment records.
//!
//! One pass walks the enrollment steps in order, skipping completed ones,
//! until a step reports it is waiting (requeue), the workflow finishes, or
//! something fails. The engine owns all condition bookkeeping and status
//! persistence; steps only mutate the in-memory record and report back.
//!
//! Every pass reads the clock exactly once and threads that reading through
//! all condition updates, so one pass's timestamps are mutually consistent
//! and tests can drive the engine with a synthetic clock.

use crate::backoff::FibonacciBackoff;
use crate::config::EngineSettings;
use crate::error::ControllerError;
use crate::steps::{StepOutcome, StepReport};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use crds::conditions::{self, ConditionReason, ConditionType, ALL_CONDITION_TYPES};
use crds::{EnrollmentPhase, HostEnrollment, HostEnrollmentStatus};
use crds::TriState;
use gateways::{
    factory_path, rotated_path, BmcClient, BmcCredentials, BmcSession, CatalogClient, DcimClient,
    DhcpProxy, GatewayError, IpamClient, MetalClient, RemoteShell, SecretStore,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Enrollment steps in execution order.
///
/// `Failed` and `PreDisenrollmentChecks` are not part of the forward
/// workflow; the engine sets them out of band.
pub const ENROLLMENT_STEPS: [ConditionType; 12] = [
    ConditionType::PreEnrollmentChecks,
    ConditionType::Starting,
    ConditionType::GetBMCInterface,
    ConditionType::UpdateBMCConfig,
    ConditionType::BMHStarting,
    ConditionType::BMHRegistering,
    ConditionType::BMHInspecting,
    ConditionType::BMHProvisioning,
    ConditionType::BMHDeprovisioning,
    ConditionType::BMHEnrolled,
    ConditionType::AddLabels,
    ConditionType::Completed,
];

/// Phase shown while a step is running.
fn phase_for_step(step: ConditionType) -> EnrollmentPhase {
    match step {
        ConditionType::PreEnrollmentChecks | ConditionType::Starting => EnrollmentPhase::Starting,
        ConditionType::GetBMCInterface => EnrollmentPhase::GetBMCInterface,
        ConditionType::UpdateBMCConfig => EnrollmentPhase::UpdateBMCConfig,
        ConditionType::BMHStarting
        | ConditionType::BMHRegistering
        | ConditionType::BMHInspecting
        | ConditionType::BMHProvisioning
        | ConditionType::BMHDeprovisioning
        | ConditionType::BMHEnrolled => EnrollmentPhase::Enrolling,
        ConditionType::AddLabels => EnrollmentPhase::BMHLabels,
        ConditionType::Completed => EnrollmentPhase::Ready,
        ConditionType::Failed => EnrollmentPhase::Failed,
        ConditionType::PreDisenrollmentChecks => EnrollmentPhase::Disenrolling,
    }
}

/// What the watcher should do after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing left to do until the record changes
    Done,
    /// Re-run the workflow after the delay
    RequeueAfter(Duration),
}

/// Backoff state for a record.
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10),
            error_count: 0,
        }
    }
}

/// Reconciles HostEnrollment records.
pub struct Reconciler {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) metal: Arc<dyn MetalClient>,
    pub(crate) bmc: Arc<dyn BmcClient>,
    pub(crate) dcim: Arc<dyn DcimClient>,
    pub(crate) ipam: Option<Arc<dyn IpamClient>>,
    pub(crate) dhcp_proxy: Option<Arc<dyn DhcpProxy>>,
    pub(crate) secrets: Arc<dyn SecretStore>,
    pub(crate) catalog: Arc<dyn CatalogClient>,
    pub(crate) shell: Arc<dyn RemoteShell>,
    pub(crate) settings: EngineSettings,
    /// Error count tracking per record (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

/// Collaborator gateways the reconciler drives, bundled for construction.
pub struct Gateways {
    pub store: Arc<dyn RecordStore>,
    pub metal: Arc<dyn MetalClient>,
    pub bmc: Arc<dyn BmcClient>,
    pub dcim: Arc<dyn DcimClient>,
    pub ipam: Option<Arc<dyn IpamClient>>,
    pub dhcp_proxy: Option<Arc<dyn DhcpProxy>>,
    pub secrets: Arc<dyn SecretStore>,
    pub catalog: Arc<dyn CatalogClient>,
    pub shell: Arc<dyn RemoteShell>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(gateways: Gateways, settings: EngineSettings) -> Self {
        Self {
            store: gateways.store,
            metal: gateways.metal,
            bmc: gateways.bmc,
            dcim: gateways.dcim,
            ipam: gateways.ipam,
            dhcp_proxy: gateways.dhcp_proxy,
            secrets: gateways.secrets,
            catalog: gateways.catalog,
            shell: gateways.shell,
            settings,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reconcile a record against the current wall clock.
    pub async fn reconcile(
        &self,
        record: &HostEnrollment,
    ) -> Result<ReconcileOutcome, ControllerError> {
        self.reconcile_at(record.clone(), Utc::now()).await
    }

    /// Reconcile with an explicit clock reading.
    ///
    /// The status is persisted exactly once at the end of the pass, including
    /// when a step failed, so retry reasons survive on the record.
    pub async fn reconcile_at(
        &self,
        mut record: HostEnrollment,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let outcome = if record.metadata.deletion_timestamp.is_some() {
            self.disenroll(&mut record, now).await
        } else {
            self.enroll(&mut record, now).await
        };

        let saved = self.store.save_status(&record).await;
        match outcome {
            Ok(outcome) => {
                saved?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(save_err) = saved {
                    warn!("Failed to persist status after step error: {}", save_err);
                }
                Err(e)
            }
        }
    }

    /// Run the forward enrollment workflow.
    async fn enroll(
        &self,
        record: &mut HostEnrollment,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ControllerError> {
        self.store.ensure_finalizer(record).await?;

        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
        for step in ALL_CONDITION_TYPES {
            conditions::set_if_missing(&mut status.conditions, step);
        }
        if condition_done(record, ConditionType::Failed) {
            return Ok(ReconcileOutcome::Done);
        }

        for step in ENROLLMENT_STEPS {
            if condition_done(record, step) {
                continue;
            }

            self.mark_started(record, step, now);
            if let Some(elapsed) = self.elapsed_budget(record, step, now) {
                let message = self.fail_timeout(record, step, elapsed, now);
                return Err(ControllerError::StepTimeout(message));
            }

            debug!("Running step {:?} for {}", step, record_key(record));

            match self.dispatch(step, record, now).await {
                // Gateway failures are transient: record the reason and come
                // back after the delay instead of surfacing an error
                Err(ControllerError::Gateway(e)) => {
                    let delay = self.settings.requeue_delay;
                    warn!(
                        "Step {:?} for {} hit a gateway error, retrying in {:?}: {}",
                        step,
                        record_key(record),
                        delay,
                        e
                    );
                    self.apply_report(
                        record,
                        step,
                        &StepReport::retry_with(ConditionReason::GatewayError, e.to_string(), delay),
                        now,
                    );
                    return Ok(ReconcileOutcome::RequeueAfter(delay));
                }
                Err(e) => {
                    self.apply_report(
                        record,
                        step,
                        &StepReport {
                            outcome: StepOutcome::Continue,
                            status: false,
                            reason: ConditionReason::Fatal,
                            message: e.to_string(),
                        },
                        now,
                    );
                    return Err(e);
                }
                Ok(report) => {
                    self.apply_report(record, step, &report, now);
                    match report.outcome {
                        StepOutcome::Continue => {
                            set_phase(record, phase_for_step(step));
                        }
                        // A waiting step leaves the phase where it was
                        StepOutcome::Requeue(delay) => {
                            return Ok(ReconcileOutcome::RequeueAfter(delay));
                        }
                        StepOutcome::Skip(message) => {
                            self.mark_skipped(record, &message, now);
                            return Ok(ReconcileOutcome::Done);
                        }
                    }
                }
            }
        }

        info!("Enrollment of {} complete", record_key(record));
        Ok(ReconcileOutcome::Done)
    }

    /// Run the disenrollment workflow for a record being deleted.
    async fn disenroll(
        &self,
        record: &mut HostEnrollment,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ControllerError> {
        if !record
            .metadata
            .finalizers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|f| f == crds::DISENROLL_FINALIZER)
        {
            return Ok(ReconcileOutcome::Done);
        }

        let step = ConditionType::PreDisenrollmentChecks;
        let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
        conditions::set_if_missing(&mut status.conditions, step);
        set_phase(record, EnrollmentPhase::Disenrolling);

        self.mark_started(record, step, now);
        if let Some(elapsed) = self.elapsed_budget(record, step, now) {
            let message = self.fail_timeout(record, step, elapsed, now);
            return Err(ControllerError::StepTimeout(message));
        }

        match self.pre_disenrollment_checks(record, now).await {
            Err(ControllerError::Gateway(e)) => {
                let delay = self.settings.requeue_delay;
                warn!(
                    "Disenrollment of {} hit a gateway error, retrying in {:?}: {}",
                    record_key(record),
                    delay,
                    e
                );
                self.apply_report(
                    record,
                    step,
                    &StepReport::retry_with(ConditionReason::GatewayError, e.to_string(), delay),
                    now,
                );
                Ok(ReconcileOutcome::RequeueAfter(delay))
            }
            Err(e) => {
                self.apply_report(
                    record,
                    step,
                    &StepReport {
                        outcome: StepOutcome::Continue,
                        status: false,
                        reason: ConditionReason::Fatal,
                        message: e.to_string(),
                    },
                    now,
                );
                Err(e)
            }
            Ok(report) => {
                self.apply_report(record, step, &report, now);
                match report.outcome {
                    StepOutcome::Continue => {
                        info!("Disenrollment of {} complete, releasing finalizer", record_key(record));
                        self.store.remove_finalizer(record).await?;
                        Ok(ReconcileOutcome::Done)
                    }
                    StepOutcome::Requeue(delay) => Ok(ReconcileOutcome::RequeueAfter(delay)),
                    // A consumed host blocks deletion for good; the finalizer
                    // stays so the record survives until an operator steps in
                    StepOutcome::Skip(message) => {
                        self.mark_skipped(record, &message, now);
                        Ok(ReconcileOutcome::Done)
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        step: ConditionType,
        record: &mut HostEnrollment,
        now: DateTime<Utc>,
    ) -> Result<StepReport, ControllerError> {
        match step {
            ConditionType::PreEnrollmentChecks => self.pre_enrollment_checks(record, now).await,
            ConditionType::Starting => self.starting(record, now).await,
            ConditionType::GetBMCInterface => self.get_bmc_interface(record, now).await,
            ConditionType::UpdateBMCConfig => self.update_bmc_config(record, now).await,
            ConditionType::BMHStarting => self.bmh_starting(record, now).await,
            ConditionType::BMHRegistering => self.bmh_registering(record, now).await,
            ConditionType::BMHInspecting => self.bmh_inspecting(record, now).await,
            ConditionType::BMHProvisioning => self.bmh_provisioning(record, now).await,
            ConditionType::BMHDeprovisioning => self.bmh_deprovisioning(record, now).await,
            ConditionType::BMHEnrolled => self.bmh_enrolled(record, now).await,
            ConditionType::AddLabels => self.add_labels(record, now).await,
            ConditionType::Completed => self.completed(record, now).await,
            ConditionType::Failed | ConditionType::PreDisenrollmentChecks => {
                Err(ControllerError::InvalidConfig(format!(
                    "{:?} is not a forward workflow step",
                    step
                )))
            }
        }
    }

    /// Anchor the step's timeout clock on its first run.
    fn mark_started(&self, record: &mut HostEnrollment, step: ConditionType, now: DateTime<Utc>) {
        let conds = conditions_mut(record);
        let needs_anchor = conditions::find(conds, step).is_none_or(|c| c.start_time.is_none());
        if needs_anchor {
            conditions::set(conds, step, false, ConditionReason::Started, "", true, now);
        }
    }

    /// Time spent over the step's budget, if the budget is exhausted.
    fn elapsed_budget(
        &self,
        record: &HostEnrollment,
        step: ConditionType,
        now: DateTime<Utc>,
    ) -> Option<chrono::Duration> {
        let start = record
            .status
            .as_ref()
            .and_then(|s| conditions::find(&s.conditions, step))
            .and_then(|c| c.start_time)?;
        let budget = chrono::Duration::from_std(self.settings.timeouts.for_step(step)).ok()?;
        let elapsed = now.signed_duration_since(start);
        (elapsed > budget).then_some(elapsed)
    }

    /// Record an exhausted step budget as terminal and return the message.
    fn fail_timeout(
        &self,
        record: &mut HostEnrollment,
        step: ConditionType,
        elapsed: chrono::Duration,
        now: DateTime<Utc>,
    ) -> String {
        let message = format!(
            "step {:?} exceeded its budget after {}m",
            step,
            elapsed.num_minutes()
        );
        warn!("{}: {}", record_key(record), message);
        let conds = conditions_mut(record);
        conditions::set(conds, step, false, ConditionReason::TimedOut, message.clone(), false, now);
        conditions::set(
            conds,
            ConditionType::Failed,
            true,
            ConditionReason::TimedOut,
            message.clone(),
            true,
            now,
        );
        set_phase(record, EnrollmentPhase::Failed);
        if let Some(status) = record.status.as_mut() {
            status.error_message = Some(message.clone());
        }
        message
    }

    /// Record a terminal skip: the host cannot proceed, but nothing failed in
    /// a retryable way.
    fn mark_skipped(&self, record: &mut HostEnrollment, message: &str, now: DateTime<Utc>) {
        warn!("{}: stopping workflow: {}", record_key(record), message);
        conditions::set(
            conditions_mut(record),
            ConditionType::Failed,
            true,
            ConditionReason::HostConsumed,
            message,
            true,
            now,
        );
        set_phase(record, EnrollmentPhase::Failed);
        if let Some(status) = record.status.as_mut() {
            status.error_message = Some(message.to_string());
        }
    }

    fn apply_report(
        &self,
        record: &mut HostEnrollment,
        step: ConditionType,
        report: &StepReport,
        now: DateTime<Utc>,
    ) {
        conditions::set(
            conditions_mut(record),
            step,
            report.status,
            report.reason,
            report.message.clone(),
            false,
            now,
        );
    }

    /// Read the credentials the BMC currently accepts.
    ///
    /// Rotated admin credentials once rotation happened, factory credentials
    /// otherwise. Missing credentials are a retryable gateway error.
    pub(crate) async fn active_credentials(
        &self,
        record: &HostEnrollment,
    ) -> Result<BmcCredentials, ControllerError> {
        let region = &record.spec.region;
        let bmc = record.status.as_ref().map(|s| &s.bmc);
        let mac = bmc.and_then(|b| b.mac.as_deref());

        let path = match (bmc.map(|b| b.new_admin_account), mac) {
            (Some(TriState::Enabled), Some(mac)) => rotated_path(region, mac),
            _ => factory_path(region, mac),
        };
        self.secrets
            .get_credentials(&path)
            .await?
            .ok_or_else(|| ControllerError::Gateway(GatewayError::NotFound(path)))
    }

    /// Open a BMC session with the active credentials.
    pub(crate) async fn open_bmc_session(
        &self,
        record: &HostEnrollment,
    ) -> Result<Box<dyn BmcSession>, ControllerError> {
        let address = record
            .status
            .as_ref()
            .and_then(|s| s.bmc.address.clone())
            .ok_or_else(|| ControllerError::MissingField("status.bmc.address".to_string()))?;
        let credentials = self.active_credentials(record).await?;
        let session = self
            .bmc
            .open_session(&address, &credentials.username, &credentials.password)
            .await?;
        Ok(session)
    }

    /// Get the next error backoff for a record and bump its error count.
    pub fn error_backoff(&self, record_key: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(record_key.to_string())
                    .or_insert_with(BackoffState::new);
                state.error_count += 1;
                state.backoff.next_backoff()
            }
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                Duration::from_secs(60)
            }
        }
    }

    /// Forget a record's error history after a successful pass.
    pub fn reset_backoff(&self, record_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(record_key);
        }
    }
}

pub(crate) fn conditions_mut(record: &mut HostEnrollment) -> &mut Vec<crds::EnrollmentCondition> {
    &mut record
        .status
        .get_or_insert_with(HostEnrollmentStatus::default)
        .conditions
}

pub(crate) fn condition_done(record: &HostEnrollment, step: ConditionType) -> bool {
    record
        .status
        .as_ref()
        .and_then(|s| conditions::find(&s.conditions, step))
        .is_some_and(|c| c.status)
}

pub(crate) fn set_phase(record: &mut HostEnrollment, phase: EnrollmentPhase) {
    record
        .status
        .get_or_insert_with(HostEnrollmentStatus::default)
        .phase = phase;
}

/// "namespace/name" logging key of a record.
pub(crate) fn record_key(record: &HostEnrollment) -> String {
    format!(
        "{}/{}",
        record.metadata.namespace.as_deref().unwrap_or("default"),
        record.metadata.name.as_deref().unwrap_or("")
    )
}
