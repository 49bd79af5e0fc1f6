//! Condition store for HostEnrollment records
//!
//! Typed accessors over the ordered list of step conditions attached to a
//! HostEnrollment status. Pure data manipulation, no I/O, no error returns;
//! the reconciliation engine threads a single clock reading through each
//! invocation so timestamps stay consistent within one pass.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The fixed set of workflow steps tracked as conditions.
///
/// One condition per type; the engine bootstraps all of them to
/// `false`/`Reason::None` on a record's first pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionType {
    /// Guard checks before enrollment touches anything
    PreEnrollmentChecks,
    /// Workflow started
    Starting,
    /// BMC discovery and credential rotation
    GetBMCInterface,
    /// Firmware-level BMC configuration
    UpdateBMCConfig,
    /// Host record created in the provisioning system
    BMHStarting,
    /// Provisioning system registered the host
    BMHRegistering,
    /// Hardware inspection finished
    BMHInspecting,
    /// Validation image provisioned
    BMHProvisioning,
    /// Validation image removed again
    BMHDeprovisioning,
    /// Host record validated clean
    BMHEnrolled,
    /// Hardware labels attached
    AddLabels,
    /// Terminal success marker
    Completed,
    /// Terminal failure marker
    Failed,
    /// Guard checks before the host record is deleted
    PreDisenrollmentChecks,
}

/// All condition types in enrollment execution order, terminals last.
pub const ALL_CONDITION_TYPES: [ConditionType; 14] = [
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
    ConditionType::Failed,
    ConditionType::PreDisenrollmentChecks,
];

/// Why a condition is in its current state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ConditionReason {
    /// Step never ran
    #[default]
    None,
    /// Step is running; start time anchors the timeout clock
    Started,
    /// Step's terminal success branch ran
    Completed,
    /// Per-step wall-clock budget exceeded
    TimedOut,
    /// A collaborator call failed transiently, step will be retried
    GatewayError,
    /// The hardware does not support the step's operation
    NotSupported,
    /// Host is already consumed by a workload, engine stopped without failing
    HostConsumed,
    /// Unrecoverable error, surfaced to the scheduler
    Fatal,
}

/// A named, timestamped boolean sub-status tracking one workflow step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentCondition {
    /// Which step this condition tracks
    pub r#type: ConditionType,

    /// True once the step's terminal success branch ran
    pub status: bool,

    /// Why the condition is in its current state
    #[serde(default)]
    pub reason: ConditionReason,

    /// Operator-facing detail
    #[serde(default)]
    pub message: String,

    /// When the step first transitioned to running; anchors the timeout clock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// Last time the engine evaluated this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<DateTime<Utc>>,

    /// Last time `status` flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl EnrollmentCondition {
    /// Default condition for a step that never ran.
    pub fn unstarted(r#type: ConditionType) -> Self {
        Self {
            r#type,
            status: false,
            reason: ConditionReason::None,
            message: String::new(),
            start_time: None,
            last_probe_time: None,
            last_transition_time: None,
        }
    }
}

/// Find the condition for a step, if present.
pub fn find(conditions: &[EnrollmentCondition], r#type: ConditionType) -> Option<&EnrollmentCondition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Mutable variant of [`find`].
pub fn find_mut(
    conditions: &mut [EnrollmentCondition],
    r#type: ConditionType,
) -> Option<&mut EnrollmentCondition> {
    conditions.iter_mut().find(|c| c.r#type == r#type)
}

/// Insert a default `false`/`Reason::None` condition unless one already exists.
///
/// Used by the engine to bootstrap a fresh record's condition set.
pub fn set_if_missing(conditions: &mut Vec<EnrollmentCondition>, r#type: ConditionType) {
    if find(conditions, r#type).is_none() {
        conditions.push(EnrollmentCondition::unstarted(r#type));
    }
}

/// Update a step's condition.
///
/// `status`, `reason`, `message` and `last_probe_time` are written
/// unconditionally. `last_transition_time` moves only when `status` changes.
/// `start_time` is written only when `reset_start_time` is set; repeated
/// polling of a running step must not move its timeout anchor.
pub fn set(
    conditions: &mut Vec<EnrollmentCondition>,
    r#type: ConditionType,
    status: bool,
    reason: ConditionReason,
    message: impl Into<String>,
    reset_start_time: bool,
    now: DateTime<Utc>,
) {
    set_if_missing(conditions, r#type);
    // set_if_missing guarantees presence
    let Some(cond) = find_mut(conditions, r#type) else {
        return;
    };
    if cond.status != status {
        cond.last_transition_time = Some(now);
    }
    if reset_start_time {
        cond.start_time = Some(now);
    }
    cond.status = status;
    cond.reason = reason;
    cond.message = message.into();
    cond.last_probe_time = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_set_if_missing_inserts_default_once() {
        let mut conditions = Vec::new();
        set_if_missing(&mut conditions, ConditionType::Starting);
        set_if_missing(&mut conditions, ConditionType::Starting);

        assert_eq!(conditions.len(), 1);
        let cond = find(&conditions, ConditionType::Starting).unwrap();
        assert!(!cond.status);
        assert_eq!(cond.reason, ConditionReason::None);
        assert!(cond.start_time.is_none());
    }

    #[test]
    fn test_set_preserves_start_time_without_reset() {
        let mut conditions = Vec::new();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);

        set(
            &mut conditions,
            ConditionType::BMHRegistering,
            false,
            ConditionReason::Started,
            "registering",
            true,
            t0,
        );
        set(
            &mut conditions,
            ConditionType::BMHRegistering,
            false,
            ConditionReason::GatewayError,
            "still registering",
            false,
            t1,
        );

        let cond = find(&conditions, ConditionType::BMHRegistering).unwrap();
        assert_eq!(cond.start_time, Some(t0));
        assert_eq!(cond.last_probe_time, Some(t1));
        assert_eq!(cond.reason, ConditionReason::GatewayError);
    }

    #[test]
    fn test_set_moves_transition_time_only_on_status_change() {
        let mut conditions = Vec::new();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);
        let t2 = t1 + Duration::seconds(10);

        set(&mut conditions, ConditionType::Starting, false, ConditionReason::Started, "", true, t0);
        // No status change: transition time stays
        set(&mut conditions, ConditionType::Starting, false, ConditionReason::Started, "", false, t1);
        let cond = find(&conditions, ConditionType::Starting).unwrap();
        assert_eq!(cond.last_transition_time, Some(t0));

        // Status flips: transition time moves
        set(&mut conditions, ConditionType::Starting, true, ConditionReason::Completed, "", false, t2);
        let cond = find(&conditions, ConditionType::Starting).unwrap();
        assert_eq!(cond.last_transition_time, Some(t2));
    }

    #[test]
    fn test_all_condition_types_unique() {
        for (i, a) in ALL_CONDITION_TYPES.iter().enumerate() {
            for b in &ALL_CONDITION_TYPES[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
