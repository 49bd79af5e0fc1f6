//! The enrollment step library.
//!
//! Each workflow step is a method on the reconciler that takes the record and
//! the pass's clock reading, mutates the in-memory status, and reports how
//! the engine should proceed. Steps never persist anything themselves; the
//! engine owns condition bookkeeping, timeout enforcement and status writes.

pub mod bmc_config;
pub mod bmc_discovery;
pub mod checks;
pub mod labels;
pub mod phases;
pub mod register;

#[cfg(test)]
mod steps_test;

use crds::conditions::ConditionReason;
use std::time::Duration;

/// DCIM name of the out-of-band management interface.
pub const BMC_INTERFACE: &str = "bmc";

/// DCIM name of the PXE boot interface.
pub const BOOT_INTERFACE: &str = "boot";

/// Username of the rotated BMC administrator account.
pub const ADMIN_USERNAME: &str = "metal-admin";

/// iPXE bootloader filename served to enrolling hosts.
pub const BOOT_FILENAME: &str = "ipxe.efi";

/// What the engine should do after a step ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step is done, run the next one in the same pass
    Continue,
    /// Step is waiting on something, re-run the workflow after the delay
    Requeue(Duration),
    /// Host cannot be enrolled but nothing is broken; stop without retrying
    Skip(String),
}

/// A step's result: engine directive plus condition bookkeeping.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Engine directive
    pub outcome: StepOutcome,
    /// New condition status for the step
    pub status: bool,
    /// New condition reason
    pub reason: ConditionReason,
    /// Operator-facing detail
    pub message: String,
}

impl StepReport {
    /// The step's terminal success branch ran.
    pub fn complete() -> Self {
        Self {
            outcome: StepOutcome::Continue,
            status: true,
            reason: ConditionReason::Completed,
            message: String::new(),
        }
    }

    /// Success with an operator-facing note.
    pub fn complete_with(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::complete()
        }
    }

    /// Step is still in progress, poll again after the delay.
    pub fn retry(delay: Duration) -> Self {
        Self {
            outcome: StepOutcome::Requeue(delay),
            status: false,
            reason: ConditionReason::Started,
            message: String::new(),
        }
    }

    /// Retry with an explicit reason and message.
    pub fn retry_with(reason: ConditionReason, message: impl Into<String>, delay: Duration) -> Self {
        Self {
            outcome: StepOutcome::Requeue(delay),
            status: false,
            reason,
            message: message.into(),
        }
    }

    /// Stop the workflow without enrolling, without marking an error retryable.
    pub fn skip(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            outcome: StepOutcome::Skip(message.clone()),
            status: false,
            reason: ConditionReason::HostConsumed,
            message,
        }
    }
}
