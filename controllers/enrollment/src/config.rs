//! Controller configuration.
//!
//! Everything is read from environment variables at startup. Collaborator
//! endpoints (DCIM, secret store, catalog) are required; IPAM and the DHCP
//! proxy are optional because virtual/test clusters run without them.

use crate::error::ControllerError;
use crds::conditions::ConditionType;
use crds::HostImage;
use std::env;
use std::time::Duration;

/// Optional IPAM endpoint configuration.
#[derive(Debug, Clone)]
pub struct IpamConfig {
    /// IPAM API base URL
    pub url: String,
    /// Basic-auth username
    pub username: String,
    /// Basic-auth password
    pub password: String,
    /// Skip TLS verification
    pub insecure: bool,
}

/// Wall-clock budget per workflow step.
///
/// Budgets anchor on the step condition's `start_time`, not on any per-pass
/// clock, so they survive controller restarts.
#[derive(Debug, Clone)]
pub struct StepTimeouts {
    /// Guard checks and workflow bookkeeping
    pub checks: Duration,
    /// BMC discovery, rotation and configuration
    pub bmc: Duration,
    /// Provisioning-system registration
    pub registration: Duration,
    /// Inspection, validation provisioning and deprovisioning
    pub provisioning: Duration,
    /// Hardware labeling and enrollment verification
    pub labeling: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            checks: Duration::from_secs(10 * 60),
            bmc: Duration::from_secs(60 * 60),
            registration: Duration::from_secs(120 * 60),
            provisioning: Duration::from_secs(240 * 60),
            labeling: Duration::from_secs(60 * 60),
        }
    }
}

impl StepTimeouts {
    /// Budget for one step.
    pub fn for_step(&self, step: ConditionType) -> Duration {
        match step {
            ConditionType::PreEnrollmentChecks
            | ConditionType::Starting
            | ConditionType::Completed
            | ConditionType::Failed
            | ConditionType::PreDisenrollmentChecks => self.checks,
            ConditionType::GetBMCInterface | ConditionType::UpdateBMCConfig => self.bmc,
            ConditionType::BMHStarting | ConditionType::BMHRegistering => self.registration,
            ConditionType::BMHInspecting
            | ConditionType::BMHProvisioning
            | ConditionType::BMHDeprovisioning => self.provisioning,
            ConditionType::BMHEnrolled | ConditionType::AddLabels => self.labeling,
        }
    }
}

/// Settings the reconciliation engine needs on every pass.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Whether factory BMC credentials are rotated during enrollment
    pub rotation_enabled: bool,
    /// Skip TLS verification against BMCs
    pub bmc_insecure: bool,
    /// Image provisioned onto hosts for hardware validation
    pub validation_image: HostImage,
    /// Delay before re-running a step that asked to be retried
    pub requeue_delay: Duration,
    /// Delay between polls of the provisioning system's state machine
    pub poll_delay: Duration,
    /// Per-step wall-clock budgets
    pub timeouts: StepTimeouts,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rotation_enabled: true,
            bmc_insecure: true,
            validation_image: HostImage::default(),
            requeue_delay: Duration::from_secs(30),
            poll_delay: Duration::from_secs(10),
            timeouts: StepTimeouts::default(),
        }
    }
}

/// Full controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// DCIM (NetBox) base URL
    pub netbox_url: String,
    /// DCIM API token
    pub netbox_token: String,
    /// Secret store (Vault) base URL
    pub vault_url: String,
    /// Secret store token
    pub vault_token: String,
    /// KV v2 mount holding BMC credentials
    pub vault_mount: String,
    /// IPAM endpoint, absent in virtual/test clusters
    pub ipam: Option<IpamConfig>,
    /// DHCP proxy endpoint used instead of IPAM in virtual clusters
    pub dhcp_proxy_url: Option<String>,
    /// Instance-type catalog base URL
    pub catalog_url: String,
    /// SSH user for in-band hardware enumeration
    pub ssh_user: String,
    /// Namespace to watch, `None` for all
    pub watch_namespace: Option<String>,
    /// Max concurrent reconciliations
    pub concurrency: u16,
    /// Engine settings
    pub engine: EngineSettings,
}

fn required(name: &str) -> Result<String, ControllerError> {
    env::var(name).map_err(|_| {
        ControllerError::InvalidConfig(format!("{} environment variable is required", name))
    })
}

fn flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        let ipam = if flag("IPAM_ENABLED", false) {
            Some(IpamConfig {
                url: required("IPAM_URL")?,
                username: required("IPAM_USERNAME")?,
                password: required("IPAM_PASSWORD")?,
                insecure: flag("IPAM_INSECURE", false),
            })
        } else {
            None
        };

        let engine = EngineSettings {
            rotation_enabled: flag("BMC_ROTATION_ENABLED", true),
            bmc_insecure: flag("BMC_INSECURE", true),
            validation_image: HostImage {
                url: required("VALIDATION_IMAGE_URL")?,
                checksum: env::var("VALIDATION_IMAGE_CHECKSUM").ok(),
            },
            ..EngineSettings::default()
        };

        let concurrency = env::var("CONCURRENCY")
            .ok()
            .map(|v| {
                v.parse::<u16>().map_err(|_| {
                    ControllerError::InvalidConfig(format!("CONCURRENCY must be a number, got {}", v))
                })
            })
            .transpose()?
            .unwrap_or(3);

        Ok(Self {
            netbox_url: env::var("NETBOX_URL").unwrap_or_else(|_| "http://netbox.netbox:80".to_string()),
            netbox_token: required("NETBOX_TOKEN")?,
            vault_url: required("VAULT_ADDR")?,
            vault_token: required("VAULT_TOKEN")?,
            vault_mount: env::var("VAULT_MOUNT").unwrap_or_else(|_| "secret".to_string()),
            ipam,
            dhcp_proxy_url: env::var("DHCP_PROXY_URL").ok(),
            catalog_url: required("CATALOG_URL")?,
            ssh_user: env::var("SSH_USER").unwrap_or_else(|_| "validation".to_string()),
            watch_namespace: env::var("WATCH_NAMESPACE").ok(),
            concurrency,
            engine,
        })
    }
}
