//! Enrollment Controller
//!
//! Reconciles HostEnrollment records into fully enrolled bare-metal hosts:
//! - Discovers the BMC through DCIM and rotates its factory credentials
//! - Applies firmware-level BMC configuration (boot order, NTP, KCS/HCI)
//! - Registers the host with the provisioning system and walks it through
//!   inspection, validation provisioning and deprovisioning
//! - Attaches hardware labels and the matching instance type
//! - Tears the host record down again when the HostEnrollment is deleted
//!
//! Each workflow step is tracked as a timestamped condition on the record's
//! status, with a wall-clock budget per step.

mod backoff;
mod config;
mod controller;
mod error;
mod placement;
mod reconciler;
mod steps;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting Enrollment Controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  DCIM URL: {}", config.netbox_url);
    info!("  Secret store URL: {}", config.vault_url);
    info!("  IPAM: {}", if config.ipam.is_some() { "enabled" } else { "disabled" });
    info!("  BMC credential rotation: {}", config.engine.rotation_enabled);
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
