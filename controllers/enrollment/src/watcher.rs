//! HostEnrollment resource watcher.
//!
//! Uses kube_runtime::Controller so reconnection, retries and event
//! coalescing are handled for us. The error policy asks the reconciler for a
//! per-record Fibonacci backoff, so one flapping BMC cannot dominate the
//! work queue.

use crate::error::ControllerError;
use crate::reconciler::{record_key, ReconcileOutcome, Reconciler};
use crds::HostEnrollment;
use futures::StreamExt;
use kube::Api;
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Watches HostEnrollment records and drives the reconciler.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    api: Api<HostEnrollment>,
    concurrency: u16,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, api: Api<HostEnrollment>, concurrency: u16) -> Self {
        Self {
            reconciler,
            api,
            concurrency,
        }
    }

    /// Watch until the stream ends (it should run forever).
    pub async fn watch(&self) -> Result<(), ControllerError> {
        info!("Starting HostEnrollment watcher");

        let error_policy = |obj: Arc<HostEnrollment>, error: &ControllerError, ctx: Arc<Reconciler>| {
            let key = record_key(&obj);
            let delay = ctx.error_backoff(&key);
            error!(
                "Reconciliation error for {} (retrying in {}s): {}",
                key,
                delay.as_secs(),
                error
            );
            Action::requeue(delay)
        };

        let reconcile = |obj: Arc<HostEnrollment>, ctx: Arc<Reconciler>| async move {
            let key = record_key(&obj);
            debug!("Reconciling {}", key);
            let outcome = ctx.reconcile(obj.as_ref()).await?;
            ctx.reset_backoff(&key);
            Ok::<_, ControllerError>(match outcome {
                ReconcileOutcome::Done => Action::await_change(),
                ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
            })
        };

        // Debounce batches bursts of status updates; concurrency bounds how
        // many hosts enroll at once
        let config = ControllerConfig::default()
            .debounce(Duration::from_secs(5))
            .concurrency(self.concurrency);

        Controller::new(self.api.clone(), watcher::Config::default())
            .with_config(config)
            .run(reconcile, error_policy, Arc::clone(&self.reconciler))
            .for_each(|result| async move {
                if let Err(e) = result {
                    error!("Controller error: {}", e);
                }
            })
            .await;

        Ok(())
    }
}
