//! Engine-level tests driving whole reconcile passes against mock gateways.

use crate::reconciler::ReconcileOutcome;
use crate::steps::ADMIN_USERNAME;
use crate::test_utils::{test_enrollment, Harness};
use chrono::{Duration as ChronoDuration, Utc};
use crds::conditions::{self, ConditionReason, ConditionType};
use crds::{
    BareMetalHost, BareMetalHostSpec, BareMetalHostStatus, ConsumerRef, EnrollmentPhase,
    HostEnrollment, HostEnrollmentStatus, ProvisioningState, ProvisioningStatus, TriState,
    DISENROLL_FINALIZER,
};
use gateways::{
    factory_path, rotated_path, AddressRange, BmcCredentials, HardwareType, InstanceTypeSpec,
    IpamClient, MetalClient, RangeKind,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use std::time::Duration;

const NAME: &str = "enroll-r12u07";
const DEVICE: &str = "r12u07";
const RACK: &str = "r12";
const REGION: &str = "us-east";
const BMC_MAC: &str = "00:11:22:33:44:55";
const BOOT_MAC: &str = "aa:bb:cc:dd:ee:01";

fn seed_bmc_topology(harness: &Harness) {
    harness.dcim.add_interface_mac(DEVICE, "bmc", BMC_MAC);
    harness.dcim.add_bmc_url(DEVICE, "https://10.0.0.5");
    harness.secrets.add_credentials(
        &factory_path(REGION, Some(BMC_MAC)),
        BmcCredentials {
            username: "root".to_string(),
            password: "calvin".to_string(),
        },
    );
}

fn seed_provisioning(harness: &Harness) {
    harness.metal.add_namespace("pool-a", Some("10.40.0.2"));
    harness.metal.set_auto_ready(true);
    harness.ipam.add_range(
        RACK,
        RangeKind::Provisioning,
        AddressRange {
            ref_id: "range-1".to_string(),
            start: "10.20.0.0".to_string(),
            dhcp_scopes: vec!["scope-1".to_string()],
        },
    );
    harness.catalog.add_instance_type(InstanceTypeSpec {
        name: "bm.standard.8480".to_string(),
        cpu_id: "8480+".to_string(),
        cpu_cores: 56,
        cpu_sockets: 2,
        cpu_threads: 2,
        gpu_model: String::new(),
        gpu_count: 0,
        hbm_mode: String::new(),
        memory: "512Gi".to_string(),
    });
}

/// Mark earlier steps as done so a pass starts at the step under test.
fn mark_done(record: &mut HostEnrollment, steps: &[ConditionType]) {
    let now = Utc::now();
    let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
    for step in steps {
        conditions::set(
            &mut status.conditions,
            *step,
            true,
            ConditionReason::Completed,
            "",
            true,
            now,
        );
    }
}

fn registered_record() -> HostEnrollment {
    let mut record = test_enrollment(NAME, DEVICE, RACK, REGION);
    mark_done(
        &mut record,
        &[
            ConditionType::PreEnrollmentChecks,
            ConditionType::Starting,
            ConditionType::GetBMCInterface,
            ConditionType::UpdateBMCConfig,
            ConditionType::BMHStarting,
        ],
    );
    let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
    status.target_namespace = Some("pool-a".to_string());
    status.boot_mac_address = Some(BOOT_MAC.to_string());
    record
}

fn pool_host(state: ProvisioningState) -> BareMetalHost {
    BareMetalHost {
        metadata: ObjectMeta {
            name: Some(DEVICE.to_string()),
            namespace: Some("pool-a".to_string()),
            ..ObjectMeta::default()
        },
        spec: BareMetalHostSpec::default(),
        status: Some(BareMetalHostStatus {
            provisioning: ProvisioningStatus { state },
            ..BareMetalHostStatus::default()
        }),
    }
}

fn condition(
    record: &HostEnrollment,
    step: ConditionType,
) -> crds::EnrollmentCondition {
    record
        .status
        .as_ref()
        .and_then(|s| conditions::find(&s.conditions, step))
        .cloned()
        .unwrap()
}

#[tokio::test]
async fn test_first_pass_bootstraps_conditions_and_finalizer() {
    let harness = Harness::new();
    let record = test_enrollment(NAME, DEVICE, RACK, REGION);
    harness.store.insert(record.clone());

    // No DCIM seeding: BMC discovery hits a gateway error, which is
    // transient, so the pass requeues without surfacing an error
    let outcome = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::RequeueAfter(Duration::from_secs(30))
    );

    let stored = harness.store.record("default", NAME).unwrap();
    let status = stored.status.as_ref().unwrap();
    assert_eq!(status.conditions.len(), 14);
    assert!(condition(&stored, ConditionType::PreEnrollmentChecks).status);
    assert!(condition(&stored, ConditionType::Starting).status);

    let bmc_step = condition(&stored, ConditionType::GetBMCInterface);
    assert!(!bmc_step.status);
    assert_eq!(bmc_step.reason, ConditionReason::GatewayError);

    assert!(stored
        .metadata
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|f| f == DISENROLL_FINALIZER));
}

#[tokio::test]
async fn test_full_enrollment_reaches_ready() {
    let harness = Harness::new();
    seed_bmc_topology(&harness);
    seed_provisioning(&harness);

    let mut record = test_enrollment(NAME, DEVICE, RACK, REGION);
    harness.store.insert(record.clone());

    let mut now = Utc::now();
    let mut done = false;
    for _ in 0..30 {
        let outcome = harness
            .reconciler
            .reconcile_at(record.clone(), now)
            .await
            .unwrap();
        record = harness.store.record("default", NAME).unwrap();
        match outcome {
            ReconcileOutcome::Done => {
                done = true;
                break;
            }
            ReconcileOutcome::RequeueAfter(delay) => {
                now += ChronoDuration::from_std(delay).unwrap();
            }
        }
    }
    assert!(done, "enrollment did not finish: {:?}", record.status);

    let status = record.status.as_ref().unwrap();
    assert_eq!(status.phase, EnrollmentPhase::Ready);
    assert!(condition(&record, ConditionType::Completed).status);
    assert!(!condition(&record, ConditionType::Failed).status);
    assert_eq!(status.target_namespace.as_deref(), Some("pool-a"));
    assert_eq!(status.bmc.new_admin_account, TriState::Enabled);
    assert_eq!(status.bmc.kcs, TriState::Enabled);
    assert_eq!(status.host_ip_address.as_deref(), Some("10.30.0.7"));

    // Rotated credentials are stored and active on the BMC
    let rotated = harness
        .secrets
        .stored(&rotated_path(REGION, BMC_MAC))
        .unwrap();
    assert_eq!(rotated.username, ADMIN_USERNAME);
    assert_eq!(
        harness.bmc.password_of(ADMIN_USERNAME),
        Some(rotated.password.clone())
    );

    // The in-cluster secret mirrors them
    assert_eq!(
        harness.metal.secret("pool-a", &format!("{}-bmc-secret", DEVICE)),
        Some((rotated.username, rotated.password))
    );

    // The credentials secret ends up owned by the host record
    assert_eq!(
        harness
            .metal
            .secret_owner("pool-a", &format!("{}-bmc-secret", DEVICE))
            .as_deref(),
        Some(DEVICE)
    );

    // Host carries the instance-type label, no validation image left behind
    let host = harness.metal.get_host("pool-a", DEVICE).await.unwrap().unwrap();
    assert!(host.spec.image.is_none());
    let labels = host.metadata.labels.unwrap_or_default();
    assert_eq!(
        labels.get("enroll.microscaler.io/instance-type").map(String::as_str),
        Some("bm.standard.8480")
    );
    assert_eq!(
        labels.get("enroll.microscaler.io/cpu-count").map(String::as_str),
        Some("224")
    );
}

#[tokio::test]
async fn test_step_timeout_fails_the_record() {
    let harness = Harness::new();
    seed_bmc_topology(&harness);

    let now = Utc::now();
    let mut record = test_enrollment(NAME, DEVICE, RACK, REGION);
    mark_done(
        &mut record,
        &[ConditionType::PreEnrollmentChecks, ConditionType::Starting],
    );
    // BMC step has been retrying for two hours against a one-hour budget
    let status = record.status.get_or_insert_with(HostEnrollmentStatus::default);
    conditions::set(
        &mut status.conditions,
        ConditionType::GetBMCInterface,
        false,
        ConditionReason::Started,
        "",
        true,
        now - ChronoDuration::hours(2),
    );
    harness.store.insert(record.clone());

    // The timeout is terminal on the record AND surfaces as an error so the
    // scheduler logs it
    let err = harness
        .reconciler
        .reconcile_at(record, now)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exceeded its budget"));

    let stored = harness.store.record("default", NAME).unwrap();
    let status = stored.status.as_ref().unwrap();
    assert_eq!(status.phase, EnrollmentPhase::Failed);
    assert_eq!(
        condition(&stored, ConditionType::GetBMCInterface).reason,
        ConditionReason::TimedOut
    );
    let failed = condition(&stored, ConditionType::Failed);
    assert!(failed.status);
    assert_eq!(failed.reason, ConditionReason::TimedOut);
    assert!(status
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("exceeded its budget"));

    // No collaborator was contacted once the budget was gone
    assert!(harness.bmc.calls().is_empty());
}

#[tokio::test]
async fn test_polling_step_requeues_without_running_later_steps() {
    let harness = Harness::new();
    let record = registered_record();
    harness.metal.add_host(pool_host(ProvisioningState::Registering));
    harness.store.insert(record.clone());

    let outcome = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::RequeueAfter(Duration::from_secs(10))
    );

    let stored = harness.store.record("default", NAME).unwrap();
    // A waiting step leaves the phase exactly where the pass found it
    assert_eq!(stored.status.as_ref().unwrap().phase, EnrollmentPhase::Pending);
    // The pass halted at the polling step
    assert!(condition(&stored, ConditionType::BMHInspecting)
        .last_probe_time
        .is_none());
}

#[tokio::test]
async fn test_rotation_rollback_on_bmc_rejection() {
    let harness = Harness::new();
    seed_bmc_topology(&harness);
    harness.bmc.fail_account_apply(true);

    let record = test_enrollment(NAME, DEVICE, RACK, REGION);
    harness.store.insert(record.clone());

    // A BMC refusing the new account is a transient failure: retry later
    let outcome = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::RequeueAfter(Duration::from_secs(30))
    );

    // The rejected password was rolled back, factory entry untouched
    assert!(harness.secrets.stored(&rotated_path(REGION, BMC_MAC)).is_none());
    assert!(harness
        .secrets
        .stored(&factory_path(REGION, Some(BMC_MAC)))
        .is_some());

    let stored = harness.store.record("default", NAME).unwrap();
    assert_eq!(
        stored.status.as_ref().unwrap().bmc.new_admin_account,
        TriState::Disabled
    );
    assert_eq!(
        condition(&stored, ConditionType::GetBMCInterface).reason,
        ConditionReason::GatewayError
    );
    assert!(harness.bmc.password_of(ADMIN_USERNAME).is_none());
}

#[tokio::test]
async fn test_virtual_bmc_skips_rotation() {
    let harness = Harness::new();
    seed_bmc_topology(&harness);
    harness.bmc.set_hardware_type(HardwareType::Virtual);

    let record = test_enrollment(NAME, DEVICE, RACK, REGION);
    harness.store.insert(record.clone());

    // No host-pool namespaces seeded, the pass requeues at registration;
    // discovery and configuration have run by then
    let result = harness.reconciler.reconcile_at(record, Utc::now()).await;
    assert!(matches!(result, Ok(ReconcileOutcome::RequeueAfter(_))));

    let stored = harness.store.record("default", NAME).unwrap();
    let status = stored.status.as_ref().unwrap();
    assert_eq!(status.bmc.new_admin_account, TriState::NotSupported);
    assert!(condition(&stored, ConditionType::GetBMCInterface).status);
    assert!(harness.bmc.password_of(ADMIN_USERNAME).is_none());
    assert!(harness.secrets.stored(&rotated_path(REGION, BMC_MAC)).is_none());
}

#[tokio::test]
async fn test_unsupported_management_interfaces_are_recorded() {
    let harness = Harness::new();
    seed_bmc_topology(&harness);
    harness.bmc.set_kcs_supported(false);
    harness.bmc.set_hci_supported(false);

    let record = test_enrollment(NAME, DEVICE, RACK, REGION);
    harness.store.insert(record.clone());

    // The pass requeues later at registration (no namespaces seeded)
    let result = harness.reconciler.reconcile_at(record, Utc::now()).await;
    assert!(matches!(result, Ok(ReconcileOutcome::RequeueAfter(_))));

    let stored = harness.store.record("default", NAME).unwrap();
    let status = stored.status.as_ref().unwrap();
    assert_eq!(status.bmc.kcs, TriState::NotSupported);
    assert_eq!(status.bmc.hci, TriState::NotSupported);
    // Unsupported interfaces do not fail the configuration step
    assert!(condition(&stored, ConditionType::UpdateBMCConfig).status);
}

#[tokio::test]
async fn test_host_reported_error_surfaces_verbatim() {
    let harness = Harness::new();
    let record = registered_record();
    harness.metal.add_host(pool_host(ProvisioningState::Registering));
    harness
        .metal
        .set_host_error("pool-a", DEVICE, "ipmi: deploy step failed after 3 attempts");
    harness.store.insert(record.clone());

    let err = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("ipmi: deploy step failed after 3 attempts"));

    let stored = harness.store.record("default", NAME).unwrap();
    let registering = condition(&stored, ConditionType::BMHRegistering);
    assert!(registering
        .message
        .contains("ipmi: deploy step failed after 3 attempts"));
    assert_eq!(registering.reason, ConditionReason::Fatal);
}

#[tokio::test]
async fn test_consumed_host_halts_enrollment_without_failing_loudly() {
    let harness = Harness::new();
    let mut record = registered_record();
    mark_done(
        &mut record,
        &[
            ConditionType::BMHRegistering,
            ConditionType::BMHInspecting,
            ConditionType::BMHProvisioning,
            ConditionType::BMHDeprovisioning,
        ],
    );
    let mut host = pool_host(ProvisioningState::Available);
    host.spec.consumer_ref = Some(ConsumerRef {
        kind: "Machine".to_string(),
        name: "workload-1".to_string(),
        namespace: Some("tenants".to_string()),
    });
    harness.metal.add_host(host);
    harness.store.insert(record.clone());

    let outcome = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);

    let stored = harness.store.record("default", NAME).unwrap();
    let failed = condition(&stored, ConditionType::Failed);
    assert!(failed.status);
    assert_eq!(failed.reason, ConditionReason::HostConsumed);
    assert_eq!(stored.status.as_ref().unwrap().phase, EnrollmentPhase::Failed);
}

#[tokio::test]
async fn test_disenrollment_without_registration_touches_no_gateway() {
    let harness = Harness::new();
    let mut record = test_enrollment(NAME, DEVICE, RACK, REGION);
    record.metadata.deletion_timestamp = Some(Time(Utc::now()));
    record.metadata.finalizers = Some(vec![DISENROLL_FINALIZER.to_string()]);
    harness.store.insert(record.clone());

    let outcome = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);

    assert!(harness.metal.calls().is_empty());
    assert!(harness.bmc.calls().is_empty());
    assert!(harness.dcim.calls().is_empty());
    assert!(harness.ipam.calls().is_empty());
    assert!(harness.secrets.calls().is_empty());

    let stored = harness.store.record("default", NAME).unwrap();
    assert!(stored
        .metadata
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .is_empty());
}

#[tokio::test]
async fn test_disenrollment_deletes_host_and_reservation() {
    let harness = Harness::new();
    harness.ipam.add_range(
        RACK,
        RangeKind::Provisioning,
        AddressRange {
            ref_id: "range-1".to_string(),
            start: "10.20.0.0".to_string(),
            dhcp_scopes: vec!["scope-1".to_string()],
        },
    );
    harness
        .ipam
        .create_reservation("scope-1", BOOT_MAC, "10.20.0.9", DEVICE)
        .await
        .unwrap();
    harness.metal.add_host(pool_host(ProvisioningState::Available));

    let mut record = registered_record();
    record.metadata.deletion_timestamp = Some(Time(Utc::now()));
    record.metadata.finalizers = Some(vec![DISENROLL_FINALIZER.to_string()]);
    harness.store.insert(record.clone());

    // First pass tears down and polls for the deletion to land
    let outcome = harness
        .reconciler
        .reconcile_at(record.clone(), Utc::now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::RequeueAfter(Duration::from_secs(10))
    );
    assert!(harness.metal.get_host("pool-a", DEVICE).await.unwrap().is_none());
    assert!(harness
        .ipam
        .find_reservation("scope-1", BOOT_MAC)
        .await
        .unwrap()
        .is_none());

    // Second pass finds the record gone and releases the finalizer
    let record = harness.store.record("default", NAME).unwrap();
    let outcome = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);
    let stored = harness.store.record("default", NAME).unwrap();
    assert!(stored
        .metadata
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .is_empty());
}

#[tokio::test]
async fn test_disenrollment_blocked_by_consumed_host() {
    let harness = Harness::new();
    let mut host = pool_host(ProvisioningState::Provisioned);
    host.spec.consumer_ref = Some(ConsumerRef {
        kind: "Machine".to_string(),
        name: "workload-1".to_string(),
        namespace: Some("tenants".to_string()),
    });
    harness.metal.add_host(host);

    let mut record = registered_record();
    record.metadata.deletion_timestamp = Some(Time(Utc::now()));
    record.metadata.finalizers = Some(vec![DISENROLL_FINALIZER.to_string()]);
    harness.store.insert(record.clone());

    // A consumed host blocks disenrollment for good: terminal skip, no
    // retry loop
    let outcome = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);

    let stored = harness.store.record("default", NAME).unwrap();
    let failed = condition(&stored, ConditionType::Failed);
    assert!(failed.status);
    assert_eq!(failed.reason, ConditionReason::HostConsumed);

    // Host record and finalizer both survive
    assert!(harness.metal.get_host("pool-a", DEVICE).await.unwrap().is_some());
    assert!(stored
        .metadata
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|f| f == DISENROLL_FINALIZER));
}

#[tokio::test]
async fn test_bmc_address_falls_back_to_bmc_range_reservation() {
    let harness = Harness::new();
    // No BMC URL in DCIM; the address lives as a reservation in the rack's
    // BMC range instead
    harness.dcim.add_interface_mac(DEVICE, "bmc", BMC_MAC);
    harness.secrets.add_credentials(
        &factory_path(REGION, Some(BMC_MAC)),
        BmcCredentials {
            username: "root".to_string(),
            password: "calvin".to_string(),
        },
    );
    harness.ipam.add_range(
        RACK,
        RangeKind::Bmc,
        AddressRange {
            ref_id: "bmc-range".to_string(),
            start: "10.10.0.0".to_string(),
            dhcp_scopes: vec!["bmc-scope".to_string()],
        },
    );
    harness
        .ipam
        .create_reservation("bmc-scope", BMC_MAC, "10.10.0.5", DEVICE)
        .await
        .unwrap();

    let record = test_enrollment(NAME, DEVICE, RACK, REGION);
    harness.store.insert(record.clone());

    // No host-pool namespaces, the pass requeues at registration; discovery
    // has resolved the address by then
    let result = harness.reconciler.reconcile_at(record, Utc::now()).await;
    assert!(matches!(result, Ok(ReconcileOutcome::RequeueAfter(_))));

    let stored = harness.store.record("default", NAME).unwrap();
    assert_eq!(
        stored.status.as_ref().unwrap().bmc.address.as_deref(),
        Some("10.10.0.5")
    );
    assert!(condition(&stored, ConditionType::GetBMCInterface).status);
}

#[tokio::test]
async fn test_storage_nic_colliding_with_boot_nic_is_rejected() {
    let harness = Harness::new();
    seed_bmc_topology(&harness);
    seed_provisioning(&harness);
    harness.dcim.add_storage_macs(DEVICE, vec![BOOT_MAC.to_string()]);

    let mut record = test_enrollment(NAME, DEVICE, RACK, REGION);
    harness.store.insert(record.clone());

    let mut now = Utc::now();
    let mut rejected = false;
    for _ in 0..30 {
        match harness.reconciler.reconcile_at(record.clone(), now).await {
            Ok(ReconcileOutcome::RequeueAfter(delay)) => {
                now += ChronoDuration::from_std(delay).unwrap();
            }
            Ok(ReconcileOutcome::Done) => break,
            Err(err) => {
                assert!(err.to_string().contains("collides with the boot NIC"));
                rejected = true;
                break;
            }
        }
        record = harness.store.record("default", NAME).unwrap();
    }
    assert!(rejected, "labeling accepted a colliding storage NIC");
}

#[tokio::test]
async fn test_missing_cluster_with_availability_zone_is_rejected() {
    let harness = Harness::new();
    let mut record = test_enrollment(NAME, DEVICE, RACK, REGION);
    record.spec.availability_zone = Some("az-1".to_string());
    harness.store.insert(record.clone());

    let err = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("spec.cluster"));

    let stored = harness.store.record("default", NAME).unwrap();
    assert!(!condition(&stored, ConditionType::PreEnrollmentChecks).status);
}

#[tokio::test]
async fn test_disenrollment_waits_for_deprovisioning_host() {
    let harness = Harness::new();
    harness.metal.add_host(pool_host(ProvisioningState::Deprovisioning));

    let mut record = registered_record();
    record.metadata.deletion_timestamp = Some(Time(Utc::now()));
    record.metadata.finalizers = Some(vec![DISENROLL_FINALIZER.to_string()]);
    harness.store.insert(record.clone());

    let outcome = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::RequeueAfter(Duration::from_secs(10))
    );

    // The host finishes cleaning on its own; nothing was deleted
    assert!(harness.metal.get_host("pool-a", DEVICE).await.unwrap().is_some());
    assert!(!harness
        .metal
        .calls()
        .iter()
        .any(|c| c.starts_with("delete_host")));
}

#[tokio::test]
async fn test_disenrollment_surfaces_host_error() {
    let harness = Harness::new();
    harness.metal.add_host(pool_host(ProvisioningState::Available));
    harness
        .metal
        .set_host_error("pool-a", DEVICE, "cleaning failed: disk wipe aborted");

    let mut record = registered_record();
    record.metadata.deletion_timestamp = Some(Time(Utc::now()));
    record.metadata.finalizers = Some(vec![DISENROLL_FINALIZER.to_string()]);
    harness.store.insert(record.clone());

    let err = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cleaning failed: disk wipe aborted"));

    // An errored host is never silently deleted
    assert!(harness.metal.get_host("pool-a", DEVICE).await.unwrap().is_some());
    let stored = harness.store.record("default", NAME).unwrap();
    assert!(condition(&stored, ConditionType::PreDisenrollmentChecks)
        .message
        .contains("cleaning failed: disk wipe aborted"));
}

#[tokio::test]
async fn test_enrolled_check_waits_out_host_errors() {
    let harness = Harness::new();
    let mut record = registered_record();
    mark_done(
        &mut record,
        &[
            ConditionType::BMHRegistering,
            ConditionType::BMHInspecting,
            ConditionType::BMHProvisioning,
            ConditionType::BMHDeprovisioning,
        ],
    );
    harness.metal.add_host(pool_host(ProvisioningState::Available));
    harness
        .metal
        .set_host_error("pool-a", DEVICE, "cleaning retry 1 of 3");
    harness.store.insert(record.clone());

    // The final check polls until the error clears instead of failing
    let outcome = harness
        .reconciler
        .reconcile_at(record, Utc::now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::RequeueAfter(Duration::from_secs(10))
    );

    let stored = harness.store.record("default", NAME).unwrap();
    assert!(!condition(&stored, ConditionType::BMHEnrolled).status);
    assert!(!condition(&stored, ConditionType::Failed).status);
}

#[tokio::test]
async fn test_unmatched_hardware_keeps_labels() {
    let harness = Harness::new();
    seed_bmc_topology(&harness);
    harness.metal.add_namespace("pool-a", Some("10.40.0.2"));
    harness.metal.set_auto_ready(true);
    harness.ipam.add_range(
        RACK,
        RangeKind::Provisioning,
        AddressRange {
            ref_id: "range-1".to_string(),
            start: "10.20.0.0".to_string(),
            dhcp_scopes: vec!["scope-1".to_string()],
        },
    );
    // The only catalog entry differs in memory, so nothing matches
    harness.catalog.add_instance_type(InstanceTypeSpec {
        name: "bm.standard.8480.large".to_string(),
        cpu_id: "8480+".to_string(),
        cpu_cores: 56,
        cpu_sockets: 2,
        cpu_threads: 2,
        gpu_model: String::new(),
        gpu_count: 0,
        hbm_mode: String::new(),
        memory: "1024Gi".to_string(),
    });

    let mut record = test_enrollment(NAME, DEVICE, RACK, REGION);
    harness.store.insert(record.clone());

    let mut now = Utc::now();
    let mut unmatched = false;
    for _ in 0..30 {
        match harness.reconciler.reconcile_at(record.clone(), now).await {
            Ok(ReconcileOutcome::RequeueAfter(delay)) => {
                now += ChronoDuration::from_std(delay).unwrap();
            }
            Ok(ReconcileOutcome::Done) => break,
            Err(err) => {
                assert!(err.to_string().contains("No matching instance type"));
                unmatched = true;
                break;
            }
        }
        record = harness.store.record("default", NAME).unwrap();
    }
    assert!(unmatched, "labeling matched an instance type it should not");

    // The hardware facts were written before the match was attempted
    let host = harness.metal.get_host("pool-a", DEVICE).await.unwrap().unwrap();
    let labels = host.metadata.labels.unwrap_or_default();
    assert_eq!(
        labels.get("enroll.microscaler.io/cpu-count").map(String::as_str),
        Some("224")
    );
    assert!(!labels.contains_key("enroll.microscaler.io/instance-type"));
}
