//! Contract Test: Orchestrator-Owned Retry
//!
//! Constraints verified:
//! - Transient failures (`PlatformUnavailable`, `Conflict`) are retried with
//!   exponential backoff, each attempt starting from a fresh read
//! - Retries are bounded by `max_retries` and can be disabled with 0
//! - Non-transient rejections are never retried
//! - A VM lookup that keeps failing only affects its own record

mod common;

use common::*;
use ippreserve_core::{PreservedIpRecord, RecordOutcome};
use tokio::time::{Duration, Instant};

fn single_vm() -> FakePlatform {
    FakePlatform::new()
        .with_subnet("S1", "Subnet1")
        .with_vm("V1", "vm-a", vec![legacy_nic("OLD", "172.16.0.4")])
}

fn vm_a() -> Vec<PreservedIpRecord> {
    vec![PreservedIpRecord::new("vm-a", "10.1.2.5")]
}

#[tokio::test(start_paused = true)]
async fn transient_update_failures_are_retried_with_backoff() {
    let platform = single_vm().failing_updates(3);
    let (orchestrator, _rx) = orchestrator(vm_a(), &platform, test_config());

    let started = Instant::now();
    let report = orchestrator.run().await.expect("run succeeds");

    assert!(report.outcome_for("vm-a").unwrap().is_success());
    // 4 clear attempts + 1 attach
    assert_eq!(platform.update_count(), 5);
    // 1s + 2s + 4s
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7));
    assert!(elapsed < Duration::from_secs(8));
    assert_eq!(platform.nic_list("V1"), vec![expected_nic("S1", "10.1.2.5")]);
}

#[tokio::test(start_paused = true)]
async fn retries_can_be_disabled() {
    let platform = single_vm().failing_updates(1);
    let mut config = test_config();
    config.max_retries = 0;
    let (orchestrator, _rx) = orchestrator(vm_a(), &platform, config);

    let report = orchestrator.run().await.expect("run succeeds");

    assert!(matches!(
        report.outcome_for("vm-a"),
        Some(RecordOutcome::ClearFailed { reason, .. }) if reason.contains("Platform unavailable")
    ));
    assert_eq!(platform.update_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_leave_vm_untouched_by_attach() {
    let platform = single_vm().failing_updates(usize::MAX);
    let (orchestrator, _rx) = orchestrator(vm_a(), &platform, test_config());

    let report = orchestrator.run().await.expect("run succeeds");

    assert!(matches!(
        report.outcome_for("vm-a"),
        Some(RecordOutcome::ClearFailed { .. })
    ));
    // Every attempt was a clear
    assert_eq!(platform.update_count(), 4);
    assert!(
        platform
            .payloads_for("V1")
            .iter()
            .all(|p| p["spec"]["resources"]["nic_list"].as_array().unwrap().is_empty())
    );
}

#[tokio::test(start_paused = true)]
async fn conflict_is_retried_from_a_fresh_read() {
    let platform = single_vm().conflicting_updates(1);
    let (orchestrator, _rx) = orchestrator(vm_a(), &platform, test_config());

    let report = orchestrator.run().await.expect("run succeeds");

    assert!(report.outcome_for("vm-a").unwrap().is_success());

    let payloads = platform.payloads_for("V1");
    assert_eq!(payloads.len(), 3);
    // The retried clear carries the spec_version written by the other party
    assert_eq!(payloads[0]["metadata"]["spec_version"], 1);
    assert_eq!(payloads[1]["metadata"]["spec_version"], 2);
    // stale read + fresh read + convergence poll + attach read
    assert_eq!(platform.read_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn rejections_are_not_retried() {
    let platform = single_vm().rejecting_clear("V1");
    let (orchestrator, _rx) = orchestrator(vm_a(), &platform, test_config());

    let started = Instant::now();
    orchestrator.run().await.expect("run succeeds");

    assert_eq!(platform.update_count(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn failing_lookup_only_affects_its_record() {
    let platform = single_vm()
        .with_vm("V2", "vm-b", vec![legacy_nic("OLD", "172.16.0.5")])
        .failing_vm_lookups(4);
    let (orchestrator, _rx) = orchestrator(
        vec![
            PreservedIpRecord::new("vm-a", "10.1.2.5"),
            PreservedIpRecord::new("vm-b", "10.1.2.6"),
        ],
        &platform,
        test_config(),
    );

    let report = orchestrator.run().await.expect("run succeeds");

    assert!(matches!(
        report.outcome_for("vm-a"),
        Some(RecordOutcome::LookupFailed { .. })
    ));
    assert!(report.outcome_for("vm-b").unwrap().is_success());
    assert!(platform.payloads_for("V1").is_empty());
    assert_eq!(platform.vm_lookup_count(), 5);
}
