//! Elastic instance lifecycle integration tests.
//!
//! Tests that drive a single instance through the public resource interface
//! against a scripted provider.

use crate::common::{DESCRIBE, READY, STATUS, catalog, fast_timings, not_found};
use gantry::platform::{ErrorKind, GcloudBackend, InstanceSettings, ProcessorCore};
use gantry::testing::ScriptedRunner;
use gantry::{
    Capacity, CommandOutput, ComputeResource, ElasticInstance, ResourceId, ResourceStatus,
    ResourceTimings, TaskId,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn instance(
    runner: Arc<ScriptedRunner>,
    retries: u32,
    timings: ResourceTimings,
) -> Arc<ElasticInstance> {
    let core = ProcessorCore::new(
        ResourceId::generate("it", "align_1"),
        Capacity::new(4, 15, 200),
        retries,
        timings,
        runner,
    );
    Arc::new(ElasticInstance::new(
        core,
        InstanceSettings::new("europe-west1-b", "runner@project.iam", "gantry-image"),
        Arc::new(GcloudBackend::new("pipeline")),
        catalog(),
    ))
}

#[tokio::test]
async fn test_concurrent_runs_never_overlap() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.respond(DESCRIBE, CommandOutput::new(READY, "", 0));
    runner.respond_after("compute ssh", CommandOutput::new("ok", "", 0), Duration::from_millis(30));
    let vm = instance(runner.clone(), 0, fast_timings());
    vm.create().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let vm = Arc::clone(&vm);
        handles.push(tokio::spawn(async move {
            vm.run(&TaskId::new(format!("t{}", i)), &format!("echo {}", i), 0, false)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut windows: Vec<_> = runner
        .calls()
        .into_iter()
        .filter(|c| c.command.contains("compute ssh"))
        .collect();
    windows.sort_by_key(|c| c.started);
    assert_eq!(windows.len(), 4);
    for pair in windows.windows(2) {
        assert!(pair[1].started >= pair[0].finished, "remote commands overlapped");
    }
}

#[tokio::test]
async fn test_lock_interrupts_running_command() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.respond(DESCRIBE, CommandOutput::new(READY, "", 0));
    runner.respond_after("compute ssh", CommandOutput::new("", "", 0), Duration::from_secs(5));
    let vm = instance(runner.clone(), 3, fast_timings());
    vm.create().await.unwrap();

    let running = Arc::clone(&vm);
    let handle = tokio::spawn(async move {
        running
            .run(&TaskId::new("long"), "sleep 3600", 3, false)
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let locked_at = Instant::now();
    vm.lock();
    let err = handle.await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Locked);
    assert!(locked_at.elapsed() < Duration::from_secs(1));

    vm.destroy(true).await.unwrap();
    assert_eq!(runner.call_count("instances delete"), 1);
    assert!(vm.cost().is_some());
}

#[tokio::test]
async fn test_run_against_missing_instance_is_fatal() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.respond(DESCRIBE, CommandOutput::new(READY, "", 0));
    runner.fail("compute ssh");
    runner.respond(STATUS, not_found());
    let vm = instance(runner.clone(), 3, fast_timings());
    vm.create().await.unwrap();

    let err = vm
        .run(&TaskId::new("gone"), "true", 3, false)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(runner.call_count("compute ssh"), 1);
}

#[tokio::test]
async fn test_destroy_of_vanished_instance_settles() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.respond(DESCRIBE, CommandOutput::new(READY, "", 0));
    runner.fail("instances delete");
    runner.respond(STATUS, not_found());
    let vm = instance(runner.clone(), 2, fast_timings());
    vm.create().await.unwrap();

    vm.destroy(true).await.unwrap();

    assert_eq!(runner.call_count("instances delete"), 1);
    assert_eq!(vm.core().status(), ResourceStatus::Off);
}

#[tokio::test]
async fn test_instance_reports_location_and_machine() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.respond(DESCRIBE, CommandOutput::new(READY, "", 0));
    let vm = instance(runner.clone(), 0, fast_timings());

    assert_eq!(vm.instance_type(), None);
    vm.create().await.unwrap();

    assert_eq!(vm.zone(), "europe-west1-b");
    assert_eq!(vm.region(), "europe-west1");
    assert_eq!(vm.instance_type(), Some("n1-standard-4"));
    assert_eq!(vm.price_per_hour(), Some(0.19));
    assert!(vm.name().starts_with("it-align-1-"));
}
