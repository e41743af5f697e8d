//! Scheduling integration tests.
//!
//! Tests that verify dependency ordering, the resource limit, retries and
//! failure handling across a whole run.

use crate::common::{
    DESCRIBE, READY, STATUS, elastic_factory, local_factory, max_overlap, not_found, task,
};
use gantry::testing::{RecordingHandler, ScriptedRunner};
use gantry::{
    CommandOutput, Event, EventBus, FailurePolicy, TaskGraph, TaskId, TaskScheduler, TaskStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn graph(tasks: Vec<gantry::Task>) -> TaskGraph {
    TaskGraph::from_tasks(tasks).unwrap()
}

#[tokio::test]
async fn test_diamond_runs_in_dependency_order() {
    let runner = Arc::new(ScriptedRunner::new());
    let tasks = vec![
        task("split", &[]),
        task("left", &["split"]),
        task("right", &["split"]),
        task("merge", &["left", "right"]),
    ];
    let factory = local_factory(runner.clone(), 4, 0);
    let mut scheduler = TaskScheduler::new("diamond", graph(tasks), factory)
        .with_max_resources(2);

    let result = scheduler.run().await.unwrap();

    assert!(result.success);
    assert_eq!(result.completed_count(), 4);
    let commands: Vec<String> = runner.calls().into_iter().map(|c| c.command).collect();
    let at = |cmd: &str| commands.iter().position(|c| c == cmd).unwrap();
    assert_eq!(at("run split"), 0);
    assert!(at("run merge") > at("run left"));
    assert!(at("run merge") > at("run right"));
    assert_eq!(commands.len(), 4);
}

#[tokio::test]
async fn test_resource_limit_bounds_concurrency() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.respond_after("run", CommandOutput::new("", "", 0), Duration::from_millis(40));
    let tasks = (1..=6).map(|i| task(&format!("align_{}", i), &[])).collect();
    let handler = Arc::new(RecordingHandler::new());
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;

    let factory = local_factory(runner.clone(), 4, 0);
    let mut scheduler = TaskScheduler::new("bounded", graph(tasks), factory)
        .with_max_resources(2)
        .with_event_bus(bus);
    let result = scheduler.run().await.unwrap();

    assert!(result.success);
    assert!(max_overlap(&runner.calls()) <= 2);
    assert!(result.resources_provisioned >= 2);

    let created = handler
        .count(|e| matches!(e, Event::ResourceCreated { .. }))
        .await;
    let destroyed = handler
        .count(|e| matches!(e, Event::ResourceDestroyed { .. }))
        .await;
    assert_eq!(created, destroyed);
}

#[tokio::test]
async fn test_flaky_task_succeeds_within_its_retries() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.respond_sequence(
        "flaky",
        vec![
            CommandOutput::new("", "transient", 1),
            CommandOutput::new("", "transient", 1),
            CommandOutput::new("done", "", 0),
        ],
    );
    let flaky = gantry::Task::builder("flaky", "run flaky").num_retries(2).build();
    let factory = local_factory(runner.clone(), 2, 0);
    let mut scheduler = TaskScheduler::new("retry", graph(vec![flaky]), factory);

    let result = scheduler.run().await.unwrap();

    assert!(result.success);
    assert_eq!(runner.call_count("flaky"), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_task_and_block_dependents() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.fail("run broken");
    let tasks = vec![
        task("broken", &[]),
        task("after", &["broken"]),
        task("last", &["after"]),
    ];
    let factory = local_factory(runner.clone(), 2, 1);
    let mut scheduler = TaskScheduler::new("blocked", graph(tasks), factory);

    let result = scheduler.run().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.failed_tasks, vec![TaskId::new("broken")]);
    assert_eq!(
        result.blocked_tasks,
        vec![TaskId::new("after"), TaskId::new("last")]
    );
    assert_eq!(result.status(&TaskId::new("last")), Some(TaskStatus::Pending));
    assert_eq!(runner.call_count("run broken"), 2);
    assert_eq!(runner.call_count("run after"), 0);
}

#[tokio::test]
async fn test_continue_independent_finishes_unrelated_branch() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.fail("run bad");
    let tasks = vec![
        task("bad", &[]),
        task("bad_child", &["bad"]),
        task("good", &[]),
        task("good_child", &["good"]),
    ];
    let factory = local_factory(runner.clone(), 2, 0);
    let mut scheduler = TaskScheduler::new("branches", graph(tasks), factory)
        .with_max_resources(1)
        .with_failure_policy(FailurePolicy::ContinueIndependent);

    let result = scheduler.run().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.status(&TaskId::new("good_child")), Some(TaskStatus::Complete));
    assert_eq!(result.status(&TaskId::new("bad_child")), Some(TaskStatus::Pending));
}

#[tokio::test]
async fn test_elastic_pipeline_provisions_and_tears_down() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.respond(DESCRIBE, CommandOutput::new(READY, "", 0));
    let tasks = vec![task("align", &[]), task("merge", &["align"])];
    let handler = Arc::new(RecordingHandler::new());
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;

    let factory = elastic_factory(runner.clone(), 1);
    let mut scheduler = TaskScheduler::new("cloud", graph(tasks), factory)
        .with_event_bus(bus);
    let result = scheduler.run().await.unwrap();

    assert!(result.success);
    let creates = runner.call_count("instances create");
    assert!(creates >= 1);
    assert_eq!(runner.call_count("instances delete"), creates);
    assert_eq!(runner.call_count("compute ssh"), 2);
    assert!(result.total_cost >= 0.0);

    for event in handler.events().await {
        if let Event::ResourceDestroyed { cost, .. } = event {
            assert!(cost.is_some());
        }
    }
}

#[tokio::test]
async fn test_elastic_provisioning_failure_fails_task() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.fail("instances create");
    runner.respond(STATUS, not_found());
    let tasks = vec![task("align", &[]), task("merge", &["align"])];

    let factory = elastic_factory(runner.clone(), 0);
    let mut scheduler = TaskScheduler::new("no-quota", graph(tasks), factory);
    let result = scheduler.run().await.unwrap();

    assert!(!result.success);
    let report = result.report(&TaskId::new("align")).unwrap();
    assert_eq!(report.status, TaskStatus::Failed);
    assert!(report.error.as_deref().unwrap().contains("provisioning failed"));
    assert_eq!(result.blocked_tasks, vec![TaskId::new("merge")]);
    assert_eq!(runner.call_count("compute ssh"), 0);
    assert_eq!(runner.call_count("instances delete"), 1);
}
