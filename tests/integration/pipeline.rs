//! Pipeline integration tests.
//!
//! Tests that load pipelines from YAML files and run them end to end.

use gantry::testing::ScriptedRunner;
use gantry::{
    ConfigError, PipelineBuilder, ShellRunner, TaskId, TaskStatus, YamlLoader, load_pipeline,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn write_pipeline(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_fanout_pipeline_from_file() {
    let file = write_pipeline(
        r#"
name: wgs
default_num_retries: 0
platform:
  type: local
  cpus: 8
  max_resources: 3
tasks:
  - id: split
    command: split reads.fq
fanout:
  count: 4
  command: bwa mem chunk_{index}.fq
  min_cpus: 2
  requires: [split]
  merge:
    id: merge
    command: samtools merge out.bam
"#,
    );
    let runner = Arc::new(ScriptedRunner::new());

    let (config, mut scheduler) = load_pipeline(file.path(), runner.clone()).unwrap();
    let result = scheduler.run().await.unwrap();

    assert_eq!(config.name, "wgs");
    assert!(result.success);
    assert_eq!(result.tasks.len(), 6);

    let commands: Vec<String> = runner.calls().into_iter().map(|c| c.command).collect();
    assert_eq!(commands.first().map(String::as_str), Some("split reads.fq"));
    assert_eq!(commands.last().map(String::as_str), Some("samtools merge out.bam"));
    for i in 1..=4 {
        assert!(commands.contains(&format!("bwa mem chunk_{}.fq", i)));
    }
}

#[tokio::test]
async fn test_shell_pipeline_passes_files_between_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().display();
    let yaml = format!(
        r#"
name: shell
default_num_retries: 0
platform:
  type: local
  cpus: 2
tasks:
  - id: produce
    command: echo hello > {out}/a.txt
  - id: consume
    command: tr a-z A-Z < {out}/a.txt > {out}/b.txt
    requires: [produce]
"#
    );
    let config = YamlLoader::parse_pipeline(&yaml).unwrap();

    let mut scheduler = PipelineBuilder::build(&config, Arc::new(ShellRunner::new())).unwrap();
    let result = scheduler.run().await.unwrap();

    assert!(result.success);
    let written = std::fs::read_to_string(dir.path().join("b.txt")).unwrap();
    assert_eq!(written.trim(), "HELLO");
}

#[tokio::test]
async fn test_shell_failure_is_reported() {
    let config = YamlLoader::parse_pipeline(
        r#"
name: failing
default_num_retries: 0
platform:
  type: local
  cpus: 1
tasks:
  - id: boom
    command: exit 3
  - id: never
    command: "true"
    requires: [boom]
"#,
    )
    .unwrap();

    let mut scheduler = PipelineBuilder::build(&config, Arc::new(ShellRunner::new())).unwrap();
    let result = scheduler.run().await.unwrap();

    assert!(!result.success);
    let report = result.report(&TaskId::new("boom")).unwrap();
    assert_eq!(report.status, TaskStatus::Failed);
    assert!(report.error.as_deref().unwrap().contains("exit code Some(3)"));
    assert_eq!(result.blocked_tasks, vec![TaskId::new("never")]);
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let yaml = format!(
        r#"
name: dry
platform:
  type: local
  cpus: 1
tasks:
  - id: touch
    command: touch {}
"#,
        marker.display()
    );
    let config = YamlLoader::parse_pipeline(&yaml).unwrap();

    let mut scheduler = PipelineBuilder::build_dry_run(&config).unwrap();
    let result = scheduler.run().await.unwrap();

    assert!(result.success);
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_elastic_dry_run_skips_provisioning() {
    let config = YamlLoader::parse_pipeline(
        r#"
name: wgs
platform:
  type: elastic
  zone: us-east1-c
  service_account: svc@project.iam
  disk_image: gantry-image
  max_resources: 2
  machine_types:
    - {name: n1-standard-4, cpus: 4, mem_gb: 15, price_per_hour: 0.19}
    - {name: n1-standard-16, cpus: 16, mem_gb: 60, price_per_hour: 0.76}
tasks:
  - id: split
    command: split reads.fq
fanout:
  count: 2
  command: bwa mem chunk_{index}.fq
  min_cpus: 8
  requires: [split]
  merge:
    id: merge
    command: samtools merge out.bam
"#,
    )
    .unwrap();

    let started = std::time::Instant::now();
    let mut scheduler = PipelineBuilder::build_dry_run(&config).unwrap();
    let result = scheduler.run().await.unwrap();

    assert!(result.success, "failed: {:?}", result.failed_tasks);
    assert_eq!(result.completed_count(), 4);
    assert_eq!(result.total_cost, 0.0);
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[test]
fn test_cyclic_pipeline_file_is_rejected() {
    let file = write_pipeline(
        r#"
name: loop
platform:
  type: local
tasks:
  - id: a
    command: x
    requires: [b]
  - id: b
    command: x
    requires: [a]
"#,
    );

    let err = load_pipeline(file.path(), Arc::new(ScriptedRunner::new()))
        .err()
        .unwrap();

    assert!(matches!(err, ConfigError::InvalidConfig(msg) if msg.contains("cycle")));
}
