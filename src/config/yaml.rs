//! YAML configuration parsing.
//!
//! Parses pipeline definitions from YAML files and validates them before
//! anything is provisioned.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::core::task::Task;

use super::builder::PipelineBuilder;
use super::error::ConfigError;
use super::types::{PipelineConfig, PlatformConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a pipeline configuration from a file.
    pub fn load_pipeline(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_pipeline(&config)?;
        Ok(config)
    }

    /// Parse a pipeline configuration from a YAML string.
    pub fn parse_pipeline(yaml: &str) -> Result<PipelineConfig, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        Self::validate_pipeline(&config)?;
        Ok(config)
    }

    /// Validate a pipeline configuration.
    pub fn validate_pipeline(config: &PipelineConfig) -> Result<(), ConfigError> {
        if config.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }

        Self::validate_platform(&config.platform)?;

        if let Some(fanout) = &config.fanout {
            if fanout.count == 0 {
                return Err(ConfigError::InvalidConfig("fanout count cannot be zero".into()));
            }
        }

        let tasks = PipelineBuilder::tasks(config);
        if tasks.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "pipeline must have at least one task".into(),
            ));
        }

        for task in &tasks {
            if task.command.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}' has an empty command",
                    task.id
                )));
            }
            if task.requirements.min_cpus == 0 || task.requirements.nodes == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}' must request at least one node and one CPU",
                    task.id
                )));
            }
            if task.requirements.nodes > 1 {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}' requests {} nodes, multi-node tasks are not supported",
                    task.id, task.requirements.nodes
                )));
            }
        }

        // Check for duplicate task IDs
        let mut task_ids: HashSet<&str> = HashSet::new();
        for task in &tasks {
            if !task_ids.insert(task.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
        }

        // Check that requirements reference valid tasks, no self-requirements, and no duplicates
        for task in &tasks {
            let mut seen = HashSet::new();
            for req in &task.requires {
                if req == &task.id {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' cannot require itself",
                        task.id
                    )));
                }
                if !task_ids.contains(req.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' requires unknown task '{}'",
                        task.id, req
                    )));
                }
                if !seen.insert(req) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' lists requirement '{}' twice",
                        task.id, req
                    )));
                }
            }
        }

        Self::validate_no_cycles(&tasks)
    }

    fn validate_platform(platform: &PlatformConfig) -> Result<(), ConfigError> {
        if platform.max_resources() == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_resources cannot be zero".into(),
            ));
        }

        match platform {
            PlatformConfig::Local(local) => {
                if local.cpus == Some(0) {
                    return Err(ConfigError::InvalidConfig("local cpus cannot be zero".into()));
                }
            }
            PlatformConfig::Elastic(elastic) => {
                if elastic.zone.is_empty() {
                    return Err(ConfigError::MissingField("platform.zone".into()));
                }
                if elastic.service_account.is_empty() {
                    return Err(ConfigError::MissingField("platform.service_account".into()));
                }
                if elastic.disk_image.is_empty() {
                    return Err(ConfigError::MissingField("platform.disk_image".into()));
                }
                if elastic.machine_types.is_empty() {
                    return Err(ConfigError::InvalidConfig(
                        "elastic platform needs at least one machine type".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Validate that there are no cycles in the requirement graph.
    fn validate_no_cycles(tasks: &[Task]) -> Result<(), ConfigError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for task in tasks {
            in_degree.insert(task.id.as_str(), task.requires.len());
            dependents.entry(task.id.as_str()).or_default();
        }
        for task in tasks {
            for req in &task.requires {
                dependents
                    .entry(req.as_str())
                    .or_default()
                    .push(task.id.as_str());
            }
        }

        // Kahn's algorithm: start with tasks that have no requirements
        let mut queue: VecDeque<&str> = tasks
            .iter()
            .filter(|t| t.requires.is_empty())
            .map(|t| t.id.as_str())
            .collect();
        let mut visited = 0;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            for next in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        if visited != tasks.len() {
            let mut cycle: Vec<&str> = tasks
                .iter()
                .map(|t| t.id.as_str())
                .filter(|id| in_degree.get(id).is_some_and(|d| *d > 0))
                .collect();
            cycle.dedup();
            return Err(ConfigError::InvalidConfig(format!(
                "requirement cycle detected involving tasks: {}",
                cycle.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "name: test\nplatform:\n  type: local\n";

    fn parse_tasks(tasks: &str) -> Result<PipelineConfig, ConfigError> {
        YamlLoader::parse_pipeline(&format!("{}{}", HEADER, tasks))
    }

    fn assert_invalid(result: Result<PipelineConfig, ConfigError>, needle: &str) {
        match result {
            Err(ConfigError::InvalidConfig(msg)) => {
                assert!(msg.contains(needle), "'{}' does not mention '{}'", msg, needle)
            }
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_minimal_pipeline() {
        let config = parse_tasks("tasks:\n  - id: a\n    command: echo a\n").unwrap();

        assert_eq!(config.name, "test");
        assert_eq!(config.tasks.len(), 1);
    }

    #[test]
    fn test_missing_name() {
        let result = YamlLoader::parse_pipeline(
            "name: ''\nplatform:\n  type: local\ntasks:\n  - id: a\n    command: echo a\n",
        );

        assert!(matches!(result, Err(ConfigError::MissingField(f)) if f == "name"));
    }

    #[test]
    fn test_no_tasks() {
        assert_invalid(parse_tasks("tasks: []\n"), "at least one task");
    }

    #[test]
    fn test_duplicate_task_id() {
        assert_invalid(
            parse_tasks("tasks:\n  - id: a\n    command: x\n  - id: a\n    command: y\n"),
            "duplicate task id",
        );
    }

    #[test]
    fn test_unknown_requirement() {
        assert_invalid(
            parse_tasks("tasks:\n  - id: a\n    command: x\n    requires: [ghost]\n"),
            "unknown task 'ghost'",
        );
    }

    #[test]
    fn test_self_requirement() {
        assert_invalid(
            parse_tasks("tasks:\n  - id: a\n    command: x\n    requires: [a]\n"),
            "cannot require itself",
        );
    }

    #[test]
    fn test_cycle_detected() {
        let yaml = "tasks:
  - id: a
    command: x
    requires: [c]
  - id: b
    command: x
    requires: [a]
  - id: c
    command: x
    requires: [b]
  - id: free
    command: x
";
        assert_invalid(parse_tasks(yaml), "cycle detected involving tasks: a, b, c");
    }

    #[test]
    fn test_fanout_merge_requirement_validated() {
        let yaml = "fanout:
  count: 2
  command: align {index}
  requires: [split]
";
        assert_invalid(parse_tasks(yaml), "unknown task 'split'");
    }

    #[test]
    fn test_zero_cpus_rejected() {
        assert_invalid(
            parse_tasks("tasks:\n  - id: a\n    command: x\n    min_cpus: 0\n"),
            "at least one node and one CPU",
        );
    }

    #[test]
    fn test_multi_node_task_rejected() {
        assert_invalid(
            parse_tasks("tasks:\n  - id: a\n    command: x\n    nodes: 4\n"),
            "multi-node tasks are not supported",
        );
    }

    #[test]
    fn test_zero_max_resources_rejected() {
        let result = YamlLoader::parse_pipeline(
            "name: t\nplatform:\n  type: local\n  max_resources: 0\n\
             tasks:\n  - id: a\n    command: x\n",
        );

        assert_invalid(result, "max_resources");
    }

    #[test]
    fn test_elastic_without_machine_types() {
        let result = YamlLoader::parse_pipeline(
            "name: t
platform:
  type: elastic
  zone: us-east1-c
  service_account: svc
  disk_image: img
tasks:
  - id: a
    command: x
",
        );

        assert_invalid(result, "machine type");
    }

    #[test]
    fn test_elastic_without_zone() {
        let result = YamlLoader::parse_pipeline(
            "name: t
platform:
  type: elastic
  zone: ''
  service_account: svc
  disk_image: img
  machine_types:
    - {name: n1-standard-4, cpus: 4, mem_gb: 15, price_per_hour: 0.19}
tasks:
  - id: a
    command: x
",
        );

        assert!(matches!(result, Err(ConfigError::MissingField(f)) if f == "platform.zone"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}tasks:\n  - id: a\n    command: echo a\n", HEADER).unwrap();

        let config = YamlLoader::load_pipeline(file.path()).unwrap();

        assert_eq!(config.tasks[0].id, "a");
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let err = YamlLoader::load_pipeline("/nonexistent/pipeline.yaml").unwrap_err();

        assert!(matches!(err, ConfigError::FileReadError { .. }));
        assert!(err.to_string().contains("/nonexistent/pipeline.yaml"));
    }

    #[test]
    fn test_yaml_syntax_error_names_path() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "name: [unterminated").unwrap();

        let err = YamlLoader::load_pipeline(file.path()).unwrap_err();

        assert!(matches!(err, ConfigError::YamlFileError { .. }));
    }
}
