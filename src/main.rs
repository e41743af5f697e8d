//! gantry - run a pipeline over elastically provisioned compute.
//!
//! Usage:
//!   gantry run <pipeline.yaml>       Provision resources and run every task
//!   gantry validate <pipeline.yaml>  Validate a pipeline without running it
//!   gantry plan <pipeline.yaml>      Print the tasks in dependency order

use clap::{Parser, Subcommand};
use gantry::{
    Event, EventBus, EventHandler, PipelineBuilder, SchedulerResult, ShellRunner, TaskStatus,
    YamlLoader,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// gantry - a dependency-aware pipeline scheduler
#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision resources and run every task in a pipeline
    Run {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        config: PathBuf,

        /// Override the platform's resource limit
        #[arg(short = 'r', long)]
        max_resources: Option<usize>,

        /// Log every command instead of running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a pipeline without running it
    Validate {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        config: PathBuf,
    },

    /// Print the tasks of a pipeline in dependency order
    Plan {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        config: PathBuf,
    },
}

/// Logs lifecycle events as they happen.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::PipelineStarted {
                pipeline,
                task_count,
                ..
            } => {
                info!("Pipeline '{}' started with {} task(s)", pipeline, task_count);
            }
            Event::PipelineCompleted {
                pipeline,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!("Pipeline '{}' completed in {:?}", pipeline, duration);
                } else {
                    error!("Pipeline '{}' failed after {:?}", pipeline, duration);
                }
            }
            Event::ResourceCreated {
                resource_id,
                cpus,
                mem_gb,
                ..
            } => {
                info!("  Resource '{}' up ({} cpus, {} GB)", resource_id, cpus, mem_gb);
            }
            Event::ResourceDestroyed {
                resource_id, cost, ..
            } => match cost {
                Some(cost) => info!("  Resource '{}' destroyed (cost ${:.2})", resource_id, cost),
                None => info!("  Resource '{}' destroyed", resource_id),
            },
            Event::TaskStarted {
                task_id,
                resource_id,
                ..
            } => {
                info!("  Task '{}' started on '{}'", task_id, resource_id);
            }
            Event::TaskCompleted {
                task_id, duration, ..
            } => {
                info!("  Task '{}' completed in {:?}", task_id, duration);
            }
            Event::TaskFailed { task_id, error, .. } => {
                warn!("  Task '{}' failed: {}", task_id, error);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let success = match cli.command {
        Commands::Run {
            config,
            max_resources,
            dry_run,
        } => run_pipeline(config, max_resources, dry_run).await?,
        Commands::Validate { config } => validate_pipeline(config)?,
        Commands::Plan { config } => plan_pipeline(config)?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run a pipeline to completion. Returns whether every task completed.
async fn run_pipeline(
    path: PathBuf,
    max_resources: Option<usize>,
    dry_run: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    info!("Loading pipeline from: {}", path.display());
    let config = YamlLoader::load_pipeline(&path)?;

    let scheduler = if dry_run {
        info!("Dry run: commands are logged, not executed");
        PipelineBuilder::build_dry_run(&config)?
    } else {
        PipelineBuilder::build(&config, Arc::new(ShellRunner::new()))?
    };

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let mut scheduler = scheduler.with_event_bus(event_bus);
    if let Some(max) = max_resources {
        scheduler = scheduler.with_max_resources(max);
    }

    info!(
        "Running '{}' on the {} platform",
        config.name,
        config.platform.kind()
    );
    let result = scheduler.run().await?;
    print_summary(&result);

    Ok(result.success)
}

/// Validate a pipeline without running it.
fn validate_pipeline(path: PathBuf) -> Result<bool, Box<dyn std::error::Error>> {
    info!("Validating pipeline: {}", path.display());

    let checked = YamlLoader::load_pipeline(&path)
        .and_then(|config| PipelineBuilder::graph(&config).map(|graph| (config, graph)));
    match checked {
        Ok((config, graph)) => {
            info!(
                "Pipeline '{}' is valid: {} task(s) on the {} platform",
                config.name,
                graph.len(),
                config.platform.kind()
            );
            Ok(true)
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print the tasks of a pipeline in dependency order.
fn plan_pipeline(path: PathBuf) -> Result<bool, Box<dyn std::error::Error>> {
    let config = YamlLoader::load_pipeline(&path)?;
    let graph = PipelineBuilder::graph(&config)?;

    println!("Pipeline: {}", config.name);
    println!("  Platform: {}", config.platform.kind());
    println!("  Max resources: {}", config.platform.max_resources());
    println!("  Failure policy: {:?}", config.failure_policy);
    println!("  Tasks: {}", graph.len());
    println!();

    for task_id in graph.topological_order()? {
        let Some(task) = graph.get(&task_id) else {
            continue;
        };
        let requirements = &task.requirements;
        let shape = format!(
            "{} cpu(s), {} GB, {} node(s)",
            requirements.min_cpus, requirements.mem_gb, requirements.nodes
        );
        if task.requires.is_empty() {
            println!("  - {} [{}] ({})", task.id, task.kind, shape);
        } else {
            let reqs: Vec<&str> = task.requires.iter().map(|r| r.as_str()).collect();
            println!(
                "  - {} [{}] ({}) requires: {}",
                task.id,
                task.kind,
                shape,
                reqs.join(", ")
            );
        }
    }

    Ok(true)
}

fn print_summary(result: &SchedulerResult) {
    println!();
    println!(
        "Pipeline '{}': {} in {:.1}s",
        result.pipeline,
        if result.success { "succeeded" } else { "FAILED" },
        result.duration.as_secs_f64()
    );
    for report in &result.tasks {
        let marker = match report.status {
            TaskStatus::Complete => "ok",
            TaskStatus::Failed => "FAILED",
            _ => "not run",
        };
        let resource = report
            .resource
            .as_ref()
            .map(|r| format!(" on {}", r))
            .unwrap_or_default();
        println!("  {:<24} {}{}", report.id.as_str(), marker, resource);
        if let Some(err) = &report.error {
            println!("    {}", err);
        }
    }
    if !result.blocked_tasks.is_empty() {
        let blocked: Vec<&str> = result.blocked_tasks.iter().map(|t| t.as_str()).collect();
        println!("  Blocked by failures: {}", blocked.join(", "));
    }
    println!(
        "  Resources provisioned: {}, total cost: ${:.2}",
        result.resources_provisioned, result.total_cost
    );
}
