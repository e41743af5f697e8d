//! Configuration loading and parsing.
//!
//! This module provides YAML-based pipeline definitions and turns them into
//! a ready-to-run [`TaskScheduler`](crate::scheduler::TaskScheduler).

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{PipelineBuilder, load_pipeline};
pub use error::ConfigError;
pub use types::{
    ElasticConfig, FanoutConfig, LocalConfig, MergeConfig, PipelineConfig, PlatformConfig,
    TaskConfig,
};
pub use yaml::YamlLoader;
