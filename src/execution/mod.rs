//! Command execution layer.
//!
//! This module provides the infrastructure every compute resource uses to
//! run work: a pluggable [`CommandRunner`] and the per-operation [`Process`].

mod process;
mod runner;

pub use process::{Process, ProcessError};
pub use runner::{CommandOutput, CommandRunner, DryRunRunner, ShellRunner};
