//! Command-line interface for peer-core.
//!
//! Provides commands for computing a sandboxed subtask and publishing task
//! resources.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands, PublishArgs, RunArgs};
