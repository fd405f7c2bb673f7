//! peer-core: node-local task supervision and resource distribution.
//!
//! This library runs one sandboxed subtask at a time with timeout and
//! cancellation, and publishes task resources to a content-addressed store
//! with bounded retries.

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod resource;
pub mod supervisor;

// Re-export commonly used types
pub use config::CoreConfig;
pub use error::{ClientError, ConfigError, JobError, ResourceError, SupervisorError};
pub use resource::{AddOutcome, ResourceBundle, ResourceManager, WireResourceRef};
pub use supervisor::{ExecutionResult, TaskDescriptor, TaskSupervisor};
