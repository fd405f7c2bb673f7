//! Task execution supervision.
//!
//! This module runs one subtask at a time inside a sandbox:
//!
//! - **TaskDescriptor**: what to run, where, and for how long
//! - **TaskSupervisor**: drives the sandbox job, honours timeout and cancellation
//! - **ExecutionResult**: the single terminal result reported per subtask
//! - **Monitors**: memory estimation and parent liveness, stopped on every exit path
//!
//! # Example
//!
//! ```rust,ignore
//! use peer_core::execution::DockerRuntime;
//! use peer_core::supervisor::{TaskDescriptor, TaskSupervisor};
//! use std::sync::Arc;
//!
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let observer = Arc::new(|result: &ExecutionResult| println!("{:?}", result.outcome));
//! let supervisor = Arc::new(TaskSupervisor::new(task, runtime, observer));
//!
//! let running = tokio::spawn({
//!     let supervisor = Arc::clone(&supervisor);
//!     async move { supervisor.run().await }
//! });
//!
//! // From the node's control path:
//! supervisor.end_comp().await;
//! let result = running.await?;
//! ```

pub mod hooks;
pub mod monitor;
pub mod task;
pub mod task_supervisor;

pub use hooks::{DockerManager, RecoveryCallback, TaskObserver};
pub use monitor::{HostMemoryMonitor, LivenessMonitor, MemoryMonitor, MemoryMonitorFactory};
pub use task::{ExecutionResult, ResultType, TaskDescriptor, TaskOutput};
pub use task_supervisor::{TaskSupervisor, STDERR_FILE, STDOUT_FILE};
