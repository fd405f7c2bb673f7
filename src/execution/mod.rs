//! Sandbox execution layer for supervised tasks.
//!
//! The supervisor only sees the [`ExecutionJob`] and [`SandboxRuntime`]
//! traits. The Docker implementation uses the bollard crate for container
//! lifecycle management and resource control.
//!
//! # Architecture
//!
//! Container states follow this lifecycle:
//! ```text
//! PENDING → RUNNING → COMPLETED/FAILED/TIMEOUT/KILLED → REMOVED
//! ```
//!
//! # Example
//!
//! ```ignore
//! use peer_core::execution::{DockerRuntime, SandboxImage, SandboxRuntime};
//!
//! let runtime = DockerRuntime::connect()?;
//! let image = SandboxImage::new("golemfactory/base", "1.5");
//! if runtime.is_available(&image).await {
//!     let job = runtime.create_job(spec).await?;
//!     job.start().await?;
//!     let exit_code = job.wait(Some(Duration::from_secs(60))).await?;
//!     job.teardown().await?;
//! }
//! ```

pub mod container;
pub mod docker_client;
pub mod job;
pub mod resources;

pub use container::{ContainerStatus, DockerJob, DockerRuntime};
pub use docker_client::{ContainerConfig, DockerClient};
pub use job::{ExecutionJob, JobSpec, SandboxImage, SandboxRuntime};
pub use resources::ExecutionLimits;
