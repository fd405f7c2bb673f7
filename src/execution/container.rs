//! Docker-backed sandbox jobs.
//!
//! [`DockerRuntime`] prepares a container for a [`JobSpec`]: it writes the
//! job script and parameters into the work directory and creates (but does
//! not start) a container with the task directories bind-mounted.
//! [`DockerJob`] tracks that container through its lifecycle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::execution::docker_client::{ContainerConfig, DockerClient};
use crate::execution::job::{ExecutionJob, JobSpec, SandboxImage, SandboxRuntime};

/// Mount point of the task resources inside the container.
pub const RESOURCES_DIR: &str = "/golem/resources";
/// Mount point of the work directory inside the container.
pub const WORK_DIR: &str = "/golem/work";
/// Mount point of the output directory inside the container.
pub const OUTPUT_DIR: &str = "/golem/output";
/// File name of the job script in the work directory.
pub const JOB_SCRIPT: &str = "job.py";
/// File name of the job parameters in the work directory.
pub const PARAMS_FILE: &str = "params.json";

/// Status of a managed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// Container is created but not started.
    Pending,
    /// Container is running.
    Running,
    /// Container exited with code zero.
    Completed,
    /// Container failed with an error message.
    Failed(String),
    /// Container exceeded its timeout.
    Timeout,
    /// A kill was requested.
    Killed,
    /// Container has been removed.
    Removed,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Pending => write!(f, "pending"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Completed => write!(f, "completed"),
            ContainerStatus::Failed(msg) => write!(f, "failed: {}", msg),
            ContainerStatus::Timeout => write!(f, "timeout"),
            ContainerStatus::Killed => write!(f, "killed"),
            ContainerStatus::Removed => write!(f, "removed"),
        }
    }
}

/// A sandbox job running in a Docker container.
pub struct DockerJob {
    client: DockerClient,
    id: String,
    status: Mutex<ContainerStatus>,
}

impl DockerJob {
    /// Wraps an already created container.
    pub fn new(client: DockerClient, id: impl Into<String>) -> Self {
        Self {
            client,
            id: id.into(),
            status: Mutex::new(ContainerStatus::Pending),
        }
    }

    /// Returns the container ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the current status.
    pub fn status(&self) -> ContainerStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_status(&self, status: ContainerStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

#[async_trait]
impl ExecutionJob for DockerJob {
    async fn start(&self) -> Result<(), JobError> {
        let status = self.status();
        if status != ContainerStatus::Pending {
            return Err(JobError::Docker(format!(
                "Cannot start container in {} state",
                status
            )));
        }

        match self.client.start_container(&self.id).await {
            Ok(()) => {
                self.set_status(ContainerStatus::Running);
                tracing::debug!(container = %self.id, "Container started");
                Ok(())
            }
            Err(e) => {
                self.set_status(ContainerStatus::Failed(format!("Start failed: {}", e)));
                Err(e)
            }
        }
    }

    async fn kill(&self) -> Result<(), JobError> {
        self.client.kill_container(&self.id).await?;
        self.set_status(ContainerStatus::Killed);
        tracing::info!(container = %self.id, "Container kill requested");
        Ok(())
    }

    async fn wait(&self, timeout: Option<Duration>) -> Result<i64, JobError> {
        let waiting = self.client.wait_container(&self.id);

        let exit_code = match timeout {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(result) => result?,
                Err(_) => {
                    self.set_status(ContainerStatus::Timeout);
                    return Err(JobError::Timeout(limit));
                }
            },
            None => waiting.await?,
        };

        if self.status() != ContainerStatus::Killed {
            self.set_status(if exit_code == 0 {
                ContainerStatus::Completed
            } else {
                ContainerStatus::Failed(format!("Exited with code {}", exit_code))
            });
        }

        Ok(exit_code)
    }

    async fn dump_logs(&self, stdout: &Path, stderr: &Path) -> Result<(), JobError> {
        self.client.dump_logs(&self.id, stdout, stderr).await
    }

    async fn teardown(&self) -> Result<(), JobError> {
        self.client.remove_container(&self.id, true).await?;
        self.set_status(ContainerStatus::Removed);
        tracing::debug!(container = %self.id, "Container removed");
        Ok(())
    }
}

/// Sandbox runtime backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    client: DockerClient,
}

impl DockerRuntime {
    pub fn new(client: DockerClient) -> Self {
        Self { client }
    }

    /// Connects to the local Docker daemon.
    pub fn connect() -> Result<Self, JobError> {
        Ok(Self::new(DockerClient::new()?))
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn is_available(&self, image: &SandboxImage) -> bool {
        match self.client.image_id(&image.name()).await {
            Some(local_id) => image.matches_id(&local_id),
            None => false,
        }
    }

    async fn create_job(&self, spec: JobSpec) -> Result<Arc<dyn ExecutionJob>, JobError> {
        write_job_files(&spec).await?;

        let binds = vec![
            bind(&spec.resource_dir, RESOURCES_DIR, true).await?,
            bind(&spec.work_dir, WORK_DIR, false).await?,
            bind(&spec.output_dir, OUTPUT_DIR, false).await?,
        ];

        let config = ContainerConfig::new(format!("peer-job-{}", Uuid::new_v4()), spec.image.name())
            .with_cmd(vec![
                "python3".to_string(),
                format!("{WORK_DIR}/{JOB_SCRIPT}"),
            ])
            .with_working_dir(WORK_DIR)
            .with_binds(binds)
            .with_limits(spec.limits.clone());

        let id = self.client.create_container(&config).await?;
        tracing::debug!(container = %id, image = %spec.image, "Container created");

        Ok(Arc::new(DockerJob::new(self.client.clone(), id)))
    }
}

/// Writes the job script and its parameters into the work directory.
async fn write_job_files(spec: &JobSpec) -> Result<(), JobError> {
    tokio::fs::write(spec.work_dir.join(JOB_SCRIPT), &spec.src_code).await?;

    let params = serde_json::to_vec_pretty(&spec.extra_data)
        .map_err(|e| JobError::Docker(format!("Failed to encode job parameters: {e}")))?;
    tokio::fs::write(spec.work_dir.join(PARAMS_FILE), params).await?;

    Ok(())
}

async fn bind(host: &Path, target: &str, read_only: bool) -> Result<String, JobError> {
    let host: PathBuf = tokio::fs::canonicalize(host).await?;
    let mode = if read_only { "ro" } else { "rw" };
    Ok(format!("{}:{}:{}", host.display(), target, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_status_display() {
        assert_eq!(format!("{}", ContainerStatus::Pending), "pending");
        assert_eq!(format!("{}", ContainerStatus::Running), "running");
        assert_eq!(format!("{}", ContainerStatus::Completed), "completed");
        assert_eq!(format!("{}", ContainerStatus::Timeout), "timeout");
        assert_eq!(format!("{}", ContainerStatus::Killed), "killed");
        assert_eq!(
            format!("{}", ContainerStatus::Failed("error".to_string())),
            "failed: error"
        );
    }

    #[tokio::test]
    async fn test_write_job_files() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec {
            image: SandboxImage::new("python", "3.11-slim"),
            src_code: "print('hi')".to_string(),
            extra_data: serde_json::json!({"frames": [1, 2]}),
            resource_dir: dir.path().to_path_buf(),
            work_dir: dir.path().to_path_buf(),
            output_dir: dir.path().to_path_buf(),
            limits: None,
        };

        write_job_files(&spec).await.unwrap();

        let script = std::fs::read_to_string(dir.path().join(JOB_SCRIPT)).unwrap();
        assert_eq!(script, "print('hi')");
        let params: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(PARAMS_FILE)).unwrap()).unwrap();
        assert_eq!(params["frames"][1], 2);
    }

    #[tokio::test]
    async fn test_bind_modes() {
        let dir = tempfile::tempdir().unwrap();
        let ro = bind(dir.path(), RESOURCES_DIR, true).await.unwrap();
        assert!(ro.ends_with(":/golem/resources:ro"));

        let rw = bind(dir.path(), WORK_DIR, false).await.unwrap();
        assert!(rw.ends_with(":/golem/work:rw"));

        assert!(bind(&dir.path().join("missing"), WORK_DIR, false)
            .await
            .is_err());
    }
}
