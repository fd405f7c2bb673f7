//! Docker API wrapper using the bollard crate.
//!
//! This module provides the container operations a sandbox job needs:
//! create, start, kill, wait, log capture and removal.

use std::path::Path;

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::JobError;
use crate::execution::resources::ExecutionLimits;

/// Network mode of every sandbox container.
const SANDBOX_NETWORK: &str = "none";

/// What a sandbox container is created with.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    /// Host configuration supplied by the node's Docker manager.
    pub limits: Option<ExecutionLimits>,
    /// Bind mounts as `host:container:mode`.
    pub binds: Vec<String>,
}

impl ContainerConfig {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cmd: Vec::new(),
            working_dir: None,
            limits: None,
            binds: Vec::new(),
        }
    }

    pub fn with_limits(mut self, limits: Option<ExecutionLimits>) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_binds(mut self, binds: Vec<String>) -> Self {
        self.binds = binds;
        self
    }

    /// Sandboxes never get a network; limits apply only when supplied.
    fn host_config(&self) -> HostConfig {
        let limits = self.limits.as_ref();
        HostConfig {
            network_mode: Some(SANDBOX_NETWORK.to_string()),
            binds: (!self.binds.is_empty()).then(|| self.binds.clone()),
            memory: limits.map(ExecutionLimits::memory_bytes),
            cpu_period: limits.map(ExecutionLimits::cpu_period),
            cpu_quota: limits.map(ExecutionLimits::cpu_quota),
            pids_limit: limits.map(|l| l.max_processes as i64),
            ..Default::default()
        }
    }
}

/// Docker client wrapper for container operations.
#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `JobError::Transport` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, JobError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| JobError::Transport(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Creates a new container with the given configuration.
    ///
    /// # Returns
    ///
    /// The container ID on success.
    pub async fn create_container(&self, config: &ContainerConfig) -> Result<String, JobError> {
        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: (!config.cmd.is_empty()).then(|| config.cmd.clone()),
            working_dir: config.working_dir.clone(),
            host_config: Some(config.host_config()),
            // Separate stdout/stderr streams need a non-tty container.
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await?;

        Ok(response.id)
    }

    /// Starts a container by ID.
    pub async fn start_container(&self, id: &str) -> Result<(), JobError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;

        Ok(())
    }

    /// Sends SIGKILL to a container. Returns as soon as the daemon accepts it.
    pub async fn kill_container(&self, id: &str) -> Result<(), JobError> {
        let options = KillContainerOptions { signal: "SIGKILL" };

        self.docker.kill_container(id, Some(options)).await?;

        Ok(())
    }

    /// Removes a container by ID.
    ///
    /// # Arguments
    ///
    /// * `id` - Container ID
    /// * `force` - Force removal even if running
    pub async fn remove_container(&self, id: &str, force: bool) -> Result<(), JobError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.docker.remove_container(id, Some(options)).await?;

        Ok(())
    }

    /// Waits for a container to finish executing.
    ///
    /// # Returns
    ///
    /// The exit code of the container. A non-zero exit is reported by the
    /// daemon as a wait error and is translated back into its code here.
    pub async fn wait_container(&self, id: &str) -> Result<i64, JobError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(JobError::Docker(format!(
                "Wait stream for container {id} ended without a status"
            ))),
        }
    }

    /// Writes the container's stdout and stderr to two separate files.
    pub async fn dump_logs(
        &self,
        id: &str,
        stdout_path: &Path,
        stderr_path: &Path,
    ) -> Result<(), JobError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let mut stdout = File::create(stdout_path).await?;
        let mut stderr = File::create(stderr_path).await?;
        let mut logs = self.docker.logs(id, Some(options));

        while let Some(chunk) = logs.next().await {
            match chunk? {
                LogOutput::StdOut { message } => stdout.write_all(&message).await?,
                LogOutput::StdErr { message } => stderr.write_all(&message).await?,
                _ => {}
            }
        }

        stdout.flush().await?;
        stderr.flush().await?;
        Ok(())
    }

    /// Returns the id of a locally present image, or `None` if it is missing
    /// or the daemon cannot be reached.
    pub async fn image_id(&self, image: &str) -> Option<String> {
        match self.docker.inspect_image(image).await {
            Ok(info) => info.id,
            Err(e) => {
                tracing::debug!(image = %image, error = %e, "Image inspection failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_host_config_defaults() {
        let config = ContainerConfig::new("peer-job-1", "golemfactory/base:1.5")
            .with_cmd(vec!["python3".to_string(), "/golem/work/job.py".to_string()])
            .with_working_dir("/golem/work");
        let host = config.host_config();

        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert!(host.binds.is_none());
        assert!(host.memory.is_none());
        assert!(host.pids_limit.is_none());
        assert_eq!(config.cmd.len(), 2);
    }

    #[test]
    fn test_sandbox_host_config_with_limits() {
        let config = ContainerConfig::new("peer-job-2", "golemfactory/base:1.5")
            .with_limits(Some(ExecutionLimits::new(2048, 2.0, 200)))
            .with_binds(vec!["/res:/golem/resources:ro".to_string()]);
        let host = config.host_config();

        assert_eq!(host.memory, Some(2048 * 1024 * 1024));
        assert_eq!(host.cpu_period, Some(100_000));
        assert_eq!(host.cpu_quota, Some(200_000));
        assert_eq!(host.pids_limit, Some(200));
        assert_eq!(host.binds, Some(vec!["/res:/golem/resources:ro".to_string()]));
    }
}
