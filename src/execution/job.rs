//! The narrow interface the supervisor uses to drive a sandbox.
//!
//! A [`SandboxRuntime`] checks image availability and creates jobs; creating
//! a job prepares the sandbox, and [`ExecutionJob::teardown`] releases it.
//! The supervisor calls `teardown` exactly once for every job it created.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::execution::resources::ExecutionLimits;

/// A candidate sandbox image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxImage {
    /// Image repository, e.g. `golemfactory/base`.
    pub repository: String,
    /// Image tag.
    pub tag: String,
    /// Expected image id; when set, a local image with another id does not count.
    #[serde(default)]
    pub image_id: Option<String>,
}

impl SandboxImage {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
            image_id: None,
        }
    }

    /// Pins the expected image id.
    pub fn with_id(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }

    /// Full `repository:tag` reference.
    pub fn name(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    /// Whether a locally present image with `local_id` satisfies this candidate.
    pub fn matches_id(&self, local_id: &str) -> bool {
        match &self.image_id {
            Some(expected) => expected == local_id,
            None => true,
        }
    }
}

impl fmt::Display for SandboxImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SandboxImage {
    type Err = String;

    /// Parses `repository[:tag]`; the tag defaults to `latest`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("image reference cannot be empty".to_string());
        }
        // A colon before the last slash belongs to a registry port.
        match s.rfind(':') {
            Some(idx) if !s[idx..].contains('/') => {
                let (repo, tag) = (&s[..idx], &s[idx + 1..]);
                if repo.is_empty() || tag.is_empty() {
                    return Err(format!("invalid image reference '{s}'"));
                }
                Ok(Self::new(repo, tag))
            }
            _ => Ok(Self::new(s, "latest")),
        }
    }
}

/// Everything a runtime needs to prepare one sandbox job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Image the job runs in.
    pub image: SandboxImage,
    /// Source code executed inside the sandbox.
    pub src_code: String,
    /// Extra parameters handed to the source code.
    pub extra_data: serde_json::Value,
    /// Host directory with the task's input resources (mounted read-only).
    pub resource_dir: PathBuf,
    /// Host directory used as the sandbox working directory.
    pub work_dir: PathBuf,
    /// Host directory the job writes its results into.
    pub output_dir: PathBuf,
    /// Host configuration from the node's Docker manager.
    pub limits: Option<ExecutionLimits>,
}

/// A single sandboxed computation.
///
/// Shared between the supervising task and the canceller, hence `&self`
/// everywhere.
#[async_trait]
pub trait ExecutionJob: Send + Sync {
    /// Starts the computation.
    async fn start(&self) -> Result<(), JobError>;

    /// Requests that the computation be killed. Does not wait for it to stop.
    async fn kill(&self) -> Result<(), JobError>;

    /// Waits for the computation to exit and returns its exit code.
    ///
    /// With `Some(limit)`, fails with [`JobError::Timeout`] once `limit` elapses.
    async fn wait(&self, timeout: Option<Duration>) -> Result<i64, JobError>;

    /// Writes the captured stdout and stderr to the given files.
    async fn dump_logs(&self, stdout: &Path, stderr: &Path) -> Result<(), JobError>;

    /// Releases the sandbox. Called once, on every exit path.
    async fn teardown(&self) -> Result<(), JobError>;
}

/// Creates sandbox jobs and answers image availability queries.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Whether `image` can be used right now.
    async fn is_available(&self, image: &SandboxImage) -> bool;

    /// Prepares a sandbox for `spec`.
    async fn create_job(&self, spec: JobSpec) -> Result<Arc<dyn ExecutionJob>, JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_name() {
        let image = SandboxImage::new("golemfactory/base", "1.5");
        assert_eq!(image.name(), "golemfactory/base:1.5");
        assert_eq!(image.to_string(), "golemfactory/base:1.5");
    }

    #[test]
    fn test_image_id_matching() {
        let unpinned = SandboxImage::new("repo", "tag");
        assert!(unpinned.matches_id("sha256:anything"));

        let pinned = unpinned.with_id("sha256:abc");
        assert!(pinned.matches_id("sha256:abc"));
        assert!(!pinned.matches_id("sha256:def"));
    }

    #[test]
    fn test_image_from_str() {
        let image: SandboxImage = "python:3.11-slim".parse().unwrap();
        assert_eq!(image.repository, "python");
        assert_eq!(image.tag, "3.11-slim");

        let image: SandboxImage = "golemfactory/blender".parse().unwrap();
        assert_eq!(image.tag, "latest");

        let image: SandboxImage = "registry.local:5000/team/img".parse().unwrap();
        assert_eq!(image.repository, "registry.local:5000/team/img");
        assert_eq!(image.tag, "latest");

        let image: SandboxImage = "registry.local:5000/team/img:v2".parse().unwrap();
        assert_eq!(image.repository, "registry.local:5000/team/img");
        assert_eq!(image.tag, "v2");

        assert!("".parse::<SandboxImage>().is_err());
        assert!("repo:".parse::<SandboxImage>().is_err());
    }
}
