//! Task descriptions handed to the supervisor and the results it reports.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;
use crate::execution::SandboxImage;

/// Description of one subtask to compute.
///
/// Immutable once handed to a [`TaskSupervisor`](super::TaskSupervisor).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDescriptor {
    /// Unique identifier of the subtask.
    pub subtask_id: String,
    /// Candidate sandbox images in order of preference.
    pub images: Vec<SandboxImage>,
    /// Source code run inside the sandbox.
    pub src_code: String,
    /// Extra parameters passed to the source code.
    #[serde(default)]
    pub extra_data: serde_json::Value,
    /// Human-readable description.
    #[serde(default)]
    pub short_desc: String,
    /// Directory holding the already resolved input resources.
    pub resource_dir: PathBuf,
    /// Scratch directory; `work/` and `output/` are created beneath it.
    pub scratch_dir: PathBuf,
    /// Computation timeout; zero disables timeout usage.
    #[serde(default)]
    pub timeout: Duration,
    /// Whether to estimate peak memory while the job runs.
    #[serde(default)]
    pub check_mem: bool,
}

impl TaskDescriptor {
    /// Creates a descriptor with no timeout, no extra data and memory checks off.
    pub fn new(
        subtask_id: impl Into<String>,
        images: Vec<SandboxImage>,
        src_code: impl Into<String>,
        resource_dir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            subtask_id: subtask_id.into(),
            images,
            src_code: src_code.into(),
            extra_data: serde_json::Value::Null,
            short_desc: String::new(),
            resource_dir: resource_dir.into(),
            scratch_dir: scratch_dir.into(),
            timeout: Duration::ZERO,
            check_mem: false,
        }
    }

    pub fn with_extra_data(mut self, extra_data: serde_json::Value) -> Self {
        self.extra_data = extra_data;
        self
    }

    pub fn with_short_desc(mut self, desc: impl Into<String>) -> Self {
        self.short_desc = desc.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_check_mem(mut self, check_mem: bool) -> Self {
        self.check_mem = check_mem;
        self
    }

    /// Timeout usage is enabled iff the timeout is non-zero.
    pub fn use_timeout(&self) -> bool {
        !self.timeout.is_zero()
    }

    /// Sandbox working directory.
    pub fn work_dir(&self) -> PathBuf {
        self.scratch_dir.join("work")
    }

    /// Directory results are collected from.
    pub fn output_dir(&self) -> PathBuf {
        self.scratch_dir.join("output")
    }
}

/// Kind of payload carried by a successful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultType {
    /// Inline data.
    Data = 0,
    /// A list of files in the output directory.
    Files = 1,
}

impl ResultType {
    /// Numeric discriminator used on the wire.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Payload of a successful computation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    /// Regular files found directly in the output directory.
    pub files: Vec<PathBuf>,
    /// Payload discriminator; always [`ResultType::Files`] for sandbox jobs.
    pub result_type: ResultType,
    /// Peak memory increase in bytes, when memory checks were enabled.
    pub estimated_memory: Option<u64>,
}

/// Terminal result of one supervised subtask.
///
/// Either a [`TaskOutput`] or a [`SupervisorError`], never both.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub subtask_id: String,
    pub outcome: Result<TaskOutput, SupervisorError>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn new(subtask_id: impl Into<String>, outcome: Result<TaskOutput, SupervisorError>) -> Self {
        Self {
            subtask_id: subtask_id.into(),
            outcome,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The failure, if the computation failed.
    pub fn error(&self) -> Option<&SupervisorError> {
        self.outcome.as_ref().err()
    }

    /// Human-readable failure message, if the computation failed.
    pub fn error_message(&self) -> Option<String> {
        self.error().map(ToString::to_string)
    }

    /// Produced files; empty on failure.
    pub fn output_files(&self) -> &[PathBuf] {
        match &self.outcome {
            Ok(output) => &output.files,
            Err(_) => &[],
        }
    }

    pub fn estimated_memory(&self) -> Option<u64> {
        self.outcome.as_ref().ok().and_then(|o| o.estimated_memory)
    }

    /// JSON summary used by the CLI and by callers that forward results.
    pub fn to_json(&self) -> serde_json::Value {
        match &self.outcome {
            Ok(output) => serde_json::json!({
                "subtask_id": self.subtask_id,
                "success": true,
                "result_type": output.result_type.as_u8(),
                "data": output.files,
                "estimated_memory": output.estimated_memory,
                "finished_at": self.finished_at,
            }),
            Err(err) => serde_json::json!({
                "subtask_id": self.subtask_id,
                "success": false,
                "error": err.to_string(),
                "finished_at": self.finished_at,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor::new(
            "sub-1",
            vec![SandboxImage::new("python", "3.11-slim")],
            "print(1)",
            "/res",
            "/tmp/sub-1",
        )
    }

    #[test]
    fn test_use_timeout() {
        let task = descriptor();
        assert!(!task.use_timeout());
        assert!(task.with_timeout(Duration::from_secs(5)).use_timeout());
    }

    #[test]
    fn test_scratch_layout() {
        let task = descriptor();
        assert_eq!(task.work_dir(), PathBuf::from("/tmp/sub-1/work"));
        assert_eq!(task.output_dir(), PathBuf::from("/tmp/sub-1/output"));
    }

    #[test]
    fn test_descriptor_deserialize_defaults() {
        let task: TaskDescriptor = serde_json::from_value(serde_json::json!({
            "subtask_id": "s",
            "images": [{"repository": "python", "tag": "3"}],
            "src_code": "pass",
            "resource_dir": "/r",
            "scratch_dir": "/t"
        }))
        .unwrap();

        assert_eq!(task.timeout, Duration::ZERO);
        assert!(!task.check_mem);
        assert!(task.extra_data.is_null());
        assert!(task.images[0].image_id.is_none());
    }

    #[test]
    fn test_result_success_accessors() {
        let result = ExecutionResult::new(
            "sub-1",
            Ok(TaskOutput {
                files: vec![PathBuf::from("/out/a.txt")],
                result_type: ResultType::Files,
                estimated_memory: Some(1024),
            }),
        );

        assert!(result.is_success());
        assert!(result.error_message().is_none());
        assert_eq!(result.output_files().len(), 1);
        assert_eq!(result.estimated_memory(), Some(1024));

        let json = result.to_json();
        assert_eq!(json["success"], true);
        assert_eq!(json["result_type"], 1);
        assert_eq!(json["data"][0], "/out/a.txt");
    }

    #[test]
    fn test_result_failure_accessors() {
        let result = ExecutionResult::new(
            "sub-1",
            Err(SupervisorError::SandboxNonZeroExit { code: 2 }),
        );

        assert!(!result.is_success());
        assert!(result.output_files().is_empty());
        assert!(result.estimated_memory().is_none());
        assert!(result.error_message().unwrap().contains("exit code 2"));
        assert_eq!(result.to_json()["success"], false);
    }
}
