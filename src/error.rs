//! Error types for peer-core operations.
//!
//! Defines the error types for the node-local subsystems:
//! - Task supervision (terminal failures reported to the caller)
//! - Sandbox job control (Docker transport and wait errors)
//! - Content-store client calls and resource publishing
//! - Configuration loading

use std::time::Duration;

use thiserror::Error;

/// Terminal failures of a supervised task.
///
/// Every variant ends a task run; the supervisor converts it into a failed
/// `ExecutionResult` and never re-raises it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SupervisorError {
    #[error("None of the Docker images is available")]
    ImageUnavailable,

    #[error("Failed to prepare task environment: {0}")]
    PreparationFailure(String),

    #[error("Subtask computation failed with exit code {code}")]
    SandboxNonZeroExit { code: i64 },

    #[error("Task timed out after {:.1}s", .elapsed.as_secs_f64())]
    Timeout { elapsed: Duration },

    #[error("Job terminated")]
    TerminationRequested,

    #[error("{message}")]
    Unclassified { message: String },
}

impl SupervisorError {
    /// Wraps any displayable error as an unclassified failure.
    pub fn unclassified(err: impl std::fmt::Display) -> Self {
        SupervisorError::Unclassified {
            message: err.to_string(),
        }
    }
}

/// Errors raised by a sandbox job or the runtime that creates it.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Read timed out while talking to the sandbox runtime")]
    ReadTimeout,

    #[error("Sandbox runtime transport error: {0}")]
    Transport(String),

    #[error("Sandbox runtime error: {0}")]
    Docker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// True for both the bounded-wait timeout and a transport read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, JobError::Timeout(_) | JobError::ReadTimeout)
    }

    /// True when the runtime could not be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, JobError::Transport(_) | JobError::ReadTimeout)
    }
}

impl From<bollard::errors::Error> for JobError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error as BollardError;

        match err {
            BollardError::RequestTimeoutError => JobError::ReadTimeout,
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => JobError::Docker(format!("{status_code}: {message}")),
            other => JobError::Transport(other.to_string()),
        }
    }
}

/// Errors returned by a content-store client command.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Content store unreachable: {0}")]
    Transport(String),

    #[error("Content store request timed out")]
    Timeout,

    #[error("Content store server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Content store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid content store response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Whether a retry of the same command may succeed.
    ///
    /// Connection failures, timeouts, server errors (5xx) and rate limiting
    /// (429) are transient; everything else fails immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Timeout => true,
            ClientError::Server { .. } => true,
            ClientError::Rejected { status, .. } => *status == 429,
            ClientError::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::InvalidResponse(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

/// Hard failures of resource publishing.
///
/// Missing source files and empty inputs are not errors; they are reported
/// through `AddOutcome`.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Command '{command}' failed after {attempts} attempts (correlation id {correlation_id}): {source}")]
    RetryExhausted {
        command: String,
        attempts: u32,
        correlation_id: String,
        #[source]
        source: ClientError,
    },

    #[error("Command '{command}' failed (correlation id {correlation_id}): {source}")]
    Permanent {
        command: String,
        correlation_id: String,
        #[source]
        source: ClientError,
    },
}

impl ResourceError {
    /// Returns the underlying client error.
    pub fn client_error(&self) -> &ClientError {
        match self {
            ResourceError::RetryExhausted { source, .. } => source,
            ResourceError::Permanent { source, .. } => source,
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_error_messages() {
        assert_eq!(
            SupervisorError::ImageUnavailable.to_string(),
            "None of the Docker images is available"
        );
        assert_eq!(
            SupervisorError::SandboxNonZeroExit { code: 137 }.to_string(),
            "Subtask computation failed with exit code 137"
        );
        assert_eq!(
            SupervisorError::Timeout {
                elapsed: Duration::from_millis(2500)
            }
            .to_string(),
            "Task timed out after 2.5s"
        );
        assert_eq!(
            SupervisorError::unclassified("boom").to_string(),
            "boom"
        );
    }

    #[test]
    fn test_job_error_classification() {
        assert!(JobError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(JobError::ReadTimeout.is_timeout());
        assert!(JobError::ReadTimeout.is_transport());
        assert!(JobError::Transport("refused".into()).is_transport());
        assert!(!JobError::Docker("404: no such container".into()).is_transport());
        assert!(!JobError::Docker("500".into()).is_timeout());
    }

    #[test]
    fn test_client_error_transience() {
        assert!(ClientError::Transport("connection refused".into()).is_transient());
        assert!(ClientError::Timeout.is_transient());
        assert!(ClientError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(ClientError::Rejected {
            status: 429,
            message: "slow down".into()
        }
        .is_transient());
        assert!(!ClientError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
        assert!(!ClientError::InvalidResponse("no hash".into()).is_transient());
    }

    #[test]
    fn test_resource_error_source() {
        let err = ResourceError::RetryExhausted {
            command: "add".into(),
            attempts: 3,
            correlation_id: "abc".into(),
            source: ClientError::Timeout,
        };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("abc"));
        assert!(matches!(err.client_error(), ClientError::Timeout));
    }
}
