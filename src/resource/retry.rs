//! Bounded retries around content-store client commands.
//!
//! Transient errors (see [`ClientError::is_transient`]) are retried with a
//! linear backoff until the attempt bound is reached; anything else fails
//! on the spot. The final error is always surfaced.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::CoreConfig;
use crate::error::{ClientError, ResourceError};

/// A successful command response and the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub response: T,
    pub attempts: u32,
}

/// Attempt bound and linear backoff applied to every client command.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.retry_max_attempts, config.retry_backoff)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }

    /// Runs `op` until it succeeds, fails permanently, or the bound is hit.
    ///
    /// `op` receives the 1-based attempt number. `correlation_id` tags every
    /// log line and the returned error.
    pub async fn run<T, F, Fut>(
        &self,
        command: &str,
        correlation_id: &str,
        mut op: F,
    ) -> Result<Retried<T>, ResourceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(response) => {
                    debug!(command, correlation_id, attempt, "Client command succeeded");
                    return Ok(Retried {
                        response,
                        attempts: attempt,
                    });
                }
                Err(err) if !err.is_transient() => {
                    return Err(ResourceError::Permanent {
                        command: command.to_string(),
                        correlation_id: correlation_id.to_string(),
                        source: err,
                    });
                }
                Err(err) if attempt >= self.max_attempts => {
                    return Err(ResourceError::RetryExhausted {
                        command: command.to_string(),
                        attempts: attempt,
                        correlation_id: correlation_id.to_string(),
                        source: err,
                    });
                }
                Err(err) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        command,
                        correlation_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient client error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
