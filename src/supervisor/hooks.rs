//! Collaborators injected into the supervisor.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::execution::ExecutionLimits;
use crate::supervisor::task::ExecutionResult;

/// Receives the terminal result of a supervised task. Called exactly once per task.
pub trait TaskObserver: Send + Sync {
    fn task_computed(&self, result: &ExecutionResult);
}

impl<F> TaskObserver for F
where
    F: Fn(&ExecutionResult) + Send + Sync,
{
    fn task_computed(&self, result: &ExecutionResult) {
        self(result)
    }
}

/// Work to redo once connectivity to the sandbox runtime is restored.
pub type RecoveryCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// The node's manager of the sandbox runtime host.
#[async_trait]
pub trait DockerManager: Send + Sync {
    /// Host configuration applied to every sandbox container.
    fn container_host_config(&self) -> Option<ExecutionLimits>;

    /// Restores connectivity to the runtime, then runs `on_recovered`.
    async fn recover_vm_connectivity(&self, on_recovered: RecoveryCallback);
}
