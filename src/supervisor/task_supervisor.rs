//! Supervision of a single sandboxed subtask.
//!
//! A [`TaskSupervisor`] drives one [`TaskDescriptor`] to exactly one terminal
//! [`ExecutionResult`]:
//!
//! ```text
//! Created → ImageSelected → Preparing → Running → Awaiting → Collecting → Succeeded
//!     │            │             │           │          │            └──→ Failed(exit code)
//!     └────────────┴─────────────┴───────────┴──────────┴──→ Failed(timeout | terminated | error)
//! ```
//!
//! `run` is awaited on its own task; `end_comp` may be awaited concurrently
//! from another task to cancel the computation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

use crate::error::{JobError, SupervisorError};
use crate::execution::{ExecutionJob, JobSpec, SandboxImage, SandboxRuntime};
use crate::supervisor::hooks::{DockerManager, TaskObserver};
use crate::supervisor::monitor::{
    HostMemoryMonitor, LivenessMonitor, MemoryMonitor, MemoryMonitorFactory,
    DEFAULT_SAMPLE_INTERVAL,
};
use crate::supervisor::task::{ExecutionResult, ResultType, TaskDescriptor, TaskOutput};

/// Dump of the job's stdout, placed in the output directory.
pub const STDOUT_FILE: &str = "stdout.log";
/// Dump of the job's stderr, placed in the output directory.
pub const STDERR_FILE: &str = "stderr.log";

/// Supervises the execution of one subtask inside a sandbox.
pub struct TaskSupervisor {
    task: TaskDescriptor,
    runtime: Arc<dyn SandboxRuntime>,
    observer: Arc<dyn TaskObserver>,
    manager: Option<Arc<dyn DockerManager>>,
    liveness_monitor: Option<Arc<dyn LivenessMonitor>>,
    memory_monitor_factory: MemoryMonitorFactory,

    /// Set once by the supervising task; read lock-free by `end_comp`.
    job: OnceLock<Arc<dyn ExecutionJob>>,
    /// Only ever goes from `false` to `true`.
    terminating: Mutex<bool>,
    memory_monitor: Mutex<Option<Box<dyn MemoryMonitor>>>,
    started: AtomicBool,
    reported: AtomicBool,
    torn_down: AtomicBool,
}

impl TaskSupervisor {
    /// Creates a supervisor for `task`.
    ///
    /// Results are delivered to `observer`. Memory checks use a
    /// [`HostMemoryMonitor`] unless another factory is supplied.
    pub fn new(
        task: TaskDescriptor,
        runtime: Arc<dyn SandboxRuntime>,
        observer: Arc<dyn TaskObserver>,
    ) -> Self {
        Self {
            task,
            runtime,
            observer,
            manager: None,
            liveness_monitor: None,
            memory_monitor_factory: HostMemoryMonitor::factory(DEFAULT_SAMPLE_INTERVAL),
            job: OnceLock::new(),
            terminating: Mutex::new(false),
            memory_monitor: Mutex::new(None),
            started: AtomicBool::new(false),
            reported: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Supplies the host configuration and connectivity recovery.
    pub fn with_manager(mut self, manager: Arc<dyn DockerManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Registers a liveness monitor to stop when the task ends.
    pub fn with_liveness_monitor(mut self, monitor: Arc<dyn LivenessMonitor>) -> Self {
        self.liveness_monitor = Some(monitor);
        self
    }

    /// Replaces the memory monitor used when memory checks are enabled.
    pub fn with_memory_monitor_factory(mut self, factory: MemoryMonitorFactory) -> Self {
        self.memory_monitor_factory = factory;
        self
    }

    /// The supervised task.
    pub fn task(&self) -> &TaskDescriptor {
        &self.task
    }

    /// Progress of the computation.
    ///
    /// The sandbox reports no progress, so this is always `0.0`; it is not a
    /// liveness signal.
    pub fn get_progress(&self) -> f64 {
        0.0
    }

    /// Whether cancellation has been requested.
    pub fn is_terminating(&self) -> bool {
        *self.terminating.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the task to its terminal result and notifies the observer once.
    ///
    /// A supervisor runs a single time; further calls fail without
    /// notifying the observer again. If the returned future is dropped or a
    /// collaborator panics, monitors are still stopped, the sandbox is torn
    /// down in the background and the observer receives an unclassified
    /// failure.
    #[instrument(level = "info", skip(self), fields(subtask_id = %self.task.subtask_id))]
    pub async fn run(&self) -> ExecutionResult {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Supervisor already ran this task");
            return ExecutionResult::new(
                self.task.subtask_id.clone(),
                Err(SupervisorError::unclassified("task has already been run")),
            );
        }

        let mut guard = RunGuard {
            supervisor: self,
            completed: false,
        };

        let clock = Instant::now();
        let outcome = self.supervise(clock).await;
        self.cleanup();

        let result = ExecutionResult::new(self.task.subtask_id.clone(), outcome);
        self.report(&result);
        guard.completed = true;
        result
    }

    /// Requests cancellation of the running computation.
    ///
    /// Marks the task as terminating, then asks the job to be killed. Before
    /// the job exists this only sets the flag; the supervisor fails the task
    /// at its pre-start check. A kill lost to a transport error is retried
    /// through the manager's connectivity recovery.
    #[instrument(level = "info", skip(self), fields(subtask_id = %self.task.subtask_id))]
    pub async fn end_comp(&self) {
        *self.terminating.lock().unwrap_or_else(PoisonError::into_inner) = true;

        let Some(job) = self.job.get().cloned() else {
            debug!("No job to kill yet");
            return;
        };

        match job.kill().await {
            Ok(()) => info!("Kill requested"),
            Err(e) if e.is_transport() => {
                warn!(error = %e, "Kill request failed, recovering runtime connectivity");
                if let Some(manager) = &self.manager {
                    manager
                        .recover_vm_connectivity(Box::new(move || {
                            async move {
                                if let Err(e) = job.kill().await {
                                    warn!(error = %e, "Kill after connectivity recovery failed");
                                }
                            }
                            .boxed()
                        }))
                        .await;
                }
            }
            Err(e) => warn!(error = %e, "Kill request failed"),
        }
    }

    async fn supervise(&self, clock: Instant) -> Result<TaskOutput, SupervisorError> {
        let image = self.select_image().await?;
        let (work_dir, output_dir) = self.prepare_dirs().await?;

        let spec = JobSpec {
            image,
            src_code: self.task.src_code.clone(),
            extra_data: self.task.extra_data.clone(),
            resource_dir: self.task.resource_dir.clone(),
            work_dir,
            output_dir: output_dir.clone(),
            limits: self
                .manager
                .as_ref()
                .and_then(|m| m.container_host_config()),
        };

        let job = self.runtime.create_job(spec).await.map_err(|e| {
            if e.is_timeout() {
                self.job_failure(e, clock)
            } else {
                SupervisorError::PreparationFailure(e.to_string())
            }
        })?;
        // Only this task sets the handle, and only once per run.
        let _ = self.job.set(Arc::clone(&job));

        let outcome = self.drive(job.as_ref(), &output_dir, clock).await;

        if !self.torn_down.swap(true, Ordering::SeqCst) {
            if let Err(e) = job.teardown().await {
                warn!(error = %e, "Failed to tear down sandbox");
            }
        }
        outcome
    }

    async fn select_image(&self) -> Result<SandboxImage, SupervisorError> {
        for image in &self.task.images {
            if self.runtime.is_available(image).await {
                debug!(image = %image, "Selected image");
                return Ok(image.clone());
            }
        }
        Err(SupervisorError::ImageUnavailable)
    }

    async fn prepare_dirs(&self) -> Result<(PathBuf, PathBuf), SupervisorError> {
        let work_dir = self.task.work_dir();
        let output_dir = self.task.output_dir();

        for dir in [&work_dir, &output_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                SupervisorError::PreparationFailure(format!(
                    "cannot create {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok((work_dir, output_dir))
    }

    async fn drive(
        &self,
        job: &dyn ExecutionJob,
        output_dir: &Path,
        clock: Instant,
    ) -> Result<TaskOutput, SupervisorError> {
        if self.task.check_mem {
            let monitor = (self.memory_monitor_factory)();
            monitor.start();
            *self
                .memory_monitor
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(monitor);
        }

        self.check_termination()?;
        job.start().await.map_err(|e| self.job_failure(e, clock))?;

        // A kill sent while the job was still starting is refused by the runtime.
        if self.is_terminating() {
            if let Err(e) = job.kill().await {
                warn!(error = %e, "Kill after start failed");
            }
            return Err(SupervisorError::TerminationRequested);
        }

        let timeout = self.task.use_timeout().then_some(self.task.timeout);
        let exit_code = job
            .wait(timeout)
            .await
            .map_err(|e| self.job_failure(e, clock))?;

        job.dump_logs(&output_dir.join(STDOUT_FILE), &output_dir.join(STDERR_FILE))
            .await
            .map_err(|e| self.job_failure(e, clock))?;

        let estimated_memory = self.stop_memory_monitor();

        if self.is_terminating() {
            return Err(SupervisorError::TerminationRequested);
        }
        if exit_code != 0 {
            return Err(SupervisorError::SandboxNonZeroExit { code: exit_code });
        }

        let files = collect_output_files(output_dir)?;
        info!(exit_code, files = files.len(), "Subtask computed");

        Ok(TaskOutput {
            files,
            result_type: ResultType::Files,
            estimated_memory,
        })
    }

    fn check_termination(&self) -> Result<(), SupervisorError> {
        if self.is_terminating() {
            return Err(SupervisorError::TerminationRequested);
        }
        Ok(())
    }

    /// Timeouts count as task timeouts only when timeout usage is enabled.
    fn job_failure(&self, err: JobError, clock: Instant) -> SupervisorError {
        if err.is_timeout() && self.task.use_timeout() {
            SupervisorError::Timeout {
                elapsed: clock.elapsed(),
            }
        } else {
            SupervisorError::unclassified(err)
        }
    }

    fn stop_memory_monitor(&self) -> Option<u64> {
        self.memory_monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .and_then(|monitor| monitor.stop())
    }

    fn cleanup(&self) {
        self.stop_memory_monitor();
        if let Some(monitor) = &self.liveness_monitor {
            monitor.stop();
        }
    }

    /// The published job, unless it has already been torn down.
    fn job_to_release(&self) -> Option<Arc<dyn ExecutionJob>> {
        self.job
            .get()
            .filter(|_| !self.torn_down.swap(true, Ordering::SeqCst))
            .cloned()
    }

    fn report(&self, result: &ExecutionResult) {
        if self.reported.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(err) = result.error() {
            error!(error = %err, "Task computing error");
        }
        self.observer.task_computed(result);
    }
}

/// Releases what `run` acquired when it does not reach its normal end.
struct RunGuard<'a> {
    supervisor: &'a TaskSupervisor,
    completed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let supervisor = self.supervisor;
        warn!("Supervision interrupted, releasing the sandbox");
        supervisor.cleanup();

        if let Some(job) = supervisor.job_to_release() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = job.teardown().await {
                            warn!(error = %e, "Failed to tear down sandbox");
                        }
                    });
                }
                Err(_) => warn!("No runtime left to tear down the sandbox"),
            }
        }

        let result = ExecutionResult::new(
            supervisor.task.subtask_id.clone(),
            Err(SupervisorError::unclassified("supervision was interrupted")),
        );
        supervisor.report(&result);
    }
}

/// Lists the regular files directly inside `output_dir`, sorted.
///
/// Symlinks count when they point at a regular file; dangling ones are skipped.
fn collect_output_files(output_dir: &Path) -> Result<Vec<PathBuf>, SupervisorError> {
    let mut files = Vec::new();
    let entries = WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true);
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() > 0 && is_not_found(&e) => continue,
            Err(e) => return Err(SupervisorError::unclassified(e)),
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}
