//! CLI command definitions for peer-core.
//!
//! `run` computes one subtask in a Docker sandbox; `publish` pushes task
//! resources to the local content store and prints their wire form.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::Map;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::execution::{DockerRuntime, SandboxImage};
use crate::resource::{AddOutcome, PeerAddress, ResourceManager};
use crate::supervisor::{ExecutionResult, HostMemoryMonitor, TaskDescriptor, TaskSupervisor};

/// Node-local task supervision and resource distribution.
#[derive(Parser)]
#[command(name = "peer-core")]
#[command(about = "Run sandboxed subtasks and publish task resources")]
#[command(version)]
#[command(
    long_about = "peer-core computes a single subtask inside a Docker sandbox with timeout and cancellation, and publishes task resources to a content-addressed store.\n\nExample usage:\n  peer-core run --image golemfactory/base:1.5 --src job.py --resource-dir ./res --scratch-dir ./tmp/st1\n  peer-core publish --task-id t1 --node-id n1 ./res/t1/scene.blend"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Compute one subtask in a Docker sandbox and print its result as JSON.
    Run(RunArgs),

    /// Publish files for a task and print the wire references as JSON.
    Publish(PublishArgs),
}

/// Arguments for `peer-core run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Candidate image (`repository[:tag]`), in order of preference. Repeatable.
    #[arg(long = "image", required = true)]
    pub images: Vec<SandboxImage>,

    /// Local id the first image must match, if any.
    #[arg(long)]
    pub image_id: Option<String>,

    /// Path of the source code to run inside the sandbox.
    #[arg(long)]
    pub src: PathBuf,

    /// Directory with the resolved input resources.
    #[arg(long)]
    pub resource_dir: PathBuf,

    /// Scratch directory; work/ and output/ are created beneath it.
    #[arg(long)]
    pub scratch_dir: PathBuf,

    /// Subtask identifier (random when omitted).
    #[arg(long)]
    pub subtask_id: Option<String>,

    /// Timeout in seconds; 0 disables it. Defaults to PEER_TASK_TIMEOUT_SECS.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Extra parameters for the source code, as JSON.
    #[arg(long)]
    pub extra_data: Option<String>,

    /// Estimate peak memory while the job runs.
    #[arg(long)]
    pub check_mem: bool,
}

/// Arguments for `peer-core publish`.
#[derive(Parser, Debug)]
pub struct PublishArgs {
    /// Task the files belong to.
    #[arg(long)]
    pub task_id: String,

    /// Identifier of this node, announced in the client options.
    #[arg(long)]
    pub node_id: String,

    /// Port the local daemon accepts peer connections on.
    #[arg(long, default_value = "3282")]
    pub daemon_port: u16,

    /// Known content-store peer (`host:port`). Repeatable.
    #[arg(long = "peer")]
    pub peers: Vec<PeerAddress>,

    /// Files to publish.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = CoreConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Run(args) => run_task_command(args, &config).await,
        Commands::Publish(args) => run_publish_command(args, &config).await,
    }
}

fn build_task(args: RunArgs, config: &CoreConfig) -> anyhow::Result<TaskDescriptor> {
    let src_code = std::fs::read_to_string(&args.src)
        .with_context(|| format!("Failed to read source file {}", args.src.display()))?;

    let extra_data = match args.extra_data.as_deref() {
        Some(raw) => serde_json::from_str(raw).context("--extra-data is not valid JSON")?,
        None => serde_json::Value::Null,
    };

    let mut images = args.images;
    if let (Some(id), Some(first)) = (args.image_id, images.first_mut()) {
        *first = first.clone().with_id(id);
    }

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(config.task_timeout);

    Ok(TaskDescriptor::new(
        args.subtask_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        images,
        src_code,
        args.resource_dir,
        args.scratch_dir,
    )
    .with_extra_data(extra_data)
    .with_timeout(timeout)
    .with_check_mem(args.check_mem))
}

async fn run_task_command(args: RunArgs, config: &CoreConfig) -> anyhow::Result<()> {
    let task = build_task(args, config)?;
    let runtime = Arc::new(DockerRuntime::connect().context("Failed to connect to Docker")?);
    let observer = Arc::new(|result: &ExecutionResult| {
        info!(
            subtask_id = %result.subtask_id,
            success = result.is_success(),
            "Task computed"
        );
    });

    let supervisor = Arc::new(
        TaskSupervisor::new(task, runtime, observer).with_memory_monitor_factory(
            HostMemoryMonitor::factory(config.memory_sample_interval),
        ),
    );

    let mut running = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    let result = tokio::select! {
        joined = &mut running => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, terminating the computation");
            supervisor.end_comp().await;
            running.await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&result.to_json())?);

    match result.error_message() {
        Some(message) => anyhow::bail!(message),
        None => Ok(()),
    }
}

async fn run_publish_command(args: PublishArgs, config: &CoreConfig) -> anyhow::Result<()> {
    let daemon = PeerAddress::new(config.hyperdrive_host.clone(), args.daemon_port);
    let manager = ResourceManager::new(config, vec![daemon]);
    let options = manager.build_client_options(&args.node_id, &args.peers, Map::new());

    let outcome = manager
        .add_files(&args.files, &args.task_id, None, Some(&options))
        .await?;

    match outcome {
        AddOutcome::Added(bundle) => {
            let wire = ResourceManager::to_wire(&[Some(bundle)]);
            println!("{}", serde_json::to_string_pretty(&wire)?);
            Ok(())
        }
        AddOutcome::EmptyFileSet => anyhow::bail!("No files to publish"),
        AddOutcome::MissingFile(path) => {
            anyhow::bail!("Resource file does not exist: {}", path.display())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "peer-core",
            "run",
            "--image",
            "golemfactory/base:1.5",
            "--image",
            "golemfactory/base",
            "--src",
            "job.py",
            "--resource-dir",
            "res",
            "--scratch-dir",
            "tmp",
            "--timeout",
            "30",
            "--check-mem",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.images[0], SandboxImage::new("golemfactory/base", "1.5"));
        assert_eq!(args.images[1].tag, "latest");
        assert_eq!(args.timeout, Some(30));
        assert!(args.check_mem);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_parse_publish() {
        let cli = Cli::try_parse_from([
            "peer-core",
            "-l",
            "debug",
            "publish",
            "--task-id",
            "t1",
            "--node-id",
            "n1",
            "--peer",
            "10.0.0.2:3282",
            "/abs/in.txt",
        ])
        .unwrap();

        let Commands::Publish(args) = cli.command else {
            panic!("expected publish command");
        };
        assert_eq!(args.peers, vec![PeerAddress::new("10.0.0.2", 3282)]);
        assert_eq!(args.files, vec![PathBuf::from("/abs/in.txt")]);
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_build_task() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("job.py");
        std::fs::write(&src, "print('hi')").unwrap();

        let args = RunArgs {
            images: vec![SandboxImage::new("golemfactory/base", "1.5")],
            image_id: Some("sha256:abc".to_string()),
            src,
            resource_dir: dir.path().join("res"),
            scratch_dir: dir.path().join("tmp"),
            subtask_id: Some("st1".to_string()),
            timeout: None,
            extra_data: Some(r#"{"frames":[1,2]}"#.to_string()),
            check_mem: false,
        };
        let config = CoreConfig::default().with_task_timeout(Duration::from_secs(9));

        let task = build_task(args, &config).unwrap();

        assert_eq!(task.subtask_id, "st1");
        assert_eq!(task.src_code, "print('hi')");
        assert_eq!(task.timeout, Duration::from_secs(9));
        assert!(task.images[0].matches_id("sha256:abc"));
        assert_eq!(task.extra_data["frames"][1], 2);
    }

    #[test]
    fn test_build_task_rejects_bad_extra_data() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("job.py");
        std::fs::write(&src, "").unwrap();

        let args = RunArgs {
            images: vec![SandboxImage::new("img", "1")],
            image_id: None,
            src,
            resource_dir: dir.path().to_path_buf(),
            scratch_dir: dir.path().to_path_buf(),
            subtask_id: None,
            timeout: Some(0),
            extra_data: Some("{not json".to_string()),
            check_mem: false,
        };

        assert!(build_task(args, &CoreConfig::default()).is_err());
    }
}
