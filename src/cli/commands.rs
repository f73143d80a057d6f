//! CLI command definitions for termbench.
//!
//! Three subcommands: `run` drives the benchmark against a participant
//! endpoint, `list-tasks` inspects a task directory, and `init-samples`
//! writes the built-in sample tasks to disk.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::episode::{
    EpisodeConfig, DEFAULT_MAX_TURNS, DEFAULT_RESPONSE_TIMEOUT_SECS, DEFAULT_WALL_CLOCK_SECS,
};
use crate::harness::{run_benchmark, HarnessConfig, DEFAULT_CONCURRENCY, DEFAULT_DATASET};
use crate::metrics::{export_metrics, init_metrics};
use crate::participant::{HttpParticipant, DEFAULT_PARTICIPANT_URL};
use crate::report::{render_text, SummaryOptions};
use crate::sandbox::docker::DEFAULT_PROVISION_TIMEOUT_SECS;
use crate::sandbox::{DockerRuntime, SandboxLimits};
use crate::task::{load_tasks, sample_tasks, write_samples, Task};
use crate::verify::DEFAULT_VERIFY_TIMEOUT_SECS;

/// Default directory for `init-samples` output.
const DEFAULT_SAMPLES_DIR: &str = "./tasks";

/// Terminal task benchmark for autonomous agents.
#[derive(Parser)]
#[command(name = "termbench")]
#[command(about = "Benchmark autonomous agents on terminal tasks in Docker sandboxes")]
#[command(version)]
#[command(
    long_about = "termbench evaluates an autonomous agent against terminal tasks.\n\nEach task runs as one episode: a fresh Docker sandbox is provisioned, the\nagent drives it through a turn-based command exchange, and a verification\nscript decides the outcome.\n\nExample usage:\n  termbench init-samples --output ./tasks\n  termbench run --tasks ./tasks --participant-url http://127.0.0.1:9010"
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
    /// Run the benchmark: one episode per task, concurrently.
    Run(RunArgs),

    /// List tasks discovered in a directory.
    #[command(alias = "ls")]
    ListTasks(ListTasksArgs),

    /// Write the built-in sample tasks to a directory.
    InitSamples(InitSamplesArgs),
}

/// Arguments for `termbench run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory containing task YAML files. Omit to run the built-in
    /// sample tasks.
    #[arg(short = 't', long)]
    pub tasks: Option<String>,

    /// Only run tasks with these ids (comma-separated).
    #[arg(long)]
    pub task: Option<String>,

    /// Participant endpoint that answers turn messages.
    #[arg(
        long,
        env = "TERMBENCH_PARTICIPANT_URL",
        default_value = DEFAULT_PARTICIPANT_URL
    )]
    pub participant_url: String,

    /// Number of episodes (and therefore sandboxes) to run concurrently.
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Maximum execute turns per episode.
    #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
    pub max_turns: u32,

    /// Wall-clock budget per episode in seconds.
    #[arg(long, default_value_t = DEFAULT_WALL_CLOCK_SECS)]
    pub timeout: u64,

    /// Per-turn participant response timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_RESPONSE_TIMEOUT_SECS)]
    pub response_timeout: u64,

    /// Verification script timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_VERIFY_TIMEOUT_SECS)]
    pub verify_timeout: u64,

    /// Sandbox provisioning timeout in seconds (image pull, create, setup).
    #[arg(long, default_value_t = DEFAULT_PROVISION_TIMEOUT_SECS)]
    pub provision_timeout: u64,

    /// Dataset name recorded in the report.
    #[arg(long, default_value = DEFAULT_DATASET)]
    pub dataset: String,

    /// Exclude errored episodes from the pass-rate denominator.
    #[arg(long)]
    pub exclude_errored: bool,

    /// Sandbox memory limit in megabytes.
    #[arg(long, default_value = "512")]
    pub memory_mb: u64,

    /// Sandbox CPU allocation in cores.
    #[arg(long, default_value = "0.5")]
    pub cpu_cores: f64,

    /// Sandbox process count limit.
    #[arg(long, default_value = "256")]
    pub pids_limit: i64,

    /// Sandbox network mode (a Docker network name, or "none").
    #[arg(long, default_value = "none")]
    pub network: String,

    /// Write the full JSON report to this file.
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// Write Prometheus metrics to this file after the run.
    #[arg(long)]
    pub metrics_out: Option<String>,

    /// Print the JSON report to stdout instead of the text summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `termbench list-tasks`.
#[derive(Parser, Debug)]
pub struct ListTasksArgs {
    /// Directory containing task YAML files. Omit to list the built-in
    /// sample tasks.
    #[arg(short = 't', long)]
    pub tasks: Option<String>,

    /// Output the task list as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `termbench init-samples`.
#[derive(Parser, Debug)]
pub struct InitSamplesArgs {
    /// Directory to write the sample task files into.
    #[arg(short = 'o', long, default_value = DEFAULT_SAMPLES_DIR)]
    pub output: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the termbench CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_benchmark_command(args).await,
        Commands::ListTasks(args) => run_list_tasks_command(args).await,
        Commands::InitSamples(args) => run_init_samples_command(args).await,
    }
}

async fn run_benchmark_command(args: RunArgs) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!("Failed to initialize metrics: {e}");
    }

    let (mut tasks, source) = resolve_tasks(args.tasks.as_deref())?;
    if let Some(filter) = &args.task {
        let wanted = parse_task_filter(filter);
        tasks.retain(|t| wanted.contains(t.id.as_str()));
        if tasks.is_empty() {
            anyhow::bail!("No tasks from {source} matched filter {filter:?}");
        }
    }

    let limits = SandboxLimits::new()
        .with_memory_mb(args.memory_mb)
        .with_cpu_cores(args.cpu_cores)
        .with_pids_limit(args.pids_limit)
        .with_network_mode(&args.network);
    let runtime = Arc::new(
        DockerRuntime::new()?
            .with_limits(limits)
            .with_provision_timeout(Duration::from_secs(args.provision_timeout)),
    );
    let participant = Arc::new(HttpParticipant::new(&args.participant_url));

    info!(
        tasks = tasks.len(),
        participant = %args.participant_url,
        "Evaluating tasks from {source}"
    );

    let episode = EpisodeConfig::new()
        .with_max_turns(args.max_turns)
        .with_wall_clock(Duration::from_secs(args.timeout))
        .with_response_timeout(Duration::from_secs(args.response_timeout))
        .with_verify_timeout(Duration::from_secs(args.verify_timeout));
    let config = HarnessConfig {
        dataset: args.dataset.clone(),
        concurrency: args.concurrency,
        episode,
        summary: SummaryOptions {
            exclude_errored: args.exclude_errored,
        },
    };

    let report = run_benchmark(tasks, runtime, participant, &config).await?;

    if let Some(path) = &args.output {
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!("Wrote JSON report to {path}");
    }
    if let Some(path) = &args.metrics_out {
        fs::write(path, export_metrics())?;
        info!("Wrote metrics to {path}");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n{}", render_text(&report));
    }

    Ok(())
}

async fn run_list_tasks_command(args: ListTasksArgs) -> anyhow::Result<()> {
    let (tasks, source) = resolve_tasks(args.tasks.as_deref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    println!("Found {} tasks in {}", tasks.len(), source);
    for task in &tasks {
        let turn_limit = task
            .max_turns
            .map_or_else(|| "default".to_string(), |n| n.to_string());
        println!(
            "  {} [{}] turns={} {}",
            task.id,
            task.docker_image,
            turn_limit,
            instruction_preview(task)
        );
    }
    Ok(())
}

async fn run_init_samples_command(args: InitSamplesArgs) -> anyhow::Result<()> {
    let written = write_samples(Path::new(&args.output))?;
    println!("Wrote {} sample tasks to {}", written.len(), args.output);
    for path in &written {
        println!("  {}", path.display());
    }
    Ok(())
}

/// Load tasks from a directory, or fall back to the built-in samples
/// when no directory was given.
fn resolve_tasks(dir: Option<&str>) -> anyhow::Result<(Vec<Task>, String)> {
    match dir {
        Some(dir) => Ok((load_tasks(Path::new(dir))?, dir.to_string())),
        None => Ok((sample_tasks(), "built-in samples".to_string())),
    }
}

fn parse_task_filter(filter: &str) -> HashSet<&str> {
    filter
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect()
}

/// First line of the instruction, truncated for one-line listings.
fn instruction_preview(task: &Task) -> String {
    let first_line = task.instruction.lines().next().unwrap_or("");
    let max = 60;
    if first_line.len() <= max {
        return first_line.to_string();
    }
    let mut end = max;
    while !first_line.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &first_line[..end])
}
