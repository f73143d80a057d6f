//! Concurrent benchmark execution.
//!
//! Every task becomes one episode. Episodes run concurrently under a
//! semaphore that bounds how many sandboxes are alive at once; the permit
//! spans provisioning through teardown. Within an episode, turns stay
//! strictly sequential. Ctrl-C fans out over a broadcast channel so
//! in-flight episodes tear down their sandboxes before the run returns.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};

use crate::episode::{EpisodeConfig, EpisodeOrchestrator, EpisodeResult};
use crate::metrics::MetricsCollector;
use crate::participant::Participant;
use crate::report::{summarize, BenchmarkReport, SummaryOptions};
use crate::sandbox::SandboxRuntime;
use crate::task::Task;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_DATASET: &str = "terminal-bench-core";

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub dataset: String,
    pub concurrency: usize,
    pub episode: EpisodeConfig,
    pub summary: SummaryOptions,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            episode: EpisodeConfig::default(),
            summary: SummaryOptions::default(),
        }
    }
}

/// Run every task through an episode and aggregate the results.
///
/// Results come back in task order regardless of completion order. A
/// panicked episode task is recorded as an errored episode rather than
/// aborting the run.
pub async fn run_benchmark(
    tasks: Vec<Task>,
    runtime: Arc<dyn SandboxRuntime>,
    participant: Arc<dyn Participant>,
    config: &HarnessConfig,
) -> Result<BenchmarkReport> {
    if tasks.is_empty() {
        anyhow::bail!("No tasks to evaluate");
    }

    let concurrency = config.concurrency.max(1);
    info!(
        tasks = tasks.len(),
        concurrency,
        dataset = %config.dataset,
        "Starting benchmark run"
    );

    let orchestrator = Arc::new(EpisodeOrchestrator::new(
        runtime,
        participant,
        config.episode.clone(),
    ));
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let signal_forwarder = tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling in-flight episodes");
                let _ = shutdown_tx.send(());
            }
        }
    });

    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        let orchestrator = Arc::clone(&orchestrator);
        let semaphore = Arc::clone(&semaphore);
        let shutdown = shutdown_tx.subscribe();
        let task_id = task.id.clone();
        let handle = tokio::spawn(async move {
            // The permit is held from provisioning through teardown, so at
            // most `concurrency` sandboxes exist at any moment.
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return EpisodeResult::infrastructure_failure(
                        &task.id,
                        "Evaluation aborted before the episode started",
                    );
                }
            };
            orchestrator.run(&task, shutdown).await
        });
        handles.push((task_id, handle));
    }

    let metrics = MetricsCollector::new();
    let mut results = Vec::with_capacity(handles.len());
    for (task_id, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(task_id = %task_id, "Episode task panicked: {e}");
                EpisodeResult::infrastructure_failure(task_id, "Episode task panicked")
            }
        };
        metrics.record_episode(
            &result.verdict.to_string(),
            result.wall_time_secs,
            result.turns_used,
        );
        results.push(result);
    }

    signal_forwarder.abort();

    let report = summarize(config.dataset.clone(), results, config.summary);
    info!(
        total = report.total,
        passed = report.passed,
        errored = report.errored,
        "Benchmark run complete"
    );
    Ok(report)
}
