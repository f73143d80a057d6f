//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by termbench and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{CounterVec, Encoder, Gauge, Histogram, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all termbench metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of finished episodes, labeled by verdict.
pub static EPISODES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Episode wall time in seconds.
pub static EPISODE_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Turns used per episode.
pub static EPISODE_TURNS: OnceLock<Histogram> = OnceLock::new();

/// Number of sandboxes currently alive.
pub static LIVE_SANDBOXES: OnceLock<Gauge> = OnceLock::new();

/// Total participant exchanges, labeled by outcome.
pub static PARTICIPANT_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Participant response latency in seconds.
pub static PARTICIPANT_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Total sandbox commands, labeled by outcome.
pub static COMMANDS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at application startup. Safe to call again; later calls
/// leave the already-registered metrics in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails,
/// typically due to duplicate metric names.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Episode metrics
    let episodes_total = CounterVec::new(
        Opts::new("termbench_episodes_total", "Total number of finished episodes"),
        &["verdict"],
    )?;

    let episode_duration = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "termbench_episode_duration_seconds",
            "Episode wall time in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
    )?;

    let episode_turns = Histogram::with_opts(
        prometheus::HistogramOpts::new("termbench_episode_turns", "Turns used per episode")
            .buckets(vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0, 34.0, 50.0]),
    )?;

    // Sandbox metrics
    let live_sandboxes = Gauge::new(
        "termbench_live_sandboxes",
        "Number of sandboxes currently alive",
    )?;

    // Participant metrics
    let participant_requests_total = CounterVec::new(
        Opts::new(
            "termbench_participant_requests_total",
            "Total participant exchanges",
        ),
        &["outcome"],
    )?;

    let participant_latency = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "termbench_participant_latency_seconds",
            "Participant response latency in seconds",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )?;

    // Command metrics
    let commands_total = CounterVec::new(
        Opts::new("termbench_commands_total", "Total sandbox commands"),
        &["outcome"],
    )?;

    // Register all metrics with the registry
    registry.register(Box::new(episodes_total.clone()))?;
    registry.register(Box::new(episode_duration.clone()))?;
    registry.register(Box::new(episode_turns.clone()))?;
    registry.register(Box::new(live_sandboxes.clone()))?;
    registry.register(Box::new(participant_requests_total.clone()))?;
    registry.register(Box::new(participant_latency.clone()))?;
    registry.register(Box::new(commands_total.clone()))?;

    // Store metrics in the statics. Failures here mean metrics were
    // already initialized; keep the originals.
    let _ = REGISTRY.set(registry);
    let _ = EPISODES_TOTAL.set(episodes_total);
    let _ = EPISODE_DURATION.set(episode_duration);
    let _ = EPISODE_TURNS.set(episode_turns);
    let _ = LIVE_SANDBOXES.set(live_sandboxes);
    let _ = PARTICIPANT_REQUESTS_TOTAL.set(participant_requests_total);
    let _ = PARTICIPANT_LATENCY.set(participant_latency);
    let _ = COMMANDS_TOTAL.set(commands_total);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an informative comment line when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
