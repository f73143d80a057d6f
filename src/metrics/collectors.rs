//! High-level metric recording for benchmark operations.
//!
//! The `MetricsCollector` wraps the raw Prometheus metrics and provides
//! convenient methods for the events the harness and orchestrator emit.
//! Every method is safe to call before `init_metrics`; recording is
//! simply skipped.

use std::time::Duration;

use super::prometheus::{
    COMMANDS_TOTAL, EPISODES_TOTAL, EPISODE_DURATION, EPISODE_TURNS, LIVE_SANDBOXES,
    PARTICIPANT_LATENCY, PARTICIPANT_REQUESTS_TOTAL,
};

/// Metrics collector for recording benchmark operational metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new collector. Metrics must be initialized with
    /// `init_metrics()` for recording to take effect.
    pub fn new() -> Self {
        Self
    }

    /// Record a finished episode.
    ///
    /// # Arguments
    ///
    /// * `verdict` - Terminal verdict (e.g., "passed", "errored")
    /// * `wall_secs` - Episode wall time in seconds
    /// * `turns` - Number of turns the episode used
    pub fn record_episode(&self, verdict: &str, wall_secs: f64, turns: u32) {
        if let Some(episodes_total) = EPISODES_TOTAL.get() {
            episodes_total.with_label_values(&[verdict]).inc();
        }

        if let Some(episode_duration) = EPISODE_DURATION.get() {
            episode_duration.observe(wall_secs);
        }

        if let Some(episode_turns) = EPISODE_TURNS.get() {
            episode_turns.observe(turns as f64);
        }

        tracing::trace!(
            verdict = verdict,
            wall_secs = wall_secs,
            turns = turns,
            "Recorded episode metric"
        );
    }

    /// Record one participant exchange.
    ///
    /// # Arguments
    ///
    /// * `outcome` - "ok", "malformed", "transport", or "timeout"
    /// * `latency` - Time spent waiting on the participant
    pub fn record_participant_request(&self, outcome: &str, latency: Duration) {
        if let Some(requests) = PARTICIPANT_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[outcome]).inc();
        }

        if let Some(latency_hist) = PARTICIPANT_LATENCY.get() {
            latency_hist.observe(latency.as_secs_f64());
        }

        tracing::trace!(
            outcome = outcome,
            latency_secs = latency.as_secs_f64(),
            "Recorded participant request metric"
        );
    }

    /// Record one sandbox command execution.
    ///
    /// # Arguments
    ///
    /// * `outcome` - "ok", "timeout", or "failure"
    pub fn record_command(&self, outcome: &str) {
        if let Some(commands_total) = COMMANDS_TOTAL.get() {
            commands_total.with_label_values(&[outcome]).inc();
        }
    }

    /// Increment the live sandbox gauge after a successful provision.
    pub fn sandbox_provisioned(&self) {
        if let Some(live_sandboxes) = LIVE_SANDBOXES.get() {
            live_sandboxes.inc();
        }
    }

    /// Decrement the live sandbox gauge after teardown.
    pub fn sandbox_destroyed(&self) {
        if let Some(live_sandboxes) = LIVE_SANDBOXES.get() {
            live_sandboxes.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn collector_is_zero_sized() {
        let collector = MetricsCollector::new();
        assert_eq!(std::mem::size_of_val(&collector), 0);
    }

    #[test]
    fn record_episode_accepts_all_verdicts() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_episode("passed", 42.5, 7);
        collector.record_episode("failed", 120.0, 50);
        collector.record_episode("timed_out", 600.0, 12);
        collector.record_episode("turn_limit_exceeded", 90.0, 50);
        collector.record_episode("errored", 3.0, 0);
    }

    #[test]
    fn record_participant_and_command_outcomes() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_participant_request("ok", Duration::from_millis(250));
        collector.record_participant_request("malformed", Duration::from_secs(1));
        collector.record_command("ok");
        collector.record_command("timeout");
        collector.record_command("failure");
    }

    #[test]
    fn sandbox_gauge_tracks_provision_and_teardown() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.sandbox_provisioned();
        collector.sandbox_provisioned();
        collector.sandbox_destroyed();
        collector.sandbox_destroyed();
    }
}
