//! Metrics module for Prometheus-based monitoring.
//!
//! Covers episode outcomes, participant traffic, command execution, and
//! the live sandbox count. Recording is a no-op until `init_metrics`
//! has run, so library consumers and tests pay nothing for
//! instrumentation they did not ask for.
//!
//! # Example
//!
//! ```ignore
//! use termbench::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // Record an episode outcome
//! let collector = MetricsCollector::new();
//! collector.record_episode("passed", 42.5, 7);
//!
//! // Export metrics in Prometheus text format
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

// Re-export key types for convenient access
pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

// Re-export metric constants for direct access when needed
pub use prometheus::{
    COMMANDS_TOTAL, EPISODES_TOTAL, EPISODE_DURATION, EPISODE_TURNS, LIVE_SANDBOXES,
    PARTICIPANT_LATENCY, PARTICIPANT_REQUESTS_TOTAL, REGISTRY,
};
