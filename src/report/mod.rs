//! Scoring and reporting over finished episodes.
//!
//! Aggregation is pure: it consumes a set of [`EpisodeResult`]s and produces
//! a [`BenchmarkReport`] without touching sandboxes, participants, or the
//! network. Errored episodes count against the pass rate unless the caller
//! opts out via [`SummaryOptions::exclude_errored`].

use serde::{Deserialize, Serialize};

use crate::episode::{EpisodeResult, Verdict};

/// Aggregated outcome of a benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub dataset: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub turn_limit_exceeded: usize,
    pub errored: usize,
    /// Fraction of episodes that passed. The denominator is every episode,
    /// or every non-errored episode when `exclude_errored` was set.
    pub pass_rate: f64,
    /// Mean turns across passed episodes. `None` when nothing passed.
    pub mean_turns: Option<f64>,
    /// Median turns across passed episodes. `None` when nothing passed.
    pub median_turns: Option<f64>,
    /// Mean wall-clock seconds across all episodes.
    pub mean_wall_secs: f64,
    /// Sum of per-episode scores, including partial credit.
    pub total_score: f64,
    pub results: Vec<EpisodeResult>,
}

/// Knobs for [`summarize`].
///
/// By default episodes that ended [`Verdict::Errored`] are treated as
/// failures: infrastructure flakiness should hurt the reported pass rate
/// rather than hide behind it. Setting `exclude_errored` removes them from
/// the pass-rate denominator instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryOptions {
    pub exclude_errored: bool,
}

/// Aggregate episode results into a [`BenchmarkReport`].
pub fn summarize(
    dataset: impl Into<String>,
    results: Vec<EpisodeResult>,
    options: SummaryOptions,
) -> BenchmarkReport {
    let total = results.len();
    let passed = results
        .iter()
        .filter(|r| matches!(r.verdict, Verdict::Passed))
        .count();
    let failed = results
        .iter()
        .filter(|r| matches!(r.verdict, Verdict::Failed))
        .count();
    let timed_out = results
        .iter()
        .filter(|r| matches!(r.verdict, Verdict::TimedOut))
        .count();
    let turn_limit_exceeded = results
        .iter()
        .filter(|r| matches!(r.verdict, Verdict::TurnLimitExceeded))
        .count();
    let errored = results
        .iter()
        .filter(|r| matches!(r.verdict, Verdict::Errored))
        .count();

    let denominator = if options.exclude_errored {
        total - errored
    } else {
        total
    };
    let pass_rate = if denominator == 0 {
        0.0
    } else {
        passed as f64 / denominator as f64
    };

    let mut passed_turns: Vec<u32> = results
        .iter()
        .filter(|r| r.is_passed())
        .map(|r| r.turns_used)
        .collect();
    passed_turns.sort_unstable();

    let mean_turns = if passed_turns.is_empty() {
        None
    } else {
        let sum: u64 = passed_turns.iter().map(|t| u64::from(*t)).sum();
        Some(round1(sum as f64 / passed_turns.len() as f64))
    };
    let median_turns = median(&passed_turns).map(round1);

    let mean_wall_secs = if results.is_empty() {
        0.0
    } else {
        round1(results.iter().map(|r| r.wall_time_secs).sum::<f64>() / total as f64)
    };

    let total_score = results.iter().map(|r| r.score).sum::<f64>();

    BenchmarkReport {
        dataset: dataset.into(),
        total,
        passed,
        failed,
        timed_out,
        turn_limit_exceeded,
        errored,
        pass_rate,
        mean_turns,
        median_turns,
        mean_wall_secs,
        total_score,
        results,
    }
}

/// Render a human-readable summary of the report.
pub fn render_text(report: &BenchmarkReport) -> String {
    let rule = "=".repeat(50);
    let fmt_turns =
        |value: Option<f64>| value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}"));

    let mut lines = vec![
        rule.clone(),
        "Evaluation Summary".to_string(),
        rule.clone(),
        format!("Dataset: {}", report.dataset),
        format!("Total episodes: {}", report.total),
        format!("Passed: {}", report.passed),
        format!("Failed: {}", report.failed),
        format!("Timed out: {}", report.timed_out),
        format!("Turn limit exceeded: {}", report.turn_limit_exceeded),
        format!("Errored: {}", report.errored),
        format!("Pass rate: {:.1}%", report.pass_rate * 100.0),
        format!("Mean turns (passed): {}", fmt_turns(report.mean_turns)),
        format!("Median turns (passed): {}", fmt_turns(report.median_turns)),
        format!("Mean wall time: {:.1}s", report.mean_wall_secs),
        format!("Total score: {:.2}", report.total_score),
        rule,
    ];

    for r in &report.results {
        lines.push(format!(
            "  {} [{}] turns={} score={:.2} wall={:.1}s",
            r.task_id, r.verdict, r.turns_used, r.score, r.wall_time_secs,
        ));
        if !r.is_passed() && !r.reason.is_empty() {
            lines.push(format!("    reason: {}", r.reason));
        }
    }

    lines.join("\n")
}

fn median(sorted: &[u32]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(f64::from(sorted[mid]))
    } else {
        Some(f64::from(sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
