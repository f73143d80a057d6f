//! Episode outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sandbox::CommandResult;
use crate::verify::VerificationOutcome;

/// Terminal classification of an episode. Exactly one per episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Verification script passed.
    Passed,
    /// Verification script failed or timed out.
    Failed,
    /// Wall-clock budget or a participant response deadline expired.
    TimedOut,
    /// The participant tried to execute past the turn limit.
    TurnLimitExceeded,
    /// Benchmark infrastructure or protocol failure; not the task's fault.
    Errored,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::TurnLimitExceeded => write!(f, "turn_limit_exceeded"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// One executed command, in order. Only `execute` actions occupy a
/// turn; numbering is 1-based with no gaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub number: u32,
    pub command: String,
    pub result: CommandResult,
}

/// Full record of one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeResult {
    pub task_id: String,
    pub episode_id: String,
    pub verdict: Verdict,
    /// Credit in [0.0, 1.0]. Non-zero only for passed episodes.
    pub score: f64,
    pub turns_used: u32,
    pub wall_time_secs: f64,
    /// Why the episode ended the way it did. Always set.
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationOutcome>,
    pub transcript: Vec<Turn>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl EpisodeResult {
    pub fn is_passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    /// Result for an episode that never produced one of its own, such
    /// as a panicked episode task.
    pub fn infrastructure_failure(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            episode_id: format!("ep-{}", Uuid::new_v4()),
            verdict: Verdict::Errored,
            score: 0.0,
            turns_used: 0,
            wall_time_secs: 0.0,
            reason: reason.into(),
            verification: None,
            transcript: Vec::new(),
            started_at: now,
            completed_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_display_matches_serde() {
        for verdict in [
            Verdict::Passed,
            Verdict::Failed,
            Verdict::TimedOut,
            Verdict::TurnLimitExceeded,
            Verdict::Errored,
        ] {
            let display = verdict.to_string();
            let json = serde_json::to_string(&verdict).unwrap();
            assert_eq!(json, format!("\"{display}\""));
        }
    }

    #[test]
    fn infrastructure_failure_result() {
        let result = EpisodeResult::infrastructure_failure("task-9", "episode task panicked");
        assert_eq!(result.verdict, Verdict::Errored);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.turns_used, 0);
        assert!(result.transcript.is_empty());
        assert!(result.episode_id.starts_with("ep-"));
        assert!(!result.is_passed());
        assert_eq!(result.reason, "episode task panicked");
    }

    #[test]
    fn result_serializes_without_empty_verification() {
        let result = EpisodeResult::infrastructure_failure("task-1", "boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["verdict"], "errored");
        assert!(json.get("verification").is_none());
        assert_eq!(json["task_id"], "task-1");
    }
}
