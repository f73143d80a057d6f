//! Episode orchestration.
//!
//! An episode is one attempt at one task by the participant: sandbox
//! provisioning, the turn loop, verification, and teardown. The
//! orchestrator drives the whole lifecycle and always produces exactly
//! one verdict, whatever path the episode takes.

use std::time::Duration;

use crate::task::Task;

pub mod orchestrator;
pub mod result;

pub use orchestrator::EpisodeOrchestrator;
pub use result::{EpisodeResult, Turn, Verdict};

/// Default ceiling on participant-issued commands per episode.
pub const DEFAULT_MAX_TURNS: u32 = 50;

/// Default wall-clock budget for a whole episode.
pub const DEFAULT_WALL_CLOCK_SECS: u64 = 600;

/// Default wait for a single participant response.
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 60;

/// Budgets applied to every episode. Tasks may override the turn and
/// wall-clock limits individually.
#[derive(Debug, Clone)]
pub struct EpisodeConfig {
    pub max_turns: u32,
    pub wall_clock: Duration,
    pub response_timeout: Duration,
    pub verify_timeout: Duration,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            wall_clock: Duration::from_secs(DEFAULT_WALL_CLOCK_SECS),
            response_timeout: Duration::from_secs(DEFAULT_RESPONSE_TIMEOUT_SECS),
            verify_timeout: Duration::from_secs(crate::verify::DEFAULT_VERIFY_TIMEOUT_SECS),
        }
    }
}

impl EpisodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_wall_clock(mut self, wall_clock: Duration) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn with_verify_timeout(mut self, verify_timeout: Duration) -> Self {
        self.verify_timeout = verify_timeout;
        self
    }

    /// Turn limit for a task, honoring its override.
    pub fn max_turns_for(&self, task: &Task) -> u32 {
        task.max_turns.unwrap_or(self.max_turns)
    }

    /// Wall-clock budget for a task, honoring its override.
    pub fn wall_clock_for(&self, task: &Task) -> Duration {
        task.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.wall_clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = EpisodeConfig::default();
        assert_eq!(config.max_turns, 50);
        assert_eq!(config.wall_clock, Duration::from_secs(600));
        assert_eq!(config.response_timeout, Duration::from_secs(60));
        assert_eq!(config.verify_timeout, Duration::from_secs(60));
    }

    #[test]
    fn task_overrides_take_precedence() {
        let config = EpisodeConfig::default()
            .with_max_turns(10)
            .with_wall_clock(Duration::from_secs(120));

        let mut task = Task::new("t", "do it", "true");
        assert_eq!(config.max_turns_for(&task), 10);
        assert_eq!(config.wall_clock_for(&task), Duration::from_secs(120));

        task.max_turns = Some(3);
        task.timeout_secs = Some(30);
        assert_eq!(config.max_turns_for(&task), 3);
        assert_eq!(config.wall_clock_for(&task), Duration::from_secs(30));
    }
}
