//! The episode state machine.
//!
//! One orchestrator run takes a task through provisioning, the turn
//! loop, verification, and teardown. Two invariants hold on every exit
//! path: the episode ends with exactly one verdict, and a sandbox that
//! was created is destroyed exactly once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::episode::result::{EpisodeResult, Turn, Verdict};
use crate::episode::EpisodeConfig;
use crate::error::{ProtocolError, SandboxError};
use crate::metrics::MetricsCollector;
use crate::participant::{AgentAction, AgentResponse, CommandSpec, Participant, TurnMessage};
use crate::sandbox::{Sandbox, SandboxRuntime};
use crate::task::Task;
use crate::verify::{VerificationOutcome, VerificationRunner};

/// Drives single episodes from provisioning to verdict.
pub struct EpisodeOrchestrator {
    runtime: Arc<dyn SandboxRuntime>,
    participant: Arc<dyn Participant>,
    config: EpisodeConfig,
    metrics: MetricsCollector,
}

/// What the turn loop decided, before teardown and result assembly.
struct DriveOutcome {
    verdict: Verdict,
    score: f64,
    reason: String,
    verification: Option<VerificationOutcome>,
}

impl DriveOutcome {
    fn errored(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Errored,
            score: 0.0,
            reason: reason.into(),
            verification: None,
        }
    }

    fn timed_out(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::TimedOut,
            score: 0.0,
            reason: reason.into(),
            verification: None,
        }
    }

    fn turn_limit(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::TurnLimitExceeded,
            score: 0.0,
            reason: reason.into(),
            verification: None,
        }
    }

    fn verified(outcome: VerificationOutcome) -> Self {
        Self {
            verdict: if outcome.passed {
                Verdict::Passed
            } else {
                Verdict::Failed
            },
            score: outcome.score,
            reason: outcome.detail.clone(),
            verification: Some(outcome),
        }
    }
}

/// A structurally valid participant action.
#[derive(Debug)]
enum Action {
    Execute(CommandSpec),
    Complete,
}

/// Maps a parsed response onto an orchestrator action. An execute
/// action without a command payload is a protocol violation even when
/// the JSON itself parsed.
fn interpret(response: AgentResponse) -> Result<Action, ProtocolError> {
    match (response.action, response.command) {
        (AgentAction::Complete, _) => Ok(Action::Complete),
        (AgentAction::Execute, Some(spec)) => Ok(Action::Execute(spec)),
        (AgentAction::Execute, None) => Err(ProtocolError::Malformed(
            "execute action without a command payload".to_string(),
        )),
    }
}

/// Resolves when a shutdown signal arrives. A closed channel means no
/// signal can ever arrive, so the future stays pending instead of
/// spuriously cancelling the episode.
async fn wait_for_shutdown(rx: &mut broadcast::Receiver<()>) {
    match rx.recv().await {
        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
    }
}

fn shutdown_requested(rx: &mut broadcast::Receiver<()>) -> bool {
    matches!(
        rx.try_recv(),
        Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_))
    )
}

impl EpisodeOrchestrator {
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        participant: Arc<dyn Participant>,
        config: EpisodeConfig,
    ) -> Self {
        Self {
            runtime,
            participant,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Runs one episode to completion and returns its result. Never
    /// panics on participant or sandbox misbehavior; every failure mode
    /// maps to a verdict.
    pub async fn run(&self, task: &Task, mut shutdown: broadcast::Receiver<()>) -> EpisodeResult {
        let episode_id = format!("ep-{}", Uuid::new_v4());
        let started_at = Utc::now();
        let started = Instant::now();

        info!(task_id = %task.id, episode_id = %episode_id, "Episode starting");

        if shutdown_requested(&mut shutdown) {
            return self.build_result(
                task,
                episode_id,
                started_at,
                started,
                Vec::new(),
                DriveOutcome::errored("Evaluation cancelled before provisioning"),
            );
        }

        // Provisioning happens before any participant contact, so a
        // failure here never reaches the agent under evaluation. It runs
        // as its own task so cancellation can interrupt the wait: the
        // in-flight create cannot be dropped without leaking whatever
        // the runtime already allocated, so on cancellation it finishes
        // in the background and a reaper destroys its sandbox there.
        let mut create = tokio::spawn({
            let runtime = Arc::clone(&self.runtime);
            let task = task.clone();
            async move { runtime.create(&task).await }
        });

        let created = tokio::select! {
            created = &mut create => created,
            _ = wait_for_shutdown(&mut shutdown) => {
                let runtime = Arc::clone(&self.runtime);
                tokio::spawn(async move {
                    if let Ok(Ok(mut sandbox)) = create.await {
                        runtime.destroy(&mut sandbox).await;
                    }
                });
                return self.build_result(
                    task,
                    episode_id,
                    started_at,
                    started,
                    Vec::new(),
                    DriveOutcome::errored("Evaluation cancelled during provisioning"),
                );
            }
        };

        let mut sandbox = match created {
            Ok(Ok(sandbox)) => sandbox,
            Ok(Err(e)) => {
                warn!(task_id = %task.id, episode_id = %episode_id, error = %e, "Provisioning failed");
                return self.build_result(
                    task,
                    episode_id,
                    started_at,
                    started,
                    Vec::new(),
                    DriveOutcome::errored(e.to_string()),
                );
            }
            Err(e) => {
                warn!(task_id = %task.id, episode_id = %episode_id, error = %e, "Provisioning task panicked");
                return self.build_result(
                    task,
                    episode_id,
                    started_at,
                    started,
                    Vec::new(),
                    DriveOutcome::errored("Sandbox provisioning task panicked"),
                );
            }
        };
        self.metrics.sandbox_provisioned();

        let mut transcript = Vec::new();
        let outcome = self
            .drive(task, &mut sandbox, started, &mut transcript, &mut shutdown)
            .await;

        // Teardown runs on every path before the verdict is finalized.
        self.runtime.destroy(&mut sandbox).await;
        self.metrics.sandbox_destroyed();

        self.build_result(task, episode_id, started_at, started, transcript, outcome)
    }

    /// The turn loop. Returns once a terminal condition is reached;
    /// teardown is the caller's responsibility.
    async fn drive(
        &self,
        task: &Task,
        sandbox: &mut Sandbox,
        started: Instant,
        transcript: &mut Vec<Turn>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> DriveOutcome {
        let max_turns = self.config.max_turns_for(task);
        let wall_clock = self.config.wall_clock_for(task);

        let mut message = TurnMessage::task_instruction(task);
        let mut malformed_streak = 0u32;

        loop {
            // The wall clock outranks every other clock; check it before
            // any participant contact.
            let elapsed = started.elapsed();
            if elapsed >= wall_clock {
                return DriveOutcome::timed_out(format!(
                    "Wall-clock budget of {wall_clock:?} exhausted"
                ));
            }
            let remaining = wall_clock - elapsed;
            let wait = remaining.min(self.config.response_timeout);

            let request_started = Instant::now();
            let exchanged = tokio::select! {
                result = tokio::time::timeout(wait, self.participant.exchange(&message)) => result,
                _ = wait_for_shutdown(shutdown) => {
                    return DriveOutcome::errored("Evaluation cancelled");
                }
            };

            let response = match exchanged {
                Err(_) => {
                    self.metrics.record_participant_request("timeout", request_started.elapsed());
                    let reason = if started.elapsed() >= wall_clock {
                        format!(
                            "Wall-clock budget of {wall_clock:?} exhausted while awaiting the participant"
                        )
                    } else {
                        format!(
                            "Participant did not respond within {:?}",
                            self.config.response_timeout
                        )
                    };
                    return DriveOutcome::timed_out(reason);
                }
                Ok(result) => result,
            };

            let action = match response.and_then(interpret) {
                Ok(action) => {
                    self.metrics.record_participant_request("ok", request_started.elapsed());
                    action
                }
                Err(ProtocolError::Malformed(detail)) => {
                    self.metrics.record_participant_request("malformed", request_started.elapsed());
                    malformed_streak += 1;
                    if malformed_streak >= 2 {
                        return DriveOutcome::errored(format!(
                            "Participant sent consecutive malformed responses: {detail}"
                        ));
                    }
                    warn!(task_id = %task.id, detail = %detail, "Malformed response; re-prompting once");
                    message = TurnMessage::protocol_error(&task.id, detail);
                    continue;
                }
                Err(ProtocolError::Transport(detail)) => {
                    self.metrics.record_participant_request("transport", request_started.elapsed());
                    return DriveOutcome::errored(format!(
                        "Participant transport failure: {detail}"
                    ));
                }
            };

            // Any structurally valid response ends a malformed streak.
            malformed_streak = 0;

            let spec = match action {
                Action::Complete => {
                    debug!(task_id = %task.id, turns = transcript.len(), "Participant declared completion");
                    return self
                        .finish_with_verification(task, sandbox, started, wall_clock, shutdown)
                        .await;
                }
                Action::Execute(spec) => spec,
            };

            // The wall clock wins when it and the turn limit would both
            // trigger on the same turn.
            let elapsed = started.elapsed();
            if elapsed >= wall_clock {
                return DriveOutcome::timed_out(format!(
                    "Wall-clock budget of {wall_clock:?} exhausted"
                ));
            }

            // An execute past the limit terminates the episode without
            // running the command; turns_used stays at the limit.
            let turn_number = transcript.len() as u32 + 1;
            if turn_number > max_turns {
                return DriveOutcome::turn_limit(format!(
                    "Participant attempted turn {turn_number} past the limit of {max_turns}"
                ));
            }
            let command_timeout = Duration::from_secs(spec.timeout.max(1)).min(wall_clock - elapsed);

            debug!(task_id = %task.id, turn = turn_number, command = %spec.command, "Executing command");

            let executed = tokio::select! {
                result = self.runtime.exec(
                    sandbox,
                    &spec.command,
                    spec.workdir.as_deref(),
                    command_timeout,
                ) => result,
                _ = wait_for_shutdown(shutdown) => {
                    return DriveOutcome::errored("Evaluation cancelled");
                }
            };

            let result = match executed {
                Ok(result) => {
                    self.metrics.record_command("ok");
                    result
                }
                Err(SandboxError::ExecutionTimeout { seconds, partial }) => {
                    // A timed-out command is a valid turn; the episode
                    // continues with the partial output.
                    self.metrics.record_command("timeout");
                    debug!(task_id = %task.id, turn = turn_number, seconds, "Command timed out");
                    partial
                }
                Err(e) => {
                    self.metrics.record_command("failure");
                    return DriveOutcome::errored(format!(
                        "Sandbox failure on turn {turn_number}: {e}"
                    ));
                }
            };

            message = TurnMessage::command_result(&task.id, &result);
            transcript.push(Turn {
                number: turn_number,
                command: spec.command,
                result,
            });
        }
    }

    async fn finish_with_verification(
        &self,
        task: &Task,
        sandbox: &mut Sandbox,
        started: Instant,
        wall_clock: Duration,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> DriveOutcome {
        let elapsed = started.elapsed();
        if elapsed >= wall_clock {
            return DriveOutcome::timed_out(format!(
                "Wall-clock budget of {wall_clock:?} exhausted before verification"
            ));
        }

        // The remaining budget caps the script deadline, like command
        // execs; a verification run never outlives the episode budget.
        let verifier = VerificationRunner::new(self.config.verify_timeout.min(wall_clock - elapsed));

        let verified = tokio::select! {
            outcome = verifier.verify(self.runtime.as_ref(), sandbox, task) => outcome,
            _ = wait_for_shutdown(shutdown) => {
                return DriveOutcome::errored("Evaluation cancelled");
            }
        };

        match verified {
            Ok(outcome) => DriveOutcome::verified(outcome),
            Err(e) => DriveOutcome::errored(e.to_string()),
        }
    }

    fn build_result(
        &self,
        task: &Task,
        episode_id: String,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
        transcript: Vec<Turn>,
        outcome: DriveOutcome,
    ) -> EpisodeResult {
        let result = EpisodeResult {
            task_id: task.id.clone(),
            episode_id,
            verdict: outcome.verdict,
            score: outcome.score,
            turns_used: transcript.len() as u32,
            wall_time_secs: started.elapsed().as_secs_f64(),
            reason: outcome.reason,
            verification: outcome.verification,
            transcript,
            started_at,
            completed_at: Utc::now(),
        };

        info!(
            task_id = %result.task_id,
            episode_id = %result.episode_id,
            verdict = %result.verdict,
            score = result.score,
            turns = result.turns_used,
            "Episode finished"
        );

        result
    }
}
