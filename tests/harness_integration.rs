//! Integration tests for the benchmark harness.
//!
//! These drive the full pipeline (task loading, episodes, verification,
//! reporting) with in-process fakes; no Docker daemon or participant
//! server is required.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use termbench::episode::{EpisodeConfig, Verdict};
use termbench::error::{ProtocolError, SandboxError};
use termbench::harness::{run_benchmark, HarnessConfig};
use termbench::participant::{AgentAction, AgentResponse, CommandSpec, Participant, TurnMessage};
use termbench::report::{render_text, summarize, SummaryOptions};
use termbench::sandbox::{CommandResult, Sandbox, SandboxRuntime, SandboxState};
use termbench::task::load_tasks;

const MISSING_IMAGE: &str = "registry.invalid/missing:latest";

/// Sandbox runtime that interprets commands by content instead of
/// talking to Docker: anything containing "fail" exits 1, everything
/// else exits 0. Tasks using [`MISSING_IMAGE`] fail provisioning.
struct FakeRuntime;

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn create(&self, task: &termbench::task::Task) -> Result<Sandbox, SandboxError> {
        if task.docker_image == MISSING_IMAGE {
            return Err(SandboxError::ProvisionFailed(format!(
                "pull access denied for {}",
                task.docker_image
            )));
        }
        let mut sandbox = Sandbox::new(
            format!("fake-{}", task.id),
            format!("termbench-sandbox-{}", task.id),
            task.working_directory.clone(),
        );
        sandbox.state = SandboxState::Ready;
        Ok(sandbox)
    }

    async fn exec(
        &self,
        _sandbox: &mut Sandbox,
        command: &str,
        _workdir: Option<&str>,
        _timeout: Duration,
    ) -> Result<CommandResult, SandboxError> {
        let failing = command.contains("fail");
        Ok(CommandResult {
            stdout: if failing {
                String::new()
            } else {
                "done\n".to_string()
            },
            stderr: if failing {
                "check failed\n".to_string()
            } else {
                String::new()
            },
            exit_code: i64::from(failing),
            timed_out: false,
            duration_ms: 2,
        })
    }

    async fn destroy(&self, sandbox: &mut Sandbox) {
        sandbox.state = SandboxState::Destroyed;
    }
}

/// Participant whose behavior is keyed on the task id carried by every
/// turn message.
struct KeyedParticipant {
    delay: Option<Duration>,
}

impl KeyedParticipant {
    fn new() -> Self {
        Self { delay: None }
    }

    fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

fn execute(command: &str) -> AgentResponse {
    AgentResponse {
        action: AgentAction::Execute,
        command: Some(CommandSpec {
            command: command.to_string(),
            timeout: 30,
            workdir: None,
        }),
        reasoning: None,
    }
}

fn complete() -> AgentResponse {
    AgentResponse {
        action: AgentAction::Complete,
        command: None,
        reasoning: None,
    }
}

#[async_trait]
impl Participant for KeyedParticipant {
    async fn exchange(&self, message: &TurnMessage) -> Result<AgentResponse, ProtocolError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(match (message.task_id(), message) {
            ("file-hello", TurnMessage::TaskInstruction { .. }) => execute("touch hello.txt"),
            ("file-hello", _) => complete(),
            ("never-stops", _) => execute("echo again"),
            _ => complete(),
        })
    }
}

fn write_task(dir: &Path, id: &str, extra: &str) {
    let task_dir = dir.join(id);
    std::fs::create_dir_all(&task_dir).unwrap();
    let yaml = format!(
        "id: {id}\ninstruction: Solve the {id} task\ntest_script: {script}\n{extra}",
        script = if id == "wrong-answer" {
            "check fail"
        } else {
            "check pass"
        },
    );
    std::fs::write(task_dir.join("task.yaml"), yaml).unwrap();
}

fn harness_config(dataset: &str) -> HarnessConfig {
    HarnessConfig {
        dataset: dataset.to_string(),
        concurrency: 2,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_run_produces_mixed_verdicts() {
    let tmp = TempDir::new().unwrap();
    write_task(tmp.path(), "file-hello", "");
    write_task(tmp.path(), "never-stops", "max_turns: 3\n");
    write_task(tmp.path(), "no-image", &format!("docker_image: {MISSING_IMAGE}\n"));
    write_task(tmp.path(), "wrong-answer", "");

    let tasks = load_tasks(tmp.path()).unwrap();
    assert_eq!(tasks.len(), 4);

    let report = run_benchmark(
        tasks,
        Arc::new(FakeRuntime),
        Arc::new(KeyedParticipant::new()),
        &harness_config("integration"),
    )
    .await
    .unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.turn_limit_exceeded, 1);
    assert_eq!(report.errored, 1);
    assert!((report.pass_rate - 0.25).abs() < 1e-9);

    // Task discovery sorts by path, so results arrive in id order.
    let ids: Vec<&str> = report.results.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(ids, vec!["file-hello", "never-stops", "no-image", "wrong-answer"]);

    let hello = &report.results[0];
    assert_eq!(hello.verdict, Verdict::Passed);
    assert_eq!(hello.score, 1.0);
    assert_eq!(hello.turns_used, 1);
    assert_eq!(hello.transcript[0].command, "touch hello.txt");
    assert!(hello.verification.as_ref().unwrap().passed);

    let chatty = &report.results[1];
    assert_eq!(chatty.verdict, Verdict::TurnLimitExceeded);
    assert_eq!(chatty.turns_used, 3);

    let broken = &report.results[2];
    assert_eq!(broken.verdict, Verdict::Errored);
    assert!(broken.reason.contains("pull access denied"));
    assert_eq!(broken.turns_used, 0);

    let wrong = &report.results[3];
    assert_eq!(wrong.verdict, Verdict::Failed);
    assert_eq!(wrong.score, 0.0);
}

#[tokio::test]
async fn test_exclude_errored_reshapes_the_pass_rate() {
    let tmp = TempDir::new().unwrap();
    write_task(tmp.path(), "file-hello", "");
    write_task(tmp.path(), "no-image", &format!("docker_image: {MISSING_IMAGE}\n"));
    write_task(tmp.path(), "wrong-answer", "");

    let tasks = load_tasks(tmp.path()).unwrap();
    let report = run_benchmark(
        tasks,
        Arc::new(FakeRuntime),
        Arc::new(KeyedParticipant::new()),
        &harness_config("integration"),
    )
    .await
    .unwrap();

    assert!((report.pass_rate - 1.0 / 3.0).abs() < 1e-9);

    let adjusted = summarize(
        report.dataset.clone(),
        report.results.clone(),
        SummaryOptions {
            exclude_errored: true,
        },
    );
    assert!((adjusted.pass_rate - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_unresponsive_participant_times_out() {
    let tmp = TempDir::new().unwrap();
    write_task(tmp.path(), "file-hello", "");

    let tasks = load_tasks(tmp.path()).unwrap();
    let config = HarnessConfig {
        episode: EpisodeConfig::new()
            .with_response_timeout(Duration::from_millis(50))
            .with_wall_clock(Duration::from_secs(5)),
        ..harness_config("integration")
    };

    let report = run_benchmark(
        tasks,
        Arc::new(FakeRuntime),
        Arc::new(KeyedParticipant::with_delay(Duration::from_millis(300))),
        &config,
    )
    .await
    .unwrap();

    assert_eq!(report.timed_out, 1);
    assert_eq!(report.results[0].verdict, Verdict::TimedOut);
    assert!(report.results[0].reason.contains("did not respond"));
}

#[tokio::test]
async fn test_report_serializes_with_snake_case_verdicts() {
    let tmp = TempDir::new().unwrap();
    write_task(tmp.path(), "never-stops", "max_turns: 2\n");

    let tasks = load_tasks(tmp.path()).unwrap();
    let report = run_benchmark(
        tasks,
        Arc::new(FakeRuntime),
        Arc::new(KeyedParticipant::new()),
        &harness_config("integration"),
    )
    .await
    .unwrap();

    let json = serde_json::to_string_pretty(&report).unwrap();
    assert!(json.contains("\"turn_limit_exceeded\""));

    let text = render_text(&report);
    assert!(text.contains("Turn limit exceeded: 1"));
    assert!(text.contains("never-stops [turn_limit_exceeded]"));
}
