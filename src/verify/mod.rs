//! Task verification.
//!
//! After the participant declares completion (or is cut off), the
//! task's test script runs inside the same sandbox, so every artifact
//! the participant produced is still in place. The script's exit code
//! decides pass/fail; an optional `SCORE:` marker on stdout reports
//! partial credit.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SandboxError, VerificationError};
use crate::sandbox::{Sandbox, SandboxRuntime};
use crate::task::Task;

/// Default ceiling for one verification script run.
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 60;

/// Outcome of running a task's verification script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// True when the script exited 0 within its deadline.
    pub passed: bool,
    /// Credit in [0.0, 1.0]. Zero unless `passed`.
    pub score: f64,
    /// Human-readable explanation for the report.
    pub detail: String,
}

/// Runs verification scripts with a bounded deadline.
#[derive(Debug, Clone)]
pub struct VerificationRunner {
    timeout: Duration,
}

impl Default for VerificationRunner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
        }
    }
}

impl VerificationRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Executes the task's test script in the sandbox and maps the
    /// result onto a verification outcome.
    ///
    /// A failing or timed-out script is a normal outcome (`passed:
    /// false`, score 0.0). Only sandbox infrastructure failures return
    /// an error, so the caller can tell "the task was not solved" apart
    /// from "the benchmark could not judge it".
    pub async fn verify(
        &self,
        runtime: &dyn SandboxRuntime,
        sandbox: &mut Sandbox,
        task: &Task,
    ) -> Result<VerificationOutcome, VerificationError> {
        debug!(task_id = %task.id, sandbox = %sandbox.name, "Running verification script");

        let result = runtime
            .exec(
                sandbox,
                &task.test_script,
                Some(&task.working_directory),
                self.timeout,
            )
            .await;

        match result {
            Ok(output) if output.exit_code == 0 => {
                let (score, detail) = match parse_score(&output.stdout) {
                    Some(reported) => {
                        let score = reported.clamp(0.0, 1.0);
                        (score, format!("Verification passed with reported score {score}"))
                    }
                    None => (task.expected_reward, "Verification passed".to_string()),
                };

                Ok(VerificationOutcome {
                    passed: true,
                    score,
                    detail,
                })
            }
            Ok(output) => Ok(VerificationOutcome {
                passed: false,
                score: 0.0,
                detail: format!(
                    "Verification script exited with code {}: {}",
                    output.exit_code,
                    failure_snippet(&output.stderr, &output.stdout),
                ),
            }),
            Err(SandboxError::ExecutionTimeout { seconds, .. }) => Ok(VerificationOutcome {
                passed: false,
                score: 0.0,
                detail: format!("Verification script timed out after {seconds} seconds"),
            }),
            Err(e) => Err(VerificationError::Infrastructure(e)),
        }
    }
}

/// Extracts the last `SCORE: <float>` marker line, if any. The marker
/// must start its line; later markers override earlier ones.
fn parse_score(stdout: &str) -> Option<f64> {
    static SCORE_RE: OnceLock<Regex> = OnceLock::new();
    let re = SCORE_RE.get_or_init(|| {
        Regex::new(r"(?m)^SCORE:\s*([0-9]+(?:\.[0-9]+)?)\s*$").expect("valid score regex")
    });

    re.captures_iter(stdout)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn failure_snippet(stderr: &str, stdout: &str) -> String {
    const MAX_CHARS: usize = 300;
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return "(no output)".to_string();
    }
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_CHARS).collect();
        format!("{cut}... [truncated]")
    }
}
