//! Sandbox lifecycle management.
//!
//! Each episode owns exactly one sandbox: an isolated, disposable Docker
//! container created from the task's image, mutated only through the
//! owning episode, and destroyed exactly once on every exit path. The
//! `SandboxRuntime` trait is the seam between the orchestrator and the
//! concrete Docker implementation; tests substitute mock runtimes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SandboxError;
use crate::task::Task;

pub mod config;
pub mod docker;

pub use config::SandboxLimits;
pub use docker::DockerRuntime;

/// Lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Container is being provisioned (image pull, create, setup).
    Creating,
    /// Container is running and accepting commands.
    Ready,
    /// A command is currently executing inside the container.
    Executing,
    /// Teardown has started.
    Terminating,
    /// Container has been removed. Terminal.
    Destroyed,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Ready => write!(f, "ready"),
            Self::Executing => write!(f, "executing"),
            Self::Terminating => write!(f, "terminating"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Handle to a live sandbox.
///
/// The handle never crosses the participant boundary; only command
/// payloads and their results do.
#[derive(Debug)]
pub struct Sandbox {
    /// Container id assigned by the runtime.
    pub id: String,
    /// Human-readable container name (`termbench-sandbox-<uuid>`).
    pub name: String,
    /// Default working directory for commands.
    pub working_dir: String,
    /// Current lifecycle state.
    pub state: SandboxState,
}

impl Sandbox {
    /// Creates a handle in the `Creating` state.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        working_dir: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            working_dir: working_dir.into(),
            state: SandboxState::Creating,
        }
    }

    /// Whether the sandbox can accept a command.
    pub fn is_ready(&self) -> bool {
        self.state == SandboxState::Ready
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.state != SandboxState::Destroyed {
            warn!(
                sandbox = %self.name,
                state = %self.state,
                "Sandbox dropped without destroy; container may be leaked"
            );
        }
    }
}

/// Result of executing one command inside a sandbox.
///
/// A non-zero exit code or a timeout is a valid result, not an error;
/// only infrastructure failures surface as `SandboxError`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandResult {
    /// True when the command finished on its own with exit code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Create/exec/destroy primitives the orchestrator drives.
///
/// `exec` takes `&mut Sandbox` so exclusive ownership of the sandbox by
/// one episode is enforced by the borrow checker: no two commands can
/// run against the same sandbox concurrently.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Provision a sandbox for the task. Blocks until the environment is
    /// ready or the provisioning window elapses.
    async fn create(&self, task: &Task) -> Result<Sandbox, SandboxError>;

    /// Run a shell command inside the sandbox, bounded by `timeout`.
    /// On timeout the in-flight process is terminated and the call fails
    /// with `ExecutionTimeout` carrying the partial output.
    async fn exec(
        &self,
        sandbox: &mut Sandbox,
        command: &str,
        workdir: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult, SandboxError>;

    /// Tear the sandbox down. Idempotent; never raises. Secondary
    /// teardown errors are logged and swallowed so they cannot mask an
    /// already-decided verdict.
    async fn destroy(&self, sandbox: &mut Sandbox);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_state_display() {
        assert_eq!(SandboxState::Creating.to_string(), "creating");
        assert_eq!(SandboxState::Ready.to_string(), "ready");
        assert_eq!(SandboxState::Executing.to_string(), "executing");
        assert_eq!(SandboxState::Terminating.to_string(), "terminating");
        assert_eq!(SandboxState::Destroyed.to_string(), "destroyed");
    }

    #[test]
    fn new_sandbox_starts_creating() {
        let mut sandbox = Sandbox::new("abc123", "termbench-sandbox-test", "/workspace");
        assert_eq!(sandbox.state, SandboxState::Creating);
        assert!(!sandbox.is_ready());
        sandbox.state = SandboxState::Ready;
        assert!(sandbox.is_ready());
        sandbox.state = SandboxState::Destroyed;
    }

    #[test]
    fn command_result_success() {
        let ok = CommandResult {
            stdout: "done\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
            duration_ms: 12,
        };
        assert!(ok.is_success());

        let failed = CommandResult {
            stdout: String::new(),
            stderr: "boom".to_string(),
            exit_code: 2,
            timed_out: false,
            duration_ms: 5,
        };
        assert!(!failed.is_success());

        let timed_out = CommandResult {
            stdout: "partial".to_string(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: true,
            duration_ms: 30_000,
        };
        assert!(!timed_out.is_success());
    }

    #[test]
    fn command_result_serialization() {
        let result = CommandResult {
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            exit_code: 1,
            timed_out: false,
            duration_ms: 250,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"exit_code\":1"));
        assert!(json.contains("\"timed_out\":false"));
        assert!(json.contains("\"duration_ms\":250"));
    }
}
