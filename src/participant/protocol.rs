//! Turn message and response types exchanged with the participant.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::sandbox::CommandResult;
use crate::task::Task;

/// Command timeout applied when the participant does not request one.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// A message from the orchestrator to the participant.
///
/// Exactly one task instruction opens an episode; every executed
/// command is answered with a command result; a protocol error is the
/// single retry prompt after a malformed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnMessage {
    TaskInstruction {
        task_id: String,
        instruction: String,
        context: TaskContext,
    },
    CommandResult {
        task_id: String,
        stdout: String,
        stderr: String,
        exit_code: i64,
        timed_out: bool,
    },
    ProtocolError {
        task_id: String,
        detail: String,
    },
}

impl TurnMessage {
    /// Builds the opening instruction message for a task.
    pub fn task_instruction(task: &Task) -> Self {
        Self::TaskInstruction {
            task_id: task.id.clone(),
            instruction: task.instruction.clone(),
            context: TaskContext {
                working_directory: task.working_directory.clone(),
                environment: task.environment.clone(),
            },
        }
    }

    /// Builds a command result message from an executed command.
    pub fn command_result(task_id: impl Into<String>, result: &CommandResult) -> Self {
        Self::CommandResult {
            task_id: task_id.into(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
        }
    }

    /// Builds the re-prompt sent after a malformed response.
    pub fn protocol_error(task_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ProtocolError {
            task_id: task_id.into(),
            detail: detail.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskInstruction { task_id, .. }
            | Self::CommandResult { task_id, .. }
            | Self::ProtocolError { task_id, .. } => task_id,
        }
    }
}

/// Execution context shared with the participant at episode start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub working_directory: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// The participant's next action for the episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    /// Run a command in the sandbox.
    Execute,
    /// Declare the task finished and hand over to verification.
    Complete,
}

impl std::fmt::Display for AgentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execute => write!(f, "execute"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A command the participant wants executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Shell command line.
    pub command: String,
    /// Per-command timeout in seconds.
    #[serde(default = "default_command_timeout")]
    pub timeout: u64,
    /// Working directory override. Defaults to the task's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

/// Parsed participant response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub action: AgentAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl AgentResponse {
    /// Structural validity beyond what serde enforces: an execute
    /// action without a command payload is a protocol violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.action == AgentAction::Execute && self.command.is_none() {
            return Err("execute action without a command payload".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        let mut task = Task::new("demo-001", "Create hello.txt", "test -f hello.txt");
        task.environment
            .insert("LANG".to_string(), "C.UTF-8".to_string());
        task
    }

    #[test]
    fn task_instruction_wire_format() {
        let message = TurnMessage::task_instruction(&sample_task());
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "task_instruction");
        assert_eq!(json["task_id"], "demo-001");
        assert_eq!(json["instruction"], "Create hello.txt");
        assert_eq!(json["context"]["working_directory"], "/workspace");
        assert_eq!(json["context"]["environment"]["LANG"], "C.UTF-8");
    }

    #[test]
    fn command_result_wire_format() {
        let result = CommandResult {
            stdout: "ok\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
            duration_ms: 40,
        };
        let message = TurnMessage::command_result("demo-001", &result);
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "command_result");
        assert_eq!(json["stdout"], "ok\n");
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["timed_out"], false);
        // internal timing detail stays out of the wire format
        assert!(json.get("duration_ms").is_none());
    }

    #[test]
    fn protocol_error_wire_format() {
        let message = TurnMessage::protocol_error("demo-001", "response was not valid JSON");
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "protocol_error");
        assert_eq!(json["detail"], "response was not valid JSON");
        assert_eq!(message.task_id(), "demo-001");
    }

    #[test]
    fn parse_execute_response() {
        let response: AgentResponse = serde_json::from_str(
            r#"{"action": "execute", "command": {"command": "ls -la"}, "reasoning": "look around"}"#,
        )
        .unwrap();

        assert_eq!(response.action, AgentAction::Execute);
        let command = response.command.as_ref().unwrap();
        assert_eq!(command.command, "ls -la");
        assert_eq!(command.timeout, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert!(command.workdir.is_none());
        assert!(response.validate().is_ok());
    }

    #[test]
    fn parse_complete_response() {
        let response: AgentResponse =
            serde_json::from_str(r#"{"action": "complete"}"#).unwrap();
        assert_eq!(response.action, AgentAction::Complete);
        assert!(response.command.is_none());
        assert!(response.validate().is_ok());
    }

    #[test]
    fn parse_rejects_unknown_action() {
        let result = serde_json::from_str::<AgentResponse>(r#"{"action": "think"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn execute_without_command_is_invalid() {
        let response: AgentResponse =
            serde_json::from_str(r#"{"action": "execute"}"#).unwrap();
        let err = response.validate().unwrap_err();
        assert!(err.contains("without a command"));
    }

    #[test]
    fn command_spec_timeout_override() {
        let spec: CommandSpec = serde_json::from_str(
            r#"{"command": "sleep 5", "timeout": 10, "workdir": "/tmp"}"#,
        )
        .unwrap();
        assert_eq!(spec.timeout, 10);
        assert_eq!(spec.workdir.as_deref(), Some("/tmp"));
    }
}
