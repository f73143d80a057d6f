//! Error types for termbench operations.
//!
//! Defines error types for all major subsystems:
//! - Sandbox provisioning and command execution
//! - Participant protocol exchange
//! - Verification script execution
//! - Task loading and discovery

use thiserror::Error;

use crate::sandbox::CommandResult;

/// Errors that can occur during sandbox operations.
///
/// A command that merely exits non-zero is not an error; it is returned
/// as a normal `CommandResult`. These variants cover provisioning
/// failures, forcible timeouts, and infrastructure loss.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox provisioning failed: {0}")]
    ProvisionFailed(String),

    #[error("Sandbox provisioning timed out after {seconds} seconds")]
    ProvisionTimeout { seconds: u64 },

    #[error("Host resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Command timed out after {seconds} seconds")]
    ExecutionTimeout {
        seconds: u64,
        /// Output captured before the process was terminated.
        partial: CommandResult,
    },

    #[error("Sandbox unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while exchanging messages with the participant.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed participant response: {0}")]
    Malformed(String),

    #[error("Participant transport failure: {0}")]
    Transport(String),
}

/// Errors that can occur while running a task's verification script.
///
/// A verification script that fails or times out is a FAILED outcome,
/// not an error; this type covers infrastructure faults only.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Verification infrastructure failure: {0}")]
    Infrastructure(SandboxError),
}

/// Errors that can occur during task loading and discovery.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid task definition: {0}")]
    Invalid(String),

    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("No tasks found in {0}")]
    NoTasks(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
