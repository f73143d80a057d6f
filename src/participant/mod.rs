//! Participant communication.
//!
//! The participant is the agent under evaluation. It lives behind an
//! opaque boundary: the orchestrator sends it turn messages (task
//! instruction, command results, protocol errors) and receives action
//! responses back. Nothing about the sandbox, the verifier, or other
//! episodes ever crosses this boundary.

use async_trait::async_trait;

use crate::error::ProtocolError;

pub mod http;
pub mod protocol;

pub use http::{HttpParticipant, DEFAULT_PARTICIPANT_URL};
pub use protocol::{
    AgentAction, AgentResponse, CommandSpec, TaskContext, TurnMessage,
    DEFAULT_COMMAND_TIMEOUT_SECS,
};

/// A participant agent the benchmark can exchange turn messages with.
///
/// Implementations decide the transport. `exchange` sends one message
/// and waits for the participant's next action; deadline enforcement is
/// the caller's job.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Sends a turn message and returns the participant's response.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Transport` when the participant cannot be
    /// reached, `ProtocolError::Malformed` when its reply does not
    /// parse as a valid action.
    async fn exchange(&self, message: &TurnMessage) -> Result<AgentResponse, ProtocolError>;
}
