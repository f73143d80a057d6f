//! HTTP transport for participant communication.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::ProtocolError;
use crate::participant::{AgentResponse, Participant, TurnMessage};

/// Default participant endpoint.
pub const DEFAULT_PARTICIPANT_URL: &str = "http://127.0.0.1:9010";

/// Safety ceiling on the underlying HTTP request. Per-turn deadlines
/// are enforced by the orchestrator, which times out well before this;
/// the client timeout only guards against a wedged connection when no
/// orchestrator deadline applies.
const HTTP_TIMEOUT_SECS: u64 = 120;

/// Participant reachable over plain HTTP.
///
/// Each turn message is POSTed as a JSON body to the participant's
/// endpoint; the response body is parsed as an `AgentResponse`.
pub struct HttpParticipant {
    endpoint: String,
    http_client: Client,
}

impl HttpParticipant {
    /// Creates a client for the given endpoint. A trailing slash is
    /// stripped so URLs compose the same either way.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            http_client: Client::builder()
                .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Participant for HttpParticipant {
    async fn exchange(&self, message: &TurnMessage) -> Result<AgentResponse, ProtocolError> {
        let url = format!("{}/", self.endpoint);

        debug!(task_id = %message.task_id(), url = %url, "Sending turn message");

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(message)
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProtocolError::Transport(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(ProtocolError::Transport(format!(
                "Participant returned HTTP {}: {}",
                status.as_u16(),
                body_snippet(&body),
            )));
        }

        let parsed: AgentResponse = serde_json::from_str(&body).map_err(|e| {
            ProtocolError::Malformed(format!(
                "Response did not parse as an action ({e}): {}",
                body_snippet(&body),
            ))
        })?;

        parsed.validate().map_err(ProtocolError::Malformed)?;

        Ok(parsed)
    }
}

fn body_snippet(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    if body.chars().count() <= MAX_CHARS {
        body.to_string()
    } else {
        let truncated: String = body.chars().take(MAX_CHARS).collect();
        format!("{truncated}... [truncated]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_normalization() {
        let with_slash = HttpParticipant::new("http://127.0.0.1:9010/");
        assert_eq!(with_slash.endpoint(), "http://127.0.0.1:9010");

        let without_slash = HttpParticipant::new("http://127.0.0.1:9010");
        assert_eq!(without_slash.endpoint(), "http://127.0.0.1:9010");
    }

    #[tokio::test]
    async fn unreachable_participant_is_transport_error() {
        // Port unlikely to have a listener.
        let participant = HttpParticipant::new("http://127.0.0.1:65535");
        let message = TurnMessage::protocol_error("t", "ping");

        let err = participant.exchange(&message).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Transport(_)));
    }

    #[test]
    fn snippet_bounds_error_bodies() {
        let long = "x".repeat(400);
        let cut = body_snippet(&long);
        assert!(cut.ends_with("... [truncated]"));
        assert!(cut.chars().count() < 250);
    }
}
