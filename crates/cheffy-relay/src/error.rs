/// Failures reported by the relay, either returned from `connect` or sent
/// down the event channel as [`AgentEvent::Error`](crate::AgentEvent::Error).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid agent URL: {0}")]
    InvalidUrl(String),

    /// An inbound frame that is not valid JSON or has an unexpected shape.
    /// The socket stays open.
    #[error("Failed to parse WebSocket message: {0}")]
    Parse(String),

    #[error("WebSocket error: {0}")]
    Socket(String),

    #[error("Microphone error: {0}")]
    Microphone(String),
}
