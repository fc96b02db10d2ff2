use crate::error::RelayError;

/// Everything the relay reports to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Socket is open and the microphone is streaming.
    Ready,
    /// Base64 PCM synthesized by the agent.
    Audio(String),
    /// What the agent heard the user say.
    UserTranscript(String),
    /// What the agent said back.
    AgentResponse(String),
    /// The user talked over the agent.
    Interrupt,
    /// The socket closed, by either side.
    Disconnected,
    Error(RelayError),
}
