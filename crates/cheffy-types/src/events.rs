use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames received FROM the voice agent over its WebSocket.
///
/// Every frame carries a `type` discriminator and a nested `*_event` payload.
/// Types we do not act on (metadata, VAD scores, corrections) collapse into
/// `Other`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Audio {
        audio_event: Option<AudioEvent>,
    },
    AgentResponse {
        agent_response_event: Option<AgentResponseEvent>,
    },
    UserTranscript {
        user_transcription_event: Option<UserTranscriptionEvent>,
    },
    Interruption {
        #[serde(default)]
        interruption_event: Option<Value>,
    },
    Ping {
        ping_event: Option<PingEvent>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioEvent {
    pub audio_base_64: Option<String>,
    #[serde(default)]
    pub event_id: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseEvent {
    pub agent_response: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserTranscriptionEvent {
    pub user_transcript: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    pub event_id: Option<Value>,
    #[serde(default)]
    pub ping_ms: Option<u64>,
}

/// Frames sent TO the voice agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// One base64-encoded chunk of 16 kHz mono PCM from the microphone.
    Audio { user_audio_chunk: String },
    Control(ClientControl),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientControl {
    /// Keep-alive reply echoing the ping's event id.
    Pong { event_id: Value },
}
