use cheffy_relay::RelayError;

use crate::orchestrator::Phase;

/// Statuses worth offering the user a retry for.
const RETRYABLE_STATUSES: [u16; 3] = [429, 503, 504];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("Please sign in first")]
    NotSignedIn,

    #[error("No conversation messages yet. Start a conversation first.")]
    EmptyTranscript,

    #[error("Cannot {action} while {phase}")]
    Busy { action: &'static str, phase: Phase },

    #[error("Missing session token or agent ID. Check your environment variables.")]
    MissingSessionConfig,

    #[error("Nothing to retry")]
    NothingToRetry,

    /// The API answered with a non-success status.
    #[error("{}", api_message(.message, .details))]
    Api {
        status: u16,
        message: String,
        details: Option<String>,
    },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Avatar error: {0}")]
    Avatar(String),
}

fn api_message(message: &str, details: &Option<String>) -> String {
    match details.as_deref().filter(|d| !d.is_empty()) {
        Some(details) => format!("{}: {}", message, details),
        None => message.to_string(),
    }
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transient upstream failures the user may retry by hand. Nothing is
    /// retried automatically.
    pub fn is_retryable(&self) -> bool {
        self.status().is_some_and(|s| RETRYABLE_STATUSES.contains(&s))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
