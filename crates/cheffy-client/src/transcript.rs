use chrono::{DateTime, Utc};

use cheffy_types::api::MessageInput;
use cheffy_types::models::{Conversation, Role};

/// Who spoke a transcript line. The agent's lines are stored as
/// `assistant` on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Agent,
}

impl Speaker {
    pub fn to_role(self) -> Role {
        match self {
            Self::User => Role::User,
            Self::Agent => Role::Assistant,
        }
    }

    pub fn from_role(role: Role) -> Self {
        match role {
            Role::User => Self::User,
            Role::Assistant => Self::Agent,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::User => "you",
            Self::Agent => "chef",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Lines of the current session in arrival order.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            speaker,
            text: text.into(),
            at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Wire form for saving or recipe generation.
    pub fn to_messages(&self) -> Vec<MessageInput> {
        self.entries
            .iter()
            .map(|entry| MessageInput {
                role: entry.speaker.to_role(),
                content: entry.text.clone(),
            })
            .collect()
    }

    pub fn from_conversation(conversation: &Conversation) -> Self {
        Self {
            entries: conversation
                .messages
                .iter()
                .map(|message| TranscriptEntry {
                    speaker: Speaker::from_role(message.role),
                    text: message.content.clone(),
                    at: message.created_at,
                })
                .collect(),
        }
    }
}
