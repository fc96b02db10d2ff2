use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cheffy_relay::{AgentEvent, MicrophoneCapture, RelayConfig, RelayHandle};
use cheffy_types::api::{GenerateRecipeRequest, SaveConversationRequest};
use cheffy_types::models::{Conversation, Recipe};

use crate::avatar::{AudioFormat, AvatarClient, AvatarSession};
use crate::backend::Backend;
use crate::error::ClientError;
use crate::transcript::{Speaker, Transcript};

/// Delay between a recipe being stored and opening its page.
pub const NAVIGATION_DELAY: Duration = Duration::from_millis(500);

/// Builds a fresh microphone for each connection.
pub type MicrophoneFactory = Box<dyn Fn() -> Box<dyn MicrophoneCapture> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Saving,
    GeneratingRecipe,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Saving => "saving",
            Self::GeneratingRecipe => "generating a recipe",
        })
    }
}

/// Last failed recipe generation, kept so the user can retry it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeFailure {
    pub message: String,
    pub retryable: bool,
}

pub trait OrchestratorListener: Send + Sync {
    fn conversation_saved(&self, _conversation: &Conversation) {}

    /// A page should be opened, e.g. `/recipes/<id>`.
    fn navigate(&self, _path: &str) {}
}

pub fn conversation_title(now: DateTime<Local>) -> String {
    format!("Conversation with AI - {}", now.format("%-m/%-d/%Y, %-I:%M:%S %p"))
}

/// Owns one voice session: the avatar session, the relay and the transcript
/// they produce, plus the save and recipe actions on that transcript.
pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    avatar: Arc<dyn AvatarClient>,
    microphone: MicrophoneFactory,
    agent_url: Option<String>,
    user_id: Option<String>,
    listeners: Vec<Arc<dyn OrchestratorListener>>,

    phase: Phase,
    transcript: Transcript,
    relay: Option<RelayHandle>,
    session: Option<Box<dyn AvatarSession>>,
    events: Option<mpsc::UnboundedReceiver<AgentEvent>>,
    last_error: Option<String>,
    recipe_error: Option<RecipeFailure>,
    generated_recipe_id: Option<Uuid>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn Backend>, avatar: Arc<dyn AvatarClient>, microphone: MicrophoneFactory) -> Self {
        Self {
            backend,
            avatar,
            microphone,
            agent_url: None,
            user_id: None,
            listeners: Vec::new(),
            phase: Phase::Idle,
            transcript: Transcript::default(),
            relay: None,
            session: None,
            events: None,
            last_error: None,
            recipe_error: None,
            generated_recipe_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Override the voice agent's WebSocket base URL.
    pub fn with_agent_url(mut self, url: impl Into<String>) -> Self {
        self.agent_url = Some(url.into());
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn OrchestratorListener>) {
        self.listeners.push(listener);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn recipe_error(&self) -> Option<&RecipeFailure> {
        self.recipe_error.as_ref()
    }

    pub fn generated_recipe_id(&self) -> Option<Uuid> {
        self.generated_recipe_id
    }

    // ── Session lifecycle ──────────────────────────────────────────────

    /// Fetch session config, open the avatar and connect the relay. On any
    /// failure whatever was acquired is released and the phase returns to
    /// `Idle`.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.phase != Phase::Idle {
            return Err(ClientError::Busy {
                action: "start",
                phase: self.phase,
            });
        }

        // The agent may have hung up without a `stop`; close what it left.
        if self.relay.is_some() || self.session.is_some() {
            debug!("Releasing handles left by the previous session");
            self.release().await;
        }

        self.phase = Phase::Connecting;
        self.last_error = None;

        if let Err(e) = self.acquire().await {
            error!("Failed to start conversation: {}", e);
            self.last_error = Some(e.to_string());
            self.release().await;
            self.phase = Phase::Idle;
            return Err(e);
        }

        // Apply whatever the relay already reported, normally `Ready`.
        self.drain_events();
        Ok(())
    }

    async fn acquire(&mut self) -> Result<(), ClientError> {
        let config = self.backend.session_config().await?;
        if config.anam_session_token.is_empty() || config.eleven_labs_agent_id.is_empty() {
            return Err(ClientError::MissingSessionConfig);
        }

        let session = self
            .avatar
            .open(&config.anam_session_token, AudioFormat::AGENT_PCM)
            .await?;
        self.session = Some(session);

        let mut relay_config = RelayConfig::new(config.eleven_labs_agent_id);
        if let Some(url) = &self.agent_url {
            relay_config = relay_config.with_base_url(url.clone());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let relay = cheffy_relay::connect(&relay_config, (self.microphone)(), events_tx).await?;
        self.relay = Some(relay);
        self.events = Some(events_rx);
        Ok(())
    }

    /// Relay first, then the avatar. Either may already be gone.
    async fn release(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.teardown();
        }
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.stop().await {
                warn!("Avatar stop failed: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
        self.events = None;
    }

    pub async fn stop(&mut self) {
        self.release().await;
        if self.phase != Phase::Idle {
            info!("Conversation stopped");
        }
        self.phase = Phase::Idle;
    }

    // ── Relay events ───────────────────────────────────────────────────

    /// Wait for the next relay event. Pending forever when no relay is
    /// running, so it can sit in a `select!` next to other inputs.
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        let event = events.recv().await;
        if event.is_none() {
            self.events = None;
        }
        event
    }

    /// Apply every event already queued.
    pub fn drain_events(&mut self) {
        while let Some(event) = self.events.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Ready => {
                if self.phase == Phase::Connecting {
                    self.phase = Phase::Connected;
                    info!("Conversation connected");
                }
            }
            AgentEvent::Audio(chunk) => {
                if let Some(session) = self.session.as_mut() {
                    if let Err(e) = session.send_audio_chunk(&chunk) {
                        warn!("Dropped agent audio chunk: {}", e);
                    }
                }
            }
            AgentEvent::UserTranscript(text) => {
                self.transcript.push(Speaker::User, text);
            }
            AgentEvent::AgentResponse(text) => {
                self.transcript.push(Speaker::Agent, text);
                self.end_avatar_sequence();
            }
            AgentEvent::Interrupt => self.end_avatar_sequence(),
            AgentEvent::Disconnected => {
                if matches!(self.phase, Phase::Connecting | Phase::Connected) {
                    self.phase = Phase::Idle;
                }
                info!("Voice agent disconnected");
            }
            AgentEvent::Error(e) => {
                warn!("Relay reported: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
    }

    fn end_avatar_sequence(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.end_sequence();
        }
    }

    // ── Transcript actions ─────────────────────────────────────────────

    fn ready_to_submit(&self, action: &'static str) -> Result<(), ClientError> {
        if self.phase != Phase::Idle {
            return Err(ClientError::Busy {
                action,
                phase: self.phase,
            });
        }
        if self.user_id.is_none() {
            return Err(ClientError::NotSignedIn);
        }
        if self.transcript.is_empty() {
            return Err(ClientError::EmptyTranscript);
        }
        Ok(())
    }

    /// Persist the transcript as a new conversation, then clear it.
    pub async fn save(&mut self) -> Result<Conversation, ClientError> {
        self.ready_to_submit("save")?;
        self.phase = Phase::Saving;

        let request = SaveConversationRequest {
            messages: self.transcript.to_messages(),
            title: Some(conversation_title(Local::now())),
        };
        let result = self.backend.save_conversation(&request).await;
        self.phase = Phase::Idle;

        match result {
            Ok(conversation) => {
                info!("Conversation {} saved ({} messages)", conversation.id, conversation.messages.len());
                self.transcript.clear();
                for listener in &self.listeners {
                    listener.conversation_saved(&conversation);
                }
                Ok(conversation)
            }
            Err(e) => {
                error!("Error saving conversation: {}", e);
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Submit the transcript for recipe generation. The transcript is kept
    /// either way.
    pub async fn generate_recipe(&mut self) -> Result<Recipe, ClientError> {
        self.ready_to_submit("generate a recipe")?;
        self.phase = Phase::GeneratingRecipe;
        self.generated_recipe_id = None;
        self.recipe_error = None;

        let request = GenerateRecipeRequest {
            messages: self.transcript.to_messages(),
            conversation_title: Some(conversation_title(Local::now())),
        };
        let result = self.backend.generate_recipe(&request).await;
        self.phase = Phase::Idle;

        match result {
            Ok(recipe) => {
                info!("Recipe {} generated: {}", recipe.id, recipe.title);
                self.generated_recipe_id = Some(recipe.id);
                self.schedule_navigation(format!("/recipes/{}", recipe.id));
                Ok(recipe)
            }
            Err(e) => {
                let retryable = e.is_retryable();
                error!("Error generating recipe (retryable: {}): {}", retryable, e);
                self.recipe_error = Some(RecipeFailure {
                    message: e.to_string(),
                    retryable,
                });
                Err(e)
            }
        }
    }

    /// Re-run the last generation if it failed with a retryable status.
    pub async fn retry_recipe(&mut self) -> Result<Recipe, ClientError> {
        match &self.recipe_error {
            Some(failure) if failure.retryable => self.generate_recipe().await,
            _ => Err(ClientError::NothingToRetry),
        }
    }

    fn schedule_navigation(&self, path: String) {
        let listeners = self.listeners.clone();
        tokio::spawn(async move {
            tokio::time::sleep(NAVIGATION_DELAY).await;
            for listener in &listeners {
                listener.navigate(&path);
            }
        });
    }

    /// Replace the transcript with a saved conversation.
    pub async fn load(&mut self, conversation_id: Uuid) -> Result<(), ClientError> {
        if self.phase != Phase::Idle {
            return Err(ClientError::Busy {
                action: "load a conversation",
                phase: self.phase,
            });
        }

        match self.backend.load_conversation(conversation_id).await {
            Ok(conversation) => {
                self.transcript = Transcript::from_conversation(&conversation);
                debug!("Loaded {} messages from {}", self.transcript.len(), conversation_id);
                Ok(())
            }
            Err(e) => {
                error!("Error loading conversation {}: {}", conversation_id, e);
                self.transcript.clear();
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
