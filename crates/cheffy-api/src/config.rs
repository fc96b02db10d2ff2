use std::time::Duration;

use anyhow::{Result, bail};

use crate::generation::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, GeminiConfig};
use crate::session::DEFAULT_ANAM_BASE_URL;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub const GEMINI_API_KEY_VAR: &str = "GOOGLE_GENERATIVE_AI_API_KEY";

/// Values the avatar session endpoint needs. Any of the three may be missing;
/// the endpoint reports that per request instead of refusing to boot.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub anam_api_key: Option<String>,
    pub anam_avatar_id: Option<String>,
    pub elevenlabs_agent_id: Option<String>,
    pub anam_base_url: String,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub jwt_secret: String,
    pub session: SessionSettings,
    /// `None` when no model API key is configured.
    pub gemini: Option<GeminiConfig>,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env_opt("CHEFFY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("CHEFFY_JWT_SECRET is unset or still a placeholder");
        }

        let session = SessionSettings {
            anam_api_key: env_opt("ANAM_API_KEY"),
            anam_avatar_id: env_opt("ANAM_AVATAR_ID"),
            elevenlabs_agent_id: env_opt("ELEVENLABS_AGENT_ID"),
            anam_base_url: env_opt("ANAM_BASE_URL").unwrap_or_else(|| DEFAULT_ANAM_BASE_URL.into()),
        };

        let timeout = match env_opt("CHEFFY_GENERATION_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(raw.parse()?)),
            None => None,
        };
        let gemini = env_opt(GEMINI_API_KEY_VAR).map(|key| {
            GeminiConfig::new(key)
                .with_model(env_opt("CHEFFY_GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.into()))
                .with_base_url(
                    env_opt("CHEFFY_GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.into()),
                )
                .with_timeout(timeout)
        });

        Ok(Self {
            jwt_secret,
            session,
            gemini,
        })
    }
}

/// Unset and empty variables are treated the same.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
