use cheffy_relay::connection::DEFAULT_AGENT_URL;

const DEFAULT_API_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    /// Bearer token from the identity provider.
    pub token: Option<String>,
    /// The signed-in user. Saving and recipe generation require it.
    pub user_id: Option<String>,
    pub agent_url: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: env_opt("CHEFFY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            token: env_opt("CHEFFY_TOKEN"),
            user_id: env_opt("CHEFFY_USER_ID"),
            agent_url: env_opt("ELEVENLABS_WS_URL").unwrap_or_else(|| DEFAULT_AGENT_URL.into()),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
