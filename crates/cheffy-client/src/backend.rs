use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use cheffy_types::api::{
    ConversationResponse, ErrorBody, GenerateRecipeRequest, RecipeResponse, SaveConversationRequest,
    SessionConfigResponse,
};
use cheffy_types::models::{Conversation, Recipe};

use crate::error::ClientError;

/// The Cheffy HTTP API as seen by the orchestrator.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn session_config(&self) -> Result<SessionConfigResponse, ClientError>;

    async fn save_conversation(&self, request: &SaveConversationRequest) -> Result<Conversation, ClientError>;

    async fn generate_recipe(&self, request: &GenerateRecipeRequest) -> Result<Recipe, ClientError>;

    async fn load_conversation(&self, id: Uuid) -> Result<Conversation, ClientError>;
}

pub struct HttpBackend {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(http: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, fallback: &str) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (message, details) = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) if !body.error.is_empty() => (body.error, body.details),
                Ok(body) => (fallback.to_string(), body.details),
                Err(_) => (format!("HTTP {}", status), Some(text).filter(|t| !t.is_empty())),
            };
            warn!("API call failed with {}: {}", status, message);
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
                details,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn session_config(&self) -> Result<SessionConfigResponse, ClientError> {
        debug!("Fetching session config");
        self.send(
            self.http.get(format!("{}/anam/config", self.base_url)),
            "Failed to fetch configuration",
        )
        .await
    }

    async fn save_conversation(&self, request: &SaveConversationRequest) -> Result<Conversation, ClientError> {
        let response: ConversationResponse = self
            .send(
                self.authorized(self.http.post(format!("{}/conversations", self.base_url)).json(request)),
                "Failed to save conversation",
            )
            .await?;
        Ok(response.conversation)
    }

    async fn generate_recipe(&self, request: &GenerateRecipeRequest) -> Result<Recipe, ClientError> {
        let response: RecipeResponse = self
            .send(
                self.authorized(self.http.post(format!("{}/recipes/generate", self.base_url)).json(request)),
                "Failed to generate recipe",
            )
            .await?;
        Ok(response.recipe)
    }

    async fn load_conversation(&self, id: Uuid) -> Result<Conversation, ClientError> {
        let response: ConversationResponse = self
            .send(
                self.authorized(self.http.get(format!("{}/conversations/{}", self.base_url, id))),
                "Failed to load conversation",
            )
            .await?;
        Ok(response.conversation)
    }
}
