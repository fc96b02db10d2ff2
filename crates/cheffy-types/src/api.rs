use serde::{Deserialize, Serialize};

use crate::models::{Conversation, ConversationSummary, Message, Recipe, Role};

// -- JWT Claims --

/// Bearer token claims issued by the identity provider. `sub` is the user id
/// that owns conversations and recipes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// -- Session --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfigResponse {
    pub anam_session_token: String,
    pub eleven_labs_agent_id: String,
}

// -- Conversations --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInput {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConversationRequest {
    pub messages: Vec<MessageInput>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateConversationRequest {
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub success: bool,
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub success: bool,
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: Message,
}

// -- Recipes --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRecipeRequest {
    pub messages: Vec<MessageInput>,
    #[serde(default)]
    pub conversation_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeResponse {
    pub success: bool,
    pub recipe: Recipe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeListResponse {
    pub success: bool,
    pub recipes: Vec<Recipe>,
}
