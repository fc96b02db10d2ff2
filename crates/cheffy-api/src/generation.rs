//! Recipe generation: flatten a transcript into a prompt, ask the text model
//! for a strict JSON recipe, then parse and validate what comes back.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use tracing::{debug, error, info};

use cheffy_types::api::MessageInput;
use cheffy_types::models::NewRecipe;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

const TEMPERATURE: f64 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 2000;

const DEFAULT_DIFFICULTY: &str = "medium";
const DEFAULT_SERVINGS: u32 = 1;

pub const SYSTEM_PROMPT: &str = r#"You are a professional chef who writes recipes. Read the conversation you are given and turn it into one structured recipe.

Respond with a single JSON object and nothing else: no markdown fences, no commentary before or after it. The response must start with { and end with }.

The object must have exactly this shape:
{
  "title": "Recipe name",
  "description": "One or two sentences about the dish",
  "ingredients": ["ingredient with quantity", "another ingredient with quantity"],
  "instructions": ["first step", "second step", "third step"],
  "prepTime": 15,
  "cookTime": 30,
  "servings": 4,
  "difficulty": "easy",
  "tags": ["tag", "another tag"]
}

prepTime and cookTime are whole minutes. difficulty is one of "easy", "medium" or "hard"."#;

/// Failures surfaced by recipe generation, each with a fixed HTTP status.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("Missing API key. Please configure {0} in environment variables.")]
    MissingConfiguration(String),

    #[error("No messages provided")]
    NoInput,

    #[error("The AI service is currently overloaded. Please try again in a few moments.")]
    Overloaded(String),

    #[error("Rate limit exceeded. Please wait a moment before trying again.")]
    RateLimited(String),

    #[error("API authentication failed. Please check your API key configuration.")]
    AuthFailed(String),

    #[error("Request timed out. Please try again.")]
    Timeout(String),

    #[error("Failed to parse generated recipe")]
    Parse(String),

    #[error("Invalid recipe structure: missing {0}")]
    Validation(&'static str),

    #[error("Failed to generate recipe: {0}")]
    Failed(String),
}

impl GenerationError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingConfiguration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoInput => StatusCode::BAD_REQUEST,
            Self::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Transient upstream conditions the user may retry by hand.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Overloaded(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }

    /// Extra context returned next to the user-facing message.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Parse(detail) => Some(detail.clone()),
            _ => None,
        }
    }
}

/// Classify an upstream failure from its message text alone.
pub fn classify_message(message: &str) -> GenerationError {
    let lower = message.to_lowercase();
    if lower.contains("overload") {
        GenerationError::Overloaded(message.to_string())
    } else if lower.contains("rate limit") || lower.contains("quota") {
        GenerationError::RateLimited(message.to_string())
    } else if lower.contains("api key") || lower.contains("authentication") {
        GenerationError::AuthFailed(message.to_string())
    } else if lower.contains("timeout") || lower.contains("timed out") {
        GenerationError::Timeout(message.to_string())
    } else {
        GenerationError::Failed(message.to_string())
    }
}

/// Map a non-success model API response to a typed error. The status wins
/// when it is unambiguous; otherwise the body text decides.
pub fn map_http_error(status: reqwest::StatusCode, body: &str) -> GenerationError {
    let detail = extract_error_message(body);

    match status.as_u16() {
        429 => GenerationError::RateLimited(detail),
        401 | 403 => GenerationError::AuthFailed(detail),
        503 | 529 => GenerationError::Overloaded(detail),
        408 | 504 => GenerationError::Timeout(detail),
        _ => match classify_message(&detail) {
            GenerationError::Failed(_) => GenerationError::Failed(format!("HTTP {}: {}", status, detail)),
            classified => classified,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| {
            if body.is_empty() {
                "no response body".to_string()
            } else {
                body.chars().take(500).collect()
            }
        })
}

// ── Model seam ─────────────────────────────────────────────────────────

/// A text-generation backend: one system instruction, one prompt, one reply.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Option<Duration>,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            timeout: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiModel {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiModel {
    pub fn new(config: GeminiConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[async_trait]
impl TextModel for GeminiModel {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
            },
        });

        debug!(model = %self.config.model, "Sending generateContent request");

        let mut request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body);
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, "Model request failed");
            if e.is_timeout() {
                GenerationError::Timeout(e.to_string())
            } else {
                classify_message(&e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read body".into());
            error!(status = %status, body = %body, "Model request returned error");
            return Err(map_http_error(status, &body));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Model response was not valid JSON");
            GenerationError::Failed(format!("invalid model response: {}", e))
        })?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GenerationError::Failed("model returned no text".into()));
        }
        Ok(text)
    }
}

// ── Prompt ─────────────────────────────────────────────────────────────

/// Flatten the transcript into `User: …` / `Assistant: …` lines.
pub fn build_prompt(messages: &[MessageInput]) -> String {
    let transcript = messages
        .iter()
        .map(|m| format!("{}: {}", m.role.speaker_label(), m.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Based on this conversation, create a recipe:\n\n{}", transcript)
}

/// Run one generation round trip and return a validated recipe. Persisting it
/// is the caller's job.
pub async fn draft_recipe(
    model: &dyn TextModel,
    messages: &[MessageInput],
) -> Result<NewRecipe, GenerationError> {
    if messages.is_empty() {
        return Err(GenerationError::NoInput);
    }

    let prompt = build_prompt(messages);
    let raw = model.generate(SYSTEM_PROMPT, &prompt).await?;

    let recipe = parse_recipe_text(&raw).inspect_err(|e| {
        // Raw model output stays in the server log only.
        error!(error = %e, raw = %raw, "Rejected generated recipe");
    })?;

    info!(
        title = %recipe.title,
        ingredients = recipe.ingredients.len(),
        instructions = recipe.instructions.len(),
        "Recipe drafted"
    );
    Ok(recipe)
}

// ── Response parsing ───────────────────────────────────────────────────

/// Schema the model is asked to produce. Every field is optional here;
/// required-ness and defaults are applied in [`RecipeDraft::validate`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecipeDraft {
    #[serde(default, deserialize_with = "lenient_string")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    ingredients: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_list")]
    instructions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_number")]
    prep_time: Option<u32>,
    #[serde(default, deserialize_with = "lenient_number")]
    cook_time: Option<u32>,
    #[serde(default, deserialize_with = "lenient_number")]
    servings: Option<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    difficulty: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_string")]
    image_url: Option<String>,
}

impl RecipeDraft {
    fn validate(self) -> Result<NewRecipe, GenerationError> {
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(GenerationError::Validation("title"))?;
        let ingredients = self
            .ingredients
            .filter(|l| !l.is_empty())
            .ok_or(GenerationError::Validation("ingredients"))?;
        let instructions = self
            .instructions
            .filter(|l| !l.is_empty())
            .ok_or(GenerationError::Validation("instructions"))?;

        Ok(NewRecipe {
            title,
            description: Some(self.description.unwrap_or_default()),
            ingredients,
            instructions,
            prep_time: Some(self.prep_time.unwrap_or(0)),
            cook_time: Some(self.cook_time.unwrap_or(0)),
            servings: Some(self.servings.filter(|s| *s > 0).unwrap_or(DEFAULT_SERVINGS)),
            difficulty: Some(
                self.difficulty
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_DIFFICULTY.to_string()),
            ),
            tags: self.tags.unwrap_or_default(),
            image_url: self.image_url.filter(|u| !u.is_empty()),
        })
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Arrays keep their string items; anything else counts as absent.
fn lenient_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) if !s.trim().is_empty() => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    })
}

/// Accepts `15`, `15.0` and `"15 minutes"`.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.round().min(u32::MAX as f64) as u32),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        }
        _ => None,
    })
}

/// Strip an optional markdown fence from around the model's reply.
fn strip_code_fence(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = match rest.get(..4) {
            Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
            _ => rest,
        };
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    text
}

/// First balanced `{...}` span, ignoring braces inside JSON strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the model's raw reply into a validated recipe.
pub fn parse_recipe_text(raw: &str) -> Result<NewRecipe, GenerationError> {
    let unfenced = strip_code_fence(raw);
    let json_text = extract_json_object(unfenced).unwrap_or(unfenced);

    let draft: RecipeDraft =
        serde_json::from_str(json_text).map_err(|e| GenerationError::Parse(e.to_string()))?;
    draft.validate()
}
