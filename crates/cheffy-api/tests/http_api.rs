use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use cheffy_api::config::{ApiConfig, SessionSettings};
use cheffy_api::generation::{GenerationError, TextModel};
use cheffy_api::middleware::create_token;
use cheffy_api::routes::router;
use cheffy_api::state::AppStateInner;
use cheffy_db::Database;

const SECRET: &str = "integration-test-secret";

struct ScriptedModel(Result<String, GenerationError>);

#[async_trait]
impl TextModel for ScriptedModel {
    async fn generate(&self, _system: &str, _prompt: &str) -> Result<String, GenerationError> {
        self.0.clone()
    }
}

fn config() -> ApiConfig {
    ApiConfig {
        jwt_secret: SECRET.into(),
        session: SessionSettings::default(),
        gemini: None,
    }
}

fn app(model: Option<ScriptedModel>) -> Router {
    let db = Database::open_in_memory().unwrap();
    let mut inner = AppStateInner::new(db, config());
    if let Some(model) = model {
        inner = inner.with_model(Arc::new(model));
    }
    router(Arc::new(inner))
}

fn recipe_json(title: &str) -> String {
    json!({
        "title": title,
        "description": "Weeknight one-pan dinner",
        "ingredients": ["2 chicken thighs", "1 cup rice", "2 cups stock"],
        "instructions": ["Brown the chicken", "Add rice and stock", "Simmer 20 minutes"],
        "prepTime": 10,
        "cookTime": 30,
        "servings": 2,
        "difficulty": "easy",
        "tags": ["chicken", "rice"]
    })
    .to_string()
}

async fn call(app: &Router, method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        let token = create_token(SECRET, user).unwrap();
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

fn transcript() -> Value {
    json!([
        { "role": "user", "content": "I have chicken and rice" },
        { "role": "assistant", "content": "Let's make a one-pan chicken and rice" },
    ])
}

#[tokio::test]
async fn health_is_public() {
    let app = app(None);
    let (status, body) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn conversations_require_a_token() {
    let app = app(None);
    let (status, body) = call(&app, Method::GET, "/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let request = Request::builder()
        .uri("/conversations")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn saved_conversation_loads_back_in_order() {
    let app = app(None);
    let (status, saved) = call(
        &app,
        Method::POST,
        "/conversations",
        Some("alice"),
        Some(json!({ "messages": transcript(), "title": "Dinner ideas" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(saved["success"], true);
    let id = saved["conversation"]["id"].as_str().unwrap().to_string();

    let (status, loaded) = call(&app, Method::GET, &format!("/conversations/{}", id), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    let conversation = &loaded["conversation"];
    assert_eq!(conversation["userId"], "alice");
    assert_eq!(conversation["title"], "Dinner ideas");
    let messages = conversation["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "I have chicken and rice");
    assert_eq!(messages[1]["role"], "assistant");

    let (status, list) = call(&app, Method::GET, "/conversations", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    let summaries = list["conversations"].as_array().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0]["messageCount"], 2);
    assert_eq!(summaries[0]["preview"]["content"], "I have chicken and rice");

    let (_, others) = call(&app, Method::GET, "/conversations", Some("bob"), None).await;
    assert!(others["conversations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_transcript_is_rejected() {
    let app = app(None);
    let (status, body) = call(
        &app,
        Method::POST,
        "/conversations",
        Some("alice"),
        Some(json!({ "messages": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid messages format");
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let app = app(None);
    let (status, body) = call(
        &app,
        Method::POST,
        "/conversations",
        Some("alice"),
        Some(json!({ "messages": [{ "role": "chef", "content": "hi" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn other_users_get_forbidden_and_unknown_ids_not_found() {
    let app = app(None);
    let (_, saved) = call(
        &app,
        Method::POST,
        "/conversations",
        Some("alice"),
        Some(json!({ "messages": transcript() })),
    )
    .await;
    let id = saved["conversation"]["id"].as_str().unwrap().to_string();
    let uri = format!("/conversations/{}", id);

    let (status, _) = call(&app, Method::GET, &uri, Some("bob"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, Method::DELETE, &uri, Some("bob"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let missing = format!("/conversations/{}", uuid::Uuid::new_v4());
    let (status, body) = call(&app, Method::GET, &missing, Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Conversation not found");
}

#[tokio::test]
async fn rename_append_and_delete() {
    let app = app(None);
    let (_, saved) = call(
        &app,
        Method::POST,
        "/conversations",
        Some("alice"),
        Some(json!({ "messages": transcript() })),
    )
    .await;
    let id = saved["conversation"]["id"].as_str().unwrap().to_string();
    let uri = format!("/conversations/{}", id);

    let (status, renamed) = call(&app, Method::PATCH, &uri, Some("alice"), Some(json!({ "title": "Chicken night" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["conversation"]["title"], "Chicken night");

    let (status, _) = call(&app, Method::PATCH, &uri, Some("alice"), Some(json!({ "title": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, appended) = call(
        &app,
        Method::POST,
        &format!("{}/messages", uri),
        Some("alice"),
        Some(json!({ "role": "user", "content": "Can I add peas?" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(appended["message"]["content"], "Can I add peas?");

    let (_, loaded) = call(&app, Method::GET, &uri, Some("alice"), None).await;
    let messages = loaded["conversation"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2]["content"], "Can I add peas?");

    let (status, _) = call(&app, Method::DELETE, &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, Method::GET, &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generated_recipe_is_stored_and_listed_first() {
    let app = app(Some(ScriptedModel(Ok(recipe_json("One-Pan Chicken and Rice")))));
    let body = json!({ "messages": transcript(), "conversationTitle": "Dinner ideas" });

    let (status, first) = call(&app, Method::POST, "/recipes/generate", Some("alice"), Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) = call(&app, Method::POST, "/recipes/generate", Some("bob"), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);

    let recipe = &first["recipe"];
    assert_eq!(recipe["title"], "One-Pan Chicken and Rice");
    assert_eq!(recipe["userId"], "alice");
    assert_eq!(recipe["ingredients"].as_array().unwrap().len(), 3);
    assert_eq!(recipe["servings"], 2);

    let (status, gallery) = call(&app, Method::GET, "/recipes", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let recipes = gallery["recipes"].as_array().unwrap();
    assert_eq!(recipes.len(), 2);
    assert_eq!(recipes[0]["id"], second["recipe"]["id"]);
    assert_eq!(recipes[1]["id"], first["recipe"]["id"]);

    let (_, mine) = call(&app, Method::GET, "/recipes/mine", Some("alice"), None).await;
    let mine = mine["recipes"].as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["userId"], "alice");

    let id = recipe["id"].as_str().unwrap();
    let (status, fetched) = call(&app, Method::GET, &format!("/recipes/{}", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["recipe"]["difficulty"], "easy");
}

#[tokio::test]
async fn incomplete_recipe_is_rejected_and_not_persisted() {
    let draft = json!({ "ingredients": ["rice"], "instructions": ["cook"] }).to_string();
    let app = app(Some(ScriptedModel(Ok(draft))));

    let (status, body) = call(
        &app,
        Method::POST,
        "/recipes/generate",
        Some("alice"),
        Some(json!({ "messages": transcript() })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid recipe structure: missing title");

    let (_, gallery) = call(&app, Method::GET, "/recipes", None, None).await;
    assert!(gallery["recipes"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unparseable_output_includes_details() {
    let app = app(Some(ScriptedModel(Ok("Sorry, I can't help with that.".into()))));
    let (status, body) = call(
        &app,
        Method::POST,
        "/recipes/generate",
        Some("alice"),
        Some(json!({ "messages": transcript() })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to parse generated recipe");
    assert!(body["details"].is_string());
}

#[tokio::test]
async fn rate_limit_passes_through_as_429() {
    let app = app(Some(ScriptedModel(Err(GenerationError::RateLimited("quota".into())))));
    let (status, body) = call(
        &app,
        Method::POST,
        "/recipes/generate",
        Some("alice"),
        Some(json!({ "messages": transcript() })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Rate limit exceeded. Please wait a moment before trying again.");
}

#[tokio::test]
async fn generation_without_model_key_is_a_server_error() {
    let app = app(None);
    let (status, body) = call(
        &app,
        Method::POST,
        "/recipes/generate",
        Some("alice"),
        Some(json!({ "messages": transcript() })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("GOOGLE_GENERATIVE_AI_API_KEY"));
}

#[tokio::test]
async fn empty_generation_request_is_bad_request() {
    let app = app(Some(ScriptedModel(Ok(recipe_json("Unused")))));
    let (status, body) = call(
        &app,
        Method::POST,
        "/recipes/generate",
        Some("alice"),
        Some(json!({ "messages": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No messages provided");
}

#[tokio::test]
async fn only_the_owner_deletes_a_recipe() {
    let app = app(Some(ScriptedModel(Ok(recipe_json("Fried Rice")))));
    let (_, created) = call(
        &app,
        Method::POST,
        "/recipes/generate",
        Some("alice"),
        Some(json!({ "messages": transcript() })),
    )
    .await;
    let uri = format!("/recipes/{}", created["recipe"]["id"].as_str().unwrap());

    let (status, _) = call(&app, Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&app, Method::DELETE, &uri, Some("bob"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, Method::DELETE, &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = call(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Recipe not found");
}

#[tokio::test]
async fn session_config_reports_missing_settings() {
    let app = app(None);
    let (status, body) = call(&app, Method::GET, "/anam/config", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required environment variables");
}

#[tokio::test]
async fn malformed_ids_are_json_not_found() {
    let app = app(None);

    let (status, body) = call(&app, Method::GET, "/recipes/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Recipe not found");

    let (status, body) = call(&app, Method::DELETE, "/recipes/not-a-uuid", Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Recipe not found");

    let (status, body) = call(&app, Method::GET, "/conversations/not-a-uuid", Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Conversation not found");

    let (status, body) = call(
        &app,
        Method::POST,
        "/conversations/not-a-uuid/messages",
        Some("alice"),
        Some(json!({ "role": "user", "content": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Conversation not found");
}
