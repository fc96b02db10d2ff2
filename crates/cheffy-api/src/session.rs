use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use cheffy_types::api::SessionConfigResponse;

use crate::error::ApiError;
use crate::state::AppState;

pub const DEFAULT_ANAM_BASE_URL: &str = "https://api.anam.ai";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionTokenResponse {
    session_token: String,
}

/// Ask Anam for a short-lived session token. Audio passthrough is enabled so
/// the avatar lip-syncs to the voice agent's audio instead of its own voice.
pub async fn create_session_token(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    avatar_id: &str,
) -> anyhow::Result<String> {
    let url = format!("{}/v1/auth/session-token", base_url.trim_end_matches('/'));
    let response = http
        .post(&url)
        .bearer_auth(api_key)
        .json(&json!({
            "personaConfig": {
                "avatarId": avatar_id,
                "enableAudioPassthrough": true,
            }
        }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Anam API returned {}: {}", status, body);
    }

    let parsed: SessionTokenResponse = response.json().await?;
    Ok(parsed.session_token)
}

/// GET /anam/config: session token for the avatar plus the voice agent id.
pub async fn session_config(
    State(state): State<AppState>,
) -> Result<Json<SessionConfigResponse>, ApiError> {
    let settings = &state.config.session;
    let (Some(api_key), Some(avatar_id), Some(agent_id)) = (
        settings.anam_api_key.as_deref(),
        settings.anam_avatar_id.as_deref(),
        settings.elevenlabs_agent_id.as_deref(),
    ) else {
        error!("Session config requested but ANAM_API_KEY, ANAM_AVATAR_ID or ELEVENLABS_AGENT_ID is unset");
        return Err(ApiError::ConfigMissing(
            "Missing required environment variables".into(),
        ));
    };

    let token = create_session_token(&state.http, &settings.anam_base_url, api_key, avatar_id)
        .await
        .map_err(|e| {
            error!("Anam session token error: {:#}", e);
            ApiError::Upstream("Failed to create Anam session token".into())
        })?;

    info!("Issued avatar session token for avatar {}", avatar_id);
    Ok(Json(SessionConfigResponse {
        anam_session_token: token,
        eleven_labs_agent_id: agent_id.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn requests_passthrough_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/session-token"))
            .and(header("authorization", "Bearer anam-key"))
            .and(body_partial_json(json!({
                "personaConfig": { "avatarId": "avatar-1", "enableAudioPassthrough": true }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sessionToken": "tok-123" })))
            .expect(1)
            .mount(&server)
            .await;

        let token = create_session_token(&reqwest::Client::new(), &server.uri(), "anam-key", "avatar-1")
            .await
            .unwrap();
        assert_eq!(token, "tok-123");
    }

    #[tokio::test]
    async fn upstream_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = create_session_token(&reqwest::Client::new(), &server.uri(), "k", "a")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
