use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::{info, warn};
use uuid::Uuid;

use cheffy_db::models::NewMessageRow;
use cheffy_types::api::{
    Claims, ConversationListResponse, ConversationResponse, MessageInput, MessageResponse,
    SaveConversationRequest, UpdateConversationRequest,
};

use crate::error::{ApiError, parse_record_id};
use crate::rows::{conversation_from_rows, message_from_row, summary_from_row};
use crate::state::{AppState, run_db};

fn new_message_row(input: &MessageInput) -> NewMessageRow {
    NewMessageRow {
        id: Uuid::new_v4().to_string(),
        role: input.role.as_str().to_string(),
        content: input.content.clone(),
    }
}

/// Load a conversation and check that `user_id` owns it.
/// Absent → 404, owned by someone else → 403.
async fn owned_conversation(
    state: &AppState,
    conversation_id: Uuid,
    user_id: &str,
) -> Result<cheffy_types::models::Conversation, ApiError> {
    let cid = conversation_id.to_string();
    let (row, messages) = run_db(state, move |db| db.get_conversation(&cid))
        .await?
        .ok_or(ApiError::NotFound("Conversation"))?;

    if row.user_id != user_id {
        warn!(
            "User {} tried to access conversation {} owned by {}",
            user_id, conversation_id, row.user_id
        );
        return Err(ApiError::Forbidden);
    }

    Ok(conversation_from_rows(row, messages))
}

/// POST /conversations: persist a transcript as a new conversation.
pub async fn save_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<SaveConversationRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    if req.messages.is_empty() {
        return Err(ApiError::Validation("Invalid messages format".into()));
    }

    info!(
        "Saving conversation for {} ({} messages)",
        claims.sub,
        req.messages.len()
    );

    let conversation_id = Uuid::new_v4().to_string();
    let rows: Vec<NewMessageRow> = req.messages.iter().map(new_message_row).collect();
    let user_id = claims.sub.clone();
    let title = req.title.clone();

    let (row, messages) = run_db(&state, move |db| {
        db.create_conversation(&conversation_id, &user_id, title.as_deref(), &rows)?;
        db.get_conversation(&conversation_id)?
            .ok_or_else(|| anyhow::anyhow!("Conversation {} vanished after insert", conversation_id))
    })
    .await?;

    let conversation = conversation_from_rows(row, messages);
    info!("Conversation {} saved", conversation.id);

    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse {
            success: true,
            conversation,
        }),
    ))
}

/// GET /conversations: the caller's conversations, most recent first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub.clone();
    let rows = run_db(&state, move |db| db.list_conversations(&user_id)).await?;

    Ok(Json(ConversationListResponse {
        success: true,
        conversations: rows.into_iter().map(summary_from_row).collect(),
    }))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = parse_record_id(&conversation_id, "Conversation")?;
    let conversation = owned_conversation(&state, conversation_id, &claims.sub).await?;

    Ok(Json(ConversationResponse {
        success: true,
        conversation,
    }))
}

/// PATCH /conversations/{id}: rename.
pub async fn update_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateConversationRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = parse_record_id(&conversation_id, "Conversation")?;
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::Validation("Title must not be empty".into()));
    }

    owned_conversation(&state, conversation_id, &claims.sub).await?;

    let cid = conversation_id.to_string();
    let (row, messages) = run_db(&state, move |db| {
        db.update_conversation_title(&cid, &title)?;
        db.get_conversation(&cid)
    })
    .await?
    .ok_or(ApiError::NotFound("Conversation"))?;

    Ok(Json(ConversationResponse {
        success: true,
        conversation: conversation_from_rows(row, messages),
    }))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = parse_record_id(&conversation_id, "Conversation")?;
    owned_conversation(&state, conversation_id, &claims.sub).await?;

    let cid = conversation_id.to_string();
    if !run_db(&state, move |db| db.delete_conversation(&cid)).await? {
        return Err(ApiError::NotFound("Conversation"));
    }

    info!("Conversation {} deleted by {}", conversation_id, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /conversations/{id}/messages: append one message at the end.
pub async fn append_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<MessageInput>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = parse_record_id(&conversation_id, "Conversation")?;
    owned_conversation(&state, conversation_id, &claims.sub).await?;

    let cid = conversation_id.to_string();
    let row = new_message_row(&req);
    let message = run_db(&state, move |db| db.append_message(&cid, &row)).await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            success: true,
            message: message_from_row(message),
        }),
    ))
}
