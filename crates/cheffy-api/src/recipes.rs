use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::{error, info, warn};
use uuid::Uuid;

use cheffy_types::api::{Claims, GenerateRecipeRequest, RecipeListResponse, RecipeResponse};

use crate::config::GEMINI_API_KEY_VAR;
use crate::error::{ApiError, parse_record_id};
use crate::generation::{GenerationError, draft_recipe};
use crate::rows::recipe_from_row;
use crate::state::{AppState, run_db};

/// POST /recipes/generate: turn a transcript into a persisted recipe.
pub async fn generate_recipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<GenerateRecipeRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(model) = state.model.clone() else {
        error!("Recipe generation requested but {} is not set", GEMINI_API_KEY_VAR);
        return Err(GenerationError::MissingConfiguration(GEMINI_API_KEY_VAR.into()).into());
    };

    info!(
        user = %claims.sub,
        messages = req.messages.len(),
        title = req.conversation_title.as_deref().unwrap_or(""),
        "Generating recipe"
    );

    let draft = draft_recipe(model.as_ref(), &req.messages)
        .await
        .inspect_err(|e| {
            warn!(user = %claims.sub, status = %e.status(), retryable = e.is_retryable(), "Recipe generation failed: {}", e);
        })?;

    let recipe_id = Uuid::new_v4().to_string();
    let user_id = claims.sub.clone();
    let row = run_db(&state, move |db| {
        db.insert_recipe(&recipe_id, &user_id, &draft)?;
        db.get_recipe(&recipe_id)?
            .ok_or_else(|| anyhow::anyhow!("Recipe {} vanished after insert", recipe_id))
    })
    .await?;

    let recipe = recipe_from_row(row);
    info!("Recipe {} saved for {}", recipe.id, recipe.user_id);

    Ok((
        StatusCode::CREATED,
        Json(RecipeResponse {
            success: true,
            recipe,
        }),
    ))
}

/// GET /recipes: the gallery, newest first.
pub async fn list_recipes(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rows = run_db(&state, |db| db.list_recipes()).await?;

    Ok(Json(RecipeListResponse {
        success: true,
        recipes: rows.into_iter().map(recipe_from_row).collect(),
    }))
}

/// GET /recipes/mine: the caller's recipes, newest first.
pub async fn list_my_recipes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub.clone();
    let rows = run_db(&state, move |db| db.list_recipes_by_user(&user_id)).await?;

    Ok(Json(RecipeListResponse {
        success: true,
        recipes: rows.into_iter().map(recipe_from_row).collect(),
    }))
}

pub async fn get_recipe(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let recipe_id = parse_record_id(&recipe_id, "Recipe")?;
    let rid = recipe_id.to_string();
    let row = run_db(&state, move |db| db.get_recipe(&rid))
        .await?
        .ok_or(ApiError::NotFound("Recipe"))?;

    Ok(Json(RecipeResponse {
        success: true,
        recipe: recipe_from_row(row),
    }))
}

pub async fn delete_recipe(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let recipe_id = parse_record_id(&recipe_id, "Recipe")?;
    let rid = recipe_id.to_string();
    let row = run_db(&state, move |db| db.get_recipe(&rid))
        .await?
        .ok_or(ApiError::NotFound("Recipe"))?;

    if row.user_id != claims.sub {
        warn!("User {} tried to delete recipe {} owned by {}", claims.sub, recipe_id, row.user_id);
        return Err(ApiError::Forbidden);
    }

    let rid = recipe_id.to_string();
    run_db(&state, move |db| db.delete_recipe(&rid)).await?;

    info!("Recipe {} deleted by {}", recipe_id, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}
