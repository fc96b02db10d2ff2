use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{conversations, recipes, session};

async fn health() -> &'static str {
    "ok"
}

/// All HTTP routes. The recipe gallery and session config are public;
/// everything touching a user's data sits behind [`require_auth`].
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/anam/config", get(session::session_config))
        .route("/recipes", get(recipes::list_recipes))
        .route("/recipes/{recipe_id}", get(recipes::get_recipe));

    let protected_routes = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::save_conversation),
        )
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation)
                .patch(conversations::update_conversation)
                .delete(conversations::delete_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            post(conversations::append_message),
        )
        .route("/recipes/generate", post(recipes::generate_recipe))
        .route("/recipes/mine", get(recipes::list_my_recipes))
        .route("/recipes/{recipe_id}", delete(recipes::delete_recipe))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
