use std::sync::Arc;

use tracing::error;

use cheffy_db::Database;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::generation::{GeminiModel, TextModel};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub config: ApiConfig,
    pub http: reqwest::Client,
    /// Absent when the model API key is not configured.
    pub model: Option<Arc<dyn TextModel>>,
}

impl AppStateInner {
    pub fn new(db: Database, config: ApiConfig) -> Self {
        let http = reqwest::Client::new();
        let model = config
            .gemini
            .clone()
            .map(|gemini| Arc::new(GeminiModel::new(gemini, http.clone())) as Arc<dyn TextModel>);
        Self {
            db,
            config,
            http,
            model,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn TextModel>) -> Self {
        self.model = Some(model);
        self
    }
}

/// Run a blocking DB closure off the async runtime.
pub async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal("Internal server error".into())
        })?
        .map_err(|e| {
            error!("DB error: {:#}", e);
            ApiError::Internal("Database error".into())
        })
}
