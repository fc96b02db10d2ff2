use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use cheffy_api::config::{ApiConfig, GEMINI_API_KEY_VAR};
use cheffy_api::routes::router;
use cheffy_api::state::AppStateInner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cheffy=debug,cheffy_api=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let config = ApiConfig::from_env()?;
    let db_path = std::env::var("CHEFFY_DB_PATH").unwrap_or_else(|_| "cheffy.db".into());
    let host = std::env::var("CHEFFY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CHEFFY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    if config.gemini.is_none() {
        warn!("{} is not set; recipe generation will fail", GEMINI_API_KEY_VAR);
    }

    // Init database
    let db = cheffy_db::Database::open(&PathBuf::from(&db_path))?;
    info!("Database ready at {}", db_path);

    let state = Arc::new(AppStateInner::new(db, config));

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Cheffy server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
