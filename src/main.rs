use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use repo_qa::api;
use repo_qa::config::Config;
use repo_qa::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    config.validate()?;
    tracing::info!("data directory: {}", config.data_dir().display());
    tracing::info!(
        "provider: {} ({}), chat={}, embed={}",
        config.provider,
        config.provider_endpoint,
        config.chat_model,
        config.embedding_model
    );

    let frontend_origin = config.frontend_origin.clone();
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config)?;

    let mut app = Router::new()
        .route("/api/agent/chat", post(api::agent::chat))
        .route("/api/agent/chat/stream", post(api::agent::chat_stream))
        .route(
            "/api/agent/conversations/{id}",
            get(api::agent::get_conversation).delete(api::agent::delete_conversation),
        )
        .route(
            "/api/ingestion/repositories",
            get(api::ingestion::list_repositories).post(api::ingestion::create_repository),
        )
        .route(
            "/api/ingestion/repositories/{id}",
            get(api::ingestion::get_repository).delete(api::ingestion::delete_repository),
        )
        .route(
            "/api/ingestion/repositories/{id}/stats",
            get(api::ingestion::repository_stats),
        )
        .with_state(state);

    if let Some(origin) = frontend_origin {
        let cors = CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("server listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
