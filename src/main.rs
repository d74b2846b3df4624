use std::sync::Arc;

use axum::{
    http::{header, Method},
    Router,
};
use shima::{
    config::relay::RelayConfig,
    modules,
    services::llm::{GeminiClient, Generator},
    AppState,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shima=debug,tower_http=info".into()),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env();

    let generator: Option<Arc<dyn Generator>> = match GeminiClient::new(&config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "GOOGLE_API_KEY not set, chat requests will fail with 500");
            None
        }
    };

    tracing::info!(
        model = %config.default_model,
        temperature = config.temperature,
        max_tokens = config.max_tokens,
        "relay configured"
    );

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let bind_addr = config.bind_addr.clone();
    let state = AppState {
        config: Arc::new(config),
        generator,
    };

    let app = Router::new()
        .merge(modules::chat::routes::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("SHIMA relay listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
