use axum::{routing::get, Router};

use crate::modules::chat::controller;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/chat", get(controller::health).post(controller::stream_completion))
        .route("/api/chat", get(controller::health).post(controller::stream_completion))
        .route("/chat/models", get(controller::list_models))
}
