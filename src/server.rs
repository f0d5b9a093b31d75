use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::message::publish_message;
use crate::room::list_rooms;
use crate::shared::{AppError, AppState};
use crate::websockets::websocket_handler;

/// Builds the full HTTP surface on top of the shared state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:room", get(websocket_handler))
        .route("/api/message", get(publish_message))
        .route("/rooms", get(list_rooms))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "broker": state.broker.name(),
    }))
}

async fn not_found() -> AppError {
    AppError::NotFound("No route for path".to_string())
}

/// Resolves on Ctrl-C and cancels `token` so open connections wind down
pub async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
    token.cancel();
}
