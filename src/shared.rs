use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, BrokerError};
use crate::config::ConnectionSettings;
use crate::room::RoomLifecycle;
use crate::websockets::ConnectionRegistry;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn Broker>,
    pub connection_registry: Arc<dyn ConnectionRegistry>,
    pub room_lifecycle: Arc<dyn RoomLifecycle>,
    pub connection_settings: ConnectionSettings,
    /// Fires when the server is shutting down; open connections close on it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        broker: Arc<dyn Broker>,
        connection_registry: Arc<dyn ConnectionRegistry>,
        room_lifecycle: Arc<dyn RoomLifecycle>,
        connection_settings: ConnectionSettings,
    ) -> Self {
        Self {
            broker,
            connection_registry,
            room_lifecycle,
            connection_settings,
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Broker(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
