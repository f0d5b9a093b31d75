use axum::{
    extract::{Query, State},
    http::StatusCode,
};
use tracing::{info, instrument, warn};

use super::types::PublishQuery;
use crate::room::is_valid_room_name;
use crate::shared::{AppError, AppState};

/// HTTP handler for publishing a message to a room
///
/// GET /api/message?room=<room>&message=<text>
/// Hands the message to the broker; delivery to clients is best-effort
#[instrument(name = "publish_message", skip(state, query))]
pub async fn publish_message(
    State(state): State<AppState>,
    Query(query): Query<PublishQuery>,
) -> Result<StatusCode, AppError> {
    if !is_valid_room_name(&query.room) {
        warn!(room = %query.room, "Rejecting publish to invalid room name");
        return Err(AppError::BadRequest(format!(
            "Invalid room name: '{}'",
            query.room
        )));
    }

    state.broker.publish(&query.room, &query.message).await?;

    info!(
        room = %query.room,
        bytes = query.message.len(),
        broker = state.broker.name(),
        "Message published"
    );

    Ok(StatusCode::OK)
}
