use axum::{extract::State, Json};
use tracing::{info, instrument};

use super::types::RoomResponse;
use crate::shared::AppState;

/// HTTP handler for listing active rooms
///
/// GET /rooms
/// Returns every room with a live subscription or pending start, sorted by name
#[instrument(name = "list_rooms", skip(state))]
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomResponse>> {
    let mut rooms = Vec::new();

    for status in state.room_lifecycle.active_rooms() {
        let connections = state
            .connection_registry
            .connection_count(&status.room)
            .await;
        rooms.push(RoomResponse {
            room: status.room,
            connections,
            ref_count: status.ref_count,
            subscribed: status.subscribed,
            active_since: status.active_since,
        });
    }
    rooms.sort_by(|a, b| a.room.cmp(&b.room));

    info!(room_count = rooms.len(), "Rooms listed");

    Json(rooms)
}
