use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};
use tracing::{info, instrument, warn};

use crate::room::is_valid_room_name;
use crate::shared::{AppError, AppState};

use super::connection_registry::{ConnectionHandle, ConnectionId};
use super::socket::{Connection, SocketWrapper};

/// WebSocket endpoint for joining a room
/// GET /ws/{room}
///
/// Room names outside `[\w-]+` fall through to not-found; requests on a valid
/// room path that cannot be upgraded are rejected with 400.
#[instrument(name = "websocket_handler", skip(ws, state))]
pub async fn websocket_handler(
    ws: Option<WebSocketUpgrade>,
    Path(room): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    if !is_valid_room_name(&room) {
        return Err(AppError::NotFound("No route for path".to_string()));
    }

    let Some(ws) = ws else {
        warn!(room = %room, "Rejecting non-upgrade request on WebSocket path");
        return Err(AppError::BadRequest(
            "WebSocket upgrade required".to_string(),
        ));
    };

    info!(room = %room, "WebSocket connection requested");

    Ok(ws.on_upgrade(move |socket| serve_connection(Box::new(socket), room, state)))
}

/// Drive one upgraded connection from registration to cleanup
///
/// Registration happens before the room reference is taken, and cleanup runs
/// `remove` then `release` exactly once on every exit path of the socket loop.
pub async fn serve_connection(mut socket: Box<dyn SocketWrapper>, room: String, state: AppState) {
    let connection_id = ConnectionId::new();
    let settings = state.connection_settings;
    let (handle, outbound_receiver) = ConnectionHandle::channel(
        connection_id,
        settings.outbound_buffer,
        settings.send_timeout,
    );

    state
        .connection_registry
        .add(&room, handle.clone())
        .await;

    if let Err(e) = state.room_lifecycle.acquire(&room).await {
        warn!(
            room = %room,
            connection_id = %connection_id,
            error = %e,
            "Room unavailable - closing connection"
        );
        handle.close();
        state.connection_registry.remove(&room, connection_id).await;
        let _ = socket.close().await;
        return;
    }

    info!(
        room = %room,
        connection_id = %connection_id,
        "WebSocket connection established"
    );

    let connection = Connection::new(
        connection_id,
        room.clone(),
        socket,
        outbound_receiver,
        state.shutdown.clone(),
    );

    // Run the connection until disconnect
    match connection.run().await {
        Ok(()) => {
            info!(
                room = %room,
                connection_id = %connection_id,
                "WebSocket connection closed cleanly"
            );
        }
        Err(e) => {
            warn!(
                room = %room,
                connection_id = %connection_id,
                error = %e,
                "WebSocket connection aborted"
            );
        }
    }

    // Cleanup: unregister first so no broadcast targets a departing socket
    handle.close();
    state.connection_registry.remove(&room, connection_id).await;
    state.room_lifecycle.release(&room).await;

    info!(
        room = %room,
        connection_id = %connection_id,
        "WebSocket connection cleaned up"
    );
}
