use serde::Deserialize;

/// Query parameters for publishing a message to a room
#[derive(Debug, Deserialize)]
pub struct PublishQuery {
    pub room: String,
    pub message: String,
}
