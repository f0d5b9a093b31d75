use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response entry for one active room
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RoomResponse {
    pub room: String,
    pub connections: usize,
    pub ref_count: usize,
    pub subscribed: bool,
    pub active_since: DateTime<Utc>,
}
