// Public API - what other modules can use
pub use handlers::list_rooms;
pub use lifecycle::{LifecycleError, RoomLifecycle, RoomLifecycleManager, RoomStatus};
pub use name::is_valid_room_name;

// Internal modules
mod forwarder;
mod handlers;
mod lifecycle;
mod name;
mod types;
