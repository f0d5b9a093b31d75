// Public API - what other modules can use
pub use handlers::publish_message;

// Internal modules
mod handlers;
mod types;
