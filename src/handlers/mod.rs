pub mod health;
pub mod messages;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_ready_handler};
pub use messages::get_conversation;
pub use websocket::websocket_handler;
