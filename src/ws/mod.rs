//! WebSocket relay core
//!
//! - `protocol` — the JSON wire events
//! - `registry` — identity → live connection map (who is online)
//! - `relay` — per-connection protocol state machine
//! - `handler` — socket plumbing between axum and the state machine

mod handler;
mod protocol;
mod registry;
mod relay;

pub use handler::handle_socket;
pub use protocol::{ClientEvent, ServerEvent};
pub use registry::{ConnectionRegistry, RegisteredPeer};
pub use relay::RelaySession;
