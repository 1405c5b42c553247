mod handler;
mod message;

pub use handler::{resolve_identity, ws_handler, WsQuery};
pub use message::{ClientMessage, OutboundMessage, ServerMessage};
