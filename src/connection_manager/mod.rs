//! Live connection bookkeeping: the open channel set and the user registry.

mod channels;
mod registry;
mod types;

pub use channels::OpenChannels;
pub use registry::ConnectionRegistry;
pub use types::{ConnectionHandle, ConnectionStats};
