//! Presence events and their fan-out to connected clients.

mod broadcaster;
mod event;

pub use broadcaster::{BroadcastReport, PresenceBroadcaster};
pub use event::PresenceEvent;
