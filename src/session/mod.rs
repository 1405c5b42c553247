//! Per-connection lifecycle and the presence persistence it drives.

mod lifecycle;
mod persistence;

pub use lifecycle::{Session, SessionLifecycleManager, SessionState};
pub use persistence::LastSeenWriter;
