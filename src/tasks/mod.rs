//! Background tasks that run for the lifetime of the server.
mod heartbeat;

pub use heartbeat::HeartbeatTask;
