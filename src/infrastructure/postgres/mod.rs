//! PostgreSQL connection pooling for the storage backend.

pub mod pool;

pub use pool::{PostgresPool, PostgresPoolError};
