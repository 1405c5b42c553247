//! User and message persistence.
//!
//! Backends:
//! - `memory`: process-local, for development and tests
//! - `postgres`: durable storage via sqlx
//!
//! Use [`create_storage`] to build the configured backend.

mod backend;
mod factory;
mod memory_backend;
mod postgres_backend;

pub use backend::{MessageRecord, MessageStore, NewMessage, NewUser, StorageError, User, UserStore};
pub use factory::{create_storage, StorageBackends};
pub use memory_backend::MemoryStorage;
pub use postgres_backend::PostgresStorage;
