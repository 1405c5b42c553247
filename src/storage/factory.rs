//! Storage backend factory

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::postgres::PostgresPool;

use super::backend::{MessageStore, StorageError, UserStore};
use super::memory_backend::MemoryStorage;
use super::postgres_backend::PostgresStorage;

/// The two store handles the rest of the service works with.
///
/// Both usually point at the same backend object.
#[derive(Clone)]
pub struct StorageBackends {
    pub users: Arc<dyn UserStore>,
    pub messages: Arc<dyn MessageStore>,
    pub backend: &'static str,
}

impl StorageBackends {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStorage::new());
        Self {
            users: store.clone(),
            messages: store,
            backend: "memory",
        }
    }
}

/// Create storage backends based on configuration.
///
/// - `"postgres"`: uses `postgres_pool` and bootstraps the schema; falls back to
///   memory with a warning when no pool is provided
/// - `"memory"` (default): process-local storage
pub async fn create_storage(
    settings: &StorageConfig,
    postgres_pool: Option<&PostgresPool>,
) -> Result<StorageBackends, StorageError> {
    match settings.backend.as_str() {
        "postgres" => match postgres_pool {
            Some(pool) => {
                tracing::info!(
                    backend = "postgres",
                    url = %pool.database_url_masked(),
                    "Creating PostgreSQL storage backend"
                );
                let store = Arc::new(PostgresStorage::new(pool.pool().clone()));
                store.ensure_schema().await?;
                Ok(StorageBackends {
                    users: store.clone(),
                    messages: store,
                    backend: "postgres",
                })
            }
            None => {
                tracing::warn!(
                    "PostgreSQL backend requested but no pool provided, falling back to memory"
                );
                Ok(StorageBackends::memory())
            }
        },
        "memory" => {
            tracing::info!(backend = "memory", "Creating in-memory storage backend");
            Ok(StorageBackends::memory())
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown storage backend, falling back to memory"
            );
            Ok(StorageBackends::memory())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_default() {
        let config = StorageConfig::default();
        let storage = create_storage(&config, None).await.unwrap();
        assert_eq!(storage.backend, "memory");
    }

    #[tokio::test]
    async fn test_postgres_without_pool_falls_back() {
        let config = StorageConfig {
            backend: "postgres".to_string(),
            ..Default::default()
        };
        let storage = create_storage(&config, None).await.unwrap();
        assert_eq!(storage.backend, "memory");
    }

    #[tokio::test]
    async fn test_unknown_backend_falls_back() {
        let config = StorageConfig {
            backend: "mongo".to_string(),
            ..Default::default()
        };
        let storage = create_storage(&config, None).await.unwrap();
        assert_eq!(storage.backend, "memory");
    }
}
