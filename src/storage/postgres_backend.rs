//! PostgreSQL storage backend.
//!
//! Tables:
//! - `users` - chat participants, including the persisted `last_seen`
//! - `messages` - direct messages with image/video URL arrays
//!
//! The schema is created on startup if missing (see [`PostgresStorage::ensure_schema`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::backend::{MessageRecord, MessageStore, NewMessage, NewUser, StorageError, User, UserStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY,
    full_name   TEXT NOT NULL,
    email       TEXT NOT NULL UNIQUE,
    profile_pic TEXT,
    last_seen   TIMESTAMPTZ,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS messages (
    id                UUID PRIMARY KEY,
    sender_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    receiver_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    text              TEXT,
    images            TEXT[] NOT NULL DEFAULT '{}',
    videos            TEXT[] NOT NULL DEFAULT '{}',
    client_message_id TEXT,
    created_at        TIMESTAMPTZ NOT NULL,
    updated_at        TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS messages_sender_client_id
    ON messages (sender_id, client_message_id)
    WHERE client_message_id IS NOT NULL;

CREATE INDEX IF NOT EXISTS messages_conversation
    ON messages (sender_id, receiver_id, created_at);
"#;

const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, text, images, videos, client_message_id, created_at, updated_at";

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::debug!("Storage schema verified");
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        profile_pic: row.try_get("profile_pic")?,
        last_seen: row.try_get("last_seen")?,
        created_at: row.try_get("created_at")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<MessageRecord, sqlx::Error> {
    Ok(MessageRecord {
        id: row.try_get("id")?,
        sender_id: row.try_get("sender_id")?,
        receiver_id: row.try_get("receiver_id")?,
        text: row.try_get("text")?,
        images: row.try_get("images")?,
        videos: row.try_get("videos")?,
        client_message_id: row.try_get("client_message_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl UserStore for PostgresStorage {
    async fn create_user(&self, user: NewUser) -> Result<User, StorageError> {
        let id = user.id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let row = sqlx::query(
            r#"
            INSERT INTO users (id, full_name, email, profile_pic, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, full_name, email, profile_pic, last_seen, created_at
            "#,
        )
        .bind(&id)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.profile_pic)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::DuplicateUser(user.email.clone())
            } else {
                StorageError::Postgres(e)
            }
        })?;

        Ok(user_from_row(&row)?)
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        let row = sqlx::query(
            "SELECT id, full_name, email, profile_pic, last_seen, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn list_users_except(&self, user_id: &str) -> Result<Vec<User>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, full_name, email, profile_pic, last_seen, created_at
            FROM users WHERE id <> $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(user_from_row).collect::<Result<_, _>>()?)
    }

    async fn update_user_last_seen(
        &self,
        user_id: &str,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE users SET last_seen = $2 WHERE id = $1")
            .bind(user_id)
            .bind(last_seen)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PostgresStorage {
    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, StorageError> {
        let sender_id = message.sender_id.clone();
        let client_message_id = message.client_message_id.clone();
        let record = message.into_record();

        let query = format!(
            r#"
            INSERT INTO messages ({MESSAGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {MESSAGE_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(record.id)
            .bind(&record.sender_id)
            .bind(&record.receiver_id)
            .bind(&record.text)
            .bind(&record.images)
            .bind(&record.videos)
            .bind(&record.client_message_id)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match client_message_id {
                Some(client_message_id) if is_unique_violation(&e) => {
                    StorageError::DuplicateMessage {
                        sender_id,
                        client_message_id,
                    }
                }
                _ => StorageError::Postgres(e),
            })?;

        Ok(message_from_row(&row)?)
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<MessageRecord>, StorageError> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(message_from_row).transpose()?)
    }

    async fn find_message_by_client_id(
        &self,
        sender_id: &str,
        client_message_id: &str,
    ) -> Result<Option<MessageRecord>, StorageError> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id = $1 AND client_message_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(sender_id)
            .bind(client_message_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(message_from_row).transpose()?)
    }

    async fn list_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let query = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE (sender_id = $1 AND receiver_id = $2)
               OR (sender_id = $2 AND receiver_id = $1)
            ORDER BY created_at ASC
            "#
        );
        let rows = sqlx::query(&query)
            .bind(user_a)
            .bind(user_b)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(message_from_row).collect::<Result<_, _>>()?)
    }

    async fn delete_message(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
