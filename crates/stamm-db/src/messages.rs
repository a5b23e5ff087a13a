//! Bot message writes and tagging subtree updates.
//!
//! The message table itself is owned by the chat layer; this repository only
//! performs the mutations the core needs: inserting bot-authored replies and
//! polls, resolving thread roots, and writing tagging state.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use sqlx::Row;

use stamm_core::{
    new_v7, ChatLine, Error, MessageKind, MessageRepository, NewBotMessage, Result, TaggingPayload,
    TaggingStatus,
};

/// PostgreSQL implementation of [`MessageRepository`].
pub struct PgMessageRepository {
    pool: Pool<Postgres>,
}

impl PgMessageRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn set_tagging_status(
        &self,
        message_id: Uuid,
        status: TaggingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE messages
             SET tagging_status = $1, tagging_error = $2, tagging_updated_at = $3
             WHERE id = $4",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::MessageNotFound(message_id));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert_bot_message(&self, message: &NewBotMessage) -> Result<Uuid> {
        let message_id = new_v7();
        let now = Utc::now();

        let (body, poll_json) = match &message.kind {
            MessageKind::Text { body } => (Some(body.as_str()), None),
            MessageKind::Poll { spec } => (None, Some(serde_json::to_value(spec)?)),
        };

        sqlx::query(
            "INSERT INTO messages
                 (id, author_key, body, poll, reply_to_id, question_message_id,
                  media_url, tagging_status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8)",
        )
        .bind(message_id)
        .bind(&message.author_key)
        .bind(body)
        .bind(&poll_json)
        .bind(message.reply_to_id)
        .bind(message.question_message_id)
        .bind(&message.media_url)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(message_id)
    }

    async fn root_ancestor(&self, message_id: Uuid) -> Result<Uuid> {
        // Walk reply_to_id links upward; the row without a parent is the root.
        let root: Option<Uuid> = sqlx::query_scalar(
            "WITH RECURSIVE thread AS (
                 SELECT id, reply_to_id FROM messages WHERE id = $1
                 UNION ALL
                 SELECT m.id, m.reply_to_id
                 FROM messages m
                 JOIN thread t ON m.id = t.reply_to_id
             )
             SELECT id FROM thread WHERE reply_to_id IS NULL",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        root.ok_or(Error::MessageNotFound(message_id))
    }

    async fn thread_history(&self, message_id: Uuid, limit: usize) -> Result<Vec<ChatLine>> {
        let rows = sqlx::query(
            "WITH RECURSIVE thread AS (
                 SELECT id, author_key, body, reply_to_id, 0 AS depth
                 FROM messages WHERE id = $1
                 UNION ALL
                 SELECT m.id, m.author_key, m.body, m.reply_to_id, t.depth + 1
                 FROM messages m
                 JOIN thread t ON m.id = t.reply_to_id
                 WHERE t.depth < $2
             )
             SELECT author_key, COALESCE(body, '') AS body
             FROM thread
             WHERE id <> $1
             ORDER BY depth DESC",
        )
        .bind(message_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| ChatLine {
                author_key: r.get("author_key"),
                body: r.get("body"),
            })
            .collect())
    }

    async fn mark_tagging_processing(&self, message_id: Uuid) -> Result<()> {
        self.set_tagging_status(message_id, TaggingStatus::Processing, None)
            .await
    }

    async fn write_tagging(&self, message_id: Uuid, payload: &TaggingPayload) -> Result<()> {
        let payload_json = serde_json::to_value(payload)?;
        let result = sqlx::query(
            "UPDATE messages
             SET tagging = $1, tagging_status = 'completed', tagging_error = NULL,
                 tagging_updated_at = $2
             WHERE id = $3",
        )
        .bind(&payload_json)
        .bind(Utc::now())
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::MessageNotFound(message_id));
        }
        Ok(())
    }

    async fn mark_tagging_failed(&self, message_id: Uuid, error: &str) -> Result<()> {
        self.set_tagging_status(message_id, TaggingStatus::Failed, Some(error))
            .await
    }
}
