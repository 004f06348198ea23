//! Repository for the append-only message log and its read marks.

use crate::types::ChatResult;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use studycircle_database::Message;
use tracing::info;

pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message. Content validation happens in the service layer;
    /// here the row is simply written. The returned message carries an
    /// empty `read_by` set.
    pub async fn append(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: &str,
    ) -> ChatResult<Message> {
        let public_id = cuid2::create_id();
        let now = chrono::Utc::now().to_rfc3339();

        let sender_row = sqlx::query("SELECT public_id FROM users WHERE id = ?")
            .bind(sender_id)
            .fetch_one(&self.pool)
            .await?;
        let sender_public_id: String = sender_row.try_get("public_id")?;

        let result = sqlx::query(
            "INSERT INTO messages (public_id, conversation_id, sender_id, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&public_id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let message_id = result.last_insert_rowid();

        info!(
            message = %public_id,
            conversation_id,
            sender_id,
            "appended message"
        );

        Ok(Message {
            id: message_id,
            public_id,
            conversation_id,
            sender_id,
            sender_public_id,
            content: content.to_string(),
            created_at: now,
            read_by: Vec::new(),
        })
    }

    /// Messages after the given rowid, ascending. Rowid keyset pagination
    /// stays stable under concurrent appends: new rows only ever land
    /// after the cursor, so pages never skip or repeat.
    pub async fn list_after(
        &self,
        conversation_id: i64,
        after_id: i64,
        limit: i64,
    ) -> ChatResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT m.id, m.public_id, m.conversation_id, m.sender_id, u.public_id AS sender_public_id,
                    m.content, m.created_at
             FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.conversation_id = ? AND m.id > ? ORDER BY m.id ASC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .into_iter()
            .map(|row| {
                Ok(Message {
                    id: row.try_get("id")?,
                    public_id: row.try_get("public_id")?,
                    conversation_id: row.try_get("conversation_id")?,
                    sender_id: row.try_get("sender_id")?,
                    sender_public_id: row.try_get("sender_public_id")?,
                    content: row.try_get("content")?,
                    created_at: row.try_get("created_at")?,
                    read_by: Vec::new(),
                })
            })
            .collect::<ChatResult<Vec<_>>>()?;

        self.attach_read_marks(&mut messages).await?;
        Ok(messages)
    }

    /// Resolve the given public ids to rowids of messages that belong to
    /// this conversation and were not sent by the reader. Ids that resolve
    /// to nothing are dropped, not reported.
    pub async fn resolve_markable(
        &self,
        conversation_id: i64,
        reader_id: i64,
        public_ids: &[String],
    ) -> ChatResult<Vec<(i64, String)>> {
        if public_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; public_ids.len()].join(", ");
        let query = format!(
            "SELECT id, public_id FROM messages
             WHERE conversation_id = ? AND sender_id != ? AND public_id IN ({placeholders})"
        );

        let mut query_builder = sqlx::query(&query).bind(conversation_id).bind(reader_id);
        for public_id in public_ids {
            query_builder = query_builder.bind(public_id);
        }

        let rows = query_builder.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("public_id")?)))
            .collect()
    }

    /// Record read marks, ignoring pairs that already exist. Returns the
    /// number of rows actually inserted, which is what makes re-marking
    /// idempotent from the caller's point of view.
    pub async fn insert_read_marks(
        &self,
        reader_id: i64,
        message_rowids: &[i64],
        read_at: &str,
    ) -> ChatResult<u64> {
        if message_rowids.is_empty() {
            return Ok(0);
        }

        let values = vec!["(?, ?, ?)"; message_rowids.len()].join(", ");
        let query = format!(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES {values}"
        );

        let mut query_builder = sqlx::query(&query);
        for message_id in message_rowids {
            query_builder = query_builder.bind(message_id).bind(reader_id).bind(read_at);
        }

        let result = query_builder.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn attach_read_marks(&self, messages: &mut [Message]) -> ChatResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; messages.len()].join(", ");
        let query = format!(
            "SELECT mr.message_id, u.public_id FROM message_reads mr
             JOIN users u ON u.id = mr.user_id
             WHERE mr.message_id IN ({placeholders})
             ORDER BY mr.read_at ASC"
        );

        let mut query_builder = sqlx::query(&query);
        for message in messages.iter() {
            query_builder = query_builder.bind(message.id);
        }

        let rows = query_builder.fetch_all(&self.pool).await?;
        let mut by_message: HashMap<i64, Vec<String>> = HashMap::new();
        for row in rows {
            let message_id: i64 = row.try_get("message_id")?;
            let reader: String = row.try_get("public_id")?;
            by_message.entry(message_id).or_default().push(reader);
        }

        for message in messages.iter_mut() {
            if let Some(readers) = by_message.remove(&message.id) {
                message.read_by = readers;
            }
        }

        Ok(())
    }
}
