//! Message store.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{Message, MessagePatch, NewMessage};
use super::{call, DbPool};
use crate::error::ChatError;

const MESSAGE_SELECT: &str = "SELECT m.id, m.content, m.sender_id, u.username, m.receiver_id,
        m.is_private, m.is_read, m.revoked, m.created_at
 FROM messages m
 JOIN users u ON u.id = m.sender_id";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        content: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        receiver_id: row.get(4)?,
        is_private: row.get(5)?,
        is_read: row.get(6)?,
        revoked: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn message_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("{} WHERE m.id = ?1", MESSAGE_SELECT),
        params![id],
        message_from_row,
    )
    .optional()
}

/// Which messages a history query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFilter {
    Public,
    /// Both directions of a private conversation between two users.
    Conversation { user_a: i64, user_b: i64 },
}

/// Keyset pagination: the newest `limit` messages with an id below `before`.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub before: Option<i64>,
    pub limit: u32,
}

/// Insert a message. Public messages are stored as already read.
pub async fn create_message(db: &DbPool, new: NewMessage) -> Result<Message, ChatError> {
    call(db, move |conn| {
        let is_private = new.receiver_id.is_some();
        conn.execute(
            "INSERT INTO messages (content, sender_id, receiver_id, is_private, is_read, revoked, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                new.content,
                new.sender_id,
                new.receiver_id,
                is_private,
                !is_private,
                new.created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        message_by_id(conn, id)?.ok_or(ChatError::NotFound("message"))
    })
    .await
}

pub async fn find_message(db: &DbPool, id: i64) -> Result<Option<Message>, ChatError> {
    call(db, move |conn| Ok(message_by_id(conn, id)?)).await
}

/// Apply a patch and return the updated row.
pub async fn update_message(db: &DbPool, id: i64, patch: MessagePatch) -> Result<Message, ChatError> {
    call(db, move |conn| {
        let tx = conn.transaction()?;
        if let Some(content) = &patch.content {
            tx.execute(
                "UPDATE messages SET content = ?1 WHERE id = ?2",
                params![content, id],
            )?;
        }
        if let Some(is_read) = patch.is_read {
            tx.execute(
                "UPDATE messages SET is_read = ?1 WHERE id = ?2",
                params![is_read, id],
            )?;
        }
        if let Some(revoked) = patch.revoked {
            tx.execute(
                "UPDATE messages SET revoked = ?1 WHERE id = ?2",
                params![revoked, id],
            )?;
        }
        let updated = message_by_id(&tx, id)?.ok_or(ChatError::NotFound("message"))?;
        tx.commit()?;
        Ok(updated)
    })
    .await
}

/// Hard delete. Returns whether a row was removed.
pub async fn delete_message(db: &DbPool, id: i64) -> Result<bool, ChatError> {
    call(db, move |conn| {
        let removed = conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    })
    .await
}

/// History in ascending creation order.
pub async fn list_messages(
    db: &DbPool,
    filter: MessageFilter,
    page: Page,
) -> Result<Vec<Message>, ChatError> {
    call(db, move |conn| {
        let before = page.before.unwrap_or(i64::MAX);
        let limit = i64::from(page.limit);
        let mut messages = match filter {
            MessageFilter::Public => {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE m.is_private = 0 AND m.id < ?1 ORDER BY m.id DESC LIMIT ?2",
                    MESSAGE_SELECT
                ))?;
                let rows = stmt
                    .query_map(params![before, limit], message_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            MessageFilter::Conversation { user_a, user_b } => {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE m.is_private = 1
                       AND ((m.sender_id = ?1 AND m.receiver_id = ?2)
                         OR (m.sender_id = ?2 AND m.receiver_id = ?1))
                       AND m.id < ?3
                     ORDER BY m.id DESC LIMIT ?4",
                    MESSAGE_SELECT
                ))?;
                let rows = stmt
                    .query_map(params![user_a, user_b, before, limit], message_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        messages.reverse();
        Ok(messages)
    })
    .await
}

/// Delete every message matched by the filter. Returns the number removed.
pub async fn clear_messages(db: &DbPool, filter: MessageFilter) -> Result<usize, ChatError> {
    call(db, move |conn| {
        let removed = match filter {
            MessageFilter::Public => {
                conn.execute("DELETE FROM messages WHERE is_private = 0", [])?
            }
            MessageFilter::Conversation { user_a, user_b } => conn.execute(
                "DELETE FROM messages WHERE is_private = 1
                   AND ((sender_id = ?1 AND receiver_id = ?2)
                     OR (sender_id = ?2 AND receiver_id = ?1))",
                params![user_a, user_b],
            )?,
        };
        Ok(removed)
    })
    .await
}
