//! Identity store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::User;
use super::{call, DbPool};
use crate::error::ChatError;

const USER_COLUMNS: &str = "id, username, status, connection_handle, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        status: row.get(2)?,
        connection_handle: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn user_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![id],
        user_from_row,
    )
    .optional()
}

pub(crate) fn user_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
        params![username],
        user_from_row,
    )
    .optional()
}

/// Insert a user. Account registration lives outside this server; this is
/// used by seeding and tests.
pub async fn create_user(db: &DbPool, username: &str) -> Result<User, ChatError> {
    let username = username.trim().to_string();
    if username.is_empty() {
        return Err(ChatError::Validation("username must not be empty".into()));
    }
    call(db, move |conn| {
        if user_by_username(conn, &username)?.is_some() {
            return Err(ChatError::Conflict(format!("username {} is taken", username)));
        }
        conn.execute(
            "INSERT INTO users (username, status, created_at) VALUES (?1, 'offline', ?2)",
            params![username, Utc::now()],
        )?;
        let id = conn.last_insert_rowid();
        user_by_id(conn, id)?.ok_or(ChatError::NotFound("user"))
    })
    .await
}

pub async fn find_user_by_id(db: &DbPool, id: i64) -> Result<Option<User>, ChatError> {
    call(db, move |conn| Ok(user_by_id(conn, id)?)).await
}

pub async fn find_user_by_username(db: &DbPool, username: &str) -> Result<Option<User>, ChatError> {
    let username = username.to_string();
    call(db, move |conn| Ok(user_by_username(conn, &username)?)).await
}

/// All users ordered by username.
pub async fn list_users(db: &DbPool) -> Result<Vec<User>, ChatError> {
    call(db, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY username ASC",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    })
    .await
}

pub async fn update_status(db: &DbPool, id: i64, status: &str) -> Result<(), ChatError> {
    let status = status.to_string();
    call(db, move |conn| {
        let changed = conn.execute(
            "UPDATE users SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        if changed == 0 {
            return Err(ChatError::NotFound("user"));
        }
        Ok(())
    })
    .await
}

/// Record the most recent live connection for a user, or clear it.
pub async fn update_connection_handle(
    db: &DbPool,
    id: i64,
    handle: Option<String>,
) -> Result<(), ChatError> {
    call(db, move |conn| {
        conn.execute(
            "UPDATE users SET connection_handle = ?1 WHERE id = ?2",
            params![handle, id],
        )?;
        Ok(())
    })
    .await
}
