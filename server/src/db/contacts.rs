//! Contact and friend-request store.
//!
//! Every check-then-create sequence runs inside a single `call` closure and
//! a transaction, so concurrent submissions cannot produce duplicate contact
//! rows or two pending requests for the same pair.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{ContactRow, FriendRequest, FriendRequestStatus};
use super::{call, DbPool};
use crate::error::ChatError;

const REQUEST_SELECT: &str = "SELECT r.id, r.from_id, f.username, r.to_id, t.username, r.status, r.created_at
 FROM friend_requests r
 JOIN users f ON f.id = r.from_id
 JOIN users t ON t.id = r.to_id";

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<FriendRequest> {
    let status: String = row.get(5)?;
    let status = FriendRequestStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown friend request status {}", status).into(),
        )
    })?;
    Ok(FriendRequest {
        id: row.get(0)?,
        from_id: row.get(1)?,
        from_username: row.get(2)?,
        to_id: row.get(3)?,
        to_username: row.get(4)?,
        status,
        created_at: row.get(6)?,
    })
}

fn request_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<FriendRequest>> {
    conn.query_row(
        &format!("{} WHERE r.id = ?1", REQUEST_SELECT),
        params![id],
        request_from_row,
    )
    .optional()
}

fn pending_between(conn: &Connection, a: i64, b: i64) -> rusqlite::Result<Option<FriendRequest>> {
    conn.query_row(
        &format!(
            "{} WHERE r.status = 'pending'
               AND ((r.from_id = ?1 AND r.to_id = ?2) OR (r.from_id = ?2 AND r.to_id = ?1))",
            REQUEST_SELECT
        ),
        params![a, b],
        request_from_row,
    )
    .optional()
}

fn related(conn: &Connection, a: i64, b: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM contacts
         WHERE (user_id = ?1 AND contact_id = ?2) OR (user_id = ?2 AND contact_id = ?1)",
        params![a, b],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

fn insert_pair(conn: &Connection, a: i64, b: i64) -> rusqlite::Result<()> {
    let now = Utc::now();
    conn.execute(
        "INSERT OR IGNORE INTO contacts (user_id, contact_id, created_at) VALUES (?1, ?2, ?3)",
        params![a, b, now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO contacts (user_id, contact_id, created_at) VALUES (?1, ?2, ?3)",
        params![b, a, now],
    )?;
    Ok(())
}

pub async fn contact_exists(db: &DbPool, a: i64, b: i64) -> Result<bool, ChatError> {
    call(db, move |conn| Ok(related(conn, a, b)?)).await
}

/// Create both directions of a contact relation.
/// Fails with `Conflict` if the pair is already related in either direction.
pub async fn create_contact_pair(db: &DbPool, a: i64, b: i64) -> Result<(), ChatError> {
    if a == b {
        return Err(ChatError::Validation("cannot add yourself as a contact".into()));
    }
    call(db, move |conn| {
        let tx = conn.transaction()?;
        if related(&tx, a, b)? {
            return Err(ChatError::Conflict("already a contact".into()));
        }
        insert_pair(&tx, a, b)?;
        tx.commit()?;
        Ok(())
    })
    .await
}

/// Outgoing contact rows of a user, newest first.
pub async fn find_contacts_for_user(db: &DbPool, user_id: i64) -> Result<Vec<ContactRow>, ChatError> {
    call(db, move |conn| {
        let mut stmt = conn.prepare(
            "SELECT c.id, c.user_id, c.contact_id, u.username, c.created_at
             FROM contacts c
             JOIN users u ON u.id = c.contact_id
             WHERE c.user_id = ?1
             ORDER BY c.id DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(ContactRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    contact_id: row.get(2)?,
                    contact_username: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
    .await
}

/// Create a pending request from `from_id` to `to_id`.
/// Fails with `Conflict` if the users are already contacts or a pending
/// request exists in either direction.
pub async fn create_friend_request(
    db: &DbPool,
    from_id: i64,
    to_id: i64,
) -> Result<FriendRequest, ChatError> {
    if from_id == to_id {
        return Err(ChatError::Validation("cannot send a friend request to yourself".into()));
    }
    call(db, move |conn| {
        let tx = conn.transaction()?;
        if related(&tx, from_id, to_id)? {
            return Err(ChatError::Conflict("already a contact".into()));
        }
        if pending_between(&tx, from_id, to_id)?.is_some() {
            return Err(ChatError::Conflict("a friend request is already pending".into()));
        }
        tx.execute(
            "INSERT INTO friend_requests (from_id, to_id, status, created_at) VALUES (?1, ?2, 'pending', ?3)",
            params![from_id, to_id, Utc::now()],
        )?;
        let id = tx.last_insert_rowid();
        let request = request_by_id(&tx, id)?.ok_or(ChatError::NotFound("friend request"))?;
        tx.commit()?;
        Ok(request)
    })
    .await
}

pub async fn find_friend_request(db: &DbPool, id: i64) -> Result<Option<FriendRequest>, ChatError> {
    call(db, move |conn| Ok(request_by_id(conn, id)?)).await
}

pub async fn find_pending_request(
    db: &DbPool,
    a: i64,
    b: i64,
) -> Result<Option<FriendRequest>, ChatError> {
    call(db, move |conn| Ok(pending_between(conn, a, b)?)).await
}

/// Pending requests addressed to a user, newest first.
pub async fn list_incoming_requests(db: &DbPool, to_id: i64) -> Result<Vec<FriendRequest>, ChatError> {
    call(db, move |conn| {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE r.to_id = ?1 AND r.status = 'pending' ORDER BY r.id DESC",
            REQUEST_SELECT
        ))?;
        let rows = stmt
            .query_map(params![to_id], request_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
    .await
}

/// Move a pending request to a terminal status. Accepting also creates the
/// contact pair in the same transaction. A request that is no longer pending
/// fails with `Conflict`.
pub async fn update_friend_request_status(
    db: &DbPool,
    id: i64,
    status: FriendRequestStatus,
) -> Result<FriendRequest, ChatError> {
    if !status.is_terminal() {
        return Err(ChatError::Validation("a request can only be accepted or rejected".into()));
    }
    call(db, move |conn| {
        let tx = conn.transaction()?;
        let request = request_by_id(&tx, id)?.ok_or(ChatError::NotFound("friend request"))?;
        if request.status.is_terminal() {
            return Err(ChatError::Conflict(format!(
                "friend request already {}",
                request.status.as_str()
            )));
        }
        tx.execute(
            "UPDATE friend_requests SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if status == FriendRequestStatus::Accepted {
            insert_pair(&tx, request.from_id, request.to_id)?;
        }
        let updated = request_by_id(&tx, id)?.ok_or(ChatError::NotFound("friend request"))?;
        tx.commit()?;
        Ok(updated)
    })
    .await
}
