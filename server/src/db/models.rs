/// Database row types for all tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User record in the users table
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Last persisted presence value. A cache; the connection registry wins.
    pub status: String,
    pub connection_handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Chat message, public or one-to-one.
/// `receiver_id` is `Some` exactly when `is_private` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub content: String,
    pub sender_id: i64,
    pub sender_username: String,
    pub receiver_id: Option<i64>,
    pub is_private: bool,
    pub is_read: bool,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields required to insert a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub sender_id: i64,
    pub receiver_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied by `update_message`. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub is_read: Option<bool>,
    pub revoked: Option<bool>,
}

/// One direction of a contact relation.
#[derive(Debug, Clone)]
pub struct ContactRow {
    pub id: i64,
    pub user_id: i64,
    pub contact_id: i64,
    pub contact_username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequest {
    pub id: i64,
    pub from_id: i64,
    pub from_username: String,
    pub to_id: i64,
    pub to_username: String,
    pub status: FriendRequestStatus,
    pub created_at: DateTime<Utc>,
}
