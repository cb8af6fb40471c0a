//! Wire events exchanged over a realtime connection.
//!
//! Every frame is a JSON text frame of the form `{"event": "<name>", "data": ...}`.
//! Inbound and outbound sets are closed; an unknown event name fails to decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::presence::PresenceStatus;
use crate::db::models::{FriendRequest, Message};
use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Public,
    Private,
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// `to` names the receiver of a private message; absent means public.
    SendMessage {
        content: String,
        to: Option<String>,
    },
    DeleteMessage {
        id: i64,
    },
    RevokeMessage {
        id: i64,
    },
    MarkAsRead {
        id: i64,
    },
    SetStatus {
        status: PresenceStatus,
    },
    AddContact {
        username: String,
    },
    Typing {
        to: Option<String>,
    },
    StopTyping {
        to: Option<String>,
    },
    LoadMessages {
        chat_type: ChatType,
        contact: Option<String>,
        before: Option<i64>,
        limit: Option<u32>,
    },
    ClearChat {
        chat_type: ChatType,
        contact: Option<String>,
    },
}

/// Events the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ReceiveMessage(MessageView),
    MessageHistory {
        chat_type: ChatType,
        contact: Option<String>,
        messages: Vec<MessageView>,
    },
    MessageDeleted {
        id: i64,
    },
    MessageRevoked {
        id: i64,
        content: String,
    },
    MessageRead {
        id: i64,
    },
    UserStatusChanged {
        user_id: i64,
        status: PresenceStatus,
    },
    ContactList(Vec<ContactEntry>),
    ContactNotification {
        message: String,
    },
    FriendRequest(FriendRequestView),
    FriendRequestAccepted {
        request_id: i64,
        contact: ContactInfo,
        message: String,
    },
    FriendRequestRejected {
        request_id: i64,
        message: String,
    },
    UserTyping {
        username: String,
    },
    UserStopTyping {
        username: String,
    },
    ChatCleared {
        scope: ChatType,
        from: String,
    },
    MessageError(ErrorPayload),
    ContactError(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
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

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            content: m.content,
            sender_id: m.sender_id,
            sender_username: m.sender_username,
            receiver_id: m.receiver_id,
            is_private: m.is_private,
            is_read: m.is_read,
            revoked: m.revoked,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub id: i64,
    pub username: String,
    pub status: PresenceStatus,
}

/// One entry of a contact list; `id` is the contact relation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEntry {
    pub id: i64,
    pub contact: ContactInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestView {
    pub id: i64,
    pub from_id: i64,
    pub from_username: String,
    pub to_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<FriendRequest> for FriendRequestView {
    fn from(r: FriendRequest) -> Self {
        Self {
            id: r.id,
            from_id: r.from_id,
            from_username: r.from_username,
            to_id: r.to_id,
            status: r.status.as_str().to_string(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<&ChatError> for ErrorPayload {
    fn from(err: &ChatError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
