//! Message operations shared by the realtime router and the REST surface.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::gate::UserIdentity;
use crate::chat::audience::{self, Audience};
use crate::chat::events::{ChatType, MessageView, ServerEvent};
use crate::db::messages::{self as store, MessageFilter, Page};
use crate::db::models::{Message, MessagePatch, NewMessage};
use crate::db::users;
use crate::error::ChatError;
use crate::state::AppState;

/// Maximum message content length (chars).
pub const MAX_CONTENT_LENGTH: usize = 4000;
/// Maximum page size for message history.
pub const MAX_HISTORY_LIMIT: u32 = 100;
/// Content a revoked message is replaced with.
pub const REVOKED_PLACEHOLDER: &str = "This message has been revoked";

#[derive(Debug, Clone, Copy)]
pub struct MessagePolicy {
    pub revoke_window: Duration,
    pub history_limit: u32,
}

impl MessagePolicy {
    pub fn new(revoke_window_secs: u64, history_limit: u32) -> Self {
        Self {
            revoke_window: Duration::from_secs(revoke_window_secs),
            history_limit: history_limit.clamp(1, MAX_HISTORY_LIMIT),
        }
    }

    fn page_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.history_limit)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

impl Default for MessagePolicy {
    fn default() -> Self {
        Self::new(300, 50)
    }
}

async fn resolve_username(state: &AppState, username: &str) -> Result<i64, ChatError> {
    users::find_user_by_username(&state.db, username.trim())
        .await?
        .map(|u| u.id)
        .ok_or(ChatError::NotFound("user"))
}

async fn conversation_filter(
    state: &AppState,
    user: &UserIdentity,
    chat_type: ChatType,
    contact: Option<&str>,
) -> Result<MessageFilter, ChatError> {
    match chat_type {
        ChatType::Public => Ok(MessageFilter::Public),
        ChatType::Private => {
            let contact = contact
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| ChatError::Validation("a private chat needs a contact".into()))?;
            let other = resolve_username(state, contact).await?;
            Ok(MessageFilter::Conversation {
                user_a: user.id,
                user_b: other,
            })
        }
    }
}

async fn load_existing(state: &AppState, id: i64) -> Result<Message, ChatError> {
    store::find_message(&state.db, id)
        .await?
        .ok_or(ChatError::NotFound("message"))
}

/// Persist a message and deliver it. Public messages reach every connection,
/// private ones every connection of the receiver and the sender.
pub async fn send_message(
    state: &AppState,
    sender: &UserIdentity,
    content: &str,
    to: Option<&str>,
) -> Result<Message, ChatError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ChatError::Validation("message content must not be empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(ChatError::Validation(format!(
            "message content exceeds {} characters",
            MAX_CONTENT_LENGTH
        )));
    }

    let receiver_id = match to.map(str::trim).filter(|t| !t.is_empty()) {
        Some(username) => Some(resolve_username(state, username).await?),
        None => None,
    };

    let message = store::create_message(
        &state.db,
        NewMessage {
            content: content.to_string(),
            sender_id: sender.id,
            receiver_id,
            created_at: Utc::now(),
        },
    )
    .await?;

    tracing::debug!(
        message_id = message.id,
        sender_id = sender.id,
        private = message.is_private,
        "Message stored"
    );

    let target = Audience::for_message(&message);
    audience::deliver(
        state.broadcaster.as_ref(),
        &target,
        &ServerEvent::ReceiveMessage(message.clone().into()),
    );
    Ok(message)
}

/// Hard delete by the sender. No time limit.
pub async fn delete_message(state: &AppState, user: &UserIdentity, id: i64) -> Result<(), ChatError> {
    let message = load_existing(state, id).await?;
    if message.sender_id != user.id {
        return Err(ChatError::Forbidden("only the sender can delete a message".into()));
    }
    if !store::delete_message(&state.db, id).await? {
        return Err(ChatError::NotFound("message"));
    }

    audience::deliver(
        state.broadcaster.as_ref(),
        &Audience::for_message(&message),
        &ServerEvent::MessageDeleted { id },
    );
    Ok(())
}

/// Replace the content with a placeholder, sender only and only inside the
/// revoke window.
pub async fn revoke_message(
    state: &AppState,
    user: &UserIdentity,
    id: i64,
) -> Result<Message, ChatError> {
    let message = load_existing(state, id).await?;
    if message.sender_id != user.id {
        return Err(ChatError::Forbidden("only the sender can revoke a message".into()));
    }
    if message.revoked {
        return Err(ChatError::Conflict("message already revoked".into()));
    }

    let window = state.policy.revoke_window;
    let age_ms = Utc::now()
        .signed_duration_since(message.created_at)
        .num_milliseconds();
    if age_ms >= window.as_millis() as i64 {
        return Err(ChatError::Expired {
            window_secs: window.as_secs(),
        });
    }

    let updated = store::update_message(
        &state.db,
        id,
        MessagePatch {
            content: Some(REVOKED_PLACEHOLDER.to_string()),
            revoked: Some(true),
            ..Default::default()
        },
    )
    .await?;

    audience::deliver(
        state.broadcaster.as_ref(),
        &Audience::for_message(&updated),
        &ServerEvent::MessageRevoked {
            id,
            content: updated.content.clone(),
        },
    );
    Ok(updated)
}

/// Read receipt. Only the receiver of a private message may acknowledge it.
pub async fn mark_read(state: &AppState, user: &UserIdentity, id: i64) -> Result<(), ChatError> {
    let message = load_existing(state, id).await?;
    if !message.is_private || message.receiver_id != Some(user.id) {
        return Err(ChatError::Forbidden(
            "only the receiver can mark a message as read".into(),
        ));
    }

    if !message.is_read {
        store::update_message(
            &state.db,
            id,
            MessagePatch {
                is_read: Some(true),
                ..Default::default()
            },
        )
        .await?;
    }

    audience::deliver(
        state.broadcaster.as_ref(),
        &Audience::users([message.sender_id, user.id]),
        &ServerEvent::MessageRead { id },
    );
    Ok(())
}

/// History page, ascending by creation.
pub async fn load_history(
    state: &AppState,
    user: &UserIdentity,
    chat_type: ChatType,
    contact: Option<&str>,
    before: Option<i64>,
    limit: Option<u32>,
) -> Result<Vec<Message>, ChatError> {
    let filter = conversation_filter(state, user, chat_type, contact).await?;
    let page = Page {
        before,
        limit: state.policy.page_limit(limit),
    };
    store::list_messages(&state.db, filter, page).await
}

/// Delete a whole chat. Public clears reach everyone; private clears tell
/// the other party only.
pub async fn clear_chat(
    state: &AppState,
    user: &UserIdentity,
    chat_type: ChatType,
    contact: Option<&str>,
) -> Result<usize, ChatError> {
    let filter = conversation_filter(state, user, chat_type, contact).await?;
    let removed = store::clear_messages(&state.db, filter).await?;

    tracing::info!(user_id = user.id, scope = ?chat_type, removed, "Chat cleared");

    let target = match filter {
        MessageFilter::Public => Audience::Everyone,
        MessageFilter::Conversation { user_b, .. } if user_b == user.id => Audience::Nobody,
        MessageFilter::Conversation { user_b, .. } => Audience::users([user_b]),
    };
    audience::deliver(
        state.broadcaster.as_ref(),
        &target,
        &ServerEvent::ChatCleared {
            scope: chat_type,
            from: user.username.clone(),
        },
    );
    Ok(removed)
}

// --- REST ---

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    #[serde(rename = "type", default = "default_chat_type")]
    pub chat_type: ChatType,
    pub contact: Option<String>,
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

fn default_chat_type() -> ChatType {
    ChatType::Public
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PrivateSendRequest {
    pub content: String,
    /// Username of the receiver
    pub receiver: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageAction {
    #[default]
    Revoke,
    Delete,
}

#[derive(Debug, Deserialize)]
pub struct MessageActionQuery {
    #[serde(default)]
    pub action: MessageAction,
}

/// GET /api/messages?type=public|private&contact=<username>&before=&limit=
pub async fn get_messages(
    State(state): State<AppState>,
    user: UserIdentity,
    Query(query): Query<ChatQuery>,
) -> Result<Json<HistoryResponse>, ChatError> {
    let messages = load_history(
        &state,
        &user,
        query.chat_type,
        query.contact.as_deref(),
        query.before,
        query.limit,
    )
    .await?;
    Ok(Json(HistoryResponse {
        messages: messages.into_iter().map(MessageView::from).collect(),
    }))
}

/// DELETE /api/messages/clear?type=public|private&contact=<username>
pub async fn clear_messages(
    State(state): State<AppState>,
    user: UserIdentity,
    Query(query): Query<ChatQuery>,
) -> Result<Json<ClearResponse>, ChatError> {
    let removed = clear_chat(&state, &user, query.chat_type, query.contact.as_deref()).await?;
    Ok(Json(ClearResponse { removed }))
}

/// POST /api/messages — body `{content}`, public chat
pub async fn post_public_message(
    State(state): State<AppState>,
    user: UserIdentity,
    Json(body): Json<SendRequest>,
) -> Result<(StatusCode, Json<MessageView>), ChatError> {
    let message = send_message(&state, &user, &body.content, None).await?;
    Ok((StatusCode::CREATED, Json(message.into())))
}

/// POST /api/messages/private — body `{content, receiver}`
pub async fn post_private_message(
    State(state): State<AppState>,
    user: UserIdentity,
    Json(body): Json<PrivateSendRequest>,
) -> Result<(StatusCode, Json<MessageView>), ChatError> {
    if body.receiver.trim().is_empty() {
        return Err(ChatError::Validation("a private message needs a receiver".into()));
    }
    let message = send_message(&state, &user, &body.content, Some(&body.receiver)).await?;
    Ok((StatusCode::CREATED, Json(message.into())))
}

/// DELETE /api/messages/{id}?action=revoke|delete
///
/// Revoke answers with the updated message, delete with 204.
pub async fn remove_message(
    State(state): State<AppState>,
    user: UserIdentity,
    Path(id): Path<i64>,
    Query(query): Query<MessageActionQuery>,
) -> Result<Response, ChatError> {
    match query.action {
        MessageAction::Revoke => {
            let message = revoke_message(&state, &user, id).await?;
            Ok(Json(MessageView::from(message)).into_response())
        }
        MessageAction::Delete => {
            delete_message(&state, &user, id).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_limit_is_clamped() {
        let policy = MessagePolicy::new(300, 50);
        assert_eq!(policy.page_limit(None), 50);
        assert_eq!(policy.page_limit(Some(0)), 1);
        assert_eq!(policy.page_limit(Some(20)), 20);
        assert_eq!(policy.page_limit(Some(5000)), MAX_HISTORY_LIMIT);
    }

    #[test]
    fn test_default_policy() {
        let policy = MessagePolicy::default();
        assert_eq!(policy.revoke_window, Duration::from_secs(300));
        assert_eq!(policy.history_limit, 50);
    }
}
