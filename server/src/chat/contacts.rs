//! Contact relations and friend requests.
//!
//! Storage decides every conflict inside one transaction; this module only
//! fans out the result to whoever is connected.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::gate::UserIdentity;
use crate::chat::events::{ContactEntry, ContactInfo, FriendRequestView, ServerEvent};
use crate::chat::presence::{self, PresenceStatus};
use crate::db::contacts as store;
use crate::db::models::{FriendRequest, FriendRequestStatus, User};
use crate::db::users;
use crate::error::ChatError;
use crate::state::AppState;

/// Contact list of a user with live presence, newest relation first.
pub async fn contact_list(state: &AppState, user_id: i64) -> Result<Vec<ContactEntry>, ChatError> {
    let rows = store::find_contacts_for_user(&state.db, user_id).await?;
    Ok(rows
        .into_iter()
        .map(|row| ContactEntry {
            id: row.id,
            contact: ContactInfo {
                id: row.contact_id,
                status: state.presence.get(row.contact_id),
                username: row.contact_username,
            },
        })
        .collect())
}

/// Send a fresh contact list to every connection of a user. Logged, never fails.
pub async fn push_contact_list(state: &AppState, user_id: i64) {
    if !state.connections.is_connected(user_id) {
        return;
    }
    match contact_list(state, user_id).await {
        Ok(list) => state
            .broadcaster
            .send_to_user(user_id, &ServerEvent::ContactList(list)),
        Err(e) => tracing::warn!(user_id, error = %e, "Failed to refresh contact list"),
    }
}

async fn find_target(state: &AppState, username: &str) -> Result<User, ChatError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ChatError::Validation("username must not be empty".into()));
    }
    users::find_user_by_username(&state.db, username)
        .await?
        .ok_or(ChatError::NotFound("user"))
}

/// Ask `to_username` to become a contact of `from`.
pub async fn send_friend_request(
    state: &AppState,
    from: &UserIdentity,
    to_username: &str,
) -> Result<FriendRequest, ChatError> {
    let target = find_target(state, to_username).await?;
    let request = store::create_friend_request(&state.db, from.id, target.id).await?;

    tracing::info!(
        request_id = request.id,
        from_id = from.id,
        to_id = target.id,
        "Friend request created"
    );

    state.broadcaster.send_to_user(
        target.id,
        &ServerEvent::FriendRequest(FriendRequestView::from(request.clone())),
    );
    Ok(request)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestAction {
    Accept,
    Reject,
}

/// Accept or reject a pending request addressed to `actor`.
pub async fn respond(
    state: &AppState,
    actor: &UserIdentity,
    request_id: i64,
    action: RequestAction,
) -> Result<FriendRequest, ChatError> {
    let request = store::find_friend_request(&state.db, request_id)
        .await?
        .ok_or(ChatError::NotFound("friend request"))?;
    if request.to_id != actor.id {
        return Err(ChatError::Forbidden(
            "only the recipient can answer a friend request".into(),
        ));
    }

    let status = match action {
        RequestAction::Accept => FriendRequestStatus::Accepted,
        RequestAction::Reject => FriendRequestStatus::Rejected,
    };
    let updated = store::update_friend_request_status(&state.db, request_id, status).await?;

    tracing::info!(
        request_id,
        from_id = updated.from_id,
        to_id = updated.to_id,
        status = updated.status.as_str(),
        "Friend request answered"
    );

    match action {
        RequestAction::Accept => {
            state.broadcaster.send_to_user(
                updated.from_id,
                &ServerEvent::FriendRequestAccepted {
                    request_id,
                    contact: ContactInfo {
                        id: actor.id,
                        username: actor.username.clone(),
                        status: state.presence.get(actor.id),
                    },
                    message: format!("{} accepted your friend request", actor.username),
                },
            );
            push_contact_list(state, updated.from_id).await;
            push_contact_list(state, updated.to_id).await;
        }
        RequestAction::Reject => {
            state.broadcaster.send_to_user(
                updated.from_id,
                &ServerEvent::FriendRequestRejected {
                    request_id,
                    message: format!("{} declined your friend request", actor.username),
                },
            );
        }
    }
    Ok(updated)
}

/// Direct add without a request. Both sides get refreshed lists and the added
/// party is told who added them.
pub async fn add_contact(
    state: &AppState,
    actor: &UserIdentity,
    username: &str,
) -> Result<ContactInfo, ChatError> {
    let target = find_target(state, username).await?;
    store::create_contact_pair(&state.db, actor.id, target.id).await?;

    tracing::info!(user_id = actor.id, contact_id = target.id, "Contact added");

    push_contact_list(state, actor.id).await;
    push_contact_list(state, target.id).await;
    state.broadcaster.send_to_user(
        target.id,
        &ServerEvent::ContactNotification {
            message: format!("{} added you as a contact", actor.username),
        },
    );

    Ok(ContactInfo {
        id: target.id,
        status: state.presence.get(target.id),
        username: target.username,
    })
}

// --- REST ---

#[derive(Debug, Deserialize)]
pub struct UsernameRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub action: RequestAction,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: PresenceStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub id: i64,
    pub username: String,
    pub status: PresenceStatus,
    pub is_contact: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsersResponse {
    pub users: Vec<OnlineUser>,
    pub online_count: usize,
}

/// GET /api/contacts
pub async fn list_contacts(
    State(state): State<AppState>,
    user: UserIdentity,
) -> Result<Json<Vec<ContactEntry>>, ChatError> {
    Ok(Json(contact_list(&state, user.id).await?))
}

/// POST /api/contacts — body `{username}`
pub async fn create_contact(
    State(state): State<AppState>,
    user: UserIdentity,
    Json(body): Json<UsernameRequest>,
) -> Result<(StatusCode, Json<ContactInfo>), ChatError> {
    let contact = add_contact(&state, &user, &body.username).await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

/// GET /api/friend-requests — incoming pending requests
pub async fn list_friend_requests(
    State(state): State<AppState>,
    user: UserIdentity,
) -> Result<Json<Vec<FriendRequestView>>, ChatError> {
    let requests = store::list_incoming_requests(&state.db, user.id).await?;
    Ok(Json(requests.into_iter().map(FriendRequestView::from).collect()))
}

/// POST /api/friend-requests — body `{username}`
pub async fn create_friend_request(
    State(state): State<AppState>,
    user: UserIdentity,
    Json(body): Json<UsernameRequest>,
) -> Result<(StatusCode, Json<FriendRequestView>), ChatError> {
    let request = send_friend_request(&state, &user, &body.username).await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

/// PUT /api/friend-requests/{id} — body `{action: accept|reject}`
pub async fn answer_friend_request(
    State(state): State<AppState>,
    user: UserIdentity,
    Path(id): Path<i64>,
    Json(body): Json<RespondRequest>,
) -> Result<Json<FriendRequestView>, ChatError> {
    let request = respond(&state, &user, id, body.action).await?;
    Ok(Json(request.into()))
}

/// PUT /api/users/status — body `{status}`
pub async fn update_status(
    State(state): State<AppState>,
    user: UserIdentity,
    Json(body): Json<StatusRequest>,
) -> Result<StatusCode, ChatError> {
    presence::set_status(&state, &user, body.status).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/users/online — every other user with presence and contact flag
pub async fn online_users(
    State(state): State<AppState>,
    user: UserIdentity,
) -> Result<Json<OnlineUsersResponse>, ChatError> {
    let contact_ids: Vec<i64> = store::find_contacts_for_user(&state.db, user.id)
        .await?
        .into_iter()
        .map(|row| row.contact_id)
        .collect();

    let users: Vec<OnlineUser> = users::list_users(&state.db)
        .await?
        .into_iter()
        .filter(|u| u.id != user.id)
        .map(|u| OnlineUser {
            status: state.presence.get(u.id),
            is_contact: contact_ids.contains(&u.id),
            id: u.id,
            username: u.username,
        })
        .collect();

    Ok(Json(OnlineUsersResponse {
        online_count: state.connections.all_user_ids().len(),
        users,
    }))
}

#[derive(Debug, Serialize)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub status: PresenceStatus,
}

/// GET /api/users/me
pub async fn current_user(State(state): State<AppState>, user: UserIdentity) -> Json<CurrentUser> {
    Json(CurrentUser {
        status: state.presence.get(user.id),
        id: user.id,
        username: user.username,
    })
}
