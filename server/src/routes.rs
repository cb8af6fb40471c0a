use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::chat::{contacts, messages};
use crate::state::AppState;
use crate::ws::{handler as ws_handler, relay};

/// Build the full axum Router. REST handlers authenticate by taking a
/// `UserIdentity` argument; the socket authenticates on upgrade.
pub fn build_router(state: AppState) -> Router {
    let contact_routes = Router::new()
        .route("/api/contacts", get(contacts::list_contacts).post(contacts::create_contact))
        .route(
            "/api/friend-requests",
            get(contacts::list_friend_requests).post(contacts::create_friend_request),
        )
        .route("/api/friend-requests/{id}", put(contacts::answer_friend_request));

    let user_routes = Router::new()
        .route("/api/users/me", get(contacts::current_user))
        .route("/api/users/status", put(contacts::update_status))
        .route("/api/users/online", get(contacts::online_users));

    // The static /clear segment takes priority over /{id}.
    let message_routes = Router::new()
        .route(
            "/api/messages",
            get(messages::get_messages).post(messages::post_public_message),
        )
        .route("/api/messages/private", post(messages::post_private_message))
        .route("/api/messages/clear", delete(messages::clear_messages))
        .route("/api/messages/{id}", delete(messages::remove_message));

    // Query-string token, checked before the upgrade completes
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let relay_routes = Router::new().route("/api/relay/auth", post(relay::channel_auth));

    Router::new()
        .merge(contact_routes)
        .merge(user_routes)
        .merge(message_routes)
        .merge(ws_routes)
        .merge(relay_routes)
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
