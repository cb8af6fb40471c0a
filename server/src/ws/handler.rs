use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::chat::presence::PresenceStatus;
use crate::error::{AuthFailure, ChatError};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket connection.
/// The credential travels as `?token=JWT`; `status` optionally picks the
/// presence announced when the user comes online.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
    pub status: Option<PresenceStatus>,
}

/// 4001 = token expired
/// 4002 = token missing, invalid, or for an unknown user
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

fn close_code(err: &ChatError) -> (u16, &'static str) {
    match err {
        ChatError::Auth(AuthFailure::Expired) => (CLOSE_TOKEN_EXPIRED, "Token expired"),
        ChatError::Auth(_) => (CLOSE_TOKEN_INVALID, "Token invalid"),
        _ => (1011, "Authentication unavailable"),
    }
}

/// GET /ws?token=JWT[&status=away]
/// On auth failure the connection is upgraded and immediately closed with an
/// application close code; it is never registered.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.auth.admit(params.token.as_deref()).await {
        Ok(user) => {
            tracing::info!(user_id = user.id, username = %user.username, "WebSocket connection authenticated");
            let initial = params.status;
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user, initial))
        }
        Err(err) => {
            let (code, reason) = close_code(&err);
            tracing::warn!(close_code = code, reason, error = %err, "WebSocket auth failed");

            ws.on_upgrade(move |mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
            })
        }
    }
}
