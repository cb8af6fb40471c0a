//! Dispatch of decoded client events.
//!
//! Every failure goes back to the originating connection only.

use crate::chat::audience::{self, Audience};
use crate::chat::events::{ClientEvent, ErrorPayload, MessageView, ServerEvent};
use crate::chat::{contacts, messages, presence};
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::ConnectionHandle;

pub async fn dispatch(state: &AppState, origin: &ConnectionHandle, event: ClientEvent) {
    let user = origin.user();
    let is_contact_op = matches!(event, ClientEvent::AddContact { .. });

    let result: Result<(), ChatError> = match event {
        ClientEvent::SendMessage { content, to } => {
            messages::send_message(state, user, &content, to.as_deref())
                .await
                .map(|_| ())
        }
        ClientEvent::DeleteMessage { id } => messages::delete_message(state, user, id).await,
        ClientEvent::RevokeMessage { id } => {
            messages::revoke_message(state, user, id).await.map(|_| ())
        }
        ClientEvent::MarkAsRead { id } => messages::mark_read(state, user, id).await,
        ClientEvent::SetStatus { status } => presence::set_status(state, user, status).await,
        ClientEvent::AddContact { username } => {
            contacts::add_contact(state, user, &username).await.map(|_| ())
        }
        ClientEvent::Typing { to } => {
            typing(state, origin, to.as_deref(), ServerEvent::UserTyping {
                username: user.username.clone(),
            });
            Ok(())
        }
        ClientEvent::StopTyping { to } => {
            typing(state, origin, to.as_deref(), ServerEvent::UserStopTyping {
                username: user.username.clone(),
            });
            Ok(())
        }
        ClientEvent::LoadMessages {
            chat_type,
            contact,
            before,
            limit,
        } => {
            let history =
                messages::load_history(state, user, chat_type, contact.as_deref(), before, limit)
                    .await;
            history.map(|history| {
                state.broadcaster.send_to_connection(
                    origin,
                    &ServerEvent::MessageHistory {
                        chat_type,
                        contact,
                        messages: history.into_iter().map(MessageView::from).collect(),
                    },
                );
            })
        }
        ClientEvent::ClearChat { chat_type, contact } => {
            messages::clear_chat(state, user, chat_type, contact.as_deref())
                .await
                .map(|_| ())
        }
    };

    if let Err(err) = result {
        tracing::debug!(
            user_id = user.id,
            connection = %origin.id(),
            code = err.code(),
            error = %err,
            "Client event rejected"
        );
        let payload = ErrorPayload::from(&err);
        let reply = if is_contact_op {
            ServerEvent::ContactError(payload)
        } else {
            ServerEvent::MessageError(payload)
        };
        state.broadcaster.send_to_connection(origin, &reply);
    }
}

/// Typing indicators are never stored. A named target that is not connected
/// is dropped silently; no target means everyone but the typist's own connection.
fn typing(state: &AppState, origin: &ConnectionHandle, to: Option<&str>, event: ServerEvent) {
    let target = match to.map(str::trim).filter(|t| !t.is_empty()) {
        Some(username) => match state.connections.lookup_by_username(username) {
            Some(conn) => Audience::Connection(conn),
            None => Audience::Nobody,
        },
        None => Audience::EveryoneExcept(origin.clone()),
    };
    audience::deliver(state.broadcaster.as_ref(), &target, &event);
}
