use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::auth::gate::UserIdentity;
use crate::chat::presence::{self, PresenceStatus};
use crate::chat::router;
use crate::state::AppState;
use crate::ws::{protocol, ConnectionHandle};

/// Ping interval: server sends a WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if no pong arrives within 10 seconds after a ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run one authenticated connection until either side closes it.
///
/// The socket is split: a writer task owns the sink and drains an mpsc
/// channel, so every producer (router, fanout, ping task) goes through the
/// same FIFO queue. The reader loop runs here and dispatches events in the
/// order they arrive.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    user: UserIdentity,
    initial: Option<PresenceStatus>,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let handle = ConnectionHandle::new(user.clone(), tx.clone());
    presence::connect(&state, handle.clone(), initial).await;

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_tx = tx.clone();
    let ping_conn = handle.id();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(connection = %ping_conn, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => match protocol::decode_event(text.as_str()) {
                    Ok(event) => router::dispatch(&state, &handle, event).await,
                    Err(e) => {
                        tracing::debug!(
                            user_id = user.id,
                            connection = %handle.id(),
                            error = %e,
                            "Undecodable client frame"
                        );
                        state
                            .broadcaster
                            .send_to_connection(&handle, &protocol::malformed_frame(&e.to_string()));
                    }
                },
                Message::Binary(_) => {
                    state.broadcaster.send_to_connection(
                        &handle,
                        &protocol::malformed_frame("binary frames are not supported"),
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = user.id,
                        connection = %handle.id(),
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = user.id,
                    connection = %handle.id(),
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = user.id, connection = %handle.id(), "WebSocket stream ended");
                break;
            }
        }
    }

    // Leave the registry before anything else so no fanout targets this connection.
    presence::disconnect(&state, &handle).await;

    ping_handle.abort();
    writer_handle.abort();
}

/// Writer task: receives messages from the mpsc channel and forwards them to the sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
