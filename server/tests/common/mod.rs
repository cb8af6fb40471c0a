//! Shared helpers for integration tests.
#![allow(dead_code)]

use axum::extract::ws::Message as AxumMessage;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use chatline_server::auth::gate::UserIdentity;
use chatline_server::chat::messages::MessagePolicy;
use chatline_server::chat::presence::{self, PresenceStatus};
use chatline_server::db::users;
use chatline_server::state::AppState;
use chatline_server::ws::ConnectionHandle;

pub const TEST_SECRET: &[u8] = b"chatline-test-secret-0123456789ab";

/// Fresh state backed by a temporary database, delivering to local connections.
pub fn test_state() -> (AppState, TempDir) {
    test_state_with_policy(MessagePolicy::default())
}

pub fn test_state_with_policy(policy: MessagePolicy) -> (AppState, TempDir) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();
    let db = chatline_server::db::init_db(&data_dir).expect("Failed to init DB");
    let state = AppState::with_local_delivery(db, TEST_SECRET.to_vec(), policy);
    (state, tmp_dir)
}

pub async fn seed_user(state: &AppState, username: &str) -> UserIdentity {
    let user = users::create_user(&state.db, username)
        .await
        .expect("Failed to create user");
    UserIdentity {
        id: user.id,
        username: user.username,
    }
}

pub fn token_for(user: &UserIdentity) -> String {
    chatline_server::auth::jwt::issue_access_token(TEST_SECRET, user.id, &user.username)
        .expect("Failed to issue token")
}

/// An in-process connection: a registered handle plus the receiving end of
/// its outbound queue.
pub struct FakeConn {
    pub handle: ConnectionHandle,
    rx: mpsc::UnboundedReceiver<AxumMessage>,
}

impl FakeConn {
    pub fn new(user: &UserIdentity) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handle: ConnectionHandle::new(user.clone(), tx),
            rx,
        }
    }

    /// Connect through the presence tracker, exactly like a socket would.
    pub async fn connect(state: &AppState, user: &UserIdentity) -> Self {
        Self::connect_with(state, user, None).await
    }

    pub async fn connect_with(
        state: &AppState,
        user: &UserIdentity,
        initial: Option<PresenceStatus>,
    ) -> Self {
        let conn = Self::new(user);
        presence::connect(state, conn.handle.clone(), initial).await;
        conn
    }

    pub async fn disconnect(&self, state: &AppState) {
        presence::disconnect(state, &self.handle).await;
    }

    /// Next queued event, if one arrives soon.
    pub async fn try_next(&mut self) -> Option<Value> {
        loop {
            match tokio::time::timeout(Duration::from_millis(200), self.rx.recv()).await {
                Ok(Some(AxumMessage::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).expect("event is JSON"));
                }
                Ok(Some(_)) => continue,
                _ => return None,
            }
        }
    }

    /// Skip events until one named `event` arrives and return it.
    pub async fn expect(&mut self, event: &str) -> Value {
        while let Some(frame) = self.try_next().await {
            if frame["event"] == event {
                return frame;
            }
        }
        panic!("expected a {} event", event);
    }

    /// Drop everything queued so far.
    pub async fn drain(&mut self) {
        while self.try_next().await.is_some() {}
    }

    /// Every event name queued right now, in order.
    pub async fn event_names(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(frame) = self.try_next().await {
            names.push(frame["event"].as_str().unwrap_or_default().to_string());
        }
        names
    }
}

/// Running HTTP/WebSocket server on a random port.
pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    pub state: AppState,
    _dir: TempDir,
}

pub async fn start_test_server() -> TestServer {
    let (state, dir) = test_state();
    start_with_state(state, dir).await
}

pub async fn start_with_state(state: AppState, dir: TempDir) -> TestServer {
    let app = chatline_server::routes::build_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        ws_url: format!("ws://{}/ws", addr),
        state,
        _dir: dir,
    }
}
