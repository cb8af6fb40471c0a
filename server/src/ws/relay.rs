//! Delivery through a hosted pub/sub relay.
//!
//! User and broadcast fanout becomes one signed HTTP publish per delivery:
//!
//! - `private-user-{id}`: every device of one user
//! - `presence-online-users`: everyone
//!
//! Events for one particular connection (its contact list, error replies,
//! history pages, typing) have no relay channel. They go over the socket the
//! connection holds to this server, as do broadcasts that must skip the
//! originating connection.
//!
//! Publishes are queued to a single worker task, so they reach the relay in
//! the order they were produced.

use axum::{extract::State, Form, Json};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::broadcast::{Broadcaster, LocalBroadcaster};
use super::{ConnectionHandle, ConnectionRegistry};
use crate::auth::gate::UserIdentity;
use crate::chat::events::ServerEvent;
use crate::config::RelayConfig;
use crate::error::ChatError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const BROADCAST_CHANNEL: &str = "presence-online-users";
pub const HEADER_KEY: &str = "X-Relay-Key";
pub const HEADER_TIMESTAMP: &str = "X-Relay-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Relay-Signature";

pub fn user_channel(user_id: i64) -> String {
    format!("private-user-{}", user_id)
}

/// Body of one publish request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Publish {
    pub name: String,
    pub channels: Vec<String>,
    pub data: serde_json::Value,
}

impl Publish {
    /// Split an event into relay name and payload. The relay carries the same
    /// names and payloads as the socket frames.
    fn new(event: &ServerEvent, channels: Vec<String>) -> Option<Self> {
        let mut value = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode relay event");
                return None;
            }
        };
        let name = value.get("event")?.as_str()?.to_string();
        let data = value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        Some(Self {
            name,
            channels,
            data,
        })
    }
}

fn hmac_hex(secret: &str, parts: &[&[u8]]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    for part in parts {
        mac.update(part);
    }
    hex::encode(mac.finalize().into_bytes())
}

/// hex(HMAC-SHA256(secret, "{timestamp}.{body}"))
pub fn sign(secret: &str, timestamp: i64, body: &str) -> String {
    hmac_hex(
        secret,
        &[timestamp.to_string().as_bytes(), b".", body.as_bytes()],
    )
}

pub struct RelayBroadcaster {
    queue: mpsc::UnboundedSender<Publish>,
    local: LocalBroadcaster,
}

impl RelayBroadcaster {
    /// Build the HTTP client and start the publish worker. `registry` holds the
    /// socket connections that per-connection events are written to.
    pub fn spawn(config: RelayConfig, registry: Arc<ConnectionRegistry>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(publish_worker(client, config, rx));
        Ok(Self {
            queue: tx,
            local: LocalBroadcaster::new(registry),
        })
    }

    fn enqueue(&self, event: &ServerEvent, channels: Vec<String>) {
        if let Some(publish) = Publish::new(event, channels) {
            if self.queue.send(publish).is_err() {
                tracing::warn!("Relay worker stopped, dropping event");
            }
        }
    }
}

impl Broadcaster for RelayBroadcaster {
    fn send_to_user(&self, user_id: i64, event: &ServerEvent) {
        self.enqueue(event, vec![user_channel(user_id)]);
    }

    fn send_to_connection(&self, conn: &ConnectionHandle, event: &ServerEvent) {
        self.local.send_to_connection(conn, event);
    }

    fn broadcast_all(&self, event: &ServerEvent) {
        self.enqueue(event, vec![BROADCAST_CHANNEL.to_string()]);
    }

    fn broadcast_except(&self, except: &ConnectionHandle, event: &ServerEvent) {
        self.local.broadcast_except(except, event);
    }
}

#[derive(Debug, Deserialize)]
pub struct ChannelAuthRequest {
    pub socket_id: String,
    pub channel_name: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ChannelAuth {
    pub auth: String,
}

/// Sign a relay subscription. A user may join the shared presence channel
/// and their own user channel, nothing else.
pub fn authorize_channel(
    config: &RelayConfig,
    user: &UserIdentity,
    socket_id: &str,
    channel: &str,
) -> Result<ChannelAuth, ChatError> {
    let socket_id = socket_id.trim();
    let channel = channel.trim();
    if socket_id.is_empty() || channel.is_empty() {
        return Err(ChatError::Validation(
            "socket_id and channel_name are required".into(),
        ));
    }
    if channel != BROADCAST_CHANNEL && channel != user_channel(user.id) {
        return Err(ChatError::Forbidden(format!(
            "no access to channel {}",
            channel
        )));
    }

    let signature = hmac_hex(
        &config.secret,
        &[socket_id.as_bytes(), b":", channel.as_bytes()],
    );
    Ok(ChannelAuth {
        auth: format!("{}:{}", config.app_key, signature),
    })
}

/// POST /api/relay/auth — form body `socket_id`, `channel_name`
pub async fn channel_auth(
    State(state): State<AppState>,
    user: UserIdentity,
    Form(body): Form<ChannelAuthRequest>,
) -> Result<Json<ChannelAuth>, ChatError> {
    let config = state.relay.as_deref().ok_or(ChatError::NotFound("relay"))?;
    let auth = authorize_channel(config, &user, &body.socket_id, &body.channel_name)?;
    tracing::debug!(user_id = user.id, channel = %body.channel_name, "Relay subscription authorized");
    Ok(Json(auth))
}

async fn publish_worker(
    client: reqwest::Client,
    config: RelayConfig,
    mut rx: mpsc::UnboundedReceiver<Publish>,
) {
    let endpoint = format!("{}/events", config.url.trim_end_matches('/'));
    while let Some(publish) = rx.recv().await {
        let body = match serde_json::to_string(&publish) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode relay publish");
                continue;
            }
        };
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign(&config.secret, timestamp, &body);

        let result = client
            .post(&endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(HEADER_KEY, &config.app_key)
            .header(HEADER_TIMESTAMP, timestamp.to_string())
            .header(HEADER_SIGNATURE, signature)
            .body(body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(event = %publish.name, channels = ?publish.channels, "Relay publish ok");
            }
            Ok(resp) => {
                tracing::warn!(
                    event = %publish.name,
                    status = %resp.status(),
                    "Relay rejected publish"
                );
            }
            Err(e) => {
                tracing::warn!(event = %publish.name, error = %e, "Relay publish failed");
            }
        }
    }
}
