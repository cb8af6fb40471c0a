//! Delivery backends.
//!
//! All fanout goes through [`Broadcaster`]. Which adapter backs it is decided
//! once at startup.

use std::sync::Arc;

use super::{protocol, ConnectionHandle, ConnectionRegistry};
use crate::chat::events::ServerEvent;

pub trait Broadcaster: Send + Sync {
    /// Every live connection of one user.
    fn send_to_user(&self, user_id: i64, event: &ServerEvent);

    /// Exactly one connection.
    fn send_to_connection(&self, conn: &ConnectionHandle, event: &ServerEvent);

    /// Every live connection.
    fn broadcast_all(&self, event: &ServerEvent);

    /// Every live connection except `except`.
    fn broadcast_except(&self, except: &ConnectionHandle, event: &ServerEvent);
}

/// Writes straight into the outbound channels of connections held in the registry.
pub struct LocalBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl LocalBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

impl Broadcaster for LocalBroadcaster {
    fn send_to_user(&self, user_id: i64, event: &ServerEvent) {
        let Some(msg) = protocol::encode_event(event) else {
            return;
        };
        for conn in self.registry.lookup_by_user(user_id) {
            if !conn.send(msg.clone()) {
                tracing::debug!(user_id, connection = %conn.id(), "Dropped event for closing connection");
            }
        }
    }

    fn send_to_connection(&self, conn: &ConnectionHandle, event: &ServerEvent) {
        if let Some(msg) = protocol::encode_event(event) {
            let _ = conn.send(msg);
        }
    }

    fn broadcast_all(&self, event: &ServerEvent) {
        let Some(msg) = protocol::encode_event(event) else {
            return;
        };
        for conn in self.registry.all_connections() {
            let _ = conn.send(msg.clone());
        }
    }

    fn broadcast_except(&self, except: &ConnectionHandle, event: &ServerEvent) {
        let Some(msg) = protocol::encode_event(event) else {
            return;
        };
        for conn in self.registry.all_connections() {
            if conn.id() != except.id() {
                let _ = conn.send(msg.clone());
            }
        }
    }
}
