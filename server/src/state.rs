use std::sync::Arc;

use crate::auth::gate::AuthGate;
use crate::chat::messages::MessagePolicy;
use crate::chat::presence::PresenceTracker;
use crate::config::RelayConfig;
use crate::db::DbPool;
use crate::ws::broadcast::{Broadcaster, LocalBroadcaster};
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Credential check for sockets and REST requests
    pub auth: AuthGate,
    /// Active WebSocket connections per user
    pub connections: Arc<ConnectionRegistry>,
    /// In-memory presence derived from `connections`
    pub presence: Arc<PresenceTracker>,
    /// Delivery backend chosen at startup
    pub broadcaster: Arc<dyn Broadcaster>,
    /// Revoke window and history paging limits
    pub policy: MessagePolicy,
    /// Relay credentials, present only when the relay backend is active
    pub relay: Option<Arc<RelayConfig>>,
}

impl AppState {
    pub fn new(
        db: DbPool,
        jwt_secret: Vec<u8>,
        policy: MessagePolicy,
        connections: Arc<ConnectionRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            auth: AuthGate::new(jwt_secret, db.clone()),
            presence: Arc::new(PresenceTracker::new(connections.clone())),
            db,
            connections,
            broadcaster,
            policy,
            relay: None,
        }
    }

    /// Enable signing of relay channel subscriptions.
    pub fn with_relay(mut self, config: RelayConfig) -> Self {
        self.relay = Some(Arc::new(config));
        self
    }

    /// State delivering through this process's own WebSocket connections.
    pub fn with_local_delivery(db: DbPool, jwt_secret: Vec<u8>, policy: MessagePolicy) -> Self {
        let connections = crate::ws::new_connection_registry();
        let broadcaster = Arc::new(LocalBroadcaster::new(connections.clone()));
        Self::new(db, jwt_secret, policy, connections, broadcaster)
    }
}
