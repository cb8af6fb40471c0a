pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod relay;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::gate::UserIdentity;

pub use registry::{ConnectionRegistry, RemoveOutcome};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> Arc<ConnectionRegistry> {
    Arc::new(ConnectionRegistry::default())
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live connection bound to exactly one authenticated user.
/// Cheap to clone; clones share the same outbound channel.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user: UserIdentity,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(user: UserIdentity, sender: ConnectionSender) -> Self {
        Self {
            id: ConnectionId::next(),
            user,
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    /// Queue a frame for the writer task. Returns false once the writer is gone.
    pub fn send(&self, msg: axum::extract::ws::Message) -> bool {
        self.sender.send(msg).is_ok()
    }
}
