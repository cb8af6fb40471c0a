//! Server-side presence tracking and broadcast.
//!
//! Presence is derived from registry membership: a user with no live
//! connection is `offline` no matter what was last set or persisted. The
//! persisted `users.status` column is only a cache of this derived state.
//!
//! Transitions for one user are serialized by a per-user async mutex and
//! always re-read the registry, so a reconnect racing a disconnect cannot
//! leave the user stuck offline.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::gate::UserIdentity;
use crate::chat::contacts;
use crate::chat::events::ServerEvent;
use crate::db::users;
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::{ConnectionHandle, ConnectionRegistry, RemoveOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl PresenceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "away" => Some(Self::Away),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

/// Tracked status of connected users.
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    statuses: DashMap<i64, PresenceStatus>,
    transitions: DashMap<i64, Arc<Mutex<()>>>,
}

/// What a reconcile pass changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    CameOnline(PresenceStatus),
    WentOffline,
    Unchanged,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            statuses: DashMap::new(),
            transitions: DashMap::new(),
        }
    }

    /// Current presence of a user. Registry membership wins over anything tracked.
    pub fn get(&self, user_id: i64) -> PresenceStatus {
        if !self.registry.is_connected(user_id) {
            return PresenceStatus::Offline;
        }
        self.statuses
            .get(&user_id)
            .map(|s| *s.value())
            .unwrap_or(PresenceStatus::Online)
    }

    fn transition_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.transitions
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a user's lock once nobody holds or waits on it. The shard lock
    /// taken by `remove_if` orders this against `transition_lock` clones.
    fn release_transition_lock(&self, user_id: i64) {
        self.transitions
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of users with a live transition lock.
    pub fn transition_lock_count(&self) -> usize {
        self.transitions.len()
    }

    /// Bring tracked state in line with the registry. Caller holds the user's
    /// transition lock.
    fn reconcile_locked(&self, user_id: i64, initial: Option<PresenceStatus>) -> Transition {
        let connected = self.registry.is_connected(user_id);
        let tracked = self.statuses.contains_key(&user_id);
        match (connected, tracked) {
            (true, false) => {
                let status = match initial {
                    Some(PresenceStatus::Offline) | None => PresenceStatus::Online,
                    Some(status) => status,
                };
                self.statuses.insert(user_id, status);
                Transition::CameOnline(status)
            }
            (false, true) => {
                self.statuses.remove(&user_id);
                Transition::WentOffline
            }
            _ => Transition::Unchanged,
        }
    }
}

/// Admit an authenticated connection and publish the resulting presence.
///
/// The connecting client always receives its own contact list. If this is the
/// user's first connection, the user's status is persisted and every
/// connected contact is told about it.
pub async fn connect(state: &AppState, handle: ConnectionHandle, initial: Option<PresenceStatus>) {
    let user = handle.user().clone();
    let count = state.connections.add(handle.clone());

    let transition = {
        let lock = state.presence.transition_lock(user.id);
        let _guard = lock.lock().await;
        let transition = state.presence.reconcile_locked(user.id, initial);
        if let Transition::CameOnline(status) = transition {
            persist(state, user.id, status, Some(handle.id().to_string())).await;
        }
        transition
    };

    tracing::info!(
        user_id = user.id,
        username = %user.username,
        connection = %handle.id(),
        connections = count,
        "User connected"
    );

    match contacts::contact_list(state, user.id).await {
        Ok(list) => state
            .broadcaster
            .send_to_connection(&handle, &ServerEvent::ContactList(list)),
        Err(e) => tracing::warn!(user_id = user.id, error = %e, "Failed to load contact list"),
    }

    if let Transition::CameOnline(status) = transition {
        notify_contacts(state, &user, status).await;
    }
}

/// Remove a connection and publish the resulting presence.
///
/// Registry removal happens before anything else so the closing connection
/// is never a fanout target again.
pub async fn disconnect(state: &AppState, handle: &ConnectionHandle) {
    let user = handle.user().clone();
    let outcome = state.connections.remove(handle);
    if outcome == RemoveOutcome::Absent {
        return;
    }

    let transition = {
        let lock = state.presence.transition_lock(user.id);
        let _guard = lock.lock().await;
        let transition = state.presence.reconcile_locked(user.id, None);
        if transition == Transition::WentOffline {
            persist(state, user.id, PresenceStatus::Offline, None).await;
        }
        transition
    };
    if transition == Transition::WentOffline {
        state.presence.release_transition_lock(user.id);
    }

    tracing::info!(
        user_id = user.id,
        username = %user.username,
        connection = %handle.id(),
        outcome = ?outcome,
        "User disconnected"
    );

    if transition == Transition::WentOffline {
        notify_contacts(state, &user, PresenceStatus::Offline).await;
    }
}

/// Explicit status change by a connected user. Broadcast to everyone.
pub async fn set_status(
    state: &AppState,
    user: &UserIdentity,
    status: PresenceStatus,
) -> Result<(), ChatError> {
    if status == PresenceStatus::Offline {
        return Err(ChatError::Validation(
            "status must be one of online, away, busy".into(),
        ));
    }

    let connected = {
        let lock = state.presence.transition_lock(user.id);
        let _guard = lock.lock().await;
        let connected = state.connections.is_connected(user.id);
        if connected {
            // Tracked state changes only once the write went through.
            users::update_status(&state.db, user.id, status.as_str()).await?;
            state.presence.statuses.insert(user.id, status);
        }
        connected
    };
    if !connected {
        state.presence.release_transition_lock(user.id);
        return Err(ChatError::Forbidden(
            "status can only be set while connected".into(),
        ));
    }

    tracing::debug!(user_id = user.id, status = status.as_str(), "Status changed");
    state.broadcaster.broadcast_all(&ServerEvent::UserStatusChanged {
        user_id: user.id,
        status,
    });
    Ok(())
}

/// Persist derived presence. Storage is a cache, so failures are logged only.
async fn persist(state: &AppState, user_id: i64, status: PresenceStatus, handle: Option<String>) {
    if let Err(e) = users::update_status(&state.db, user_id, status.as_str()).await {
        tracing::warn!(user_id, error = %e, "Failed to persist presence");
    }
    if let Err(e) = users::update_connection_handle(&state.db, user_id, handle).await {
        tracing::warn!(user_id, error = %e, "Failed to persist connection handle");
    }
}

/// Tell every connected contact about a presence change and refresh their lists.
async fn notify_contacts(state: &AppState, user: &UserIdentity, status: PresenceStatus) {
    let rows = match crate::db::contacts::find_contacts_for_user(&state.db, user.id).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(user_id = user.id, error = %e, "Failed to load contacts for presence fanout");
            return;
        }
    };

    let event = ServerEvent::UserStatusChanged {
        user_id: user.id,
        status,
    };
    for row in rows {
        if !state.connections.is_connected(row.contact_id) {
            continue;
        }
        state.broadcaster.send_to_user(row.contact_id, &event);
        contacts::push_contact_list(state, row.contact_id).await;
    }
}
