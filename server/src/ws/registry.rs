//! Connection registry: the single source of truth for who is reachable.
//!
//! A user can have multiple concurrent connections (multiple devices/tabs).
//! Lock order is always `by_user` then `by_username`; no guard is ever held
//! across an `.await`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;

use super::ConnectionHandle;

/// Result of removing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The connection was not registered (already removed).
    Absent,
    /// Removed; the user still has this many live connections.
    Remaining(usize),
    /// Removed and it was the user's last connection; the user id was pruned.
    Last,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_user: DashMap<i64, Vec<ConnectionHandle>>,
    by_username: DashMap<String, i64>,
}

impl ConnectionRegistry {
    /// Register a connection. Returns the user's live connection count after the add.
    pub fn add(&self, handle: ConnectionHandle) -> usize {
        let user_id = handle.user().id;
        let username = handle.user().username.clone();

        let mut connections = self.by_user.entry(user_id).or_default();
        connections.push(handle);
        let count = connections.len();
        self.by_username.insert(username, user_id);
        drop(connections);

        tracing::debug!(user_id, connections = count, "Connection registered");
        count
    }

    /// Remove one connection. Idempotent.
    pub fn remove(&self, handle: &ConnectionHandle) -> RemoveOutcome {
        let user_id = handle.user().id;

        let outcome = match self.by_user.entry(user_id) {
            Entry::Vacant(_) => RemoveOutcome::Absent,
            Entry::Occupied(mut entry) => {
                let connections = entry.get_mut();
                let before = connections.len();
                connections.retain(|c| c.id() != handle.id());
                let remaining = connections.len();

                if remaining == before {
                    RemoveOutcome::Absent
                } else if remaining == 0 {
                    self.by_username
                        .remove_if(&handle.user().username, |_, id| *id == user_id);
                    entry.remove();
                    RemoveOutcome::Last
                } else {
                    RemoveOutcome::Remaining(remaining)
                }
            }
        };

        tracing::debug!(
            user_id,
            connection = %handle.id(),
            outcome = ?outcome,
            "Connection unregistered"
        );
        outcome
    }

    /// All live connections of a user (possibly empty).
    pub fn lookup_by_user(&self, user_id: i64) -> Vec<ConnectionHandle> {
        self.by_user
            .get(&user_id)
            .map(|connections| connections.value().clone())
            .unwrap_or_default()
    }

    /// First live connection of the user with this username, if connected.
    pub fn lookup_by_username(&self, username: &str) -> Option<ConnectionHandle> {
        // Copy the id out so the index guard is released before touching by_user.
        let user_id = self.by_username.get(username).map(|entry| *entry.value())?;
        self.by_user
            .get(&user_id)
            .and_then(|connections| connections.first().cloned())
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.by_user
            .get(&user_id)
            .map(|connections| !connections.is_empty())
            .unwrap_or(false)
    }

    pub fn all_user_ids(&self) -> HashSet<i64> {
        self.by_user.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of every live connection.
    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.by_user
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.by_user.iter().map(|entry| entry.value().len()).sum()
    }
}
