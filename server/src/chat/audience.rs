//! Who receives an outbound event.

use crate::chat::events::ServerEvent;
use crate::db::models::Message;
use crate::ws::broadcast::Broadcaster;
use crate::ws::ConnectionHandle;

#[derive(Debug, Clone)]
pub enum Audience {
    Everyone,
    EveryoneExcept(ConnectionHandle),
    /// Every connection of each listed user. Ids are unique.
    Users(Vec<i64>),
    Connection(ConnectionHandle),
    Nobody,
}

impl Audience {
    /// Users audience with duplicates removed, first occurrence kept.
    pub fn users(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut unique: Vec<i64> = Vec::new();
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Audience::Users(unique)
    }

    /// Audience of a stored message and of any change made to it.
    pub fn for_message(msg: &Message) -> Self {
        match msg.receiver_id {
            Some(receiver) if msg.is_private => Audience::users([receiver, msg.sender_id]),
            _ => Audience::Everyone,
        }
    }
}

pub fn deliver(broadcaster: &dyn Broadcaster, audience: &Audience, event: &ServerEvent) {
    match audience {
        Audience::Everyone => broadcaster.broadcast_all(event),
        Audience::EveryoneExcept(conn) => broadcaster.broadcast_except(conn, event),
        Audience::Users(ids) => {
            for id in ids {
                broadcaster.send_to_user(*id, event);
            }
        }
        Audience::Connection(conn) => broadcaster.send_to_connection(conn, event),
        Audience::Nobody => {}
    }
}
