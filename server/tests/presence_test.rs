//! Presence derivation and contact notification.

mod common;

use chatline_server::chat::presence::{self, PresenceStatus};
use chatline_server::db::{contacts, users};
use chatline_server::error::ChatError;
use common::{seed_user, test_state, FakeConn};

#[tokio::test]
async fn test_first_connection_brings_user_online() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;

    assert_eq!(state.presence.get(alice.id), PresenceStatus::Offline);

    let mut conn = FakeConn::connect(&state, &alice).await;
    assert_eq!(state.presence.get(alice.id), PresenceStatus::Online);

    let stored = users::find_user_by_id(&state.db, alice.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "online");
    assert_eq!(stored.connection_handle, Some(conn.handle.id().to_string()));

    // The connecting client always receives its own contact list.
    let list = conn.expect("contact-list").await;
    assert_eq!(list["data"], serde_json::json!([]));
}

#[tokio::test]
async fn test_initial_status_is_announced() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;

    let _conn = FakeConn::connect_with(&state, &alice, Some(PresenceStatus::Away)).await;
    assert_eq!(state.presence.get(alice.id), PresenceStatus::Away);
}

#[tokio::test]
async fn test_offline_only_after_last_connection() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;
    contacts::create_contact_pair(&state.db, alice.id, bob.id).await.unwrap();

    let mut bob_conn = FakeConn::connect(&state, &bob).await;
    let phone = FakeConn::connect(&state, &alice).await;
    let laptop = FakeConn::connect(&state, &alice).await;
    bob_conn.drain().await;

    phone.disconnect(&state).await;
    assert_eq!(state.presence.get(alice.id), PresenceStatus::Online);
    assert!(
        bob_conn.event_names().await.is_empty(),
        "closing one of several devices must not announce anything"
    );

    laptop.disconnect(&state).await;
    assert_eq!(state.presence.get(alice.id), PresenceStatus::Offline);

    let changed = bob_conn.expect("user-status-changed").await;
    assert_eq!(changed["data"]["userId"], alice.id);
    assert_eq!(changed["data"]["status"], "offline");

    let list = bob_conn.expect("contact-list").await;
    assert_eq!(list["data"][0]["contact"]["status"], "offline");

    let stored = users::find_user_by_id(&state.db, alice.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "offline");
    assert_eq!(stored.connection_handle, None);
}

#[tokio::test]
async fn test_contacts_notified_when_user_comes_online() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;
    let carol = seed_user(&state, "carol").await;
    contacts::create_contact_pair(&state.db, alice.id, bob.id).await.unwrap();

    let mut bob_conn = FakeConn::connect(&state, &bob).await;
    let mut carol_conn = FakeConn::connect(&state, &carol).await;
    bob_conn.drain().await;
    carol_conn.drain().await;

    let _alice_conn = FakeConn::connect(&state, &alice).await;

    let changed = bob_conn.expect("user-status-changed").await;
    assert_eq!(changed["data"]["status"], "online");
    let list = bob_conn.expect("contact-list").await;
    assert_eq!(list["data"][0]["contact"]["username"], "alice");
    assert_eq!(list["data"][0]["contact"]["status"], "online");

    // Not a contact: hears nothing.
    assert!(carol_conn.event_names().await.is_empty());
}

#[tokio::test]
async fn test_set_status_rules() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;

    let err = presence::set_status(&state, &alice, PresenceStatus::Busy).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));

    let _alice_conn = FakeConn::connect(&state, &alice).await;
    let mut bob_conn = FakeConn::connect(&state, &bob).await;
    bob_conn.drain().await;

    let err = presence::set_status(&state, &alice, PresenceStatus::Offline).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    presence::set_status(&state, &alice, PresenceStatus::Busy).await.unwrap();
    assert_eq!(state.presence.get(alice.id), PresenceStatus::Busy);

    // Status changes reach every connection, contact or not.
    let changed = bob_conn.expect("user-status-changed").await;
    assert_eq!(changed["data"]["userId"], alice.id);
    assert_eq!(changed["data"]["status"], "busy");

    let stored = users::find_user_by_id(&state.db, alice.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "busy");
}

#[tokio::test]
async fn test_reconnect_race_keeps_user_online() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;

    for _ in 0..20 {
        let old = FakeConn::connect(&state, &alice).await;

        let replacement = FakeConn::new(&alice);
        let s1 = state.clone();
        let s2 = state.clone();
        let old_handle = old.handle.clone();
        let new_handle = replacement.handle.clone();
        let leave = tokio::spawn(async move { presence::disconnect(&s1, &old_handle).await });
        let join = tokio::spawn(async move { presence::connect(&s2, new_handle, None).await });
        leave.await.unwrap();
        join.await.unwrap();

        assert_eq!(state.presence.get(alice.id), PresenceStatus::Online);
        let stored = users::find_user_by_id(&state.db, alice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "online");

        replacement.disconnect(&state).await;
        assert_eq!(state.presence.get(alice.id), PresenceStatus::Offline);
    }
}

#[tokio::test]
async fn test_transition_locks_released_once_offline() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;

    let phone = FakeConn::connect(&state, &alice).await;
    let laptop = FakeConn::connect(&state, &alice).await;
    let bob_conn = FakeConn::connect(&state, &bob).await;
    assert_eq!(state.presence.transition_lock_count(), 2);

    phone.disconnect(&state).await;
    assert_eq!(state.presence.transition_lock_count(), 2, "alice still has a device");

    laptop.disconnect(&state).await;
    assert_eq!(state.presence.transition_lock_count(), 1);

    // A rejected status change by an offline user leaves nothing behind.
    let err = presence::set_status(&state, &alice, PresenceStatus::Away).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));
    assert_eq!(state.presence.transition_lock_count(), 1);

    bob_conn.disconnect(&state).await;
    assert_eq!(state.presence.transition_lock_count(), 0);
}

#[tokio::test]
async fn test_failed_status_write_keeps_tracked_status() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;
    let _alice_conn = FakeConn::connect(&state, &alice).await;
    let mut bob_conn = FakeConn::connect(&state, &bob).await;
    bob_conn.drain().await;

    // Without a row to update, the write fails.
    let id = alice.id;
    chatline_server::db::call(&state.db, move |conn| {
        conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
        Ok(())
    })
    .await
    .unwrap();

    let err = presence::set_status(&state, &alice, PresenceStatus::Busy).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
    assert_eq!(state.presence.get(alice.id), PresenceStatus::Online);
    assert!(bob_conn.event_names().await.is_empty());
}
