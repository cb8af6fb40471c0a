//! Contact and friend-request flows over the REST surface, with realtime
//! fanout observed on registered connections.

mod common;

use chatline_server::auth::jwt::{issue_access_token, Claims};
use chatline_server::chat::contacts::{self, RequestAction};
use chatline_server::db::contacts as store;
use chatline_server::error::ChatError;
use common::{seed_user, start_test_server, test_state, token_for, FakeConn, TEST_SECRET};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_health_check() {
    let server = start_test_server().await;
    let resp = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_requires_bearer_token() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/contacts", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .get(format!("{}/api/contacts", server.base_url))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rest_rejections_name_the_failure() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let alice = seed_user(&server.state, "alice").await;
    let url = format!("{}/api/users/me", server.base_url);

    let now = chrono::Utc::now().timestamp();
    let expired = encode(
        &Header::default(),
        &Claims {
            user_id: alice.id,
            username: alice.username.clone(),
            iat: now - 7200,
            exp: now - 3600,
        },
        &EncodingKey::from_secret(TEST_SECRET),
    )
    .unwrap();
    let ghost = issue_access_token(TEST_SECRET, 9999, "ghost").unwrap();

    let cases = [
        (Some(format!("Bearer {}", expired)), "credential expired"),
        (Some(format!("Bearer {}", ghost)), "unknown user"),
        (Some("Basic YWxpY2U6cHc=".to_string()), "invalid credential"),
        (None, "missing credential"),
    ];
    for (header, reason) in cases {
        let mut req = client.get(&url);
        if let Some(header) = header {
            req = req.header("Authorization", header);
        }
        let resp = req.send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "unauthorized");
        assert!(
            body["message"].as_str().unwrap().contains(reason),
            "{} not in {}",
            reason,
            body["message"]
        );
    }
}

#[tokio::test]
async fn test_current_user_reports_live_presence() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let alice = seed_user(&server.state, "alice").await;
    let url = format!("{}/api/users/me", server.base_url);

    let me: Value = client
        .get(&url)
        .bearer_auth(token_for(&alice))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me, json!({ "id": alice.id, "username": "alice", "status": "offline" }));

    let _conn = FakeConn::connect_with(
        &server.state,
        &alice,
        Some(chatline_server::chat::presence::PresenceStatus::Away),
    )
    .await;
    let me: Value = client
        .get(&url)
        .bearer_auth(token_for(&alice))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["status"], "away");
}

#[tokio::test]
async fn test_friend_request_accept_flow() {
    let server = start_test_server().await;
    let state = &server.state;
    let client = reqwest::Client::new();
    let alice = seed_user(state, "alice").await;
    let bob = seed_user(state, "bob").await;
    let carol = seed_user(state, "carol").await;

    let mut alice_conn = FakeConn::connect(state, &alice).await;
    let mut bob_conn = FakeConn::connect(state, &bob).await;
    alice_conn.drain().await;
    bob_conn.drain().await;

    let resp = client
        .post(format!("{}/api/friend-requests", server.base_url))
        .bearer_auth(token_for(&alice))
        .json(&json!({ "username": "bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let request: Value = resp.json().await.unwrap();
    let request_id = request["id"].as_i64().unwrap();
    assert_eq!(request["status"], "pending");

    let pushed = bob_conn.expect("friend-request").await;
    assert_eq!(pushed["data"]["fromUsername"], "alice");
    assert_eq!(pushed["data"]["id"], request_id);

    // Duplicate in either direction conflicts.
    for (from, to) in [(&alice, "bob"), (&bob, "alice")] {
        let resp = client
            .post(format!("{}/api/friend-requests", server.base_url))
            .bearer_auth(token_for(from))
            .json(&json!({ "username": to }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    let incoming: Vec<Value> = client
        .get(format!("{}/api/friend-requests", server.base_url))
        .bearer_auth(token_for(&bob))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(incoming.len(), 1);

    // Only the recipient may answer.
    let resp = client
        .put(format!("{}/api/friend-requests/{}", server.base_url, request_id))
        .bearer_auth(token_for(&carol))
        .json(&json!({ "action": "accept" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = client
        .put(format!("{}/api/friend-requests/{}", server.base_url, request_id))
        .bearer_auth(token_for(&bob))
        .json(&json!({ "action": "accept" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let answered: Value = resp.json().await.unwrap();
    assert_eq!(answered["status"], "accepted");

    let accepted = alice_conn.expect("friend-request-accepted").await;
    assert_eq!(accepted["data"]["requestId"], request_id);
    assert_eq!(accepted["data"]["contact"]["username"], "bob");
    assert_eq!(accepted["data"]["contact"]["status"], "online");
    let list = alice_conn.expect("contact-list").await;
    assert_eq!(list["data"][0]["contact"]["username"], "bob");
    let list = bob_conn.expect("contact-list").await;
    assert_eq!(list["data"][0]["contact"]["username"], "alice");

    // Answering twice conflicts.
    let resp = client
        .put(format!("{}/api/friend-requests/{}", server.base_url, request_id))
        .bearer_auth(token_for(&bob))
        .json(&json!({ "action": "reject" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let contacts: Vec<Value> = client
        .get(format!("{}/api/contacts", server.base_url))
        .bearer_auth(token_for(&alice))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0]["contact"]["id"], bob.id);
}

#[tokio::test]
async fn test_friend_request_reject_flow() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;
    let mut alice_conn = FakeConn::connect(&state, &alice).await;
    alice_conn.drain().await;

    let request = contacts::send_friend_request(&state, &alice, "bob").await.unwrap();
    contacts::respond(&state, &bob, request.id, RequestAction::Reject)
        .await
        .unwrap();

    let rejected = alice_conn.expect("friend-request-rejected").await;
    assert_eq!(rejected["data"]["requestId"], request.id);
    assert!(!store::contact_exists(&state.db, alice.id, bob.id).await.unwrap());

    // A rejected request does not block a new one.
    contacts::send_friend_request(&state, &alice, "bob").await.unwrap();
}

#[tokio::test]
async fn test_friend_request_validation() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;

    let err = contacts::send_friend_request(&state, &alice, "alice").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let err = contacts::send_friend_request(&state, &alice, "nobody").await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));

    let err = contacts::respond(&state, &bob, 9999, RequestAction::Accept).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));

    store::create_contact_pair(&state.db, alice.id, bob.id).await.unwrap();
    let err = contacts::send_friend_request(&state, &bob, "alice").await.unwrap_err();
    assert!(matches!(err, ChatError::Conflict(_)));
}

#[tokio::test]
async fn test_concurrent_requests_create_one_pending() {
    let (state, _dir) = test_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let state = state.clone();
        let (from, to) = if i % 2 == 0 {
            (alice.clone(), "bob")
        } else {
            (bob.clone(), "alice")
        };
        tasks.push(tokio::spawn(async move {
            contacts::send_friend_request(&state, &from, to).await
        }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(ChatError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(created, 1);
    assert!(store::find_pending_request(&state.db, alice.id, bob.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_direct_add_over_rest() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let alice = seed_user(&server.state, "alice").await;
    let bob = seed_user(&server.state, "bob").await;
    let mut bob_conn = FakeConn::connect(&server.state, &bob).await;
    bob_conn.drain().await;

    let resp = client
        .post(format!("{}/api/contacts", server.base_url))
        .bearer_auth(token_for(&alice))
        .json(&json!({ "username": "bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let contact: Value = resp.json().await.unwrap();
    assert_eq!(contact["username"], "bob");
    assert_eq!(contact["status"], "online");

    let list = bob_conn.expect("contact-list").await;
    assert_eq!(list["data"][0]["contact"]["username"], "alice");
    assert_eq!(list["data"][0]["contact"]["status"], "offline");
    bob_conn.expect("contact-notification").await;

    let resp = client
        .post(format!("{}/api/contacts", server.base_url))
        .bearer_auth(token_for(&alice))
        .json(&json!({ "username": "bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_status_and_online_users_over_rest() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let alice = seed_user(&server.state, "alice").await;
    let bob = seed_user(&server.state, "bob").await;
    let _carol = seed_user(&server.state, "carol").await;
    store::create_contact_pair(&server.state.db, alice.id, bob.id).await.unwrap();

    // Not connected: cannot set a status.
    let resp = client
        .put(format!("{}/api/users/status", server.base_url))
        .bearer_auth(token_for(&alice))
        .json(&json!({ "status": "away" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let _alice_conn = FakeConn::connect(&server.state, &alice).await;
    let _bob_conn = FakeConn::connect(&server.state, &bob).await;

    let resp = client
        .put(format!("{}/api/users/status", server.base_url))
        .bearer_auth(token_for(&alice))
        .json(&json!({ "status": "away" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let online: Value = client
        .get(format!("{}/api/users/online", server.base_url))
        .bearer_auth(token_for(&bob))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(online["onlineCount"], 2);
    let users = online["users"].as_array().unwrap();
    assert_eq!(users.len(), 2, "the caller is not listed");
    let alice_entry = users.iter().find(|u| u["username"] == "alice").unwrap();
    assert_eq!(alice_entry["status"], "away");
    assert_eq!(alice_entry["isContact"], true);
    let carol_entry = users.iter().find(|u| u["username"] == "carol").unwrap();
    assert_eq!(carol_entry["status"], "offline");
    assert_eq!(carol_entry["isContact"], false);
}

#[tokio::test]
async fn test_message_history_and_clear_over_rest() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let alice = seed_user(&server.state, "alice").await;
    let _bob = seed_user(&server.state, "bob").await;

    for text in ["one", "two", "three"] {
        chatline_server::chat::messages::send_message(&server.state, &alice, text, None)
            .await
            .unwrap();
    }
    chatline_server::chat::messages::send_message(&server.state, &alice, "secret", Some("bob"))
        .await
        .unwrap();

    let history: Value = client
        .get(format!("{}/api/messages?type=public&limit=2", server.base_url))
        .bearer_auth(token_for(&alice))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let contents: Vec<&str> = history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["two", "three"]);

    let resp = client
        .get(format!("{}/api/messages?type=private", server.base_url))
        .bearer_auth(token_for(&alice))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .delete(format!("{}/api/messages/clear?type=private&contact=bob", server.base_url))
        .bearer_auth(token_for(&alice))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cleared: Value = resp.json().await.unwrap();
    assert_eq!(cleared["removed"], 1);
}
