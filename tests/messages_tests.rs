mod common;

use axum::http::StatusCode;
use common::*;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn send_and_fetch_message_assigns_increasing_sequence_numbers() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();

    let first = send_message(app.clone(), &token_a, conversation_id, "hello").await;
    let second = send_message(app.clone(), &token_a, conversation_id, "how are you").await;

    assert!(second["sequence_number"].as_i64().unwrap() > first["sequence_number"].as_i64().unwrap());
}

#[tokio::test]
#[serial]
async fn non_member_cannot_send_to_conversation() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let (token_outsider, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    whoami(app.clone(), &token_outsider).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();

    let (status, body) = post_json_authed(
        app.clone(),
        "/messages",
        &token_outsider,
        serde_json::json!({ "conversation_id": conversation_id, "content": "sneaking in" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[tokio::test]
#[serial]
async fn editing_a_message_sets_is_edited() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();
    let message = send_message(app.clone(), &token_a, conversation_id, "typo hear").await;
    let message_id = message["id"].as_str().unwrap();

    let (status, body) = put_json_authed(
        app.clone(),
        &format!("/messages/{message_id}"),
        &token_a,
        serde_json::json!({ "content": "typo here" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["content"], "typo here");
    assert_eq!(body["is_edited"], true);
}

#[tokio::test]
#[serial]
async fn only_the_sender_can_edit_a_message() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();
    let message = send_message(app.clone(), &token_a, conversation_id, "original").await;
    let message_id = message["id"].as_str().unwrap();

    let (status, body) = put_json_authed(
        app.clone(),
        &format!("/messages/{message_id}"),
        &token_b,
        serde_json::json!({ "content": "hijacked" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[tokio::test]
#[serial]
async fn deleting_for_everyone_requires_sender() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();
    let message = send_message(app.clone(), &token_a, conversation_id, "delete me").await;
    let message_id = message["id"].as_str().unwrap();

    let (status_other, body_other) = delete_authed(app.clone(), &format!("/messages/{message_id}"), &token_b).await;
    assert_eq!(status_other, StatusCode::FORBIDDEN, "{body_other}");

    let (status_sender, body_sender) = delete_authed(app.clone(), &format!("/messages/{message_id}"), &token_a).await;
    assert_eq!(status_sender, StatusCode::NO_CONTENT, "{body_sender}");
}

#[tokio::test]
#[serial]
async fn deleting_for_me_is_available_to_any_member_and_idempotent() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();
    let message = send_message(app.clone(), &token_a, conversation_id, "hide this from me").await;
    let message_id = message["id"].as_str().unwrap();

    let (status_first, body_first) =
        delete_authed(app.clone(), &format!("/messages/{message_id}?scope=me"), &token_b).await;
    assert_eq!(status_first, StatusCode::NO_CONTENT, "{body_first}");

    let (status_second, body_second) =
        delete_authed(app.clone(), &format!("/messages/{message_id}?scope=me"), &token_b).await;
    assert_eq!(status_second, StatusCode::NO_CONTENT, "{body_second}");
}

#[tokio::test]
#[serial]
async fn listing_messages_returns_a_page_envelope() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();
    send_message(app.clone(), &token_a, conversation_id, "one").await;
    send_message(app.clone(), &token_a, conversation_id, "two").await;

    let (status, body) = get_authed(
        app.clone(),
        &format!("/messages/conversations/{conversation_id}/messages"),
        &token_a,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"].as_array().unwrap().len() >= 2);
    assert!(body["pagination"]["limit"].as_i64().unwrap() > 0);
}

#[tokio::test]
#[serial]
async fn search_finds_message_by_content() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();
    send_message(app.clone(), &token_a, conversation_id, "the quarterly roadmap review is tomorrow").await;

    let (status, body) = post_json_authed(
        app.clone(),
        "/messages/search",
        &token_a,
        serde_json::json!({ "query": "roadmap" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.as_array().unwrap().iter().any(|m| m["content"]
        .as_str()
        .unwrap()
        .contains("roadmap")));
}

#[tokio::test]
#[serial]
async fn mark_read_advances_unread_count_to_zero() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();
    let message = send_message(app.clone(), &token_a, conversation_id, "ping").await;

    let (status_unread, body_unread) = get_authed(
        app.clone(),
        &format!("/messages/conversations/{conversation_id}/unread-count"),
        &token_b,
    )
    .await;
    assert_eq!(status_unread, StatusCode::OK, "{body_unread}");
    assert_eq!(body_unread["count"], 1);

    let (status_mark, body_mark) = post_json_authed(
        app.clone(),
        "/messages/mark-read",
        &token_b,
        serde_json::json!({ "message_ids": [message["id"]] }),
    )
    .await;
    assert_eq!(status_mark, StatusCode::NO_CONTENT, "{body_mark}");

    let (status_after, body_after) = get_authed(
        app.clone(),
        &format!("/messages/conversations/{conversation_id}/unread-count"),
        &token_b,
    )
    .await;
    assert_eq!(status_after, StatusCode::OK, "{body_after}");
    assert_eq!(body_after["count"], 0);
}

#[tokio::test]
#[serial]
async fn replying_to_a_message_outside_the_conversation_is_rejected() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let (token_c, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let user_c = whoami(app.clone(), &token_c).await;
    let convo_ab = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let convo_ac = create_dm(app.clone(), &token_a, user_c["id"].as_str().unwrap()).await;

    let message_in_ab = send_message(app.clone(), &token_a, convo_ab["id"].as_str().unwrap(), "original thread").await;

    let (status, body) = post_json_authed(
        app.clone(),
        "/messages",
        &token_a,
        serde_json::json!({
            "conversation_id": convo_ac["id"],
            "content": "cross-conversation reply",
            "reply_to_id": message_in_ab["id"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}
