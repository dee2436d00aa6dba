mod common;

use axum::http::StatusCode;
use common::*;
use serial_test::serial;

async fn setup_message(app: axum::Router, token_a: &str, token_b: &str) -> (String, serde_json::Value) {
    let user_b = whoami(app.clone(), token_b).await;
    let convo = create_dm(app.clone(), token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap().to_string();
    let message = send_message(app.clone(), token_a, &conversation_id, "react to this").await;
    (conversation_id, message)
}

#[tokio::test]
#[serial]
async fn adding_a_reaction_then_removing_it_succeeds() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let (_, message) = setup_message(app.clone(), &token_a, &token_b).await;
    let message_id = message["id"].as_str().unwrap();

    let (status_add, body_add) = post_json_authed(
        app.clone(),
        &format!("/messages/{message_id}/reactions"),
        &token_b,
        serde_json::json!({ "emoji": "👍" }),
    )
    .await;
    assert_eq!(status_add, StatusCode::NO_CONTENT, "{body_add}");

    let (status_remove, body_remove) = delete_authed(
        app.clone(),
        &format!("/messages/{message_id}/reactions/%F0%9F%91%8D"),
        &token_b,
    )
    .await;
    assert_eq!(status_remove, StatusCode::NO_CONTENT, "{body_remove}");
}

#[tokio::test]
#[serial]
async fn reacting_with_the_same_emoji_twice_conflicts() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let (_, message) = setup_message(app.clone(), &token_a, &token_b).await;
    let message_id = message["id"].as_str().unwrap();

    let (status_first, body_first) = post_json_authed(
        app.clone(),
        &format!("/messages/{message_id}/reactions"),
        &token_b,
        serde_json::json!({ "emoji": "🔥" }),
    )
    .await;
    assert_eq!(status_first, StatusCode::NO_CONTENT, "{body_first}");

    let (status_second, body_second) = post_json_authed(
        app.clone(),
        &format!("/messages/{message_id}/reactions"),
        &token_b,
        serde_json::json!({ "emoji": "🔥" }),
    )
    .await;
    assert_eq!(status_second, StatusCode::CONFLICT, "{body_second}");
}

#[tokio::test]
#[serial]
async fn switching_emoji_replaces_the_existing_reaction() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let (_, message) = setup_message(app.clone(), &token_a, &token_b).await;
    let message_id = message["id"].as_str().unwrap();

    let (status_first, body_first) = post_json_authed(
        app.clone(),
        &format!("/messages/{message_id}/reactions"),
        &token_b,
        serde_json::json!({ "emoji": "😀" }),
    )
    .await;
    assert_eq!(status_first, StatusCode::NO_CONTENT, "{body_first}");

    let (status_switch, body_switch) = post_json_authed(
        app.clone(),
        &format!("/messages/{message_id}/reactions"),
        &token_b,
        serde_json::json!({ "emoji": "😎" }),
    )
    .await;
    assert_eq!(status_switch, StatusCode::NO_CONTENT, "{body_switch}");
}

#[tokio::test]
#[serial]
async fn removing_a_reaction_that_does_not_exist_is_not_found() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let (_, message) = setup_message(app.clone(), &token_a, &token_b).await;
    let message_id = message["id"].as_str().unwrap();

    let (status, body) = delete_authed(
        app.clone(),
        &format!("/messages/{message_id}/reactions/%E2%9D%8C"),
        &token_b,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
}
