mod common;

use axum::http::StatusCode;
use common::*;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn preferences_default_to_enabled_on_first_fetch() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());
    whoami(app.clone(), &token_a).await;

    let (status, body) = get_authed(app.clone(), "/notifications/preferences", &token_a).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["push_enabled"], true);
    assert_eq!(body["email_enabled"], true);
    assert_eq!(body["mention_only"], false);
}

#[tokio::test]
#[serial]
async fn updating_preferences_persists_partial_changes() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());
    whoami(app.clone(), &token_a).await;

    let (status, body) = put_json_authed(
        app.clone(),
        "/notifications/preferences",
        &token_a,
        serde_json::json!({ "mention_only": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["mention_only"], true);
    assert_eq!(body["push_enabled"], true, "fields omitted from the patch must be left untouched");
}

#[tokio::test]
#[serial]
async fn muting_then_unmuting_a_conversation_round_trips() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();

    let (status_mute, body_mute) = post_json_authed(
        app.clone(),
        &format!("/notifications/conversations/{conversation_id}/mute"),
        &token_a,
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status_mute, StatusCode::OK, "{body_mute}");

    let (status_list, body_list) = get_authed(app.clone(), "/notifications/muted-conversations", &token_a).await;
    assert_eq!(status_list, StatusCode::OK, "{body_list}");
    assert!(body_list
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["conversation_id"] == convo["id"]));

    let (status_unmute, body_unmute) = delete_authed(
        app.clone(),
        &format!("/notifications/conversations/{conversation_id}/mute"),
        &token_a,
    )
    .await;
    assert_eq!(status_unmute, StatusCode::NO_CONTENT, "{body_unmute}");

    let (_, body_list_after) = get_authed(app.clone(), "/notifications/muted-conversations", &token_a).await;
    assert!(!body_list_after
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["conversation_id"] == convo["id"]));
}

#[tokio::test]
#[serial]
async fn an_expired_mute_does_not_appear_in_the_muted_list() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_dm(app.clone(), &token_a, user_b["id"].as_str().unwrap()).await;
    let conversation_id = convo["id"].as_str().unwrap();

    let (status, body) = post_json_authed(
        app.clone(),
        &format!("/notifications/conversations/{conversation_id}/mute"),
        &token_a,
        serde_json::json!({ "until": "2000-01-01T00:00:00Z" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, body_list) = get_authed(app.clone(), "/notifications/muted-conversations", &token_a).await;
    assert!(!body_list
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["conversation_id"] == convo["id"]));
}
