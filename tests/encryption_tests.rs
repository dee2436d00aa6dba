mod common;

use axum::http::StatusCode;
use common::*;
use serial_test::serial;

fn sample_bundle(one_time_prekeys: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "identity_key": "identity-pub-key",
        "signed_prekey": "signed-prekey-pub",
        "signed_prekey_signature": "signature-bytes",
        "signed_prekey_id": 1,
        "one_time_prekeys": one_time_prekeys,
    })
}

#[tokio::test]
#[serial]
async fn fetching_a_bundle_consumes_one_time_prekey_once() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_a = whoami(app.clone(), &token_a).await;
    let user_a_id = user_a["id"].as_str().unwrap();

    let (status_upload, body_upload) = post_json_authed(
        app.clone(),
        "/encryption/keys/bundle",
        &token_a,
        sample_bundle(serde_json::json!([
            { "prekey_id": 1, "public_key": "otp-1" },
            { "prekey_id": 2, "public_key": "otp-2" },
        ])),
    )
    .await;
    assert_eq!(status_upload, StatusCode::NO_CONTENT, "{body_upload}");

    let (status_count, body_count) = get_authed(app.clone(), "/encryption/keys/prekeys/count", &token_a).await;
    assert_eq!(status_count, StatusCode::OK, "{body_count}");
    assert_eq!(body_count["count"], 2);

    let (status_fetch_1, bundle_1) = get_authed(
        app.clone(),
        &format!("/encryption/keys/bundle/{user_a_id}"),
        &token_b,
    )
    .await;
    assert_eq!(status_fetch_1, StatusCode::OK, "{bundle_1}");
    let consumed_id = bundle_1["one_time_prekey"]["prekey_id"].clone();
    assert!(!consumed_id.is_null());

    let (status_fetch_2, bundle_2) = get_authed(
        app.clone(),
        &format!("/encryption/keys/bundle/{user_a_id}"),
        &token_b,
    )
    .await;
    assert_eq!(status_fetch_2, StatusCode::OK, "{bundle_2}");
    assert_ne!(
        bundle_2["one_time_prekey"]["prekey_id"], consumed_id,
        "the same one-time prekey must never be handed out twice"
    );

    let (_, body_count_after) = get_authed(app.clone(), "/encryption/keys/prekeys/count", &token_a).await;
    assert_eq!(body_count_after["count"], 0);
}

#[tokio::test]
#[serial]
async fn fetching_a_bundle_with_no_remaining_prekeys_returns_null() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_a = whoami(app.clone(), &token_a).await;
    let user_a_id = user_a["id"].as_str().unwrap();

    post_json_authed(app.clone(), "/encryption/keys/bundle", &token_a, sample_bundle(serde_json::json!([]))).await;

    let (status, body) = get_authed(app.clone(), &format!("/encryption/keys/bundle/{user_a_id}"), &token_b).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["one_time_prekey"].is_null());
    assert_eq!(body["identity_key"], "identity-pub-key");
}

#[tokio::test]
#[serial]
async fn fetching_a_bundle_for_a_user_with_none_uploaded_is_not_found() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_a = whoami(app.clone(), &token_a).await;
    let user_a_id = user_a["id"].as_str().unwrap();

    let (status, body) = get_authed(app.clone(), &format!("/encryption/keys/bundle/{user_a_id}"), &token_b).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
}

#[tokio::test]
#[serial]
async fn distributing_a_sender_key_relays_to_recipients_only() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    let convo = create_group(app.clone(), &token_a, "Encrypted group", &[user_b["id"].as_str().unwrap()]).await;
    let conversation_id = convo["id"].as_str().unwrap();

    let (status, body) = post_json_authed(
        app.clone(),
        "/encryption/sender-keys/distribute",
        &token_a,
        serde_json::json!({
            "conversation_id": conversation_id,
            "sender_key_id": "sk-1",
            "public_key": "sender-pub-key",
            "recipient_ids": [user_b["id"]],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT, "{body}");

    let (status_fetch, body_fetch) = get_authed(
        app.clone(),
        &format!("/encryption/sender-keys/{conversation_id}"),
        &token_b,
    )
    .await;
    assert_eq!(status_fetch, StatusCode::OK, "{body_fetch}");
    let keys = body_fetch.as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["sender_key_id"], "sk-1");
}

#[tokio::test]
#[serial]
async fn non_member_cannot_list_sender_keys() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let (token_b, _) = mint_fresh_user();
    let (token_outsider, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());

    let user_b = whoami(app.clone(), &token_b).await;
    whoami(app.clone(), &token_outsider).await;
    let convo = create_group(app.clone(), &token_a, "Private group", &[user_b["id"].as_str().unwrap()]).await;
    let conversation_id = convo["id"].as_str().unwrap();

    let (status, body) = get_authed(
        app.clone(),
        &format!("/encryption/sender-keys/{conversation_id}"),
        &token_outsider,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[tokio::test]
#[serial]
async fn key_backup_round_trips_and_reports_status() {
    let pool = test_pool().await;
    let (token_a, _) = mint_fresh_user();
    let app = create_test_app(pool.clone());
    whoami(app.clone(), &token_a).await;

    let (status_before, body_before) = get_authed(app.clone(), "/encryption/keys/backup/status", &token_a).await;
    assert_eq!(status_before, StatusCode::OK, "{body_before}");
    assert_eq!(body_before["exists"], false);

    let (status_upload, body_upload) = post_json_authed(
        app.clone(),
        "/encryption/keys/backup",
        &token_a,
        serde_json::json!({
            "encrypted_data": "ciphertext",
            "nonce": "nonce-bytes",
            "salt": "salt-bytes",
            "kdf_name": "argon2id",
            "identity_key_hash": "hash-of-identity-key",
        }),
    )
    .await;
    assert_eq!(status_upload, StatusCode::NO_CONTENT, "{body_upload}");

    let (status_after, body_after) = get_authed(app.clone(), "/encryption/keys/backup/status", &token_a).await;
    assert_eq!(status_after, StatusCode::OK, "{body_after}");
    assert_eq!(body_after["exists"], true);

    let (status_fetch, body_fetch) = get_authed(app.clone(), "/encryption/keys/backup", &token_a).await;
    assert_eq!(status_fetch, StatusCode::OK, "{body_fetch}");
    assert_eq!(body_fetch["encrypted_data"], "ciphertext");
}
