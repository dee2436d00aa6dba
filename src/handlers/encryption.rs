use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use super::shared::validation_error;
use crate::{
    auth::AuthUser,
    error::AppResult,
    models::{
        AddPreKeysDto, DistributeSenderKeyDto, GroupSenderKey, KeyBackup, KeyBundleDto,
        UploadConversationKeyBackupDto, UploadKeyBackupDto, UploadKeyBundleDto,
    },
    services::encryption_service,
    state::AppState,
};

/// POST /encryption/keys/bundle — upload the caller's identity key, signed
/// prekey, and a batch of one-time prekeys.
pub async fn upload_key_bundle(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UploadKeyBundleDto>,
) -> AppResult<StatusCode> {
    req.validate().map_err(validation_error)?;
    encryption_service::upload_key_bundle(&state, auth.user_id(), req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /encryption/keys/bundle/:user_id — fetch a peer's key bundle to start
/// a session. Consumes one one-time prekey from the pool, if any remain.
pub async fn fetch_key_bundle(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<KeyBundleDto>> {
    let dto = encryption_service::fetch_key_bundle(&state, user_id).await?;
    Ok(Json(dto))
}

pub async fn add_prekeys(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<AddPreKeysDto>,
) -> AppResult<StatusCode> {
    req.validate().map_err(validation_error)?;
    encryption_service::add_prekeys(&state, auth.user_id(), &req.prekeys).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn prekey_count(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Value>> {
    let count = encryption_service::prekey_count(&state, auth.user_id()).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn distribute_sender_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<DistributeSenderKeyDto>,
) -> AppResult<StatusCode> {
    req.validate().map_err(validation_error)?;
    encryption_service::distribute_sender_key(&state, auth.user_id(), req).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn fetch_sender_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<GroupSenderKey>>> {
    let keys = encryption_service::fetch_sender_keys(&state, conversation_id, auth.user_id()).await?;
    Ok(Json(keys))
}

pub async fn upload_key_backup(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UploadKeyBackupDto>,
) -> AppResult<StatusCode> {
    req.validate().map_err(validation_error)?;
    encryption_service::upload_key_backup(&state, auth.user_id(), req).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn fetch_key_backup(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<KeyBackup>> {
    let backup = encryption_service::fetch_key_backup(&state, auth.user_id()).await?;
    Ok(Json(backup))
}

pub async fn backup_status(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Value>> {
    match encryption_service::fetch_key_backup(&state, auth.user_id()).await {
        Ok(backup) => Ok(Json(json!({ "exists": true, "version": backup.version, "updated_at": backup.updated_at }))),
        Err(crate::error::AppError::NotFound(_)) => Ok(Json(json!({ "exists": false }))),
        Err(e) => Err(e),
    }
}

pub async fn upload_conversation_key_backup(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UploadConversationKeyBackupDto>,
) -> AppResult<StatusCode> {
    req.validate().map_err(validation_error)?;
    encryption_service::upload_conversation_key_backup(&state, auth.user_id(), req).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn fetch_conversation_key_backup(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<crate::models::ConversationKeyBackup>> {
    let backup =
        encryption_service::fetch_conversation_key_backup(&state, auth.user_id(), conversation_id).await?;
    Ok(Json(backup))
}
