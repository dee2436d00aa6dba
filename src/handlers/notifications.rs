use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::shared::validation_error;
use crate::{
    auth::AuthUser,
    error::AppResult,
    models::{MuteConversationDto, MutedConversation, NotificationPreferences, UpdateNotificationPreferencesDto},
    services::notification_service,
    state::AppState,
};

pub async fn get_preferences(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<NotificationPreferences>> {
    let prefs = notification_service::get_preferences(&state, auth.user_id()).await?;
    Ok(Json(prefs))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdateNotificationPreferencesDto>,
) -> AppResult<Json<NotificationPreferences>> {
    req.validate().map_err(validation_error)?;
    let prefs = notification_service::update_preferences(&state, auth.user_id(), req).await?;
    Ok(Json(prefs))
}

pub async fn mute_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MuteConversationDto>,
) -> AppResult<Json<MutedConversation>> {
    req.validate().map_err(validation_error)?;
    let muted = notification_service::mute_conversation(&state, auth.user_id(), conversation_id, req).await?;
    Ok(Json(muted))
}

pub async fn unmute_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    notification_service::unmute_conversation(&state, auth.user_id(), conversation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_muted(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<MutedConversation>>> {
    let muted = notification_service::list_muted(&state, auth.user_id()).await?;
    Ok(Json(muted))
}
