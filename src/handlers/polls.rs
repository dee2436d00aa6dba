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
    models::{CreatePollDto, PollDto, VotePollDto},
    services::poll_service,
    state::AppState,
};

pub async fn create_poll(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreatePollDto>,
) -> AppResult<(StatusCode, Json<PollDto>)> {
    req.validate().map_err(validation_error)?;
    let dto = poll_service::create_poll(&state, auth.user_id(), req).await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

pub async fn get_poll(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(poll_id): Path<Uuid>,
) -> AppResult<Json<PollDto>> {
    let dto = poll_service::get_poll(&state, poll_id, auth.user_id()).await?;
    Ok(Json(dto))
}

pub async fn vote(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(poll_id): Path<Uuid>,
    Json(req): Json<VotePollDto>,
) -> AppResult<Json<PollDto>> {
    req.validate().map_err(validation_error)?;
    let dto = poll_service::vote(&state, poll_id, auth.user_id(), &req.option_ids).await?;
    Ok(Json(dto))
}

pub async fn close_poll(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(poll_id): Path<Uuid>,
) -> AppResult<Json<PollDto>> {
    let dto = poll_service::close_poll(&state, poll_id, auth.user_id()).await?;
    Ok(Json(dto))
}
