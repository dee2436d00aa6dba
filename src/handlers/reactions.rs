use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{auth::AuthUser, error::AppResult, services::reaction_service, state::AppState};

#[derive(Debug, Deserialize)]
pub struct AddReactionRequest {
    pub emoji: String,
}

/// POST /messages/:id/reactions — add (or switch to) a reaction.
pub async fn add_reaction(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<Uuid>,
    Json(req): Json<AddReactionRequest>,
) -> AppResult<StatusCode> {
    reaction_service::add_reaction(&state, message_id, auth.user_id(), &req.emoji).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /messages/:id/reactions/:emoji — remove the caller's reaction.
pub async fn remove_reaction(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((message_id, emoji)): Path<(Uuid, String)>,
) -> AppResult<StatusCode> {
    reaction_service::remove_reaction(&state, message_id, auth.user_id(), &emoji).await?;
    Ok(StatusCode::NO_CONTENT)
}
