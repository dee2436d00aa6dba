use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::shared::validation_error;
use crate::{
    auth::AuthUser,
    error::AppResult,
    models::{ConversationDto, CreateConversationDto, Page, PageParams, PaginationMeta, UpdateConversationDto},
    services::conversation_service,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

/// GET /conversations — list the caller's conversations, optionally filtered
/// by a name/member search term via `?q=`. Search results aren't paginated
/// (they're already capped server-side), so the envelope reports them as a
/// single page.
pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListConversationsQuery>,
) -> AppResult<Json<Page<ConversationDto>>> {
    let page_params = PageParams {
        limit: query.limit,
        cursor: query.cursor,
    };
    let limit = page_params.limit_or_default();

    let (conversations, has_more) = match query.q {
        Some(q) if !q.trim().is_empty() => {
            let results = conversation_service::search_conversations(&state, auth.user_id(), &q).await?;
            (results, false)
        }
        _ => conversation_service::list_conversations(&state, auth.user_id(), &page_params).await?,
    };

    let next_cursor = conversations.last().map(|c| c.id.to_string());
    Ok(Json(Page {
        data: conversations,
        pagination: PaginationMeta {
            next_cursor,
            has_more,
            limit,
        },
    }))
}

/// POST /conversations — create a group or direct conversation. Creating a
/// direct conversation that already exists between the two users returns the
/// existing one rather than erroring.
pub async fn create_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateConversationDto>,
) -> AppResult<(StatusCode, Json<ConversationDto>)> {
    req.validate().map_err(validation_error)?;
    let (dto, created) = conversation_service::create_conversation(&state, auth.user_id(), req).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(dto)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ConversationDto>> {
    let dto = conversation_service::get_conversation(&state, conversation_id, auth.user_id()).await?;
    Ok(Json(dto))
}

pub async fn update_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<UpdateConversationDto>,
) -> AppResult<Json<ConversationDto>> {
    req.validate().map_err(validation_error)?;
    let dto = conversation_service::update_conversation(&state, conversation_id, auth.user_id(), req).await?;
    Ok(Json(dto))
}

#[derive(Debug, Deserialize)]
pub struct AddMembersRequest {
    pub member_ids: Vec<Uuid>,
}

pub async fn add_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AddMembersRequest>,
) -> AppResult<Json<ConversationDto>> {
    let dto = conversation_service::add_members(&state, conversation_id, auth.user_id(), &req.member_ids).await?;
    Ok(Json(dto))
}

pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    conversation_service::remove_member(&state, conversation_id, auth.user_id(), user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    conversation_service::leave_conversation(&state, conversation_id, auth.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    crate::services::delivery_service::mark_conversation_read(&state, conversation_id, auth.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}
