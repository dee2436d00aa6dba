use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::shared::validation_error;
use crate::{
    auth::AuthUser,
    error::AppResult,
    models::{CreateMessageDto, MessageDto, Page, PageParams, PaginationMeta, UpdateMessageDto},
    services::{delivery_service, message_service},
    state::AppState,
};

/// POST /messages — send a message. `conversation_id` is part of the body
/// rather than the URL since messages aren't nested under a conversation
/// resource path in this API.
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateMessageDto>,
) -> AppResult<(StatusCode, Json<MessageDto>)> {
    req.validate().map_err(validation_error)?;

    let input = message_service::SendMessageInput {
        conversation_id: req.conversation_id,
        sender_id: auth.user_id(),
        content: req.content,
        message_type: req.message_type.unwrap_or(crate::models::MessageType::Text),
        metadata: req.metadata.unwrap_or(serde_json::Value::Null),
        reply_to_id: req.reply_to_id,
        encrypted: req.encrypted,
        encryption_version: req.encryption_version,
        sender_key_id: req.sender_key_id,
    };

    let dto = message_service::send_message(&state, input).await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

/// POST /messages/upload — send an `IMAGE | VOICE | FILE` message from a
/// multipart file upload. Expects one text field `conversation_id`, one file
/// field `file`, and optionally `encrypted` ("true"/"false") plus
/// `mime_type` (required, and trusted as-is, when `encrypted` is true since
/// the server cannot sniff ciphertext).
pub async fn upload_file(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<MessageDto>)> {
    let mut conversation_id: Option<Uuid> = None;
    let mut encrypted = false;
    let mut declared_mime_type: Option<String> = None;
    let mut encryption_version: Option<i32> = None;
    let mut sender_key_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!(error = ?e, "failed to read multipart field");
        crate::error::AppError::Validation("Invalid multipart data".into())
    })? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "conversation_id" => {
                let text = field.text().await.unwrap_or_default();
                conversation_id = text.parse().ok();
            }
            "encrypted" => {
                let text = field.text().await.unwrap_or_default();
                encrypted = text == "true" || text == "1";
            }
            "mime_type" => {
                declared_mime_type = Some(field.text().await.unwrap_or_default());
            }
            "encryption_version" => {
                let text = field.text().await.unwrap_or_default();
                encryption_version = text.parse().ok();
            }
            "sender_key_id" => {
                sender_key_id = Some(field.text().await.unwrap_or_default());
            }
            "file" => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| crate::error::AppError::Validation("Failed to read file data".into()))?;
                file = Some((file_name, data.to_vec()));
            }
            _ => {}
        }
    }

    let conversation_id = conversation_id
        .ok_or_else(|| crate::error::AppError::Validation("conversation_id is required".into()))?;
    let (file_name, data) =
        file.ok_or_else(|| crate::error::AppError::Validation("file is required".into()))?;

    let dto = message_service::upload_file(
        &state,
        message_service::UploadFileInput {
            conversation_id,
            sender_id: auth.user_id(),
            file_name,
            data,
            encrypted,
            declared_mime_type,
            encryption_version,
            sender_key_id,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(dto)))
}

pub async fn get_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<MessageDto>> {
    let message = message_service::fetch_message(&state.pool, message_id).await?;
    let dto = message_service::hydrate_message(&state, &message, auth.user_id()).await?;
    Ok(Json(dto))
}

pub async fn update_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<Uuid>,
    Json(req): Json<UpdateMessageDto>,
) -> AppResult<Json<MessageDto>> {
    req.validate().map_err(validation_error)?;
    let dto = message_service::edit_message(&state, message_id, auth.user_id(), req.content).await?;
    Ok(Json(dto))
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageQuery {
    #[serde(default)]
    pub scope: DeleteScope,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    #[default]
    Everyone,
    Me,
}

/// DELETE /messages/:id — delete for everyone (sender only, default) or just
/// for the caller via `?scope=me` (idempotent, available to any member).
pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<Uuid>,
    Query(query): Query<DeleteMessageQuery>,
) -> AppResult<StatusCode> {
    match query.scope {
        DeleteScope::Everyone => {
            message_service::delete_message_for_everyone(&state, message_id, auth.user_id()).await?;
        }
        DeleteScope::Me => {
            message_service::delete_message_for_me(&state, message_id, auth.user_id()).await?;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> AppResult<Json<Page<MessageDto>>> {
    let limit = params.limit_or_default();
    let (messages, has_more) = message_service::list_messages(&state, conversation_id, auth.user_id(), &params).await?;
    let next_cursor = messages.last().map(|m| m.id.to_string());
    Ok(Json(Page {
        data: messages,
        pagination: PaginationMeta {
            next_cursor,
            has_more,
            limit,
        },
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchMessagesRequest {
    #[validate(length(min = 1, max = 200))]
    pub query: String,
    pub conversation_id: Option<Uuid>,
    pub sender_id: Option<Uuid>,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

fn default_search_limit() -> i64 {
    50
}

pub async fn search_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<SearchMessagesRequest>,
) -> AppResult<Json<Vec<MessageDto>>> {
    req.validate().map_err(validation_error)?;
    let results = message_service::search_messages(
        &state,
        auth.user_id(),
        message_service::SearchMessagesInput {
            query: req.query,
            conversation_id: req.conversation_id,
            sender_id: req.sender_id,
            limit: req.limit,
        },
    )
    .await?;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<MarkReadRequest>,
) -> AppResult<StatusCode> {
    delivery_service::mark_read(&state, auth.user_id(), &req.message_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MarkDeliveredRequest {
    pub conversation_id: Uuid,
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<MarkDeliveredRequest>,
) -> AppResult<StatusCode> {
    delivery_service::mark_delivered(&state, req.conversation_id, auth.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn total_unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let count = delivery_service::total_unread_count(&state, auth.user_id()).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn conversation_unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let count = delivery_service::unread_count(&state, conversation_id, auth.user_id()).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn clear_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    message_service::clear_conversation_for_me(&state, conversation_id, auth.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}
