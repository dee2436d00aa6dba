use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::cache::{unread_count_key, Cache};
use crate::error::{AppError, AppResult};
use crate::models::{
    DeliveryStatus, FileMeta, Message, MessageDto, MessageMetadata, MessageType, PageParams,
    ReactionSummary,
};
use crate::services::user_service;
use crate::state::AppState;
use crate::websocket::events::{EVENT_MESSAGE_DELETED, EVENT_MESSAGE_EDITED, EVENT_MESSAGE_NEW};

pub struct SendMessageInput {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub metadata: serde_json::Value,
    pub reply_to_id: Option<Uuid>,
    pub encrypted: bool,
    pub encryption_version: Option<i32>,
    pub sender_key_id: Option<String>,
}

/// Lock the conversation row and compute the next sequence number. Must be
/// called inside the same transaction that inserts the message so concurrent
/// sends to the same conversation serialize on the row lock.
async fn next_sequence_number(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: Uuid,
) -> AppResult<i64> {
    sqlx::query("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
        .bind(conversation_id)
        .execute(&mut **tx)
        .await?;

    let next: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM messages WHERE conversation_id = $1",
    )
    .bind(conversation_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(next)
}

/// Scan `content` for `@token` mentions. Trims trailing punctuation so a
/// mention at the end of a sentence (`@alice.`) resolves to `alice`, and
/// requires the `@` to start a whitespace-delimited token so addresses like
/// `alice@example.com` are never misread as a mention.
pub fn extract_mentions(content: &str) -> Vec<String> {
    content
        .split_whitespace()
        .filter_map(|token| token.strip_prefix('@'))
        .map(|token| token.trim_end_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

async fn is_member(pool: &PgPool, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2)",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Insert a SYSTEM message inside an already-open transaction. Used by the
/// conversation engine so membership-change bookkeeping and its announcement
/// commit atomically.
pub async fn insert_system_message(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: Uuid,
    actor_id: Uuid,
    content: &str,
    metadata: serde_json::Value,
) -> AppResult<Message> {
    let seq = next_sequence_number(tx, conversation_id).await?;

    let message: Message = sqlx::query_as(
        "INSERT INTO messages (id, conversation_id, sender_id, content, type, metadata, sequence_number, created_at)
         VALUES ($1, $2, $3, $4, 'SYSTEM', $5, $6, now())
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(conversation_id)
    .bind(actor_id)
    .bind(content)
    .bind(metadata)
    .bind(seq)
    .fetch_one(&mut **tx)
    .await?;

    Ok(message)
}

pub async fn send_message(state: &AppState, input: SendMessageInput) -> AppResult<MessageDto> {
    if !is_member(&state.pool, input.conversation_id, input.sender_id).await? {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    if let Some(reply_to_id) = input.reply_to_id {
        let parent_conversation: Option<Uuid> =
            sqlx::query_scalar("SELECT conversation_id FROM messages WHERE id = $1")
                .bind(reply_to_id)
                .fetch_optional(&state.pool)
                .await?;
        match parent_conversation {
            Some(cid) if cid == input.conversation_id => {}
            _ => {
                return Err(AppError::Validation(
                    "reply_to_id must reference a message in the same conversation".into(),
                ))
            }
        }
    }

    let mut metadata = input.metadata;
    if input.message_type == MessageType::Text {
        if let Some(content) = &input.content {
            let mentions = extract_mentions(content);
            if !mentions.is_empty() {
                if let Some(obj) = metadata.as_object_mut() {
                    obj.entry("mentions").or_insert_with(|| json!(mentions));
                } else {
                    metadata = json!({ "mentions": mentions });
                }
            }
        }
    }

    let mut tx = state.pool.begin().await.map_err(AppError::from)?;
    let seq = next_sequence_number(&mut tx, input.conversation_id).await?;

    let message: Message = sqlx::query_as(
        "INSERT INTO messages
            (id, conversation_id, sender_id, content, type, metadata, reply_to_id,
             sequence_number, encrypted, encryption_version, sender_key_id, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(input.conversation_id)
    .bind(input.sender_id)
    .bind(&input.content)
    .bind(input.message_type)
    .bind(&metadata)
    .bind(input.reply_to_id)
    .bind(seq)
    .bind(input.encrypted)
    .bind(input.encryption_version)
    .bind(&input.sender_key_id)
    .fetch_one(&mut *tx)
    .await?;

    let member_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT user_id FROM conversation_members WHERE conversation_id = $1",
    )
    .bind(input.conversation_id)
    .fetch_all(&mut *tx)
    .await?;

    for &member_id in &member_ids {
        if member_id != input.sender_id {
            let blocked = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(
                    SELECT 1 FROM user_blocks
                    WHERE (blocker_id = $1 AND blocked_id = $2)
                       OR (blocker_id = $2 AND blocked_id = $1)
                 )",
            )
            .bind(input.sender_id)
            .bind(member_id)
            .fetch_one(&mut *tx)
            .await?;
            if blocked {
                continue;
            }
        }

        let status = if member_id == input.sender_id {
            DeliveryStatus::Read
        } else if state.connections.is_user_online(member_id).await {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        };

        sqlx::query(
            "INSERT INTO message_statuses (message_id, user_id, status, timestamp)
             VALUES ($1, $2, $3, now())",
        )
        .bind(message.id)
        .bind(member_id)
        .bind(status)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
        .bind(input.conversation_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await.map_err(AppError::from)?;

    for &member_id in &member_ids {
        state
            .cache
            .invalidate(&unread_count_key(member_id, input.conversation_id))
            .await;
    }

    let dto = hydrate_message(state, &message, input.sender_id).await?;

    crate::websocket::broadcast_to_conversation(
        state,
        input.conversation_id,
        EVENT_MESSAGE_NEW,
        serde_json::to_value(&dto).unwrap_or_default(),
    )
    .await;

    Ok(dto)
}

pub async fn edit_message(
    state: &AppState,
    message_id: Uuid,
    editor_id: Uuid,
    content: String,
) -> AppResult<MessageDto> {
    let message = fetch_message(&state.pool, message_id).await?;

    if message.sender_id != editor_id {
        return Err(AppError::Forbidden("Only the sender may edit this message".into()));
    }
    if message.deleted_at.is_some() {
        return Err(AppError::Validation("Cannot edit a deleted message".into()));
    }

    let updated: Message = sqlx::query_as(
        "UPDATE messages SET content = $1, is_edited = true, updated_at = now()
         WHERE id = $2 RETURNING *",
    )
    .bind(&content)
    .bind(message_id)
    .fetch_one(&state.pool)
    .await?;

    let dto = hydrate_message(state, &updated, editor_id).await?;

    crate::websocket::broadcast_to_conversation(
        state,
        updated.conversation_id,
        EVENT_MESSAGE_EDITED,
        serde_json::to_value(&dto).unwrap_or_default(),
    )
    .await;

    Ok(dto)
}

pub async fn delete_message_for_everyone(
    state: &AppState,
    message_id: Uuid,
    actor_id: Uuid,
) -> AppResult<()> {
    let message = fetch_message(&state.pool, message_id).await?;

    if message.sender_id != actor_id {
        return Err(AppError::Forbidden("Only the sender may delete this message".into()));
    }
    if message.deleted_at.is_some() {
        return Err(AppError::Validation("Message is already deleted".into()));
    }

    sqlx::query("UPDATE messages SET deleted_at = now() WHERE id = $1")
        .bind(message_id)
        .execute(&state.pool)
        .await?;

    crate::websocket::broadcast_to_conversation(
        state,
        message.conversation_id,
        EVENT_MESSAGE_DELETED,
        json!({ "message_id": message_id, "conversation_id": message.conversation_id }),
    )
    .await;

    Ok(())
}

pub async fn delete_message_for_me(state: &AppState, message_id: Uuid, user_id: Uuid) -> AppResult<()> {
    fetch_message(&state.pool, message_id).await?;

    sqlx::query(
        "INSERT INTO user_deleted_messages (user_id, message_id, deleted_at)
         VALUES ($1, $2, now())
         ON CONFLICT (user_id, message_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(message_id)
    .execute(&state.pool)
    .await?;

    Ok(())
}

pub async fn clear_conversation_for_me(
    state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    if !is_member(&state.pool, conversation_id, user_id).await? {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    sqlx::query(
        "INSERT INTO user_deleted_messages (user_id, message_id, deleted_at)
         SELECT $1, m.id, now()
         FROM messages m
         WHERE m.conversation_id = $2
           AND NOT EXISTS (
               SELECT 1 FROM user_deleted_messages udm
               WHERE udm.user_id = $1 AND udm.message_id = m.id
           )",
    )
    .bind(user_id)
    .bind(conversation_id)
    .execute(&state.pool)
    .await?;

    Ok(())
}

// ============================================================================
// File uploads
// ============================================================================

const MAX_FILE_SIZE: usize = 52_428_800; // 50 MB

/// MIME type is detected from magic bytes, not from the client-supplied
/// Content-Type header, so this list is authoritative for plaintext uploads.
const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/webm",
    "audio/mpeg",
    "audio/ogg",
    "audio/webm",
    "application/pdf",
    "text/plain",
];

const THUMBNAIL_MAX_DIMENSION: u32 = 320;

pub struct UploadFileInput {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub file_name: String,
    pub data: Vec<u8>,
    pub encrypted: bool,
    /// Required when `encrypted` is true: the server can't sniff ciphertext
    /// for its real type, so it trusts the client-declared original MIME to
    /// classify the resulting message instead.
    pub declared_mime_type: Option<String>,
    pub encryption_version: Option<i32>,
    pub sender_key_id: Option<String>,
}

/// Validate, store, and (for plaintext images) thumbnail an uploaded file,
/// then create the `IMAGE | VOICE | FILE` message that carries it.
///
/// Validation happens entirely before the store is ever written to: size,
/// non-empty, and an allow-listed MIME type sniffed from magic bytes (or, for
/// encrypted uploads, trusted from the client since the bytes are ciphertext).
pub async fn upload_file(state: &AppState, input: UploadFileInput) -> AppResult<MessageDto> {
    if !is_member(&state.pool, input.conversation_id, input.sender_id).await? {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    if input.data.is_empty() {
        return Err(AppError::Validation("File must not be empty".into()));
    }
    if input.data.len() > MAX_FILE_SIZE {
        return Err(AppError::Validation("File size exceeds the 50 MB limit".into()));
    }

    let mime_type = if input.encrypted {
        input.declared_mime_type.clone().ok_or_else(|| {
            AppError::Validation("encrypted uploads must declare a mime_type".into())
        })?
    } else {
        infer::get(&input.data)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    };

    if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
        return Err(AppError::Validation(format!(
            "File type '{mime_type}' is not allowed"
        )));
    }

    let message_type = if mime_type.starts_with("image/") {
        MessageType::Image
    } else if mime_type.starts_with("audio/") {
        MessageType::Voice
    } else {
        MessageType::File
    };

    let object_key = format!(
        "messages/{}/{}_{}",
        input.conversation_id,
        Uuid::new_v4().simple(),
        sanitize_filename(&input.file_name)
    );

    let file_url = state
        .object_store
        .put(&object_key, input.data.clone(), &mime_type)
        .await?;

    // Thumbnailing only ever runs on plaintext images — the server can't
    // decode ciphertext, and encrypted blobs pass through as-is.
    let thumbnail_url = if !input.encrypted && message_type == MessageType::Image {
        match build_jpeg_thumbnail(&input.data) {
            Ok(thumb) => {
                let thumb_key = format!("{object_key}_thumb.jpg");
                match state.object_store.put(&thumb_key, thumb, "image/jpeg").await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        tracing::warn!(error = ?e, "failed to upload generated thumbnail");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = ?e, "failed to generate thumbnail for uploaded image");
                None
            }
        }
    } else {
        None
    };

    let file_meta = FileMeta {
        file_name: input.file_name,
        file_size: input.data.len() as i64,
        file_url,
        mime_type,
        object_key,
        thumbnail_url,
        duration: None,
        encryption: None,
    };

    let metadata = serde_json::to_value(&file_meta).unwrap_or(serde_json::Value::Null);

    send_message(
        state,
        SendMessageInput {
            conversation_id: input.conversation_id,
            sender_id: input.sender_id,
            content: None,
            message_type,
            metadata,
            reply_to_id: None,
            encrypted: input.encrypted,
            encryption_version: input.encryption_version,
            sender_key_id: input.sender_key_id,
        },
    )
    .await
}

/// Decode, downscale, and re-encode an uploaded image as a JPEG thumbnail.
fn build_jpeg_thumbnail(data: &[u8]) -> AppResult<Vec<u8>> {
    let image =
        image::load_from_memory(data).map_err(|_| AppError::Validation("Invalid image data".into()))?;
    let thumbnail = image.thumbnail(THUMBNAIL_MAX_DIMENSION, THUMBNAIL_MAX_DIMENSION);

    let mut buf = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buf);
    thumbnail
        .write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, 80))
        .map_err(|_| AppError::Internal)?;

    Ok(buf)
}

/// Map any character outside alphanumeric/dot/underscore/hyphen to an
/// underscore and cap the result at 128 characters, so object keys stay safe
/// to use as path segments regardless of what the client named the file.
fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(128)
        .collect();

    if sanitized.is_empty() {
        "file".to_string()
    } else {
        sanitized
    }
}

pub async fn fetch_message(pool: &PgPool, message_id: Uuid) -> AppResult<Message> {
    sqlx::query_as("SELECT * FROM messages WHERE id = $1")
        .bind(message_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".into()))
}

/// Batched lookup for the conversation engine's last-message-per-page
/// enrichment; fetches in one round trip instead of once per id.
pub(crate) async fn fetch_messages(pool: &PgPool, message_ids: &[Uuid]) -> AppResult<Vec<Message>> {
    if message_ids.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_as("SELECT * FROM messages WHERE id = ANY($1)")
        .bind(message_ids)
        .fetch_all(pool)
        .await
        .map_err(AppError::from)
}

pub async fn list_messages(
    state: &AppState,
    conversation_id: Uuid,
    viewer_id: Uuid,
    params: &PageParams,
) -> AppResult<(Vec<MessageDto>, bool)> {
    if !is_member(&state.pool, conversation_id, viewer_id).await? {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    let limit = params.limit_or_default();
    let cursor_seq: Option<i64> = match &params.cursor {
        Some(c) => sqlx::query_scalar("SELECT sequence_number FROM messages WHERE id = $1::uuid")
            .bind(c.parse::<Uuid>().map_err(|_| AppError::Validation("Invalid cursor".into()))?)
            .fetch_optional(&state.pool)
            .await?,
        None => None,
    };

    let rows: Vec<Message> = sqlx::query_as(
        "SELECT m.* FROM messages m
         WHERE m.conversation_id = $1
           AND ($2::bigint IS NULL OR m.sequence_number < $2)
           AND NOT EXISTS (
               SELECT 1 FROM user_deleted_messages udm
               WHERE udm.user_id = $3 AND udm.message_id = m.id
           )
         ORDER BY m.sequence_number DESC
         LIMIT $4",
    )
    .bind(conversation_id)
    .bind(cursor_seq)
    .bind(viewer_id)
    .bind(limit + 1)
    .fetch_all(&state.pool)
    .await?;

    let has_more = rows.len() as i64 > limit;
    let page: Vec<Message> = rows.into_iter().take(limit as usize).collect();

    let dtos = hydrate_messages(state, &page, viewer_id).await?;
    Ok((dtos, has_more))
}

pub struct SearchMessagesInput {
    pub query: String,
    pub conversation_id: Option<Uuid>,
    pub sender_id: Option<Uuid>,
    pub limit: i64,
}

pub async fn search_messages(
    state: &AppState,
    viewer_id: Uuid,
    input: SearchMessagesInput,
) -> AppResult<Vec<MessageDto>> {
    let rows: Vec<Message> = sqlx::query_as(
        "SELECT m.* FROM messages m
         JOIN conversation_members cm ON cm.conversation_id = m.conversation_id
         WHERE cm.user_id = $1
           AND ($2::uuid IS NULL OR m.conversation_id = $2)
           AND ($3::uuid IS NULL OR m.sender_id = $3)
           AND m.deleted_at IS NULL
           AND to_tsvector('english', coalesce(m.content, '')) @@ plainto_tsquery('english', $4)
           AND NOT EXISTS (
               SELECT 1 FROM user_deleted_messages udm
               WHERE udm.user_id = $1 AND udm.message_id = m.id
           )
         ORDER BY m.sequence_number DESC
         LIMIT $5",
    )
    .bind(viewer_id)
    .bind(input.conversation_id)
    .bind(input.sender_id)
    .bind(&input.query)
    .bind(input.limit.clamp(1, 100))
    .fetch_all(&state.pool)
    .await?;

    hydrate_messages(state, &rows, viewer_id).await
}

// ============================================================================
// Enrichment
// ============================================================================

pub async fn hydrate_message(state: &AppState, message: &Message, viewer_id: Uuid) -> AppResult<MessageDto> {
    let dtos = hydrate_messages(state, std::slice::from_ref(message), viewer_id).await?;
    dtos.into_iter()
        .next()
        .ok_or_else(|| AppError::Internal)
}

/// Batch-enrich a page of messages with exactly one extra query per
/// enrichment dimension (senders, reactions, statuses), never one per row.
/// `pub(crate)` so the conversation engine's own batch hydration can reuse it
/// for the last-message-per-conversation dimension instead of re-implementing
/// sender/reaction/status enrichment.
pub(crate) async fn hydrate_messages(
    state: &AppState,
    messages: &[Message],
    viewer_id: Uuid,
) -> AppResult<Vec<MessageDto>> {
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let message_ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
    let sender_ids: Vec<Uuid> = messages.iter().map(|m| m.sender_id).collect();

    let senders = user_service::fetch_users(&state.pool, &state.cache, &sender_ids).await?;
    let senders_by_id: std::collections::HashMap<Uuid, _> =
        senders.into_iter().map(|u| (u.id, u)).collect();

    let reaction_rows: Vec<(Uuid, String, i64, bool)> = sqlx::query_as(
        "SELECT message_id, emoji, COUNT(*) as count, BOOL_OR(user_id = $2) as me
         FROM message_reactions
         WHERE message_id = ANY($1)
         GROUP BY message_id, emoji",
    )
    .bind(&message_ids)
    .bind(viewer_id)
    .fetch_all(&state.pool)
    .await?;

    let mut reactions_by_message: std::collections::HashMap<Uuid, Vec<ReactionSummary>> =
        std::collections::HashMap::new();
    for (message_id, emoji, count, me) in reaction_rows {
        reactions_by_message
            .entry(message_id)
            .or_default()
            .push(ReactionSummary { emoji, count, me });
    }

    let status_rows: Vec<(Uuid, Uuid, DeliveryStatus)> = sqlx::query_as(
        "SELECT message_id, user_id, status FROM message_statuses WHERE message_id = ANY($1)",
    )
    .bind(&message_ids)
    .fetch_all(&state.pool)
    .await?;

    let mut statuses_by_message: std::collections::HashMap<Uuid, Vec<(Uuid, DeliveryStatus)>> =
        std::collections::HashMap::new();
    for (message_id, user_id, status) in status_rows {
        statuses_by_message.entry(message_id).or_default().push((user_id, status));
    }

    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let status = aggregated_status(
            message.sender_id,
            viewer_id,
            statuses_by_message.get(&message.id).map(Vec::as_slice).unwrap_or(&[]),
        );

        out.push(MessageDto {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender: senders_by_id.get(&message.sender_id).cloned(),
            content: message.content.clone(),
            message_type: message.message_type,
            metadata: MessageMetadata::from_stored(message.message_type, message.metadata.clone()),
            reply_to_id: message.reply_to_id,
            is_edited: message.is_edited,
            sequence_number: message.sequence_number,
            encrypted: message.encrypted,
            status,
            reactions: reactions_by_message.remove(&message.id).unwrap_or_default(),
            created_at: message.created_at,
            updated_at: message.updated_at,
            deleted_at: message.deleted_at,
        });
    }

    Ok(out)
}

/// Compute the status a viewer sees for a message: the sender sees an
/// aggregate over all recipients, everyone else sees their own row.
pub fn aggregated_status(
    sender_id: Uuid,
    viewer_id: Uuid,
    statuses: &[(Uuid, DeliveryStatus)],
) -> Option<DeliveryStatus> {
    if viewer_id != sender_id {
        return statuses
            .iter()
            .find(|(uid, _)| *uid == viewer_id)
            .map(|(_, s)| *s);
    }

    let recipient_statuses: Vec<DeliveryStatus> = statuses
        .iter()
        .filter(|(uid, _)| *uid != sender_id)
        .map(|(_, s)| *s)
        .collect();

    if recipient_statuses.is_empty() {
        return Some(DeliveryStatus::Read);
    }
    if recipient_statuses.iter().any(|s| *s == DeliveryStatus::Sent) {
        Some(DeliveryStatus::Sent)
    } else if recipient_statuses.iter().all(|s| *s == DeliveryStatus::Read) {
        Some(DeliveryStatus::Read)
    } else {
        Some(DeliveryStatus::Delivered)
    }
}

pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_mentions_finds_simple_token() {
        let mentions = extract_mentions("hey @alice can you look at this");
        assert_eq!(mentions, vec!["alice"]);
    }

    #[test]
    fn extract_mentions_trims_trailing_punctuation() {
        let mentions = extract_mentions("cc @bob, and @carol.");
        assert_eq!(mentions, vec!["bob", "carol"]);
    }

    #[test]
    fn extract_mentions_ignores_email_addresses() {
        let mentions = extract_mentions("reach me at alice@example.com please");
        assert!(mentions.is_empty());
    }

    #[test]
    fn extract_mentions_is_case_insensitive() {
        let mentions = extract_mentions("@Alice and @ALICE");
        assert_eq!(mentions, vec!["alice", "alice"]);
    }

    #[test]
    fn extract_mentions_on_empty_string_is_empty() {
        assert!(extract_mentions("").is_empty());
    }

    #[test]
    fn aggregated_status_sender_sees_sent_if_any_recipient_unsent() {
        let sender = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let statuses = vec![
            (sender, DeliveryStatus::Read),
            (a, DeliveryStatus::Delivered),
            (b, DeliveryStatus::Sent),
        ];
        assert_eq!(
            aggregated_status(sender, sender, &statuses),
            Some(DeliveryStatus::Sent)
        );
    }

    #[test]
    fn aggregated_status_sender_sees_read_when_all_recipients_read() {
        let sender = Uuid::new_v4();
        let a = Uuid::new_v4();
        let statuses = vec![(sender, DeliveryStatus::Read), (a, DeliveryStatus::Read)];
        assert_eq!(
            aggregated_status(sender, sender, &statuses),
            Some(DeliveryStatus::Read)
        );
    }

    #[test]
    fn aggregated_status_sender_sees_delivered_otherwise() {
        let sender = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let statuses = vec![
            (sender, DeliveryStatus::Read),
            (a, DeliveryStatus::Delivered),
            (b, DeliveryStatus::Read),
        ];
        assert_eq!(
            aggregated_status(sender, sender, &statuses),
            Some(DeliveryStatus::Delivered)
        );
    }

    #[test]
    fn aggregated_status_non_sender_sees_own_row() {
        let sender = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let statuses = vec![(sender, DeliveryStatus::Read), (viewer, DeliveryStatus::Delivered)];
        assert_eq!(
            aggregated_status(sender, viewer, &statuses),
            Some(DeliveryStatus::Delivered)
        );
    }

    #[test]
    fn aggregated_status_non_sender_with_no_row_is_none() {
        let sender = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let statuses = vec![(sender, DeliveryStatus::Read)];
        assert_eq!(aggregated_status(sender, viewer, &statuses), None);
    }

    #[test]
    fn sanitize_filename_removes_unsafe_characters() {
        assert_eq!(sanitize_filename("hello world.txt"), "hello_world.txt");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
    }

    #[test]
    fn sanitize_filename_handles_edge_cases() {
        assert_eq!(sanitize_filename(""), "file");
        let long_name = "a".repeat(200);
        assert_eq!(sanitize_filename(&long_name).len(), 128);
    }
}
