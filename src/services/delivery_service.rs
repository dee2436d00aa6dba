use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use crate::cache::unread_count_key;
use crate::error::{AppError, AppResult};
use crate::models::DeliveryStatus;
use crate::state::AppState;
use crate::websocket::events::EVENT_MESSAGE_STATUS;

const UNREAD_COUNT_TTL: Duration = Duration::from_secs(60);

async fn is_member(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2)",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;
    Ok(exists)
}

/// Mark a specific batch of messages as read for `user_id`. Idempotent:
/// calling this twice with the same ids leaves the same final state because
/// `read` is the terminal status and the update is unconditional.
pub async fn mark_read(state: &AppState, user_id: Uuid, message_ids: &[Uuid]) -> AppResult<()> {
    if message_ids.is_empty() {
        return Ok(());
    }

    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "UPDATE message_statuses
         SET status = 'read', timestamp = now()
         WHERE message_id = ANY($1) AND user_id = $2 AND status != 'read'
         RETURNING message_id, user_id",
    )
    .bind(message_ids)
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    if rows.is_empty() {
        return Ok(());
    }

    let conversation_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT DISTINCT conversation_id FROM messages WHERE id = ANY($1)",
    )
    .bind(message_ids)
    .fetch_all(&state.pool)
    .await?;

    for conversation_id in conversation_ids {
        advance_read_watermark(state, conversation_id, user_id).await?;
    }

    for (message_id, uid) in rows {
        let conversation_id: Option<Uuid> =
            sqlx::query_scalar("SELECT conversation_id FROM messages WHERE id = $1")
                .bind(message_id)
                .fetch_optional(&state.pool)
                .await?;
        if let Some(conversation_id) = conversation_id {
            crate::websocket::broadcast_to_conversation(
                state,
                conversation_id,
                EVENT_MESSAGE_STATUS,
                json!({ "message_id": message_id, "user_id": uid, "status": "read" }),
            )
            .await;
        }
    }

    Ok(())
}

/// Mark every unread message in a conversation (authored by someone else) as
/// read for `user_id`, and advance their read watermark.
pub async fn mark_conversation_read(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
    if !is_member(state, conversation_id, user_id).await? {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    let message_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT m.id FROM messages m
         JOIN message_statuses ms ON ms.message_id = m.id AND ms.user_id = $2
         WHERE m.conversation_id = $1 AND m.sender_id != $2 AND ms.status != 'read'",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    mark_read(state, user_id, &message_ids).await
}

/// Promote every `sent` status for `user_id` in a conversation to
/// `delivered`. Called both when a user opens a conversation and when they
/// come online (batch-promoted across all their conversations by the caller).
pub async fn mark_delivered(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
    let rows: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE message_statuses ms
         SET status = 'delivered', timestamp = now()
         FROM messages m
         WHERE ms.message_id = m.id
           AND m.conversation_id = $1
           AND ms.user_id = $2
           AND ms.status = 'sent'
         RETURNING ms.message_id",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    for message_id in rows {
        crate::websocket::broadcast_to_conversation(
            state,
            conversation_id,
            EVENT_MESSAGE_STATUS,
            json!({ "message_id": message_id, "user_id": user_id, "status": "delivered" }),
        )
        .await;
    }

    Ok(())
}

/// Advance `last_read_at` for `(conversation_id, user_id)` monotonically to
/// the newest message timestamp this user has now read, and invalidate their
/// cached unread count.
async fn advance_read_watermark(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "UPDATE conversation_members
         SET last_read_at = GREATEST(
             COALESCE(last_read_at, 'epoch'::timestamptz),
             COALESCE((
                 SELECT MAX(m.created_at) FROM messages m
                 JOIN message_statuses ms ON ms.message_id = m.id
                 WHERE m.conversation_id = $1 AND ms.user_id = $2 AND ms.status = 'read'
             ), 'epoch'::timestamptz)
         )
         WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(user_id)
    .execute(&state.pool)
    .await?;

    state
        .cache
        .invalidate(&unread_count_key(user_id, conversation_id))
        .await;

    Ok(())
}

pub async fn unread_count(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64> {
    let key = unread_count_key(user_id, conversation_id);
    if let Some(cached) = state.cache.get(&key).await {
        if let Ok(n) = cached.parse::<i64>() {
            return Ok(n);
        }
    }

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages m
         JOIN conversation_members cm ON cm.conversation_id = m.conversation_id AND cm.user_id = $2
         WHERE m.conversation_id = $1
           AND m.sender_id != $2
           AND m.deleted_at IS NULL
           AND m.created_at > COALESCE(cm.last_read_at, 'epoch'::timestamptz)",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;

    state.cache.set(key, count.to_string(), UNREAD_COUNT_TTL).await;
    Ok(count)
}

/// Total unread count across every conversation the user belongs to, in one
/// query rather than one per conversation.
pub async fn total_unread_count(state: &AppState, user_id: Uuid) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages m
         JOIN conversation_members cm ON cm.conversation_id = m.conversation_id
         WHERE cm.user_id = $1
           AND m.sender_id != $1
           AND m.deleted_at IS NULL
           AND m.created_at > COALESCE(cm.last_read_at, 'epoch'::timestamptz)",
    )
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(count)
}

/// Unread counts for a whole page of conversations in one query, keyed by
/// conversation id. Used by the conversation list so it doesn't issue one
/// `unread_count` query per row.
pub async fn unread_counts_by_conversation(
    state: &AppState,
    conversation_ids: &[Uuid],
    user_id: Uuid,
) -> AppResult<std::collections::HashMap<Uuid, i64>> {
    if conversation_ids.is_empty() {
        return Ok(std::collections::HashMap::new());
    }

    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT m.conversation_id, COUNT(*) FROM messages m
         JOIN conversation_members cm ON cm.conversation_id = m.conversation_id AND cm.user_id = $2
         WHERE m.conversation_id = ANY($1)
           AND m.sender_id != $2
           AND m.deleted_at IS NULL
           AND m.created_at > COALESCE(cm.last_read_at, 'epoch'::timestamptz)
         GROUP BY m.conversation_id",
    )
    .bind(conversation_ids)
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// When a user comes online, batch-promote every `sent` status they have
/// across all conversations to `delivered` in one statement.
pub async fn promote_all_on_connect(state: &AppState, user_id: Uuid) -> AppResult<Vec<(Uuid, Uuid)>> {
    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "UPDATE message_statuses
         SET status = 'delivered', timestamp = now()
         WHERE user_id = $1 AND status = 'sent'
         RETURNING message_id, (SELECT conversation_id FROM messages WHERE id = message_id)",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(rows)
}
