use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::websocket::events::{EVENT_REACTION_ADDED, EVENT_REACTION_REMOVED};
use crate::state::AppState;

/// Add (or switch to) a reaction emoji for `(message, user)`.
///
/// At most one reaction per user is kept on a message. If the user already
/// has a different emoji on this message, the old one is removed (and
/// `reaction:removed` broadcast) before the new one is inserted (and
/// `reaction:added` broadcast), in that order. Adding the same emoji the
/// user already has is a conflict, not a no-op.
pub async fn add_reaction(
    state: &AppState,
    message_id: Uuid,
    user_id: Uuid,
    emoji: &str,
) -> AppResult<()> {
    let conversation_id = conversation_for_message(state, message_id).await?;

    let existing: Option<(Uuid, String)> = sqlx::query_as(
        "SELECT id, emoji FROM message_reactions WHERE message_id = $1 AND user_id = $2",
    )
    .bind(message_id)
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?;

    if let Some((_, existing_emoji)) = &existing {
        if existing_emoji == emoji {
            return Err(AppError::Conflict("Reaction already exists".into()));
        }
    }

    if let Some((reaction_id, existing_emoji)) = existing {
        sqlx::query("DELETE FROM message_reactions WHERE id = $1")
            .bind(reaction_id)
            .execute(&state.pool)
            .await?;

        crate::websocket::broadcast_to_conversation(
            state,
            conversation_id,
            EVENT_REACTION_REMOVED,
            json!({ "message_id": message_id, "user_id": user_id, "emoji": existing_emoji }),
        )
        .await;
    }

    sqlx::query(
        "INSERT INTO message_reactions (id, message_id, user_id, emoji, created_at)
         VALUES ($1, $2, $3, $4, now())",
    )
    .bind(Uuid::new_v4())
    .bind(message_id)
    .bind(user_id)
    .bind(emoji)
    .execute(&state.pool)
    .await?;

    crate::websocket::broadcast_to_conversation(
        state,
        conversation_id,
        EVENT_REACTION_ADDED,
        json!({ "message_id": message_id, "user_id": user_id, "emoji": emoji }),
    )
    .await;

    Ok(())
}

pub async fn remove_reaction(state: &AppState, message_id: Uuid, user_id: Uuid, emoji: &str) -> AppResult<()> {
    let conversation_id = conversation_for_message(state, message_id).await?;

    let result = sqlx::query(
        "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(emoji)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Reaction not found".into()));
    }

    crate::websocket::broadcast_to_conversation(
        state,
        conversation_id,
        EVENT_REACTION_REMOVED,
        json!({ "message_id": message_id, "user_id": user_id, "emoji": emoji }),
    )
    .await;

    Ok(())
}

async fn conversation_for_message(state: &AppState, message_id: Uuid) -> AppResult<Uuid> {
    sqlx::query_scalar("SELECT conversation_id FROM messages WHERE id = $1")
        .bind(message_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".into()))
}
