use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    MuteConversationDto, MutedConversation, NotificationPreferences, UpdateNotificationPreferencesDto,
};
use crate::state::AppState;

pub async fn get_preferences(state: &AppState, user_id: Uuid) -> AppResult<NotificationPreferences> {
    let existing: Option<NotificationPreferences> =
        sqlx::query_as("SELECT * FROM notification_preferences WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&state.pool)
            .await?;

    match existing {
        Some(prefs) => Ok(prefs),
        None => {
            sqlx::query_as(
                "INSERT INTO notification_preferences (user_id, push_enabled, email_enabled, mention_only, updated_at)
                 VALUES ($1, true, true, false, now())
                 ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
                 RETURNING *",
            )
            .bind(user_id)
            .fetch_one(&state.pool)
            .await
            .map_err(Into::into)
        }
    }
}

pub async fn update_preferences(
    state: &AppState,
    user_id: Uuid,
    input: UpdateNotificationPreferencesDto,
) -> AppResult<NotificationPreferences> {
    get_preferences(state, user_id).await?;

    sqlx::query_as(
        "UPDATE notification_preferences
         SET push_enabled = COALESCE($2, push_enabled),
             email_enabled = COALESCE($3, email_enabled),
             mention_only = COALESCE($4, mention_only),
             updated_at = now()
         WHERE user_id = $1
         RETURNING *",
    )
    .bind(user_id)
    .bind(input.push_enabled)
    .bind(input.email_enabled)
    .bind(input.mention_only)
    .fetch_one(&state.pool)
    .await
    .map_err(Into::into)
}

pub async fn mute_conversation(
    state: &AppState,
    user_id: Uuid,
    conversation_id: Uuid,
    input: MuteConversationDto,
) -> AppResult<MutedConversation> {
    sqlx::query_as(
        "INSERT INTO muted_conversations (user_id, conversation_id, muted_until, created_at)
         VALUES ($1, $2, $3, now())
         ON CONFLICT (user_id, conversation_id) DO UPDATE SET muted_until = EXCLUDED.muted_until
         RETURNING *",
    )
    .bind(user_id)
    .bind(conversation_id)
    .bind(input.until)
    .fetch_one(&state.pool)
    .await
    .map_err(Into::into)
}

pub async fn unmute_conversation(state: &AppState, user_id: Uuid, conversation_id: Uuid) -> AppResult<()> {
    sqlx::query("DELETE FROM muted_conversations WHERE user_id = $1 AND conversation_id = $2")
        .bind(user_id)
        .bind(conversation_id)
        .execute(&state.pool)
        .await?;
    Ok(())
}

pub async fn list_muted(state: &AppState, user_id: Uuid) -> AppResult<Vec<MutedConversation>> {
    sqlx::query_as(
        "SELECT * FROM muted_conversations
         WHERE user_id = $1 AND (muted_until IS NULL OR muted_until > now())
         ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await
    .map_err(Into::into)
}
