use std::collections::HashMap;

use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationDto, ConversationType, CreateConversationDto, MemberRole, PageParams,
    UpdateConversationDto, UserDto,
};
use crate::services::{delivery_service, message_service, user_service};
use crate::state::AppState;
use crate::websocket::events::{
    EVENT_CONVERSATION_UPDATED, EVENT_MEMBER_ADDED, EVENT_MEMBER_LEFT, EVENT_MEMBER_REMOVED,
};

/// Search scores below this are treated as noise, not a match.
const SEARCH_SIMILARITY_THRESHOLD: f32 = 0.2;
const SEARCH_RESULT_LIMIT: i64 = 50;

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

async fn is_admin(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let role: Option<MemberRole> = sqlx::query_scalar(
        "SELECT role FROM conversation_members WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?;
    Ok(matches!(role, Some(MemberRole::Admin)))
}

/// Find an existing DM between exactly these two users, if any. Conversations
/// are looked up by exact 2-member overlap rather than a unique constraint on
/// the member pair, since membership is a separate table.
async fn find_existing_dm(state: &AppState, a: Uuid, b: Uuid) -> AppResult<Option<Uuid>> {
    let id: Option<Uuid> = sqlx::query_scalar(
        "SELECT c.id FROM conversations c
         WHERE c.type = 'dm'
           AND (SELECT COUNT(*) FROM conversation_members cm WHERE cm.conversation_id = c.id) = 2
           AND EXISTS (SELECT 1 FROM conversation_members cm WHERE cm.conversation_id = c.id AND cm.user_id = $1)
           AND EXISTS (SELECT 1 FROM conversation_members cm WHERE cm.conversation_id = c.id AND cm.user_id = $2)
         LIMIT 1",
    )
    .bind(a)
    .bind(b)
    .fetch_optional(&state.pool)
    .await?;
    Ok(id)
}

/// Create a group or direct conversation. Returns `(dto, created)` where
/// `created` is `false` when an existing DM was returned instead of a new
/// conversation, so the handler can answer 200 rather than 201.
pub async fn create_conversation(
    state: &AppState,
    creator_id: Uuid,
    input: CreateConversationDto,
) -> AppResult<(ConversationDto, bool)> {
    if input.conversation_type == ConversationType::Dm {
        if input.member_ids.len() != 1 {
            return Err(AppError::Validation(
                "A direct conversation requires exactly one other member".into(),
            ));
        }
        let other = input.member_ids[0];
        if other == creator_id {
            return Err(AppError::Validation("Cannot start a conversation with yourself".into()));
        }
        if let Some(existing_id) = find_existing_dm(state, creator_id, other).await? {
            let dto = get_conversation(state, existing_id, creator_id).await?;
            return Ok((dto, false));
        }
    }

    let mut tx = state.pool.begin().await.map_err(AppError::from)?;

    let conversation: Conversation = sqlx::query_as(
        "INSERT INTO conversations (id, type, name, avatar_url, created_by, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, now(), now())
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(input.conversation_type)
    .bind(&input.name)
    .bind(&input.avatar_url)
    .bind(creator_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
         VALUES ($1, $2, 'admin', now())",
    )
    .bind(conversation.id)
    .bind(creator_id)
    .execute(&mut *tx)
    .await?;

    for member_id in &input.member_ids {
        if *member_id == creator_id {
            continue;
        }
        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
             VALUES ($1, $2, 'member', now())
             ON CONFLICT DO NOTHING",
        )
        .bind(conversation.id)
        .bind(member_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await.map_err(AppError::from)?;

    let dto = get_conversation(state, conversation.id, creator_id).await?;
    Ok((dto, true))
}

pub async fn get_conversation(state: &AppState, conversation_id: Uuid, viewer_id: Uuid) -> AppResult<ConversationDto> {
    if !is_member(state, conversation_id, viewer_id).await? {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    let conversation: Conversation = sqlx::query_as("SELECT * FROM conversations WHERE id = $1")
        .bind(conversation_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Conversation not found".into()))?;

    let dto = hydrate_batch(state, vec![conversation], viewer_id)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::Internal)?;
    Ok(dto)
}

/// List the conversations a user belongs to, newest-activity first, as a
/// cursor page. The cursor is the `updated_at` of the last conversation seen.
pub async fn list_conversations(
    state: &AppState,
    user_id: Uuid,
    params: &PageParams,
) -> AppResult<(Vec<ConversationDto>, bool)> {
    let limit = params.limit_or_default();
    let cursor_updated_at: Option<chrono::DateTime<chrono::Utc>> = match &params.cursor {
        Some(c) => sqlx::query_scalar("SELECT updated_at FROM conversations WHERE id = $1::uuid")
            .bind(c.parse::<Uuid>().map_err(|_| AppError::Validation("Invalid cursor".into()))?)
            .fetch_optional(&state.pool)
            .await?,
        None => None,
    };

    let rows: Vec<Conversation> = sqlx::query_as(
        "SELECT c.* FROM conversations c
         JOIN conversation_members cm ON cm.conversation_id = c.id
         WHERE cm.user_id = $1
           AND ($2::timestamptz IS NULL OR c.updated_at < $2)
         ORDER BY c.updated_at DESC, c.id DESC
         LIMIT $3",
    )
    .bind(user_id)
    .bind(cursor_updated_at)
    .bind(limit + 1)
    .fetch_all(&state.pool)
    .await?;

    let has_more = rows.len() as i64 > limit;
    let page: Vec<Conversation> = rows.into_iter().take(limit as usize).collect();

    let dtos = hydrate_batch(state, page, user_id).await?;
    Ok((dtos, has_more))
}

/// Batch-enrich a page of conversations with exactly one extra query per
/// enrichment dimension (members, unread counts, last messages), never one
/// per row.
async fn hydrate_batch(
    state: &AppState,
    conversations: Vec<Conversation>,
    viewer_id: Uuid,
) -> AppResult<Vec<ConversationDto>> {
    if conversations.is_empty() {
        return Ok(Vec::new());
    }

    let conversation_ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();

    let member_rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT conversation_id, user_id FROM conversation_members WHERE conversation_id = ANY($1)",
    )
    .bind(&conversation_ids)
    .fetch_all(&state.pool)
    .await?;

    let mut member_ids_by_conversation: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (conversation_id, user_id) in &member_rows {
        member_ids_by_conversation.entry(*conversation_id).or_default().push(*user_id);
    }

    let all_member_ids: Vec<Uuid> = member_rows.iter().map(|(_, user_id)| *user_id).collect();
    let users = user_service::fetch_users(&state.pool, &state.cache, &all_member_ids).await?;
    let users_by_id: HashMap<Uuid, UserDto> = users.into_iter().map(|u| (u.id, u)).collect();

    let unread_counts =
        delivery_service::unread_counts_by_conversation(state, &conversation_ids, viewer_id).await?;

    let last_message_rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT DISTINCT ON (conversation_id) conversation_id, id FROM messages
         WHERE conversation_id = ANY($1)
         ORDER BY conversation_id, sequence_number DESC",
    )
    .bind(&conversation_ids)
    .fetch_all(&state.pool)
    .await?;

    let last_message_ids: Vec<Uuid> = last_message_rows.iter().map(|(_, id)| *id).collect();
    let last_messages = message_service::fetch_messages(&state.pool, &last_message_ids).await?;
    let last_message_dtos = message_service::hydrate_messages(state, &last_messages, viewer_id).await?;
    let last_message_dto_by_id: HashMap<Uuid, _> =
        last_message_dtos.into_iter().map(|m| (m.id, m)).collect();
    let last_message_id_by_conversation: HashMap<Uuid, Uuid> = last_message_rows.into_iter().collect();

    let mut out = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let member_ids = member_ids_by_conversation.remove(&conversation.id).unwrap_or_default();
        let members: Vec<UserDto> = member_ids
            .iter()
            .filter_map(|id| users_by_id.get(id).cloned())
            .collect();

        let (display_name, display_avatar) = match conversation.conversation_type {
            ConversationType::Group => (conversation.name.clone(), conversation.avatar_url.clone()),
            ConversationType::Dm => {
                let other = members.iter().find(|m| m.id != viewer_id);
                match other {
                    Some(other) => (other.name.clone(), other.image.clone()),
                    None => (conversation.name.clone(), conversation.avatar_url.clone()),
                }
            }
        };

        let unread_count = unread_counts.get(&conversation.id).copied().unwrap_or(0);
        let last_message = last_message_id_by_conversation
            .get(&conversation.id)
            .and_then(|id| last_message_dto_by_id.get(id))
            .cloned();

        out.push(ConversationDto {
            id: conversation.id,
            conversation_type: conversation.conversation_type,
            display_name,
            display_avatar,
            members,
            unread_count,
            last_message,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        });
    }

    Ok(out)
}

pub async fn update_conversation(
    state: &AppState,
    conversation_id: Uuid,
    actor_id: Uuid,
    input: UpdateConversationDto,
) -> AppResult<ConversationDto> {
    if !is_admin(state, conversation_id, actor_id).await? {
        return Err(AppError::Forbidden("Only an admin may update this conversation".into()));
    }

    sqlx::query(
        "UPDATE conversations
         SET name = COALESCE($2, name), avatar_url = COALESCE($3, avatar_url), updated_at = now()
         WHERE id = $1",
    )
    .bind(conversation_id)
    .bind(&input.name)
    .bind(&input.avatar_url)
    .execute(&state.pool)
    .await?;

    let dto = get_conversation(state, conversation_id, actor_id).await?;

    crate::websocket::broadcast_to_conversation(
        state,
        conversation_id,
        EVENT_CONVERSATION_UPDATED,
        serde_json::to_value(&dto).unwrap_or_default(),
    )
    .await;

    Ok(dto)
}

pub async fn add_members(
    state: &AppState,
    conversation_id: Uuid,
    actor_id: Uuid,
    member_ids: &[Uuid],
) -> AppResult<ConversationDto> {
    if !is_admin(state, conversation_id, actor_id).await? {
        return Err(AppError::Forbidden("Only an admin may add members".into()));
    }

    let conversation_type: ConversationType =
        sqlx::query_scalar("SELECT type FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".into()))?;
    if conversation_type == ConversationType::Dm {
        return Err(AppError::Validation("Cannot add members to a direct conversation".into()));
    }

    let mut tx = state.pool.begin().await.map_err(AppError::from)?;

    let mut added = Vec::new();
    for member_id in member_ids {
        let result = sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
             VALUES ($1, $2, 'member', now())
             ON CONFLICT DO NOTHING",
        )
        .bind(conversation_id)
        .bind(member_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() > 0 {
            added.push(*member_id);
        }
    }

    let users = user_service::fetch_users(&state.pool, &state.cache, &added).await?;
    for user in &users {
        let name = user.name.clone().unwrap_or_else(|| "Someone".to_string());
        message_service::insert_system_message(
            &mut tx,
            conversation_id,
            actor_id,
            &format!("{name} joined the conversation"),
            json!({ "event": "member_added", "user_id": user.id }),
        )
        .await?;
    }

    tx.commit().await.map_err(AppError::from)?;

    let dto = get_conversation(state, conversation_id, actor_id).await?;

    crate::websocket::broadcast_to_members(
        state,
        &added,
        EVENT_MEMBER_ADDED,
        json!({ "conversation_id": conversation_id, "member_ids": added }),
    )
    .await;

    Ok(dto)
}

pub async fn remove_member(
    state: &AppState,
    conversation_id: Uuid,
    actor_id: Uuid,
    target_id: Uuid,
) -> AppResult<()> {
    if !is_admin(state, conversation_id, actor_id).await? {
        return Err(AppError::Forbidden("Only an admin may remove members".into()));
    }

    let mut tx = state.pool.begin().await.map_err(AppError::from)?;

    let result = sqlx::query(
        "DELETE FROM conversation_members WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(target_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Member not found".into()));
    }

    message_service::insert_system_message(
        &mut tx,
        conversation_id,
        actor_id,
        "A member was removed from the conversation",
        json!({ "event": "member_removed", "user_id": target_id }),
    )
    .await?;

    tx.commit().await.map_err(AppError::from)?;

    crate::websocket::broadcast_to_members(
        state,
        &[target_id],
        EVENT_MEMBER_REMOVED,
        json!({ "conversation_id": conversation_id, "user_id": target_id }),
    )
    .await;

    Ok(())
}

/// A member leaves their own conversation. Unlike `remove_member`, this never
/// auto-promotes a new admin when the last admin leaves — members simply lose
/// the ability to change settings or add people until one is re-promoted
/// through some other means.
pub async fn leave_conversation(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
    let mut tx = state.pool.begin().await.map_err(AppError::from)?;

    let result = sqlx::query(
        "DELETE FROM conversation_members WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Not a member of this conversation".into()));
    }

    message_service::insert_system_message(
        &mut tx,
        conversation_id,
        user_id,
        "A member left the conversation",
        json!({ "event": "member_left", "user_id": user_id }),
    )
    .await?;

    tx.commit().await.map_err(AppError::from)?;

    crate::websocket::broadcast_to_conversation(
        state,
        conversation_id,
        EVENT_MEMBER_LEFT,
        json!({ "conversation_id": conversation_id, "user_id": user_id }),
    )
    .await;

    Ok(())
}

/// Search the caller's conversations by name (weighted 60%) and member name
/// (weighted 40%), scored by `pg_trgm` similarity. Falls back to a plain
/// `ILIKE` scan when `pg_trgm` isn't installed (error code `42883`,
/// "undefined function" — `similarity()` doesn't exist).
pub async fn search_conversations(state: &AppState, user_id: Uuid, query: &str) -> AppResult<Vec<ConversationDto>> {
    let query = query.trim();
    let conversations = match search_conversations_trgm(state, user_id, query).await {
        Ok(rows) => rows,
        Err(AppError::Database(sqlx::Error::Database(ref db_err)))
            if db_err.code().as_deref() == Some("42883") =>
        {
            search_conversations_ilike(state, user_id, query).await?
        }
        Err(e) => return Err(e),
    };

    hydrate_batch(state, conversations, user_id).await
}

async fn search_conversations_trgm(state: &AppState, user_id: Uuid, query: &str) -> AppResult<Vec<Conversation>> {
    sqlx::query_as(
        "SELECT c.* FROM (
             SELECT c.*,
                 CASE
                     WHEN c.type = 'dm' THEN COALESCE(MAX(similarity(u.name, $2)), 0)
                     ELSE 0.6 * COALESCE(similarity(c.name, $2), 0)
                          + 0.4 * COALESCE(MAX(similarity(u.name, $2)), 0)
                 END AS score
             FROM conversations c
             JOIN conversation_members cm ON cm.conversation_id = c.id AND cm.user_id = $1
             LEFT JOIN conversation_members other ON other.conversation_id = c.id AND other.user_id != $1
             LEFT JOIN users u ON u.id = other.user_id
             GROUP BY c.id
         ) c
         WHERE c.score > $3
         ORDER BY c.score DESC, c.updated_at DESC
         LIMIT $4",
    )
    .bind(user_id)
    .bind(query)
    .bind(SEARCH_SIMILARITY_THRESHOLD)
    .bind(SEARCH_RESULT_LIMIT)
    .fetch_all(&state.pool)
    .await
    .map_err(AppError::from)
}

async fn search_conversations_ilike(state: &AppState, user_id: Uuid, query: &str) -> AppResult<Vec<Conversation>> {
    let pattern = format!("%{query}%");

    sqlx::query_as(
        "SELECT DISTINCT c.* FROM conversations c
         JOIN conversation_members cm ON cm.conversation_id = c.id
         LEFT JOIN conversation_members other ON other.conversation_id = c.id AND other.user_id != cm.user_id
         LEFT JOIN users u ON u.id = other.user_id
         WHERE cm.user_id = $1
           AND (c.name ILIKE $2 OR u.name ILIKE $2)
         ORDER BY c.updated_at DESC
         LIMIT $3",
    )
    .bind(user_id)
    .bind(&pattern)
    .bind(SEARCH_RESULT_LIMIT)
    .fetch_all(&state.pool)
    .await
    .map_err(AppError::from)
}
