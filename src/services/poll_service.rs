use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{CreatePollDto, Poll, PollDto, PollOption, PollOptionDto};
use crate::services::message_service;
use crate::state::AppState;
use crate::websocket::events::{EVENT_NEW_POLL, EVENT_POLL_CLOSED, EVENT_POLL_VOTE};

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

pub async fn create_poll(state: &AppState, creator_id: Uuid, input: CreatePollDto) -> AppResult<PollDto> {
    if !is_member(state, input.conversation_id, creator_id).await? {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    let mut tx = state.pool.begin().await.map_err(AppError::from)?;

    let seq: i64 = {
        sqlx::query("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(input.conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM messages WHERE conversation_id = $1",
        )
        .bind(input.conversation_id)
        .fetch_one(&mut *tx)
        .await?
    };

    let message_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender_id, content, type, metadata, sequence_number, created_at)
         VALUES ($1, $2, $3, NULL, 'POLL', $4, $5, now())",
    )
    .bind(message_id)
    .bind(input.conversation_id)
    .bind(creator_id)
    .bind(json!({ "question": input.question }))
    .bind(seq)
    .execute(&mut *tx)
    .await?;

    let poll: Poll = sqlx::query_as(
        "INSERT INTO polls (id, message_id, question, multiple_choice, expires_at, created_at)
         VALUES ($1, $2, $3, $4, $5, now())
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(message_id)
    .bind(&input.question)
    .bind(input.multiple_choice)
    .bind(input.expires_at)
    .fetch_one(&mut *tx)
    .await?;

    let mut options = Vec::with_capacity(input.options.len());
    for (position, option_text) in input.options.iter().enumerate() {
        let option: PollOption = sqlx::query_as(
            "INSERT INTO poll_options (id, poll_id, option_text, position)
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(poll.id)
        .bind(option_text)
        .bind(position as i32)
        .fetch_one(&mut *tx)
        .await?;
        options.push(option);
    }

    sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
        .bind(input.conversation_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await.map_err(AppError::from)?;

    let dto = build_dto(&poll, &options, &[], creator_id);

    crate::websocket::broadcast_to_conversation(
        state,
        input.conversation_id,
        EVENT_NEW_POLL,
        serde_json::to_value(&dto).unwrap_or_default(),
    )
    .await;

    Ok(dto)
}

pub async fn get_poll(state: &AppState, poll_id: Uuid, viewer_id: Uuid) -> AppResult<PollDto> {
    let poll = fetch_poll(state, poll_id).await?;
    let conversation_id = conversation_for_poll(state, &poll).await?;
    if !is_member(state, conversation_id, viewer_id).await? {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    let options: Vec<PollOption> = sqlx::query_as(
        "SELECT * FROM poll_options WHERE poll_id = $1 ORDER BY position ASC",
    )
    .bind(poll_id)
    .fetch_all(&state.pool)
    .await?;

    let votes: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT option_id, user_id FROM poll_votes WHERE poll_id = $1",
    )
    .bind(poll_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(build_dto(&poll, &options, &votes, viewer_id))
}

/// Idempotent voting: lock the poll row, delete every existing vote by this
/// user on this poll, then insert the requested option ids. Re-submitting the
/// same options twice leaves the same final tally.
pub async fn vote(
    state: &AppState,
    poll_id: Uuid,
    user_id: Uuid,
    option_ids: &[Uuid],
) -> AppResult<PollDto> {
    let mut tx = state.pool.begin().await.map_err(AppError::from)?;

    let poll: Poll = sqlx::query_as("SELECT * FROM polls WHERE id = $1 FOR UPDATE")
        .bind(poll_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Poll not found".into()))?;

    let conversation_id: Uuid =
        sqlx::query_scalar("SELECT conversation_id FROM messages WHERE id = $1")
            .bind(poll.message_id)
            .fetch_one(&mut *tx)
            .await?;

    let member: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2)",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if !member {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    if let Some(expires_at) = poll.expires_at {
        if expires_at <= Utc::now() {
            return Err(AppError::Validation("Poll has expired".into()));
        }
    }

    if option_ids.is_empty() {
        return Err(AppError::Validation("At least one option must be selected".into()));
    }
    if !poll.multiple_choice && option_ids.len() > 1 {
        return Err(AppError::Validation(
            "This poll only allows a single selection".into(),
        ));
    }

    let valid_option_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM poll_options WHERE poll_id = $1 AND id = ANY($2)",
    )
    .bind(poll_id)
    .bind(option_ids)
    .fetch_one(&mut *tx)
    .await?;
    if valid_option_count as usize != option_ids.len() {
        return Err(AppError::Validation("Unknown option id".into()));
    }

    sqlx::query("DELETE FROM poll_votes WHERE poll_id = $1 AND user_id = $2")
        .bind(poll_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    for option_id in option_ids {
        sqlx::query(
            "INSERT INTO poll_votes (id, poll_id, option_id, user_id, created_at)
             VALUES ($1, $2, $3, $4, now())",
        )
        .bind(Uuid::new_v4())
        .bind(poll_id)
        .bind(option_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await.map_err(AppError::from)?;

    let dto = get_poll(state, poll_id, user_id).await?;

    crate::websocket::broadcast_to_conversation(
        state,
        conversation_id,
        EVENT_POLL_VOTE,
        json!({ "poll_id": poll_id, "user_id": user_id, "option_ids": option_ids }),
    )
    .await;

    Ok(dto)
}

pub async fn close_poll(state: &AppState, poll_id: Uuid, actor_id: Uuid) -> AppResult<PollDto> {
    let poll = fetch_poll(state, poll_id).await?;
    let message = message_service::fetch_message(&state.pool, poll.message_id).await?;

    if message.sender_id != actor_id {
        return Err(AppError::Forbidden("Only the poll creator may close it".into()));
    }

    sqlx::query("UPDATE polls SET expires_at = now() WHERE id = $1")
        .bind(poll_id)
        .execute(&state.pool)
        .await?;

    let dto = get_poll(state, poll_id, actor_id).await?;

    crate::websocket::broadcast_to_conversation(
        state,
        message.conversation_id,
        EVENT_POLL_CLOSED,
        json!({ "poll_id": poll_id }),
    )
    .await;

    Ok(dto)
}

async fn fetch_poll(state: &AppState, poll_id: Uuid) -> AppResult<Poll> {
    sqlx::query_as("SELECT * FROM polls WHERE id = $1")
        .bind(poll_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Poll not found".into()))
}

async fn conversation_for_poll(state: &AppState, poll: &Poll) -> AppResult<Uuid> {
    sqlx::query_scalar("SELECT conversation_id FROM messages WHERE id = $1")
        .bind(poll.message_id)
        .fetch_one(&state.pool)
        .await
        .map_err(AppError::from)
}

fn build_dto(poll: &Poll, options: &[PollOption], votes: &[(Uuid, Uuid)], viewer_id: Uuid) -> PollDto {
    let option_dtos: Vec<PollOptionDto> = options
        .iter()
        .map(|o| PollOptionDto {
            id: o.id,
            option_text: o.option_text.clone(),
            position: o.position,
            vote_count: votes.iter().filter(|(oid, _)| *oid == o.id).count() as i64,
        })
        .collect();

    let my_option_ids = votes
        .iter()
        .filter(|(_, uid)| *uid == viewer_id)
        .map(|(oid, _)| *oid)
        .collect();

    PollDto {
        id: poll.id,
        message_id: poll.message_id,
        question: poll.question.clone(),
        multiple_choice: poll.multiple_choice,
        expires_at: poll.expires_at,
        options: option_dtos,
        my_option_ids,
        total_votes: votes.len() as i64,
    }
}
