//! User directory cache: batch-fetches and TTL-caches external user profiles
//! so message/conversation enrichment never issues one query per row.

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::{user_profile_key, Cache};
use crate::error::AppResult;
use crate::models::{User, UserDto};

const PROFILE_TTL: Duration = Duration::from_secs(300);

/// Fetch a batch of users by id, preferring the cache and falling back to a
/// single `ANY($1)` query for whatever wasn't cached. Never issues one query
/// per id.
pub async fn fetch_users(pool: &PgPool, cache: &Cache, user_ids: &[Uuid]) -> AppResult<Vec<UserDto>> {
    if user_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut found = Vec::with_capacity(user_ids.len());
    let mut missing = Vec::new();

    for &id in user_ids {
        match cache.get_json::<UserDto>(&user_profile_key(id)).await {
            Some(dto) => found.push(dto),
            None => missing.push(id),
        }
    }

    if !missing.is_empty() {
        let rows: Vec<User> = sqlx::query_as("SELECT * FROM users WHERE id = ANY($1)")
            .bind(&missing)
            .fetch_all(pool)
            .await?;

        for user in rows {
            let dto: UserDto = user.into();
            cache
                .set_json(user_profile_key(dto.id), &dto, PROFILE_TTL)
                .await;
            found.push(dto);
        }
    }

    Ok(found)
}

pub async fn fetch_user(pool: &PgPool, cache: &Cache, user_id: Uuid) -> AppResult<Option<UserDto>> {
    Ok(fetch_users(pool, cache, &[user_id]).await?.into_iter().next())
}

pub async fn invalidate_user(cache: &Cache, user_id: Uuid) {
    cache.invalidate(&user_profile_key(user_id)).await;
}

/// Returns true if `blocker_id` has blocked `blocked_id`. Blocked
/// relationships suppress delivery-status creation for the blocker at send
/// time (see the message engine).
pub async fn is_blocked(pool: &PgPool, blocker_id: Uuid, blocked_id: Uuid) -> AppResult<bool> {
    let blocked: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM user_blocks WHERE blocker_id = $1 AND blocked_id = $2)",
    )
    .bind(blocker_id)
    .bind(blocked_id)
    .fetch_one(pool)
    .await?;
    Ok(blocked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_users_with_empty_input_returns_empty_without_querying() {
        // A real pool is intentionally not constructed here — the empty-input
        // short-circuit must never touch the database.
        let cache = Cache::new();
        // Build a pool lazily; fetch_users returns before it would be used.
        let pool = PgPool::connect_lazy("postgres://localhost/nonexistent").unwrap();
        let result = fetch_users(&pool, &cache, &[]).await.unwrap();
        assert!(result.is_empty());
    }
}
