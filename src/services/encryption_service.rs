//! E2EE key distribution plane. The server never sees plaintext key material
//! it could use — it only stores and relays what clients hand it.

use std::time::Duration;

use uuid::Uuid;

use crate::cache::key_bundle_stable_key;
use crate::error::{AppError, AppResult};
use crate::models::{
    ConversationKeyBackup, DistributeSenderKeyDto, GroupSenderKey, KeyBackup, KeyBundleDto,
    OneTimePreKeyDto, OneTimePreKeyUpload, UploadConversationKeyBackupDto, UploadKeyBackupDto,
    UploadKeyBundleDto, UserKeyBundle,
};
use crate::state::AppState;
use crate::websocket::events::EVENT_SENDER_KEY_DISTRIBUTION;

const STABLE_BUNDLE_TTL: Duration = Duration::from_secs(600);

pub async fn upload_key_bundle(state: &AppState, user_id: Uuid, input: UploadKeyBundleDto) -> AppResult<()> {
    let mut tx = state.pool.begin().await.map_err(AppError::from)?;

    sqlx::query(
        "INSERT INTO user_key_bundles
            (user_id, identity_key, signed_prekey, signed_prekey_signature, signed_prekey_id, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, now(), now())
         ON CONFLICT (user_id) DO UPDATE SET
            identity_key = EXCLUDED.identity_key,
            signed_prekey = EXCLUDED.signed_prekey,
            signed_prekey_signature = EXCLUDED.signed_prekey_signature,
            signed_prekey_id = EXCLUDED.signed_prekey_id,
            updated_at = now()",
    )
    .bind(user_id)
    .bind(&input.identity_key)
    .bind(&input.signed_prekey)
    .bind(&input.signed_prekey_signature)
    .bind(input.signed_prekey_id)
    .execute(&mut *tx)
    .await?;

    insert_prekeys(&mut tx, user_id, &input.one_time_prekeys).await?;

    tx.commit().await.map_err(AppError::from)?;
    state.cache.invalidate(&key_bundle_stable_key(user_id)).await;
    Ok(())
}

pub async fn add_prekeys(state: &AppState, user_id: Uuid, prekeys: &[OneTimePreKeyUpload]) -> AppResult<()> {
    let mut tx = state.pool.begin().await.map_err(AppError::from)?;
    insert_prekeys(&mut tx, user_id, prekeys).await?;
    tx.commit().await.map_err(AppError::from)?;
    Ok(())
}

async fn insert_prekeys(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    prekeys: &[OneTimePreKeyUpload],
) -> AppResult<()> {
    for prekey in prekeys {
        sqlx::query(
            "INSERT INTO one_time_prekeys (id, user_id, prekey_id, public_key)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, prekey_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(prekey.prekey_id)
        .bind(&prekey.public_key)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn prekey_count(state: &AppState, user_id: Uuid) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM one_time_prekeys WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(count)
}

/// Fetch a recipient's key bundle and atomically consume one one-time
/// pre-key so it can never be handed out twice. The stable identity/signed
/// pre-key part is cached; the one-time pre-key is always fetched fresh and
/// deleted in the same transaction that returns it.
pub async fn fetch_key_bundle(state: &AppState, user_id: Uuid) -> AppResult<KeyBundleDto> {
    let stable = match state.cache.get_json::<StableBundle>(&key_bundle_stable_key(user_id)).await {
        Some(cached) => cached,
        None => {
            let bundle: UserKeyBundle = sqlx::query_as("SELECT * FROM user_key_bundles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&state.pool)
                .await?
                .ok_or_else(|| AppError::NotFound("No key bundle uploaded for this user".into()))?;

            let stable = StableBundle {
                identity_key: bundle.identity_key,
                signed_prekey: bundle.signed_prekey,
                signed_prekey_signature: bundle.signed_prekey_signature,
                signed_prekey_id: bundle.signed_prekey_id,
            };
            state
                .cache
                .set_json(key_bundle_stable_key(user_id), &stable, STABLE_BUNDLE_TTL)
                .await;
            stable
        }
    };

    let mut tx = state.pool.begin().await.map_err(AppError::from)?;

    let one_time_prekey: Option<(Uuid, i32, String)> = sqlx::query_as(
        "SELECT id, prekey_id, public_key FROM one_time_prekeys
         WHERE user_id = $1 ORDER BY prekey_id ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let one_time_prekey = if let Some((id, prekey_id, public_key)) = &one_time_prekey {
        sqlx::query("DELETE FROM one_time_prekeys WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        Some(OneTimePreKeyDto {
            prekey_id: *prekey_id,
            public_key: public_key.clone(),
        })
    } else {
        None
    };

    tx.commit().await.map_err(AppError::from)?;

    Ok(KeyBundleDto {
        user_id,
        identity_key: stable.identity_key,
        signed_prekey: stable.signed_prekey,
        signed_prekey_signature: stable.signed_prekey_signature,
        signed_prekey_id: stable.signed_prekey_id,
        one_time_prekey,
    })
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
struct StableBundle {
    identity_key: String,
    signed_prekey: String,
    signed_prekey_signature: String,
    signed_prekey_id: i32,
}

/// Distribute a group sender key to a set of recipients. The key material is
/// stored once per `(conversation, sender)` and relayed over the gateway to
/// each recipient directly rather than broadcast to the room, since a
/// recipient who hasn't yet joined the room still needs it.
pub async fn distribute_sender_key(
    state: &AppState,
    sender_id: Uuid,
    input: DistributeSenderKeyDto,
) -> AppResult<()> {
    let member: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2)",
    )
    .bind(input.conversation_id)
    .bind(sender_id)
    .fetch_one(&state.pool)
    .await?;
    if !member {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    sqlx::query(
        "INSERT INTO group_sender_keys (conversation_id, sender_id, sender_key_id, public_key, chain_key, created_at)
         VALUES ($1, $2, $3, $4, $5, now())
         ON CONFLICT (conversation_id, sender_id) DO UPDATE SET
            sender_key_id = EXCLUDED.sender_key_id,
            public_key = EXCLUDED.public_key,
            chain_key = EXCLUDED.chain_key,
            created_at = now()",
    )
    .bind(input.conversation_id)
    .bind(sender_id)
    .bind(&input.sender_key_id)
    .bind(&input.public_key)
    .bind(&input.chain_key)
    .execute(&state.pool)
    .await?;

    for recipient_id in &input.recipient_ids {
        crate::websocket::send_to_user(
            state,
            *recipient_id,
            EVENT_SENDER_KEY_DISTRIBUTION,
            serde_json::json!({
                "conversation_id": input.conversation_id,
                "sender_id": sender_id,
                "sender_key_id": input.sender_key_id,
                "public_key": input.public_key,
                "chain_key": input.chain_key,
            }),
        )
        .await;
    }

    Ok(())
}

/// List every sender key distributed so far in a conversation. Only members
/// may list; a conversation with no distributions yet returns an empty list
/// rather than `NotFound`, since "nobody has distributed a key" is not an
/// error condition for a brand new encrypted conversation.
pub async fn fetch_sender_keys(
    state: &AppState,
    conversation_id: Uuid,
    viewer_id: Uuid,
) -> AppResult<Vec<GroupSenderKey>> {
    let member: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2)",
    )
    .bind(conversation_id)
    .bind(viewer_id)
    .fetch_one(&state.pool)
    .await?;
    if !member {
        return Err(AppError::Forbidden("Not a member of this conversation".into()));
    }

    let keys = sqlx::query_as("SELECT * FROM group_sender_keys WHERE conversation_id = $1")
        .bind(conversation_id)
        .fetch_all(&state.pool)
        .await?;
    Ok(keys)
}

pub async fn upload_key_backup(state: &AppState, user_id: Uuid, input: UploadKeyBackupDto) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO key_backups (user_id, encrypted_data, nonce, salt, kdf_name, version, identity_key_hash, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, 1, $6, now(), now())
         ON CONFLICT (user_id) DO UPDATE SET
            encrypted_data = EXCLUDED.encrypted_data,
            nonce = EXCLUDED.nonce,
            salt = EXCLUDED.salt,
            kdf_name = EXCLUDED.kdf_name,
            version = key_backups.version + 1,
            identity_key_hash = EXCLUDED.identity_key_hash,
            updated_at = now()",
    )
    .bind(user_id)
    .bind(&input.encrypted_data)
    .bind(&input.nonce)
    .bind(&input.salt)
    .bind(&input.kdf_name)
    .bind(&input.identity_key_hash)
    .execute(&state.pool)
    .await?;
    Ok(())
}

pub async fn fetch_key_backup(state: &AppState, user_id: Uuid) -> AppResult<KeyBackup> {
    sqlx::query_as("SELECT * FROM key_backups WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("No key backup stored".into()))
}

pub async fn upload_conversation_key_backup(
    state: &AppState,
    user_id: Uuid,
    input: UploadConversationKeyBackupDto,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO conversation_key_backups (user_id, conversation_id, encrypted_key, nonce, created_at)
         VALUES ($1, $2, $3, $4, now())
         ON CONFLICT (user_id, conversation_id) DO UPDATE SET
            encrypted_key = EXCLUDED.encrypted_key,
            nonce = EXCLUDED.nonce",
    )
    .bind(user_id)
    .bind(input.conversation_id)
    .bind(&input.encrypted_key)
    .bind(&input.nonce)
    .execute(&state.pool)
    .await?;
    Ok(())
}

pub async fn fetch_conversation_key_backup(
    state: &AppState,
    user_id: Uuid,
    conversation_id: Uuid,
) -> AppResult<ConversationKeyBackup> {
    sqlx::query_as(
        "SELECT * FROM conversation_key_backups WHERE user_id = $1 AND conversation_id = $2",
    )
    .bind(user_id)
    .bind(conversation_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("No conversation key backup stored".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_bundle_roundtrips_through_json() {
        let stable = StableBundle {
            identity_key: "ik".into(),
            signed_prekey: "spk".into(),
            signed_prekey_signature: "sig".into(),
            signed_prekey_id: 1,
        };
        let json = serde_json::to_string(&stable).unwrap();
        let back: StableBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back.identity_key, "ik");
        assert_eq!(back.signed_prekey_id, 1);
    }
}
