//! Identity gateway: validates bearer tokens issued by the external identity
//! provider and resolves them to a local `User` row, creating or refreshing it
//! on first contact. This crate never issues tokens itself — `JWT_SECRET` is
//! the provider's shared verification secret, not a local signing key.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use std::collections::HashMap;
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

/// Claims as issued by the external identity provider. The provider is known
/// to emit the external user id under either `sub` or `id` depending on the
/// token flow that minted it, so both are accepted with `sub` preferred.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Option<String>,
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub image: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn external_user_id(&self) -> AppResult<&str> {
        self.sub
            .as_deref()
            .or(self.id.as_deref())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Unauthenticated("Token is missing a subject claim".into()))
    }
}

pub fn validate_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::warn!("Token validation failed: {:?}", e);
        AppError::Unauthenticated("Invalid or expired token".into())
    })
}

// ============================================================================
// Identity-gateway upsert
// ============================================================================

/// Resolve an external identity-provider claim set to a local `User` row.
///
/// Matches first by `external_user_id`, falling back to `email` so that an
/// identity-provider id reset or an email change alone does not orphan a
/// user's conversation history. Creates the row on first contact; otherwise
/// refreshes display fields and `last_synced_at`.
pub async fn upsert_user_from_claims(pool: &PgPool, claims: &Claims) -> AppResult<User> {
    let external_id = claims.external_user_id()?;

    let existing = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE external_user_id = $1
         OR ($2::text IS NOT NULL AND email = $2)
         ORDER BY (external_user_id = $1) DESC
         LIMIT 1",
    )
    .bind(external_id)
    .bind(claims.email.as_deref())
    .fetch_optional(pool)
    .await?;

    let role = claims.role.clone().unwrap_or_else(|| "MEMBER".to_string());

    let user = if let Some(existing) = existing {
        sqlx::query_as::<_, User>(
            "UPDATE users
             SET external_user_id = $1,
                 email = COALESCE($2, email),
                 name = COALESCE($3, name),
                 image = COALESCE($4, image),
                 role = COALESCE($5, role),
                 last_synced_at = now()
             WHERE id = $6
             RETURNING *",
        )
        .bind(external_id)
        .bind(claims.email.as_deref())
        .bind(claims.name.as_deref())
        .bind(claims.image.as_deref())
        .bind(&role)
        .bind(existing.id)
        .fetch_one(pool)
        .await?
    } else {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, external_user_id, email, name, image, role, is_active, is_leader, last_synced_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, true, false, now(), now())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(external_id)
        .bind(claims.email.as_deref())
        .bind(claims.name.as_deref())
        .bind(claims.image.as_deref())
        .bind(&role)
        .fetch_one(pool)
        .await?
    };

    Ok(user)
}

// ============================================================================
// Auth extractor
// ============================================================================

/// Authenticated user resolved from a valid bearer token.
///
/// Fields are private: the only valid constructor is the `FromRequestParts`
/// impl, preventing handlers from forging an `AuthUser` via struct literal.
#[derive(Clone)]
pub struct AuthUser {
    user_id: Uuid,
    external_user_id: String,
    email: Option<String>,
    role: String,
}

impl AuthUser {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn external_user_id(&self) -> &str {
        &self.external_user_id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn is_admin(&self) -> bool {
        self.role == "ADMIN"
    }
}

type AuthRejection = (StatusCode, Json<serde_json::Value>);

fn auth_error(message: &str) -> AuthRejection {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = match parts.extract::<TypedHeader<Authorization<Bearer>>>().await {
            Ok(TypedHeader(Authorization(bearer))) => bearer.token().to_string(),
            // Some clients (e.g. an <img> tag hitting the file proxy) can't set
            // a header on the request, so a `?token=` query parameter is
            // accepted as a fallback — never as the only path checked.
            Err(_) => parts
                .extract::<Query<HashMap<String, String>>>()
                .await
                .ok()
                .and_then(|Query(params)| params.get("token").cloned())
                .ok_or_else(|| auth_error("Missing or invalid Authorization header"))?,
        };

        let claims = validate_token(&token, &state.jwt_secret)
            .map_err(|_| auth_error("Invalid or expired token"))?;

        let user = upsert_user_from_claims(&state.pool, &claims)
            .await
            .map_err(|_| auth_error("Failed to resolve user identity"))?;

        Ok(AuthUser {
            user_id: user.id,
            external_user_id: user.external_user_id,
            email: user.email,
            role: user.role,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const TEST_SECRET: &str = "test-secret-min-32-characters-long!!";

    fn make_token(claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn base_claims() -> Claims {
        let now = Utc::now();
        Claims {
            sub: Some(Uuid::new_v4().to_string()),
            id: None,
            email: Some("alice@example.com".into()),
            name: Some("Alice".into()),
            role: Some("MEMBER".into()),
            image: None,
            exp: (now + Duration::minutes(15)).timestamp(),
            iat: now.timestamp(),
        }
    }

    #[test]
    fn validate_token_roundtrip_happy_path() {
        let claims = base_claims();
        let token = make_token(&claims);

        let decoded = validate_token(&token, TEST_SECRET).expect("should validate");
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.email, claims.email);
    }

    #[test]
    fn validate_token_rejects_wrong_secret() {
        let token = make_token(&base_claims());
        let result = validate_token(&token, "a-completely-different-secret-value");
        assert!(result.is_err());
    }

    #[test]
    fn validate_token_rejects_malformed_string() {
        let result = validate_token("not.a.jwt", TEST_SECRET);
        assert!(result.is_err());
    }

    #[test]
    fn validate_token_rejects_expired_token() {
        let now = Utc::now();
        let mut claims = base_claims();
        claims.exp = (now - Duration::minutes(5)).timestamp();
        claims.iat = (now - Duration::minutes(20)).timestamp();
        let token = make_token(&claims);

        let result = validate_token(&token, TEST_SECRET);
        assert!(result.is_err(), "expired token must be rejected");
    }

    #[test]
    fn external_user_id_prefers_sub_over_id() {
        let mut claims = base_claims();
        claims.sub = Some("from-sub".into());
        claims.id = Some("from-id".into());
        assert_eq!(claims.external_user_id().unwrap(), "from-sub");
    }

    #[test]
    fn external_user_id_falls_back_to_id_when_sub_absent() {
        let mut claims = base_claims();
        claims.sub = None;
        claims.id = Some("from-id".into());
        assert_eq!(claims.external_user_id().unwrap(), "from-id");
    }

    #[test]
    fn external_user_id_errors_when_both_absent() {
        let mut claims = base_claims();
        claims.sub = None;
        claims.id = None;
        assert!(claims.external_user_id().is_err());
    }

    #[test]
    fn external_user_id_errors_when_sub_is_empty_string() {
        let mut claims = base_claims();
        claims.sub = Some(String::new());
        claims.id = None;
        assert!(claims.external_user_id().is_err());
    }
}
