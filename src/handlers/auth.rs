use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::{self, AuthUser},
    error::AppResult,
    models::UserDto,
    state::AppState,
};

/// GET /auth/me — the caller's own profile, upserted from their bearer
/// token's claims on every call.
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<UserDto>> {
    let user = crate::services::user_service::fetch_user(&state.pool, &state.cache, auth.user_id())
        .await?
        .ok_or_else(|| crate::error::AppError::NotFound("User not found".into()))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
}

/// POST /auth/validate — decode and verify a bearer token without requiring
/// one on this request itself; used by peer services that only hold a raw
/// token and want to know whether it's still good.
pub async fn validate(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> AppResult<Json<Value>> {
    let claims = auth::validate_token(&req.token, &state.jwt_secret)?;
    let external_user_id = claims.external_user_id()?.to_string();
    Ok(Json(json!({ "valid": true, "external_user_id": external_user_id })))
}

/// GET /auth/health — cheap liveness probe for the identity gateway that
/// doesn't touch the database.
pub async fn health() -> StatusCode {
    StatusCode::OK
}
