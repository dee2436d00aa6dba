use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::Response,
};
use serde::Deserialize;
use url::Url;

use crate::{auth::AuthUser, error::AppError, error::AppResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: String,
}

/// GET /files/proxy?url=... — authenticated pass-through to the object store,
/// so browser clients never need the store's own CORS configuration.
///
/// The target must resolve to the configured object-store host; anything
/// else is rejected before a request ever leaves this process.
pub async fn proxy(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<ProxyQuery>,
) -> AppResult<Response> {
    let target = Url::parse(&query.url).map_err(|_| AppError::Validation("Invalid url".into()))?;
    let target_host = target
        .host_str()
        .ok_or_else(|| AppError::Validation("Invalid url".into()))?;

    if target_host != state.object_store_base_url.as_ref() {
        return Err(AppError::Forbidden("url is not on the allow-listed object store host".into()));
    }

    let upstream = state
        .http_client
        .get(target)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(error = ?e, "file proxy upstream request failed");
            AppError::UpstreamUnavailable("object store unreachable".into())
        })?;

    if !upstream.status().is_success() {
        return Err(AppError::NotFound("file not found".into()));
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));

    let body = Body::from_stream(upstream.bytes_stream());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "private, max-age=300")
        .body(body)
        .map_err(|_| AppError::Internal)
}
