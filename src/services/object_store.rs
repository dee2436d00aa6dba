use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, AppResult};

/// Narrow seam over the object store's write path. `handlers::files::proxy`
/// already owns the read path (an allow-listed GET pass-through); this trait
/// owns the write path behind the same host, so message-upload code depends
/// on an interface rather than a concrete HTTP client, and tests can swap in
/// a stub that never touches the network.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `data` under `key` and return the object's public URL.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> AppResult<String>;
}

/// Talks to the object store over HTTP PUT — the write-side mirror of the
/// file proxy's GET pass-through, reusing the same host allow-list the proxy
/// validates against.
pub struct HttpObjectStore {
    client: Client,
    base_host: Arc<str>,
}

impl HttpObjectStore {
    pub fn new(client: Client, base_host: Arc<str>) -> Self {
        Self { client, base_host }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> AppResult<String> {
        let url = format!("https://{}/{}", self.base_host, key);

        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = ?e, "object store upload failed");
                AppError::UpstreamUnavailable("object store unreachable".into())
            })?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "object store rejected upload");
            return Err(AppError::UpstreamUnavailable(
                "object store rejected upload".into(),
            ));
        }

        Ok(url)
    }
}
