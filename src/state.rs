use std::sync::Arc;

use reqwest::Client;
use sqlx::PgPool;

use crate::cache::Cache;
use crate::services::object_store::ObjectStore;
use crate::websocket::ConnectionManager;

/// Shared application state passed to all handlers and extractors.
///
/// `ConnectionManager` and `Cache` are cheaply cloneable (they wrap an `Arc`
/// internally), so cloning `AppState` for each request is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub jwt_secret: Arc<str>,
    pub connections: ConnectionManager,
    /// Backs user-profile enrichment, unread-count, key-bundle, and
    /// online-presence lookups (see `crate::cache`).
    pub cache: Cache,
    /// HTTP client used by the file proxy to stream object-store bodies.
    pub http_client: Client,
    /// Host the file proxy and file-message URLs must resolve against.
    pub object_store_base_url: Arc<str>,
    /// Write path for message file uploads; dyn-dispatched so tests can
    /// substitute a stub that never makes a real network call.
    pub object_store: Arc<dyn ObjectStore>,
}
