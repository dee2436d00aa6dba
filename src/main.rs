use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use flowtalk_server::cache::Cache;
use flowtalk_server::config::Config;
use flowtalk_server::state::AppState;
use flowtalk_server::websocket::ConnectionManager;
use flowtalk_server::{db, handlers, websocket};

/// Middleware that restricts access to the metrics endpoint to loopback connections only.
///
/// When `ConnectInfo` is not available (e.g. in direct oneshot tests), access is
/// denied — the metrics route is not registered in the test app anyway, so this
/// branch is unreachable in practice.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        Some(_) => StatusCode::NOT_FOUND.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "flowtalk_server=info,tower_http=info,sqlx=warn"
            .parse()
            .unwrap()
    });

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("🚀 Flowtalk server starting...");

    // Load configuration — fatal if DATABASE_URL is missing or JWT_SECRET too short.
    let config = Config::from_env().expect("Failed to load configuration");
    info!("📝 Configuration loaded");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    info!("✅ Database migrations applied");

    db::health_check(&pool)
        .await
        .expect("Database health check failed");
    info!("✅ Database health check passed");

    // CORS: permissive in dev, origin-restricted in production.
    // Set APP_ENV=production and ALLOWED_ORIGINS=https://your-domain.com (see .env.example).
    let cors = if !config.is_production() {
        info!("🔓 CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!(
                "🔒 CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied"
            );
        } else {
            info!(
                "🔒 CORS: production mode, allowing origins: {:?}",
                config.allowed_origins
            );
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    let addr = config.server_addr();

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("Failed to build HTTP client");

    let object_store_base_url: Arc<str> = Arc::from(config.object_store_base_url.as_str());
    let object_store = Arc::new(flowtalk_server::services::object_store::HttpObjectStore::new(
        http_client.clone(),
        object_store_base_url.clone(),
    ));

    let app_state = AppState {
        pool,
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
        connections: ConnectionManager::new(),
        cache: Cache::new(),
        http_client,
        object_store_base_url,
        object_store,
    };

    // Prometheus metrics layer
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    // ── Rate limiting ───────────────────────────────────────────────────────
    // Global limit: 10 requests/second per IP, burst of 20.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .finish()
            .expect("Invalid global governor configuration"),
    );

    // Message send/search: 30 req/min per IP.
    let message_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(10)
            .finish()
            .expect("Invalid message governor configuration"),
    );

    // Reactions: 60 req/min per IP.
    let reaction_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(1)
            .burst_size(20)
            .finish()
            .expect("Invalid reaction governor configuration"),
    );

    // Encryption key/backup mutations: roughly 10 req/min per IP.
    let encryption_write_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(6)
            .burst_size(5)
            .finish()
            .expect("Invalid encryption write governor configuration"),
    );

    // Encryption key/backup reads: roughly 30 req/min per IP.
    let encryption_read_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(15)
            .finish()
            .expect("Invalid encryption read governor configuration"),
    );

    let message_router = Router::new()
        .route("/messages", post(handlers::messages::create_message))
        .route("/messages/upload", post(handlers::messages::upload_file))
        .route("/messages/search", post(handlers::messages::search_messages))
        .route_layer(GovernorLayer {
            config: message_governor_conf,
        });

    let reaction_router = Router::new()
        .route(
            "/messages/:message_id/reactions",
            post(handlers::reactions::add_reaction),
        )
        .route(
            "/messages/:message_id/reactions/:emoji",
            delete(handlers::reactions::remove_reaction),
        )
        .route_layer(GovernorLayer {
            config: reaction_governor_conf,
        });

    let encryption_write_router = Router::new()
        .route(
            "/encryption/keys/bundle",
            post(handlers::encryption::upload_key_bundle),
        )
        .route(
            "/encryption/keys/prekeys",
            post(handlers::encryption::add_prekeys),
        )
        .route(
            "/encryption/sender-keys/distribute",
            post(handlers::encryption::distribute_sender_key),
        )
        .route(
            "/encryption/keys/backup",
            post(handlers::encryption::upload_key_backup),
        )
        .route(
            "/encryption/keys/conversation",
            post(handlers::encryption::upload_conversation_key_backup),
        )
        .route_layer(GovernorLayer {
            config: encryption_write_governor_conf,
        });

    let encryption_read_router = Router::new()
        .route(
            "/encryption/keys/bundle/:user_id",
            get(handlers::encryption::fetch_key_bundle),
        )
        .route(
            "/encryption/keys/prekeys/count",
            get(handlers::encryption::prekey_count),
        )
        .route(
            "/encryption/sender-keys/:conversation_id",
            get(handlers::encryption::fetch_sender_key),
        )
        .route("/encryption/keys/backup", get(handlers::encryption::fetch_key_backup))
        .route(
            "/encryption/keys/backup/status",
            get(handlers::encryption::backup_status),
        )
        .route(
            "/encryption/keys/conversation/:conversation_id",
            get(handlers::encryption::fetch_conversation_key_backup),
        )
        .route_layer(GovernorLayer {
            config: encryption_read_governor_conf,
        });

    let app = Router::new()
        // Health + metrics
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/health/websocket", get(handlers::websocket_health))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        // Identity gateway
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/validate", post(handlers::auth::validate))
        .route("/auth/health", get(handlers::auth::health))
        // Conversations
        .route(
            "/conversations",
            get(handlers::conversations::list_conversations).post(handlers::conversations::create_conversation),
        )
        .route(
            "/conversations/:id",
            get(handlers::conversations::get_conversation).put(handlers::conversations::update_conversation),
        )
        .route(
            "/conversations/:id/members",
            post(handlers::conversations::add_members),
        )
        .route(
            "/conversations/:id/members/:user_id",
            delete(handlers::conversations::remove_member),
        )
        .route(
            "/conversations/:id/leave",
            post(handlers::conversations::leave_conversation),
        )
        .route(
            "/conversations/:id/mark-read",
            post(handlers::conversations::mark_read),
        )
        // Messages (rate limited separately, see message_router)
        .merge(message_router)
        .route("/messages/:id", get(handlers::messages::get_message))
        .route("/messages/:id", put(handlers::messages::update_message))
        .route("/messages/:id", delete(handlers::messages::delete_message))
        .route(
            "/messages/conversations/:id/messages",
            get(handlers::messages::list_messages),
        )
        .route("/messages/mark-read", post(handlers::messages::mark_read))
        .route("/messages/mark-delivered", post(handlers::messages::mark_delivered))
        .route("/messages/unread-count", get(handlers::messages::total_unread_count))
        .route(
            "/messages/conversations/:id/unread-count",
            get(handlers::messages::conversation_unread_count),
        )
        .route(
            "/messages/conversations/:id/clear",
            delete(handlers::messages::clear_conversation),
        )
        // Reactions (rate limited separately, see reaction_router)
        .merge(reaction_router)
        // Polls
        .route(
            "/polls",
            post(handlers::polls::create_poll),
        )
        .route("/polls/:id", get(handlers::polls::get_poll))
        .route("/polls/:id/vote", post(handlers::polls::vote))
        .route("/polls/:id/close", put(handlers::polls::close_poll))
        // Notifications
        .route(
            "/notifications/preferences",
            get(handlers::notifications::get_preferences).put(handlers::notifications::update_preferences),
        )
        .route(
            "/notifications/conversations/:id/mute",
            post(handlers::notifications::mute_conversation).delete(handlers::notifications::unmute_conversation),
        )
        .route(
            "/notifications/muted-conversations",
            get(handlers::notifications::list_muted),
        )
        // E2EE key plane (rate limited separately, see encryption_*_router)
        .merge(encryption_write_router)
        .merge(encryption_read_router)
        // File proxy
        .route("/files/proxy", get(handlers::files::proxy))
        // WebSocket gateway
        .route("/ws", get(websocket::websocket_handler))
        // ── Global rate limit (10 req/s per IP, burst 20) ──────────────────
        .layer(GovernorLayer {
            config: governor_conf,
        })
        // ── Security response headers ──────────────────────────────────────
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        // ── Prometheus + CORS ──────────────────────────────────────────────
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(app_state);

    info!("🎧 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // `into_make_service_with_connect_info` populates `ConnectInfo<SocketAddr>` in
    // request extensions, needed by:
    //  - GovernorLayer's PeerIpKeyExtractor (per-IP rate limiting)
    //  - require_loopback middleware on /metrics
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed to start");
}
