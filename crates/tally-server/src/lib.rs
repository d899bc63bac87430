//! Tally Web Server
//!
//! Axum-based REST API for the Tally banking-data pipeline.
//!
//! Security features:
//! - Bearer API keys mapped to users (secure by default, use --no-auth for local dev)
//! - Provider webhooks authenticated by HMAC signature, never by API key
//! - Cron trigger guarded by its own shared secret
//! - Restrictive CORS policy
//! - Sanitized error responses

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use tally_core::{
    spawn_worker, AIClient, BatchSyncCoordinator, CategorizationPipeline, Database,
    EnrollmentSyncOrchestrator, Provider, ProviderErrorKind, SubscriptionDetector, SyncQueue,
    TransactionIngestor, WebhookProcessor, DEFAULT_QUEUE_CAPACITY, DEFAULT_SYNC_WINDOW,
};

mod handlers;
mod scheduler;

pub use scheduler::{start_sync_scheduler, SyncScheduleConfig};

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Maximum accepted JSON body (webhooks and API requests)
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Authorization header for API key and cron secret auth
const AUTHORIZATION_HEADER: &str = "authorization";

/// Header naming the acting user when authentication is disabled
pub const DEV_USER_HEADER: &str = "x-tally-user";

/// User assumed when authentication is disabled and no header is sent
pub const DEV_USER: &str = "local-dev";

/// An API key and the user it authenticates as
#[derive(Clone, Debug)]
pub struct ApiKey {
    pub user_id: String,
    pub key: String,
}

impl ApiKey {
    pub fn new(user_id: &str, key: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            key: key.to_string(),
        }
    }
}

/// Parse a comma-separated list of `user:key` pairs
///
/// Entries without a user or key are skipped with a warning.
pub fn parse_api_keys(input: &str) -> Vec<ApiKey> {
    input
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            match entry.split_once(':') {
                Some((user, key)) if !user.trim().is_empty() && !key.trim().is_empty() => {
                    Some(ApiKey::new(user.trim(), key.trim()))
                }
                _ => {
                    warn!("Skipping API key entry without a `user:key` pair");
                    None
                }
            }
        })
        .collect()
}

fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// API keys for the user-facing API, `Authorization: Bearer <key>`
    pub api_keys: Vec<ApiKey>,
    /// Webhook signing secrets; a delivery signed with any of them is accepted.
    /// Empty rejects every webhook.
    pub webhook_secrets: Vec<String>,
    /// Bearer secret for the cron trigger; `None` disables the endpoint
    pub cron_secret: Option<String>,
    /// Concurrent enrollments per batch sync window
    pub sync_window: usize,
    /// Bound of the webhook job queue
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            api_keys: vec![],
            webhook_secrets: vec![],
            cron_secret: None,
            sync_window: DEFAULT_SYNC_WINDOW,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Read secrets and tuning from `TALLY_*` environment variables
    pub fn from_env() -> Self {
        let env = |name: &str| std::env::var(name).ok().filter(|s| !s.trim().is_empty());

        Self {
            require_auth: true,
            allowed_origins: env("TALLY_ALLOWED_ORIGINS")
                .map(|s| parse_list(&s))
                .unwrap_or_default(),
            api_keys: env("TALLY_API_KEYS")
                .map(|s| parse_api_keys(&s))
                .unwrap_or_default(),
            webhook_secrets: env("TALLY_WEBHOOK_SECRET")
                .map(|s| parse_list(&s))
                .unwrap_or_default(),
            cron_secret: env("TALLY_CRON_SECRET"),
            sync_window: env("TALLY_SYNC_WINDOW")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SYNC_WINDOW),
            queue_capacity: env("TALLY_QUEUE_CAPACITY")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    /// Connects enrollments; initial syncs go to the background worker
    pub orchestrator: EnrollmentSyncOrchestrator,
    pub coordinator: BatchSyncCoordinator,
    pub detector: SubscriptionDetector,
    /// Webhook jobs for the background worker
    pub queue: SyncQueue,
}

impl AppState {
    /// Wire the sync services around an injected provider and start the
    /// background worker that drains the webhook queue
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        db: Database,
        provider: Arc<dyn Provider>,
        ai: Option<AIClient>,
        config: ServerConfig,
    ) -> Self {
        let pipeline = CategorizationPipeline::standard(db.clone(), ai);
        let ingestor = TransactionIngestor::new(db.clone(), pipeline);
        let syncer = EnrollmentSyncOrchestrator::new(db.clone(), provider, ingestor);

        // The worker's orchestrator holds no sender, so the worker stops once
        // the state (and every queue clone) is dropped
        let (queue, receiver) = SyncQueue::bounded(config.queue_capacity);
        spawn_worker(receiver, Arc::new(WebhookProcessor::new(syncer.clone())));

        let coordinator = BatchSyncCoordinator::new(db.clone(), Arc::new(syncer.clone()))
            .with_window(config.sync_window);

        Self {
            orchestrator: syncer.with_queue(queue.clone()),
            coordinator,
            detector: SubscriptionDetector::new(db.clone()),
            queue,
            db,
            config,
        }
    }
}

/// The authenticated caller, inserted by the auth middleware
#[derive(Clone, Debug)]
pub struct AuthUser(pub String);

/// Authentication middleware for the user-facing API
///
/// API keys are compared in constant time and resolve to the user they
/// were issued for. With auth disabled the caller is taken from the
/// `x-tally-user` header, defaulting to `local-dev`.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        let user = request
            .headers()
            .get(DEV_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEV_USER)
            .to_string();
        request.extensions_mut().insert(AuthUser(user));
        return next.run(request).await;
    }

    let user = bearer_token(request.headers())
        .and_then(|key| resolve_api_key(key, &state.config.api_keys));

    match user {
        Some(user_id) => {
            info!(user = %user_id, path = %request.uri().path(), "Authenticated via API key");
            request.extensions_mut().insert(AuthUser(user_id));
            next.run(request).await
        }
        None => {
            warn!(path = %request.uri().path(), "Unauthorized request - no valid auth");
            AppError::unauthorized("Authentication required").into_response()
        }
    }
}

/// The token from an `Authorization: Bearer <token>` header
pub(crate) fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Constant-time equality for secrets
pub(crate) fn secret_matches(provided: &str, expected: &str) -> bool {
    use subtle::ConstantTimeEq;

    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    // Only compare if lengths match (constant-time for same-length keys)
    provided.len() == expected.len() && bool::from(provided.ct_eq(expected))
}

/// Find the user an API key belongs to
fn resolve_api_key(provided: &str, keys: &[ApiKey]) -> Option<String> {
    keys.iter()
        .find(|candidate| secret_matches(provided, &candidate.key))
        .map(|candidate| candidate.user_id.clone())
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
///
/// Starts the webhook worker; must be called inside a tokio runtime.
pub fn create_router(
    db: Database,
    provider: Arc<dyn Provider>,
    ai: Option<AIClient>,
    config: ServerConfig,
) -> Router {
    let state = Arc::new(AppState::new(db, provider, ai, config));
    create_router_with_state(state)
}

/// Create the application router around existing state
pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    let config = state.config.clone();

    let api_routes = Router::new()
        // Auth
        .route("/me", get(handlers::get_me))
        // Manual sync of the caller's enrollments
        .route("/sync", post(handlers::sync_user))
        // Enrollments
        .route("/enrollments", get(handlers::list_enrollments))
        .route("/enrollments/connect", post(handlers::connect_enrollment))
        // Accounts
        .route("/accounts", get(handlers::list_accounts))
        // Transactions
        .route("/transactions", get(handlers::list_transactions))
        .route(
            "/transactions/:id",
            get(handlers::get_transaction).patch(handlers::update_transaction),
        )
        // Subscriptions
        .route("/subscriptions", get(handlers::list_subscriptions))
        .route(
            "/subscriptions/overrides",
            post(handlers::add_subscription_override),
        )
        .route(
            "/subscriptions/overrides/:merchant",
            delete(handlers::remove_subscription_override),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Authenticated by their own secrets, not API keys
    let machine_routes = Router::new()
        .route("/api/cron/sync", post(handlers::cron_sync))
        .route("/webhooks/provider", post(handlers::receive_webhook));

    // Build CORS layer
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(machine_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    db: Database,
    provider: Arc<dyn Provider>,
    ai: Option<AIClient>,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("⚠️  Authentication disabled - do not expose to network!");
    }
    if config.webhook_secrets.is_empty() {
        warn!("TALLY_WEBHOOK_SECRET not set, every webhook delivery will be rejected");
    }
    if config.cron_secret.is_none() {
        info!("TALLY_CRON_SECRET not set, cron sync endpoint disabled");
    }

    let state = Arc::new(AppState::new(db, provider, ai, config));

    // Start periodic batch sync if configured
    if let Some(schedule) = SyncScheduleConfig::from_env() {
        start_sync_scheduler(state.coordinator.clone(), schedule);
    }

    let app = create_router_with_state(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    /// Offending request field for validation failures
    field: Option<String>,
    internal: Option<anyhow::Error>,
}

impl AppError {
    fn new(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            message: msg.to_string(),
            field: None,
            internal: None,
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// 400 naming the request field at fault
    pub fn invalid_field(field: &str, msg: &str) -> Self {
        Self {
            field: Some(field.to_string()),
            ..Self::new(StatusCode::BAD_REQUEST, msg)
        }
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: &str) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, status = %self.status, "Request failed");
        }

        let body = match self.field {
            Some(field) => Json(serde_json::json!({
                "error": self.message,
                "field": field,
            })),
            None => Json(serde_json::json!({
                "error": self.message
            })),
        };

        (self.status, body).into_response()
    }
}

impl From<tally_core::Error> for AppError {
    fn from(err: tally_core::Error) -> Self {
        use tally_core::Error;

        match err {
            Error::Validation { field, message } => Self::invalid_field(&field, &message),
            Error::Unauthorized(msg) => Self::unauthorized(&msg),
            Error::NotFound(msg) => Self::not_found(&msg),
            Error::Conflict(msg) => Self::conflict(&msg),
            Error::Provider(provider_err) => {
                let message = match provider_err.kind {
                    ProviderErrorKind::Auth => "Provider rejected the enrollment credential",
                    ProviderErrorKind::Transient => "Provider request failed",
                };
                Self {
                    internal: Some(anyhow::Error::new(provider_err)),
                    ..Self::new(StatusCode::BAD_GATEWAY, message)
                }
            }
            other => Self {
                // Return generic message to client, keep full error for logging
                internal: Some(anyhow::Error::new(other)),
                ..Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred",
                )
            },
        }
    }
}
