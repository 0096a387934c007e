//! Kwacha Tracker Web Server
//!
//! Axum-based REST API for the Kwacha Tracker mobile app and its operators.
//!
//! - `/api/v1`: device API (registration, consent, sync, analytics, insights),
//!   authenticated with HS256 bearer tokens and rate limited per client IP
//! - `/admin/api`: operator API (stats, listings, manual sweep, broadcasts),
//!   protected by API keys when `KWACHA_ADMIN_API_KEYS` is set
//! - `/health`: liveness and feature flags
//!
//! The daily insight scheduler runs as a background task next to the server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use kwacha_core::ai::{AIBackend, AIClient};
use kwacha_core::config::Config;
use kwacha_core::{verify_token, Database, InsightGenerator, InsightProvider, PushClient};

mod handlers;
mod rate_limit;
mod scheduler;

pub use rate_limit::RateLimiter;
pub use scheduler::{
    next_run_after, start_scheduler, SchedulerHandle, SchedulerState, SweepJob,
};

/// The authenticated device, inserted by the bearer-token middleware
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub device_id: String,
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: Config,
    /// None when no AI backend is configured
    pub generator: Option<Arc<dyn InsightProvider>>,
    /// None when Firebase credentials are missing
    pub push: Option<PushClient>,
    pub scheduler: Option<SchedulerHandle>,
    pub rate_limiter: RateLimiter,
    pub trusted_proxies: Vec<ipnet::IpNet>,
    /// Set while an operator-triggered sweep runs outside the scheduler
    manual_sweep_running: Arc<AtomicBool>,
}

impl AppState {
    /// Build state from configuration, wiring the AI and push clients it names
    pub fn new(db: Database, config: Config) -> Self {
        let generator = AIClient::from_config(&config.ai)
            .map(|ai| Arc::new(InsightGenerator::new(ai)) as Arc<dyn InsightProvider>);
        let push = PushClient::from_config(&config.firebase);
        Self::with_services(db, config, generator, push)
    }

    /// Build state with explicit services (for testing)
    pub fn with_services(
        db: Database,
        config: Config,
        generator: Option<Arc<dyn InsightProvider>>,
        push: Option<PushClient>,
    ) -> Self {
        let trusted_proxies = parse_trusted_networks(&config.server.trusted_proxies.join(","));
        let rate_limiter = RateLimiter::new(config.server.rate_limit_per_minute);
        Self {
            db,
            config,
            generator,
            push,
            scheduler: None,
            rate_limiter,
            trusted_proxies,
            manual_sweep_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Whether a sweep is in progress, in the scheduler or started by an operator
    pub fn sweep_in_progress(&self) -> bool {
        self.manual_sweep_running.load(Ordering::SeqCst)
            || self
                .scheduler
                .as_ref()
                .is_some_and(|s| s.state() == SchedulerState::Running)
    }

    /// Run a sweep in the background unless one started this way is still running
    ///
    /// Returns false, without spawning, when a previous manual sweep has not
    /// finished.
    pub fn spawn_manual_sweep(&self, job: SweepJob) -> bool {
        if self
            .manual_sweep_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let running = self.manual_sweep_running.clone();
        tokio::spawn(async move {
            let report = job.run().await;
            running.store(false, Ordering::SeqCst);
            info!(?report, "Manually triggered sweep finished");
        });
        true
    }

    /// Sweep job over this state's services; None without a generator
    pub fn sweep_job(&self) -> Option<SweepJob> {
        let provider = self.generator.clone()?;
        Some(SweepJob {
            store: Arc::new(self.db.clone()),
            provider,
            push: self.push.clone(),
            user_delay: Duration::from_millis(self.config.scheduler.user_delay_ms),
        })
    }
}

/// Bearer-token middleware for device routes
async fn device_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return AppError::unauthorized("Authorization header required").into_response();
    };

    match verify_token(&state.config.auth, token) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthUser {
                user_id: claims.user_id,
                device_id: claims.device_id,
            });
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, path = %request.uri().path(), "Rejected device token");
            AppError::unauthorized("Invalid or expired token").into_response()
        }
    }
}

/// API-key middleware for the admin surface
///
/// With no keys configured the admin API is open; `serve_with_config` warns
/// about this at startup.
async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let keys = &state.config.server.admin_api_keys;
    if keys.is_empty() {
        return next.run(request).await;
    }

    let valid = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| validate_api_key(key.trim(), keys))
        .unwrap_or(false);

    if valid {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized admin request");
    AppError::unauthorized("Admin authentication required").into_response()
}

/// Per-client-IP rate limiting for the device API
async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = get_client_ip(&request, connect_info.as_ref(), &state.trusted_proxies);
    if !state.rate_limiter.check(client_ip) {
        warn!(ip = ?client_ip, path = %request.uri().path(), "Rate limit exceeded");
        return AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please try again later.",
        )
        .into_response();
    }
    next.run(request).await
}

/// Validate an API key against the configured keys using constant-time comparison
fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    use subtle::ConstantTimeEq;

    let provided_bytes = provided.as_bytes();
    valid_keys.iter().any(|key| {
        let key_bytes = key.as_bytes();
        provided_bytes.len() == key_bytes.len() && bool::from(provided_bytes.ct_eq(key_bytes))
    })
}

/// Extract client IP address, respecting trusted proxies
///
/// X-Forwarded-For is only trusted when the TCP peer is a configured proxy;
/// otherwise the peer address is used as-is.
pub(crate) fn get_client_ip(
    request: &Request,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trusted_proxies: &[ipnet::IpNet],
) -> Option<std::net::IpAddr> {
    let peer_ip = connect_info.map(|ci| ci.0.ip())?;

    if !trusted_proxies.iter().any(|net| net.contains(&peer_ip)) {
        return Some(peer_ip);
    }

    // "client, proxy1, proxy2": the first entry is the original client
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    if forwarded.is_some() {
        return forwarded;
    }

    request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|ip| ip.trim().parse().ok())
        .or(Some(peer_ip))
}

/// Parse a comma-separated list of IP addresses and CIDR networks
///
/// Single addresses become /32 (IPv4) or /128 (IPv6) networks; unparseable
/// entries are skipped with a warning.
pub fn parse_trusted_networks(input: &str) -> Vec<ipnet::IpNet> {
    input
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(net) = s.parse::<ipnet::IpNet>() {
                return Some(net);
            }
            if let Ok(ip) = s.parse::<std::net::IpAddr>() {
                return Some(ipnet::IpNet::from(ip));
            }
            warn!(input = s, "Failed to parse trusted network entry");
            None
        })
        .collect()
}

/// Create the application router
pub fn create_router(db: Database, config: Config) -> Router {
    create_router_with_state(Arc::new(AppState::new(db, config)))
}

/// Create the router around prepared state (for testing and custom wiring)
pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    let device_routes = Router::new()
        .route("/consent", put(handlers::update_consent))
        .route("/data", delete(handlers::delete_data))
        .route("/sync", post(handlers::sync_transactions))
        .route("/transactions", get(handlers::list_transactions))
        .route("/analytics/summary", get(handlers::analytics_summary))
        .route("/analytics/trends", get(handlers::analytics_trends))
        .route("/insights/generate", post(handlers::generate_insights))
        .route("/insights", get(handlers::list_insights))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            device_auth_middleware,
        ));

    let api_routes = Router::new()
        .route("/register", post(handlers::register))
        .merge(device_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    let admin_routes = Router::new()
        .route("/stats", get(handlers::admin_stats))
        .route("/users", get(handlers::admin_users))
        .route("/insights", get(handlers::admin_insights))
        .route("/transactions", get(handlers::admin_transactions))
        .route("/trigger-insights", post(handlers::trigger_insights))
        .route("/broadcast", post(handlers::broadcast))
        .route("/notify", post(handlers::notify))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];
    let cors = if state.config.server.allowed_origins.is_empty() {
        // Mobile clients send no Origin; browsers get the permissive default
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .server
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
    };

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes)
        .nest("/admin/api", admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
        ))
}

/// Start the server and, when enabled, the daily scheduler
///
/// Runs until Ctrl-C, then stops the scheduler and drains connections.
pub async fn serve_with_config(db: Database, config: Config) -> anyhow::Result<()> {
    if config.server.admin_api_keys.is_empty() {
        warn!("⚠️  KWACHA_ADMIN_API_KEYS not set - admin API is unauthenticated");
    }

    let mut state = AppState::new(db, config);
    check_ai_connection(&state.config).await;

    let mut scheduler_task = None;
    if state.config.scheduler.enabled {
        match state.sweep_job() {
            Some(job) => {
                let (handle, task) = start_scheduler(job, &state.config.scheduler);
                state = state.with_scheduler(handle);
                scheduler_task = Some(task);
            }
            None => info!("ℹ️  Scheduler not started (no AI backend configured)"),
        }
    } else {
        info!("ℹ️  Scheduler disabled (SCHEDULER_ENABLED=false)");
    }

    let state = Arc::new(state);
    let scheduler = state.scheduler.clone();
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = create_router_with_state(state).into_make_service_with_connect_info::<SocketAddr>();

    info!("Starting server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown();
    }
    if let Some(task) = scheduler_task {
        let _ = task.await;
    }
    info!("Server exited gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down server...");
}

/// Check and log AI backend connection status
async fn check_ai_connection(config: &Config) {
    match AIClient::from_config(&config.ai) {
        Some(client) => {
            if client.health_check().await {
                info!("✅ AI backend connected: {} ({})", client.host(), client.model());
            } else {
                warn!(
                    "⚠️  AI backend configured but not responding: {} ({})",
                    client.host(),
                    client.model()
                );
            }
        }
        None => info!("ℹ️  AI insights disabled (set GEMINI_API_KEY to enable)"),
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn new(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn service_unavailable(msg: &str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, msg)
    }

    pub fn internal(msg: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();

        // Domain errors carry a client-safe message
        if let Some(core) = err.downcast_ref::<kwacha_core::Error>() {
            match core {
                kwacha_core::Error::InvalidData(msg) => return Self::bad_request(msg),
                kwacha_core::Error::NotFound(msg) => return Self::not_found(msg),
                kwacha_core::Error::ConsentRequired => {
                    return Self::forbidden("User consent required before processing data")
                }
                kwacha_core::Error::Token(_) => {
                    return Self::unauthorized("Invalid or expired token")
                }
                _ => {}
            }
        }

        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An internal error occurred".to_string(),
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
