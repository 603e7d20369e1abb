//! # Device Selection HTTP API
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check (no token)
//! - `GET /selectables` - Legacy device selection
//! - `GET /v2/selectables` - Selection with criteria in `json`/`base64`
//! - `POST /v2/query/selectables` - Selection with criteria in the body
//! - `POST /device-group-helper` - Rate candidate devices for a group
//! - `POST /device-group-criteria` - Criteria a set of devices shares
//! - `GET /device-types` - Device types satisfying a filter
//! - `POST /invalidations` - Publish a catalog change

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{Token, bearer_auth_middleware, parse_bearer};
pub use middleware::{GlobalRateLimiter, create_rate_limiter};
pub use types::{
    ApiError, DeviceTypesQuery, ErrorResponse, GroupHelperQuery, HealthResponse,
    InvalidationResponse, LegacySelectablesQuery, SelectablesQuery, decode_criteria, split_list,
};

use crate::cache::Cache;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::engine::Engine;
use crate::invalidation::{InvalidationBus, spawn_listener};
use crate::upstream::Upstream;
use crate::upstream::http::{
    HttpClient, HttpDeviceRepository, HttpImportRepository, HttpPermissionOracle,
};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("cannot build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub bus: InvalidationBus,
    /// Required by `POST /invalidations` when set.
    pub invalidation_token: Option<Arc<str>>,
}

impl AppState {
    /// Wire cache, catalog and engine over `upstream`, and start the
    /// invalidation listener. Must run inside a tokio runtime.
    pub fn start(upstream: Upstream, config: &Config) -> Result<Self, ServerError> {
        let cache = Cache::new(config.cache_config()?);
        let catalog = Arc::new(Catalog::new(
            upstream,
            cache,
            config.max_parallel_upstream,
        ));
        let bus = InvalidationBus::new();
        spawn_listener(Arc::clone(&catalog), bus.subscribe());
        let engine = Engine::new(
            catalog,
            config.request_timeout(),
            config.max_parallel_upstream,
        );
        Ok(Self {
            engine: Arc::new(engine),
            bus,
            invalidation_token: (!config.invalidation_token.is_empty())
                .then(|| Arc::from(config.invalidation_token.as_str())),
        })
    }
}

/// HTTP upstream clients for the configured service URLs.
pub fn http_upstream(config: &Config) -> Result<Upstream, ServerError> {
    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(config.max_parallel_upstream)
        .build()?;
    let client = |url: &str| HttpClient::new(http.clone(), url);
    Ok(Upstream {
        devices: Arc::new(HttpDeviceRepository::new(client(&config.device_repo_url))),
        permissions: Arc::new(HttpPermissionOracle::new(client(&config.perm_search_url))),
        imports: Arc::new(HttpImportRepository::new(
            client(&config.import_repo_url),
            client(&config.import_deploy_url),
        )),
    })
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from the configured origins.
///
/// - `["*"]`: any origin
/// - empty: localhost only
/// - otherwise: the listed origins
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.trim().parse::<HeaderValue>() {
            Ok(hv) => {
                tracing::info!("CORS: Allowing origin: {}", o);
                Some(hv)
            }
            Err(e) => {
                tracing::warn!("CORS: Invalid origin '{}': {}", o, e);
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        tracing::info!("CORS: No valid origins configured, defaulting to localhost only");
        return build_localhost_cors();
    }
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing
/// 2. CORS
/// 3. Body limit (2 MiB)
/// 4. Rate limiting (if `rate_limit > 0`)
/// 5. Bearer token
pub fn create_router(state: AppState, config: &Config) -> Router {
    let cors = build_cors_layer(&config.cors_origins);

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/selectables", get(handlers::legacy_selectables_handler))
        .route("/v2/selectables", get(handlers::selectables_handler))
        .route("/v2/query/selectables", post(handlers::query_selectables_handler))
        .route("/device-group-helper", post(handlers::group_helper_handler))
        .route("/device-group-criteria", post(handlers::group_criteria_handler))
        .route("/device-types", get(handlers::device_types_handler))
        .route("/invalidations", post(handlers::invalidation_handler))
        .layer(axum_middleware::from_fn(auth::bearer_auth_middleware));

    if config.rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", config.rate_limit);
        router = router.layer(axum_middleware::from_fn_with_state(
            create_rate_limiter(config.rate_limit),
            middleware::rate_limit_middleware,
        ));
    } else {
        tracing::info!("Rate limiting disabled");
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve until Ctrl-C.
pub async fn run_server(config: &Config) -> Result<(), ServerError> {
    let state = AppState::start(http_upstream(config)?, config)?;
    let router = create_router(state, config);

    let addr = format!("0.0.0.0:{}", config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

    tracing::info!("Device selection listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown requested"),
                Err(e) => {
                    tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .map_err(ServerError::Serve)
}
