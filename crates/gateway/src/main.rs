//! OrgForge API Gateway
//!
//! HTTP surface over the schema bootstrap and tenant provisioning engine.
//! Handles:
//! - Root and tenant authentication
//! - Rate limiting
//! - Request routing
//! - Observability (logging, metrics)

mod extract;
mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use orgforge_common::{
    auth::RootKey,
    config::{AppConfig, ObservabilityConfig},
    metrics, Platform,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub platform: Platform,
    pub root_key: RootKey,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, platform: Platform) -> Self {
        let root_key = RootKey::new(config.auth.root_api_key.as_deref());
        Self {
            config,
            platform,
            root_key,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting OrgForge API Gateway v{}",
        orgforge_common::VERSION
    );

    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        for (name, buckets) in metrics::histogram_buckets() {
            builder = builder
                .set_buckets_for_metric(Matcher::Full(name), buckets)
                .context("invalid histogram buckets")?;
        }
        builder.install().context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }
    metrics::register_metrics();

    let config = Arc::new(config);
    let platform = Platform::from_config(&config).await.map_err(|e| {
        error!(error = %e, "Failed to initialize platform");
        e
    })?;

    let state = AppState::new(config.clone(), platform);
    if !state.root_key.is_configured() {
        warn!("No root API key configured; admin endpoints will reject every request");
    }

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server host/port")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    tokio::select! {
        result = server => result?,
        _ = drain_deadline(shutdown_rx, config.shutdown_timeout()) => {
            warn!(
                timeout_secs = config.server.shutdown_timeout_secs,
                "In-flight requests did not finish before the shutdown timeout"
            );
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Completes `timeout` after the shutdown signal fires
async fn drain_deadline(mut shutdown: watch::Receiver<bool>, timeout: Duration) {
    if shutdown.wait_for(|started| *started).await.is_err() {
        // Sender dropped without a shutdown; the server is gone already
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(timeout).await;
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Central dataset
        .route("/admin/bootstrap", post(handlers::bootstrap::bootstrap))
        .route("/admin/bootstrap/status", get(handlers::bootstrap::bootstrap_status))
        .route("/admin/bootstrap/sync", post(handlers::bootstrap::bootstrap_sync))

        // Organizations
        .route("/organizations/dryrun", post(handlers::organizations::dryrun))
        .route("/organizations/onboard", post(handlers::organizations::onboard))
        .route("/organizations/{org_slug}/status", get(handlers::organizations::status))
        .route("/organizations/{org_slug}/sync", post(handlers::organizations::sync))
        .route(
            "/organizations/{org_slug}/api-key/rotate",
            post(handlers::organizations::rotate_api_key),
        )
        .route_layer(from_fn(middleware::metrics::track_metrics));

    let rate_limit = &state.config.rate_limit;
    let api_routes = if rate_limit.enabled {
        let limits = middleware::rate_limit::create_rate_limiter(
            rate_limit.requests_per_second,
            rate_limit.burst,
        );
        api_routes.layer(from_fn_with_state(
            limits,
            middleware::rate_limit::rate_limit_middleware,
        ))
    } else {
        api_routes
    };

    let timeout = state.config.request_timeout();

    // Compose the app
    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const ROOT_KEY: &str = "test-root-key";

    async fn test_app() -> Router {
        let mut config = AppConfig::default();
        config.warehouse.provider = "memory".to_string();
        config.warehouse.retry_delay_ms = 0;
        config.kms.provider = "mock".to_string();
        config.auth.root_api_key = Some(ROOT_KEY.to_string());
        config.rate_limit.enabled = false;

        let config = Arc::new(config);
        let platform = tokio_test::assert_ok!(Platform::from_config(&config).await);
        create_router(AppState::new(config, platform))
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        credential: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((header, value)) = credential {
            builder = builder.header(header, value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn root() -> Option<(&'static str, &'static str)> {
        Some(("X-CA-Root-Key", ROOT_KEY))
    }

    fn onboard_body(org_slug: &str) -> Value {
        json!({
            "org_slug": org_slug,
            "company_name": "Acme Test",
            "admin_email": "admin@acme.test",
            "plan": "STARTER"
        })
    }

    #[tokio::test]
    async fn test_drain_deadline_waits_for_shutdown() {
        let (tx, rx) = watch::channel(false);
        let deadline = tokio::spawn(drain_deadline(rx, Duration::from_millis(10)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!deadline.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), deadline)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_health_needs_no_credentials() {
        let app = test_app().await;
        let (status, body) = call(&app, "GET", "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = call(&app, "GET", "/api/v1/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["warehouse"]["status"], "up");
    }

    #[tokio::test]
    async fn test_admin_routes_reject_missing_and_wrong_keys() {
        let app = test_app().await;
        let (status, body) = call(&app, "POST", "/api/v1/admin/bootstrap", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let wrong = Some(("X-CA-Root-Key", "nope"));
        let (status, _) = call(&app, "POST", "/api/v1/admin/bootstrap", wrong, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Nothing was created by the rejected calls
        let (_, body) = call(&app, "GET", "/api/v1/admin/bootstrap/status", root(), None).await;
        assert_eq!(body["status"], "NOT_BOOTSTRAPPED");
    }

    #[tokio::test]
    async fn test_bootstrap_onboard_status_rotate() {
        let app = test_app().await;

        let (status, _) = call(&app, "POST", "/api/v1/organizations/onboard", root(), Some(onboard_body("acme_test"))).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);

        let (status, _) = call(&app, "POST", "/api/v1/admin/bootstrap", root(), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/api/v1/admin/bootstrap/status", root(), None).await;
        assert_eq!(body["status"], "SYNCED");

        let (status, dry) = call(&app, "POST", "/api/v1/organizations/dryrun", root(), Some(onboard_body("acme_test"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dry["org_dataset_id"], "acme_test_prod");

        let (status, onboarded) = call(&app, "POST", "/api/v1/organizations/onboard", root(), Some(onboard_body("acme_test"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(onboarded["status"], "SYNCED");
        assert_eq!(onboarded["limits"]["seat_limit"], 2);
        let api_key = onboarded["api_key"].as_str().unwrap().to_string();
        assert!(api_key.starts_with("acme_test_api_"));

        let (status, _) = call(&app, "POST", "/api/v1/organizations/onboard", root(), Some(onboard_body("acme_test"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        // The org's own key can read its status
        let own = Some(("X-API-Key", api_key.as_str()));
        let (status, body) = call(&app, "GET", "/api/v1/organizations/acme_test/status", own, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "SYNCED");

        // ...but not another org's, and it cannot onboard
        let (status, body) = call(&app, "GET", "/api/v1/organizations/other_org/status", own, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "TENANT_MISMATCH");
        let (status, _) = call(&app, "POST", "/api/v1/organizations/onboard", own, Some(onboard_body("other_org"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, rotated) = call(&app, "POST", "/api/v1/organizations/acme_test/api-key/rotate", own, None).await;
        assert_eq!(status, StatusCode::OK);
        let new_key = rotated["api_key"].as_str().unwrap().to_string();
        assert_ne!(new_key, api_key);

        // The old key is dead, the new one works
        let (status, _) = call(&app, "GET", "/api/v1/organizations/acme_test/status", own, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let fresh = Some(("X-API-Key", new_key.as_str()));
        let (status, _) = call(&app, "GET", "/api/v1/organizations/acme_test/status", fresh, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_of_unknown_org_is_a_value() {
        let app = test_app().await;
        call(&app, "POST", "/api/v1/admin/bootstrap", root(), None).await;

        let (status, body) = call(&app, "GET", "/api/v1/organizations/ghost_org/status", root(), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "NOT_FOUND");

        let (status, _) = call(&app, "POST", "/api/v1/organizations/ghost_org/sync", root(), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_accepts_flags_or_no_body() {
        let app = test_app().await;
        call(&app, "POST", "/api/v1/admin/bootstrap", root(), None).await;
        call(&app, "POST", "/api/v1/organizations/onboard", root(), Some(onboard_body("acme_test"))).await;

        let (status, body) = call(&app, "POST", "/api/v1/organizations/acme_test/sync", root(), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recovered"], false);
        assert_eq!(body["tables_created"].as_array().unwrap().len(), 0);

        let flags = json!({ "sync_missing_tables": true, "sync_missing_columns": true, "recreate_views": false });
        let (status, body) = call(&app, "POST", "/api/v1/organizations/acme_test/sync", root(), Some(flags)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["views_recreated"].as_array().unwrap().len(), 0);

        let (status, _) = call(&app, "POST", "/api/v1/admin/bootstrap/sync", root(), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_slug_is_rejected() {
        let app = test_app().await;
        call(&app, "POST", "/api/v1/admin/bootstrap", root(), None).await;

        let (status, body) = call(&app, "POST", "/api/v1/organizations/onboard", root(), Some(onboard_body("Acme-Corp"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "org_slug");
    }

    #[tokio::test]
    async fn test_missing_body_field_is_a_400_envelope() {
        let app = test_app().await;
        call(&app, "POST", "/api/v1/admin/bootstrap", root(), None).await;

        let mut body = onboard_body("acme_test");
        body.as_object_mut().unwrap().remove("admin_email");
        let (status, body) = call(&app, "POST", "/api/v1/organizations/onboard", root(), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "MISSING_FIELD");
        assert_eq!(body["error"]["details"]["field"], "admin_email");
    }

    #[tokio::test]
    async fn test_unknown_plan_is_a_400_envelope() {
        let app = test_app().await;
        call(&app, "POST", "/api/v1/admin/bootstrap", root(), None).await;

        let mut body = onboard_body("acme_test");
        body["plan"] = json!("ENTERPRISE");
        let (status, body) = call(&app, "POST", "/api/v1/organizations/dryrun", root(), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_FORMAT");

        let flags = json!({ "sync_missing_tables": "yes" });
        let (status, body) = call(&app, "POST", "/api/v1/admin/bootstrap/sync", root(), Some(flags)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_FORMAT");
    }
}
