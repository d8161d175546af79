//! HTTP transport for the check service
//!
//! ## Endpoints
//!
//! - `POST /v1/check` - authorization check (JSON [`CheckRequest`] in,
//!   [`CheckResponse`] out)
//! - `GET /health` - health check
//! - `GET /metrics` - Prometheus metrics

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

use crate::check::{CheckRequest, CheckResponse};
use crate::config::AuthorizeConfig;
use crate::engine::{Authorize, AuthorizeState};
use crate::error::CheckError;
use crate::telemetry::init_tracing;

/// Shared application state
#[derive(Clone)]
struct AppState {
    authorize: Arc<Authorize>,
    check_timeout: Duration,
    start_time: Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
#[derive(Debug)]
enum AppError {
    Check(CheckError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let AppError::Check(err) = self;
        let status = match err {
            CheckError::ProtocolTranslation(_) => StatusCode::BAD_REQUEST,
            CheckError::DependencyUnavailable(_) | CheckError::Cancelled | CheckError::Timeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: err.kind().to_string(),
            message: err.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<CheckError> for AppError {
    fn from(err: CheckError) -> Self {
        AppError::Check(err)
    }
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
}

/// Metrics response (Prometheus format)
struct MetricsResponse {
    metrics: String,
}

impl IntoResponse for MetricsResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            self.metrics,
        )
            .into_response()
    }
}

/// POST /v1/check
async fn check(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    let response = state
        .authorize
        .check_with_timeout(&request, state.check_timeout)
        .await?;

    Ok(Json(response))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: crate::VERSION.to_string(),
    })
}

/// GET /metrics
async fn metrics(State(state): State<AppState>) -> MetricsResponse {
    let cache = state.authorize.cache().stats();
    let mut metrics = state.authorize.metrics().export_prometheus(&cache).await;

    metrics.push_str(&format!(
        "\n# HELP authorize_uptime_seconds Server uptime in seconds\n\
         # TYPE authorize_uptime_seconds gauge\n\
         authorize_uptime_seconds {}\n",
        state.start_time.elapsed().as_secs()
    ));

    MetricsResponse { metrics }
}

/// Build the router; checks running longer than `check_timeout` are
/// abandoned with 503
pub fn router(authorize: Arc<Authorize>, check_timeout: Duration) -> Router {
    let state = AppState {
        authorize,
        check_timeout,
        start_time: Instant::now(),
    };

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/v1/check", post(check))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(ServiceBuilder::new().layer(trace))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "authorize server listening");
    }

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("authorize server shut down gracefully");
    Ok(())
}

/// Run the service from a loaded configuration until Ctrl+C or SIGTERM.
///
/// Installs the global tracing subscriber, so it fails if one is already
/// set.
pub async fn run(config: AuthorizeConfig, state: AuthorizeState) -> anyhow::Result<()> {
    config.validate()?;
    init_tracing(&config.server.log_level, config.server.json_logs)?;

    info!(version = crate::VERSION, "starting authorize server");

    let authorize = Arc::new(Authorize::new(config.snapshot(), state, config.cache_config()));
    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    serve(listener, router(authorize, config.check_timeout()), shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}
