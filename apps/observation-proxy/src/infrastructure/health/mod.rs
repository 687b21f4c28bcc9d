//! Probes and Metrics
//!
//! The proxy's single HTTP listener. It serves the probe routes below and
//! any extra routes merged in (the control surface).
//!
//! - `GET /health` - JSON summary: controller state, stream counts, outputs
//! - `GET /healthz` - liveness, always `OK`
//! - `GET /readyz` - 200 once a session table is installed, 503 before
//! - `GET /metrics` - Prometheus text exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ControllerState, ProxyController, SessionPhase};
use crate::infrastructure::broadcast::{OutputStats, SharedOutputHub};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Rolled-up status.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Seconds since the listener state was created.
    pub uptime_secs: u64,
    /// Wall clock at response time.
    pub current_time: DateTime<Utc>,
    /// Controller lifecycle state.
    pub controller: ControllerState,
    /// Stream counts.
    pub streams: StreamCounts,
    /// Per-output statistics.
    pub outputs: Vec<OutputStats>,
}

/// Rolled-up proxy status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every session is streaming.
    Healthy,
    /// Configured, but not every session is streaming.
    Degraded,
    /// Not configured.
    Unhealthy,
}

/// Session counts.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamCounts {
    /// Registered sessions.
    pub total: usize,
    /// Sessions currently streaming.
    pub streaming: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// State behind the probe handlers.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    controller: Arc<ProxyController>,
    outputs: SharedOutputHub,
}

impl HealthServerState {
    /// Capture the start instant and the objects to report on.
    #[must_use]
    pub fn new(
        version: String,
        controller: Arc<ProxyController>,
        outputs: SharedOutputHub,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            controller,
            outputs,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// HTTP listener for probes, metrics and merged routes.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    extra: Router,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Listener on `0.0.0.0:port`, shut down when `cancel` fires.
    #[must_use]
    pub fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            extra: Router::new(),
            cancel,
        }
    }

    /// Serve additional routes on the same port.
    #[must_use]
    pub fn merge(mut self, routes: Router) -> Self {
        self.extra = self.extra.merge(routes);
        self
    }

    /// Health routes only, bound to their state.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/healthz", get(liveness))
            .route("/readyz", get(readiness))
            .route("/metrics", get(prometheus))
            .with_state(state)
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Fails if the port cannot be bound or serving aborts.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let port = self.port;
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|source| HealthServerError::Bind { port, source })?;
        tracing::info!(port, "Control server listening");

        axum::serve(listener, Self::router(self.state).merge(self.extra))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!("Control server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let body = build_health_response(&state).await;
    let code = if body.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body))
}

async fn liveness() -> &'static str {
    "OK"
}

async fn readiness(State(state): State<Arc<HealthServerState>>) -> (StatusCode, String) {
    let controller = state.controller.state();
    let code = if controller.is_configured() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, controller.as_str().to_string())
}

async fn prometheus() -> impl IntoResponse {
    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; charset=utf-8")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let controller = state.controller.state();
    let sessions = state.controller.sessions().await;
    let streams = StreamCounts {
        total: sessions.len(),
        streaming: sessions
            .iter()
            .filter(|s| s.phase == SessionPhase::Streaming)
            .count(),
    };

    HealthResponse {
        status: determine_health_status(controller, streams),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        controller,
        streams,
        outputs: state.outputs.stats(),
    }
}

fn determine_health_status(controller: ControllerState, streams: StreamCounts) -> HealthStatus {
    if !controller.is_configured() {
        return HealthStatus::Unhealthy;
    }
    if streams.total > 0 && streams.streaming == streams.total {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Listener failures.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The port could not be bound.
    #[error("cannot bind control port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Bind failure.
        #[source]
        source: std::io::Error,
    },

    /// Serving aborted.
    #[error("control server aborted: {0}")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================
