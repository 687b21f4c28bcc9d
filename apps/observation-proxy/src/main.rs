//! Observation Proxy Binary
//!
//! Starts the observation stream proxy.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin observation-proxy
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PROXY_SOS_ENDPOINT`: SOS service URL (http/https)
//! - `PROXY_SENSOR_UID`: Unique identifier of the proxied sensor
//! - `PROXY_OBSERVED_PROPERTIES`: Comma separated observed properties
//!
//! ## Optional
//! - `PROXY_SOS_VERSION`: SOS version (default: 2.0)
//! - `PROXY_USE_WEBSOCKETS`: Stream over WebSocket (default: false)
//! - `PROXY_SENSOR_DESCRIPTION_PATH`: Local sensor description JSON
//! - `PROXY_ORIGIN_ID`: Local signal identity (default: observation-proxy)
//! - `PROXY_SESSION_TIMEOUT_SECS`: Stream operation bound, 0 disables (default: 30)
//! - `PROXY_HTTP_TIMEOUT_SECS`: HTTP request timeout (default: 10)
//! - `PROXY_POLL_INTERVAL_MS`: Polling interval (default: 1000)
//! - `PROXY_AUTOSTART`: Start streams after configuration (default: true)
//! - `PROXY_CONTROL_PORT`: Control / health HTTP port (default: 8082)
//! - `PROXY_OUTPUT_CAPACITY`: Per-output broadcast capacity (default: 1024)
//! - `REPORT_ENABLED`: Run the spot report collector (default: true)
//! - `REPORT_LOCATION_FIXES`: `provider=lat,lon,alt;...`
//! - `REPORT_QUEUE_CAPACITY`: Report queue capacity (default: 64)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: observation-proxy)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use observation_proxy::application::ports::CapabilitiesPort;
use observation_proxy::infrastructure::control::{self, ControlState};
use observation_proxy::infrastructure::health::{HealthServer, HealthServerState};
use observation_proxy::infrastructure::sos::BackoffConfig;
use observation_proxy::infrastructure::telemetry;
use observation_proxy::{
    ExternalSignalBridge, JpegImageLoader, OutputHub, ProxyConfig, ProxyController,
    ReportCollector, SosClient, SosClientConfig, StaticLocationProvider, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the external signal queue.
const SIGNAL_QUEUE_CAPACITY: usize = 16;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Err means a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Observation Proxy");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = ProxyConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Local outputs
    let outputs = Arc::new(OutputHub::new(config.server.output_capacity));

    // SOS client and controller
    let sos_client = Arc::new(SosClient::new(SosClientConfig {
        http_timeout: config.session.http_timeout,
        poll_interval: config.session.poll_interval,
        backoff: BackoffConfig::default(),
    })?);
    let controller = Arc::new(ProxyController::new(
        Arc::clone(&sos_client) as Arc<dyn CapabilitiesPort>,
        sos_client,
        Arc::clone(&outputs),
        config.controller_options(),
    ));

    // Spot report collector. Registered before configure so that a remote
    // schema with the same name falls back to a sequential output name.
    let report_tx = if config.report.enabled {
        let location = Arc::new(StaticLocationProvider::from_settings(
            &config.report.location_fixes,
        ));
        let images = Arc::new(JpegImageLoader::new(config.session.http_timeout)?);
        let collector = Arc::new(ReportCollector::new(&outputs, location, images)?);
        let (report_tx, report_rx) = mpsc::channel(config.report.queue_capacity);
        tokio::spawn(collector.run(report_rx, shutdown_token.clone()));
        Some(report_tx)
    } else {
        tracing::info!("Spot report collection disabled");
        None
    };

    let settings = Arc::new(config.proxy_settings()?);
    // On failure the controller stays unconfigured until
    // `POST /control/configure` succeeds.
    if controller.configure(&settings).await.is_ok() && config.session.autostart {
        let outcome = controller.start_all().await;
        tracing::info!(
            started = outcome.succeeded.len(),
            failed = outcome.failures.len(),
            "Streams started"
        );
    }

    // External signal bridge
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
    let bridge = ExternalSignalBridge::new(config.origin_id.clone(), Arc::clone(&controller));
    tokio::spawn(bridge.run(signal_rx, shutdown_token.clone()));

    // Health + control server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&controller),
        Arc::clone(&outputs),
    ));
    let control_routes = control::router(ControlState {
        controller: Arc::clone(&controller),
        settings,
        outputs: Arc::clone(&outputs),
        signals: signal_tx,
        reports: report_tx,
    });
    let server = HealthServer::new(
        config.server.control_port,
        health_state,
        shutdown_token.clone(),
    )
    .merge(control_routes);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Control server error");
        }
    });

    tracing::info!("Observation proxy ready");

    await_shutdown().await;

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, controller.stop_all()).await {
        Ok(outcome) if !outcome.is_complete() => {
            tracing::warn!(failures = outcome.failures.len(), "Some streams failed to stop");
        }
        Ok(_) => {}
        Err(_) => tracing::warn!("Timed out stopping streams"),
    }
    shutdown_token.cancel();
    let _ = server_handle.await;

    tracing::info!("Observation proxy stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        endpoint = %config.sos.endpoint,
        version = %config.sos.version,
        sensor = %config.sos.sensor_uid,
        properties = ?config.sos.observed_properties,
        websockets = config.sos.use_websockets,
        control_port = config.server.control_port,
        "Configuration loaded"
    );
    tracing::debug!(
        origin_id = %config.origin_id,
        operation_timeout = ?config.session.operation_timeout,
        poll_interval_ms = config.session.poll_interval.as_millis(),
        reports = config.report.enabled,
        location_providers = config.report.location_fixes.len(),
        "Runtime settings"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
