//! Logging and Trace Export
//!
//! Installs the global `tracing` subscriber: an env-filtered fmt layer and,
//! unless disabled, an OTLP span exporter (OpenObserve or any
//! OTLP-compatible collector).
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: "false" disables span export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: service name on exported spans (default: observation-proxy)
//! - `RUST_LOG`: additional filter directives
//!
//! ```ignore
//! let _guard = observation_proxy::infrastructure::telemetry::init()?;
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "observation-proxy";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Baseline directives; `RUST_LOG` entries for the same targets win.
const BASE_DIRECTIVES: &[&str] = &[
    "observation_proxy=info",
    "reqwest=warn",
    "hyper=warn",
    "tungstenite=warn",
    "tokio_tungstenite=warn",
];

/// Subscriber installation failure.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A filter directive did not parse.
    #[error("invalid log directive '{directive}': {reason}")]
    Directive {
        /// Offending directive.
        directive: String,
        /// Parse failure.
        reason: String,
    },

    /// The OTLP exporter could not be built.
    #[error("cannot build OTLP exporter for {endpoint}: {reason}")]
    Exporter {
        /// Collector endpoint.
        endpoint: String,
        /// Build failure.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes and shuts down span export when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are exported.
    #[must_use]
    pub const fn exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("span exporter shutdown failed: {e}");
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub enabled: bool,
    /// Collector endpoint.
    pub otlp_endpoint: String,
    /// Service name on exported spans.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through a lookup function.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            enabled: non_blank("OTEL_ENABLED")
                .is_none_or(|v| !v.trim().eq_ignore_ascii_case("false")),
            otlp_endpoint: non_blank("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
            service_name: non_blank("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

/// Install the subscriber using settings from the environment.
///
/// # Errors
///
/// See [`init_with_config`].
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    init_with_config(TelemetryConfig::from_env())
}

/// Install the subscriber. Keep the returned guard alive until exit.
///
/// # Errors
///
/// Fails if a directive is invalid, the exporter cannot be built or a
/// subscriber is already installed.
pub fn init_with_config(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = env_filter()?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
        return Ok(TelemetryGuard {
            tracer_provider: None,
        });
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            endpoint: config.otlp_endpoint.clone(),
            reason: e.to_string(),
        })?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();
    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(config.service_name));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    })
}

fn env_filter() -> Result<EnvFilter, TelemetryError> {
    BASE_DIRECTIVES
        .iter()
        .try_fold(EnvFilter::from_default_env(), |filter, directive| {
            directive
                .parse()
                .map(|d| filter.add_directive(d))
                .map_err(|e: tracing_subscriber::filter::ParseError| TelemetryError::Directive {
                    directive: (*directive).to_string(),
                    reason: e.to_string(),
                })
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_environment_uses_defaults() {
        assert_eq!(TelemetryConfig::from_lookup(lookup(&[])), TelemetryConfig::default());
    }

    #[test]
    fn export_is_disabled_only_by_false() {
        assert!(!TelemetryConfig::from_lookup(lookup(&[("OTEL_ENABLED", "FALSE")])).enabled);
        assert!(TelemetryConfig::from_lookup(lookup(&[("OTEL_ENABLED", "0")])).enabled);
        assert!(TelemetryConfig::from_lookup(lookup(&[("OTEL_ENABLED", "")])).enabled);
    }

    #[test]
    fn endpoint_and_service_name_are_overridable() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
            ("OTEL_SERVICE_NAME", "proxy-east"),
        ]));

        assert_eq!(config.otlp_endpoint, "http://collector:4317");
        assert_eq!(config.service_name, "proxy-east");
    }

    #[test]
    fn base_directives_parse() {
        assert!(env_filter().is_ok());
    }
}
