#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Observation Proxy - Remote Sensor Republisher
//!
//! Discovers the offerings of a remote observation-streaming (SOS) service,
//! opens one streaming session per matched observed property and republishes
//! each session's records on its own named local output. A second, local
//! producer publishes externally submitted spot reports.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: offerings, records, spot reports, the offering resolver
//!
//! - **Application**: use cases and port definitions
//!   - `ports`: capabilities, stream sessions, location, imagery
//!   - `services`: proxy controller, report collector
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `sos`: HTTP/WebSocket SOS client and result codec
//!   - `broadcast`: named local outputs
//!   - `control` / `health`: axum control surface and probes
//!   - `signal`: external stop signals
//!   - `location` / `imagery`: report collector adapters
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐    ┌─────────────┐
//! SOS offering A ───►│ StreamSession│───►│ output1     │──► subscribers
//! SOS offering B ───►│ StreamSession│───►│ output2     │──► subscribers
//!                    └──────────────┘    └─────────────┘
//! POST /reports ────► ReportCollector ──► spot_report_data
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core proxy types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::offering::{
    CapabilitiesDocument, Match, ObservedPropertySet, Offering, OfferingResolver, SensorIdentity,
};
pub use domain::record::{FieldDef, FieldKind, FieldValue, Record, RecordSchema, SensorDescription};
pub use domain::report::{GeoFix, ReportSubmission, SPOT_REPORT_OUTPUT};

// Application services
pub use application::services::{
    BatchOutcome, ConfigureSummary, ControllerOptions, ControllerState, ProxyController,
    ProxyError, ProxySettings, ReportCollector, ReportOutcome, ReportRequest,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ProxyConfig};

// Health and control servers
pub use infrastructure::control::{ControlState, router as control_router};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Outputs
pub use infrastructure::broadcast::{OutputHub, PublishedRecord, SharedOutputHub};

// Adapters
pub use infrastructure::imagery::JpegImageLoader;
pub use infrastructure::location::StaticLocationProvider;
pub use infrastructure::signal::{ExternalSignalBridge, ProxySignal, SignalAction};
pub use infrastructure::sos::{SosClient, SosClientConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
