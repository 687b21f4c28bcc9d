//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// SOS client adapters (capabilities, result templates, result streams).
pub mod sos;

/// Broadcast channel adapters for local outputs.
pub mod broadcast;

/// Configuration loading and validation.
pub mod config;

/// HTTP control surface.
pub mod control;

/// Health check HTTP endpoint.
pub mod health;

/// Report imagery loading and JPEG encoding.
pub mod imagery;

/// Named location providers.
pub mod location;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// External stop-signal bridge.
pub mod signal;

/// OpenTelemetry tracing integration.
pub mod telemetry;
