//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ProxyController`: discovery, session wiring and stream lifecycle
//! - `ReportCollector`: turns submitted spot reports into output records

/// Proxy controller and session table.
pub mod proxy;

/// Spot report collection.
pub mod report;

pub use proxy::{
    BatchOutcome, ConfigureSummary, ControllerOptions, ControllerState, ProxyController,
    ProxyError, ProxySettings, SessionPhase, SessionStatus,
};
pub use report::{ReportCollector, ReportError, ReportOutcome, ReportRequest, SubmittedReport};
