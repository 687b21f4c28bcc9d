//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CapabilitiesPort`: capability discovery on a remote service
//! - `StreamConnector` / `StreamSession`: one streaming session per match
//! - `LocationPort`: location source to geographic fix
//! - `ImagePort`: image reference to encoded bytes

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::offering::{CapabilitiesDocument, Match, SensorIdentity};
use crate::domain::record::{Record, RecordSchema, SensorDescription};
use crate::domain::report::GeoFix;
use crate::infrastructure::broadcast::SharedOutput;

// =============================================================================
// Errors
// =============================================================================

/// Capabilities could not be fetched or parsed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    /// Endpoint unreachable or returned an error status.
    #[error("capabilities request to {endpoint} failed: {reason}")]
    Unreachable {
        /// Endpoint URL.
        endpoint: String,
        /// Failure details.
        reason: String,
    },

    /// Response was not a valid capabilities document.
    #[error("malformed capabilities document from {endpoint}: {reason}")]
    Malformed {
        /// Endpoint URL.
        endpoint: String,
        /// Parse failure details.
        reason: String,
    },
}

/// A session for one match could not be opened.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot open stream for offering '{offering_id}' property '{observed_property}': {reason}")]
pub struct ConnectError {
    /// Offering identifier.
    pub offering_id: String,
    /// Observed property.
    pub observed_property: String,
    /// Failure details.
    pub reason: String,
}

impl ConnectError {
    /// Create a connect error for a match.
    #[must_use]
    pub fn new(matched: &Match, reason: impl Into<String>) -> Self {
        Self {
            offering_id: matched.offering_id.clone(),
            observed_property: matched.observed_property.clone(),
            reason: reason.into(),
        }
    }
}

/// Starting, stopping or querying a single stream failed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    /// Transport-level failure.
    #[error("stream transport error: {0}")]
    Transport(String),

    /// Remote service rejected the request.
    #[error("stream request rejected: {0}")]
    Rejected(String),

    /// Operation exceeded its time bound.
    #[error("stream operation timed out after {0:?}")]
    Timeout(Duration),

    /// Requested data is not available from this session.
    #[error("not available: {0}")]
    Unavailable(String),
}

// =============================================================================
// Capabilities
// =============================================================================

/// Port for capability discovery.
#[async_trait]
pub trait CapabilitiesPort: Send + Sync {
    /// Fetch the capabilities document of an observation-streaming service.
    async fn fetch_capabilities(
        &self,
        endpoint: &str,
        version: &str,
    ) -> Result<CapabilitiesDocument, DiscoveryError>;
}

// =============================================================================
// Stream Sessions
// =============================================================================

/// Transport used to deliver a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamTransport {
    /// Periodic HTTP polling.
    #[default]
    Polling,
    /// Persistent WebSocket connection.
    WebSocket,
}

/// Time window of a stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Window start.
    pub begin: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Open-ended horizon used for live streams (2e9 seconds).
    pub const OPEN_ENDED: Duration = Duration::from_secs(2_000_000_000);

    /// A window starting now and lasting `length`.
    #[must_use]
    pub fn starting_now(length: Duration) -> Self {
        let begin = Utc::now();
        let end = chrono::Duration::from_std(length)
            .ok()
            .and_then(|d| begin.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { begin, end }
    }

    /// The live window: now, open-ended.
    #[must_use]
    pub fn live() -> Self {
        Self::starting_now(Self::OPEN_ENDED)
    }

    /// ISO-8601 `begin/end` interval with millisecond instants.
    #[must_use]
    pub fn to_interval(&self) -> String {
        format!(
            "{}/{}",
            self.begin.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            self.end.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        )
    }
}

/// Request to open a streaming session for one match.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Service endpoint URL.
    pub endpoint: String,
    /// Service version.
    pub version: String,
    /// The offering/property pair.
    pub matched: Match,
    /// Requested time window.
    pub window: TimeWindow,
    /// Delivery transport.
    pub transport: StreamTransport,
}

/// Destination of a session's records.
///
/// Bound to exactly one output, looked up once from the controller's
/// dispatch table when the session is started.
#[derive(Debug, Clone)]
pub struct RecordSink {
    output: SharedOutput,
}

impl RecordSink {
    /// Create a sink delivering to an output.
    #[must_use]
    pub const fn new(output: SharedOutput) -> Self {
        Self { output }
    }

    /// Deliver one record.
    pub fn deliver(&self, record: Record) {
        let reached = self.output.publish(record);
        crate::infrastructure::metrics::record_republished(self.output.name(), reached);
    }

    /// Name of the output this sink feeds.
    #[must_use]
    pub fn output_name(&self) -> &str {
        self.output.name()
    }
}

/// One remote streaming connection bound to one observed property.
#[async_trait]
pub trait StreamSession: Send + Sync {
    /// Record layout retrieved when the session was opened.
    fn schema(&self) -> &RecordSchema;

    /// Start delivering records into `sink`.
    async fn start(&self, sink: RecordSink) -> Result<(), StreamError>;

    /// Stop delivery. Stopping a session that is not streaming is a no-op.
    async fn stop(&self) -> Result<(), StreamError>;

    /// Fetch the remote description of a sensor.
    async fn sensor_description(
        &self,
        sensor: &SensorIdentity,
    ) -> Result<SensorDescription, StreamError>;
}

/// Port opening streaming sessions.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a session and retrieve its record schema.
    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn StreamSession>, ConnectError>;
}

// =============================================================================
// Report Collection
// =============================================================================

/// Location lookup failure.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LocationError {
    /// No provider with this name.
    #[error("unknown location source: {0}")]
    UnknownSource(String),

    /// Provider exists but has no fix yet.
    #[error("no fix available from location source: {0}")]
    NoFix(String),
}

/// Port resolving a location source to its last known fix.
#[cfg_attr(test, mockall::automock)]
pub trait LocationPort: Send + Sync {
    /// Last known fix of the named provider.
    fn last_known(&self, source: &str) -> Result<GeoFix, LocationError>;
}

/// Image loading failure.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ImageError {
    /// The reference could not be read.
    #[error("cannot read image '{reference}': {reason}")]
    Unreadable {
        /// Image reference.
        reference: String,
        /// Failure details.
        reason: String,
    },

    /// The bytes are not a decodable image.
    #[error("cannot decode image '{reference}': {reason}")]
    Undecodable {
        /// Image reference.
        reference: String,
        /// Failure details.
        reason: String,
    },
}

/// Port loading an image reference as JPEG bytes.
#[async_trait]
pub trait ImagePort: Send + Sync {
    /// Load and encode the referenced image.
    async fn load_jpeg(&self, reference: &str) -> Result<Vec<u8>, ImageError>;
}
