//! Proxy Controller
//!
//! Orchestrates discovery, session creation and output wiring for one
//! proxied sensor, and owns the lifecycle of every stream session.
//!
//! # Lifecycle
//!
//! ```text
//! Unconfigured ──configure──► Resolving ──► Ready ──start──► Streaming
//!        ▲                        │                            │   ▲
//!        └──────── failure ───────┘                        stop│   │start
//!                                                              ▼   │
//!                                                            Stopped
//! ```
//!
//! Sessions are independent failure domains: a session that fails to open,
//! start or stop is reported and skipped, never aborting its siblings.
//!
//! The session table is built off to the side during `configure` and
//! installed in one step, so `start_all`/`stop_all` never observe a
//! half-built table. A stop request that arrives mid-configure sees the
//! previous table (empty after teardown) and is a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::application::ports::{
    CapabilitiesPort, ConnectError, DiscoveryError, RecordSink, SessionRequest, StreamConnector,
    StreamError, StreamSession, StreamTransport, TimeWindow,
};
use crate::domain::offering::{Match, ObservedPropertySet, OfferingResolver, SensorIdentity};
use crate::domain::record::{RecordSchema, SensorDescription};
use crate::infrastructure::broadcast::{SharedOutput, SharedOutputHub};
use crate::infrastructure::metrics;

// =============================================================================
// Settings & State
// =============================================================================

/// Static configuration supplied to [`ProxyController::configure`].
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Observation service endpoint URL.
    pub endpoint: String,
    /// Observation service version.
    pub version: String,
    /// Sensor being proxied.
    pub sensor: SensorIdentity,
    /// Requested observed properties.
    pub observed_properties: ObservedPropertySet,
    /// Stream delivery transport.
    pub transport: StreamTransport,
    /// Local sensor description, if one is configured.
    pub sensor_description: Option<SensorDescription>,
}

/// Tuning knobs of the controller.
#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Upper bound on a single open/start/stop call (`None` = unbounded).
    pub operation_timeout: Option<Duration>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            operation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// No sessions; `configure` has not succeeded.
    Unconfigured,
    /// `configure` is in progress.
    Resolving,
    /// Sessions exist, none started yet.
    Ready,
    /// At least one session is streaming.
    Streaming,
    /// Sessions exist, none streaming after a stop.
    Stopped,
}

impl ControllerState {
    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Resolving => "resolving",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a session table is installed.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        matches!(self, Self::Ready | Self::Streaming | Self::Stopped)
    }
}

/// Lifecycle phase of a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Schema retrieved, output registered.
    Created,
    /// Delivering records.
    Streaming,
    /// Stopped after streaming; restartable.
    Stopped,
}

// =============================================================================
// Errors & Outcomes
// =============================================================================

/// Errors surfaced by the controller.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Capabilities could not be fetched or parsed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// No session could be created for the request.
    #[error(
        "requested observation data is not available from {endpoint}; \
         check sensor '{sensor}' and observed properties {properties}"
    )]
    NoMatchingData {
        /// Endpoint queried.
        endpoint: String,
        /// Sensor requested.
        sensor: String,
        /// Properties requested.
        properties: String,
    },

    /// A single session failed to start or stop.
    #[error("stream '{output}' failed: {source}")]
    Stream {
        /// Output name of the session.
        output: String,
        /// Underlying failure.
        #[source]
        source: StreamError,
    },

    /// No session is registered under this output name.
    #[error("no stream registered under output '{0}'")]
    NotFound(String),
}

/// Result of a successful `configure`.
#[derive(Debug, Clone)]
pub struct ConfigureSummary {
    /// Registered output names in discovery order.
    pub outputs: Vec<String>,
    /// Matches whose session could not be opened.
    pub skipped: Vec<ConnectError>,
}

/// Per-session results of a batch start/stop.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Outputs whose operation succeeded.
    pub succeeded: Vec<String>,
    /// Outputs whose operation failed.
    pub failures: Vec<(String, StreamError)>,
}

impl BatchOutcome {
    /// Whether every session succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Snapshot of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Output name.
    pub output: String,
    /// Offering identifier.
    pub offering_id: String,
    /// Observed property.
    pub observed_property: String,
    /// Current phase.
    pub phase: SessionPhase,
}

// =============================================================================
// Session Table
// =============================================================================

struct Session {
    output_name: String,
    matched: Match,
    stream: Box<dyn StreamSession>,
    phase: Mutex<SessionPhase>,
    // Serializes start/stop on this session only.
    op_lock: tokio::sync::Mutex<()>,
}

impl Session {
    fn new(output_name: String, matched: Match, stream: Box<dyn StreamSession>) -> Self {
        Self {
            output_name,
            matched,
            stream,
            phase: Mutex::new(SessionPhase::Created),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    fn is_streaming(&self) -> bool {
        self.phase() == SessionPhase::Streaming
    }
}

/// Sessions in discovery order plus the output dispatch table.
#[derive(Default)]
struct SessionTable {
    sessions: Vec<Session>,
    index: HashMap<String, usize>,
    dispatch: HashMap<String, SharedOutput>,
}

impl SessionTable {
    fn insert(&mut self, session: Session, output: SharedOutput) {
        let name = session.output_name.clone();
        self.index.insert(name.clone(), self.sessions.len());
        self.dispatch.insert(name, output);
        self.sessions.push(session);
    }

    fn get(&self, name: &str) -> Option<&Session> {
        self.index.get(name).map(|&i| &self.sessions[i])
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn names(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.output_name.clone()).collect()
    }

    fn streaming_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_streaming()).count()
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Discovery and per-property stream lifecycle manager.
pub struct ProxyController {
    capabilities: Arc<dyn CapabilitiesPort>,
    connector: Arc<dyn StreamConnector>,
    outputs: SharedOutputHub,
    options: ControllerOptions,
    resolver: OfferingResolver,
    table: tokio::sync::RwLock<SessionTable>,
    state: RwLock<ControllerState>,
    sensor_description: RwLock<Option<SensorDescription>>,
    configuring: tokio::sync::Mutex<()>,
}

impl ProxyController {
    /// Create an unconfigured controller.
    #[must_use]
    pub fn new(
        capabilities: Arc<dyn CapabilitiesPort>,
        connector: Arc<dyn StreamConnector>,
        outputs: SharedOutputHub,
        options: ControllerOptions,
    ) -> Self {
        Self {
            capabilities,
            connector,
            outputs,
            options,
            resolver: OfferingResolver::new(),
            table: tokio::sync::RwLock::new(SessionTable::default()),
            state: RwLock::new(ControllerState::Unconfigured),
            sensor_description: RwLock::new(None),
            configuring: tokio::sync::Mutex::new(()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        *self.state.read()
    }

    /// Sensor description, local or fetched from the first session.
    #[must_use]
    pub fn sensor_description(&self) -> Option<SensorDescription> {
        self.sensor_description.read().clone()
    }

    /// Registered output names in discovery order.
    pub async fn output_names(&self) -> Vec<String> {
        self.table.read().await.names()
    }

    /// Snapshot of every session.
    pub async fn sessions(&self) -> Vec<SessionStatus> {
        self.table
            .read()
            .await
            .sessions
            .iter()
            .map(|s| SessionStatus {
                output: s.output_name.clone(),
                offering_id: s.matched.offering_id.clone(),
                observed_property: s.matched.observed_property.clone(),
                phase: s.phase(),
            })
            .collect()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Discover matching offerings and create one session + output per match.
    ///
    /// Any previously configured sessions are stopped and their outputs
    /// removed first.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::Discovery`] if capabilities cannot be fetched.
    /// - [`ProxyError::NoMatchingData`] if no session could be created.
    ///
    /// Either way the controller is left `Unconfigured` with no sessions.
    #[tracing::instrument(skip_all, fields(endpoint = %settings.endpoint, sensor = %settings.sensor))]
    pub async fn configure(&self, settings: &ProxySettings) -> Result<ConfigureSummary, ProxyError> {
        let _configuring = self.configuring.lock().await;

        self.teardown().await;
        self.set_state(ControllerState::Resolving);
        *self.sensor_description.write() = settings.sensor_description.clone();

        match self.build_table(settings).await {
            Ok((table, summary)) => {
                // State changes under the write guard so a concurrent start
                // cannot be overwritten with `Ready`.
                let mut installed = self.table.write().await;
                *installed = table;
                self.set_state(ControllerState::Ready);
                metrics::set_active_streams(0);
                drop(installed);
                tracing::info!(
                    outputs = ?summary.outputs,
                    skipped = summary.skipped.len(),
                    "Proxy configured"
                );
                Ok(summary)
            }
            Err(e) => {
                self.set_state(ControllerState::Unconfigured);
                tracing::error!(error = %e, "Proxy configuration failed");
                Err(e)
            }
        }
    }

    async fn build_table(
        &self,
        settings: &ProxySettings,
    ) -> Result<(SessionTable, ConfigureSummary), ProxyError> {
        let started = Instant::now();
        let capabilities = self
            .capabilities
            .fetch_capabilities(&settings.endpoint, &settings.version)
            .await?;
        metrics::record_discovery(started.elapsed(), capabilities.offerings.len());

        let matches = self.resolver.resolve(
            &capabilities,
            &settings.sensor,
            &settings.observed_properties,
        );
        tracing::info!(
            offerings = capabilities.offerings.len(),
            matches = matches.len(),
            "Offerings resolved"
        );

        let mut table = SessionTable::default();
        let mut skipped = Vec::new();

        for matched in matches {
            let request = SessionRequest {
                endpoint: settings.endpoint.clone(),
                version: settings.version.clone(),
                matched: matched.clone(),
                window: TimeWindow::live(),
                transport: settings.transport,
            };

            let stream = match self.open_session(&request).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(
                        offering = %matched.offering_id,
                        property = %matched.observed_property,
                        error = %e,
                        "Skipping match, session could not be opened"
                    );
                    metrics::record_session_failure("open");
                    skipped.push(e);
                    continue;
                }
            };

            let needs_description =
                table.is_empty() && self.sensor_description.read().is_none();
            if needs_description {
                self.fetch_sensor_description(stream.as_ref(), &settings.sensor)
                    .await;
            }

            let output = self.register_output(stream.schema(), table.len() + 1);
            tracing::info!(
                output = output.name(),
                offering = %matched.offering_id,
                property = %matched.observed_property,
                "Output registered"
            );
            table.insert(
                Session::new(output.name().to_string(), matched, stream),
                output,
            );
        }

        if table.is_empty() {
            return Err(ProxyError::NoMatchingData {
                endpoint: settings.endpoint.clone(),
                sensor: settings.sensor.to_string(),
                properties: settings.observed_properties.to_string(),
            });
        }

        let summary = ConfigureSummary {
            outputs: table.names(),
            skipped,
        };
        Ok((table, summary))
    }

    async fn open_session(
        &self,
        request: &SessionRequest,
    ) -> Result<Box<dyn StreamSession>, ConnectError> {
        match self.options.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, self.connector.open(request))
                .await
                .map_err(|_| {
                    ConnectError::new(&request.matched, format!("timed out after {limit:?}"))
                })?,
            None => self.connector.open(request).await,
        }
    }

    async fn fetch_sensor_description(&self, stream: &dyn StreamSession, sensor: &SensorIdentity) {
        match self.bounded(stream.sensor_description(sensor)).await {
            Ok(description) => {
                tracing::debug!(sensor = %sensor, "Using remote sensor description");
                *self.sensor_description.write() = Some(description);
            }
            Err(e) => {
                tracing::debug!(sensor = %sensor, error = %e, "Cannot get remote sensor description");
            }
        }
    }

    /// Register the output for a session: the schema's own name if it is
    /// free, otherwise the first free `output{N}` with N >= `position`.
    fn register_output(&self, schema: &RecordSchema, position: usize) -> SharedOutput {
        if let Some(name) = schema.declared_name() {
            match self.outputs.register(name, schema.clone()) {
                Ok(output) => return output,
                Err(e) => {
                    tracing::warn!(error = %e, "Schema name collides, using sequential name");
                }
            }
        }

        let mut n = position;
        loop {
            let name = format!("output{n}");
            let mut named = schema.clone();
            named.name = Some(name.clone());
            if let Ok(output) = self.outputs.register(name, named) {
                return output;
            }
            n += 1;
        }
    }

    /// Stop every session of the installed table and remove its outputs.
    async fn teardown(&self) {
        let mut table = self.table.write().await;
        if table.is_empty() {
            return;
        }

        for session in &table.sessions {
            if let Err(e) = self.bounded(session.stream.stop()).await {
                tracing::warn!(output = %session.output_name, error = %e, "Stop during teardown failed");
            }
        }
        for name in table.dispatch.keys() {
            self.outputs.unregister(name);
        }

        *table = SessionTable::default();
        metrics::set_active_streams(0);
        tracing::debug!("Previous session table torn down");
    }

    // =========================================================================
    // Start / Stop
    // =========================================================================

    /// Start every session that is not already streaming.
    pub async fn start_all(&self) -> BatchOutcome {
        let table = self.table.read().await;
        let results = join_all(
            table
                .sessions
                .iter()
                .map(|session| self.start_session(&table, session)),
        )
        .await;

        let outcome = collect_outcome(&table, results, "start");
        self.refresh_after_start(&table);
        outcome
    }

    /// Start the session registered under `output_name`.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::NotFound`] if no such output is registered.
    /// - [`ProxyError::Stream`] if the session failed to start.
    pub async fn start_one(&self, output_name: &str) -> Result<(), ProxyError> {
        let table = self.table.read().await;
        let session = table
            .get(output_name)
            .ok_or_else(|| ProxyError::NotFound(output_name.to_string()))?;

        let result = self.start_session(&table, session).await;
        self.refresh_after_start(&table);
        result.map_err(|source| {
            metrics::record_session_failure("start");
            ProxyError::Stream {
                output: output_name.to_string(),
                source,
            }
        })
    }

    /// Stop every session. Always completes; failures are reported only.
    pub async fn stop_all(&self) -> BatchOutcome {
        let table = self.table.read().await;
        if table.is_empty() {
            tracing::debug!("Stop requested with no sessions, ignoring");
            return BatchOutcome::default();
        }

        let results = join_all(table.sessions.iter().map(|s| self.stop_session(s))).await;

        let outcome = collect_outcome(&table, results, "stop");
        self.refresh_after_stop(&table);
        outcome
    }

    /// Stop the session registered under `output_name`.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::NotFound`] if no such output is registered.
    /// - [`ProxyError::Stream`] if the session failed to stop.
    pub async fn stop_one(&self, output_name: &str) -> Result<(), ProxyError> {
        let table = self.table.read().await;
        let session = table
            .get(output_name)
            .ok_or_else(|| ProxyError::NotFound(output_name.to_string()))?;

        let result = self.stop_session(session).await;
        self.refresh_after_stop(&table);
        result.map_err(|source| {
            metrics::record_session_failure("stop");
            ProxyError::Stream {
                output: output_name.to_string(),
                source,
            }
        })
    }

    async fn start_session(&self, table: &SessionTable, session: &Session) -> Result<(), StreamError> {
        let _op = session.op_lock.lock().await;
        if session.is_streaming() {
            return Ok(());
        }

        let output = table.dispatch.get(&session.output_name).ok_or_else(|| {
            StreamError::Unavailable(format!("no output for '{}'", session.output_name))
        })?;

        self.bounded(session.stream.start(RecordSink::new(Arc::clone(output))))
            .await?;
        *session.phase.lock() = SessionPhase::Streaming;
        tracing::info!(output = %session.output_name, "Stream started");
        Ok(())
    }

    async fn stop_session(&self, session: &Session) -> Result<(), StreamError> {
        let _op = session.op_lock.lock().await;
        self.bounded(session.stream.stop()).await?;

        let mut phase = session.phase.lock();
        if *phase == SessionPhase::Streaming {
            *phase = SessionPhase::Stopped;
            tracing::info!(output = %session.output_name, "Stream stopped");
        }
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, StreamError>> + Send,
    ) -> Result<T, StreamError> {
        match self.options.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| StreamError::Timeout(limit))?,
            None => operation.await,
        }
    }

    // =========================================================================
    // State Transitions
    // =========================================================================

    fn set_state(&self, state: ControllerState) {
        let mut current = self.state.write();
        if *current != state {
            tracing::debug!(from = current.as_str(), to = state.as_str(), "Controller state change");
            *current = state;
        }
    }

    fn refresh_after_start(&self, table: &SessionTable) {
        let streaming = table.streaming_count();
        metrics::set_active_streams(streaming);
        if streaming > 0 {
            self.set_state(ControllerState::Streaming);
        }
    }

    fn refresh_after_stop(&self, table: &SessionTable) {
        let streaming = table.streaming_count();
        metrics::set_active_streams(streaming);
        if streaming > 0 {
            self.set_state(ControllerState::Streaming);
        } else if self.state().is_configured() {
            self.set_state(ControllerState::Stopped);
        }
    }
}

fn collect_outcome(
    table: &SessionTable,
    results: Vec<Result<(), StreamError>>,
    operation: &'static str,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for (session, result) in table.sessions.iter().zip(results) {
        match result {
            Ok(()) => outcome.succeeded.push(session.output_name.clone()),
            Err(e) => {
                tracing::warn!(output = %session.output_name, error = %e, operation, "Stream operation failed");
                metrics::record_session_failure(operation);
                outcome.failures.push((session.output_name.clone(), e));
            }
        }
    }
    outcome
}

// =============================================================================
// Tests
// =============================================================================
