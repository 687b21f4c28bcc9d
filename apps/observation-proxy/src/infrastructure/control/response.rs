//! Control surface response DTOs.

use serde::{Deserialize, Serialize};

use crate::application::services::{
    BatchOutcome, ConfigureSummary, ControllerState, SessionStatus,
};

/// Result of a batch start/stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Whether every session succeeded.
    pub ok: bool,
    /// Outputs whose operation succeeded.
    pub succeeded: Vec<String>,
    /// Outputs whose operation failed.
    pub failures: Vec<StreamFailure>,
}

/// A single failed stream operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFailure {
    /// Output name.
    pub output: String,
    /// Error message.
    pub error: String,
}

impl From<BatchOutcome> for BatchResponse {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            ok: outcome.is_complete(),
            succeeded: outcome.succeeded,
            failures: outcome
                .failures
                .into_iter()
                .map(|(output, e)| StreamFailure {
                    output,
                    error: e.to_string(),
                })
                .collect(),
        }
    }
}

/// Result of a single-stream start/stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamResponse {
    /// Output name.
    pub output: String,
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Error message if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a (re)configure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureResponse {
    /// Whether at least one session was created.
    pub ok: bool,
    /// Registered output names.
    pub outputs: Vec<String>,
    /// Matches whose session could not be opened.
    pub skipped: Vec<String>,
    /// Error message if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConfigureResponse {
    /// Body for a failed configure.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            outputs: Vec::new(),
            skipped: Vec::new(),
            error: Some(error.into()),
        }
    }
}

impl From<ConfigureSummary> for ConfigureResponse {
    fn from(summary: ConfigureSummary) -> Self {
        Self {
            ok: true,
            outputs: summary.outputs,
            skipped: summary.skipped.iter().map(ToString::to_string).collect(),
            error: None,
        }
    }
}

/// Controller state with its sessions.
#[derive(Debug, Clone, Serialize)]
pub struct StreamsResponse {
    /// Controller lifecycle state.
    pub state: ControllerState,
    /// Registered sessions.
    pub sessions: Vec<SessionStatus>,
}

/// Generic error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

impl ErrorResponse {
    /// Create an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
