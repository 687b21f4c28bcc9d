//! External Signal Bridge
//!
//! Receives "stop everything" signals from other components over an mpsc
//! channel and tears down every stream. Signals carrying this proxy's own
//! origin identity are ignored, so a proxy never reacts to its own
//! broadcasts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::{BatchOutcome, ProxyController};
use crate::infrastructure::metrics;

/// An external control signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySignal {
    /// Identity of the sender.
    pub origin: String,
    /// Opaque payload, logged only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ProxySignal {
    /// A signal without payload.
    #[must_use]
    pub fn from_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            payload: None,
        }
    }
}

/// What the bridge did with a signal.
#[derive(Debug, Clone)]
pub enum SignalAction {
    /// Signal came from this proxy.
    Ignored,
    /// Every stream was asked to stop.
    StoppedAll(BatchOutcome),
}

/// Bridges external signals onto the controller.
pub struct ExternalSignalBridge {
    origin_id: String,
    controller: Arc<ProxyController>,
}

impl ExternalSignalBridge {
    /// Create a bridge for the given local identity.
    #[must_use]
    pub fn new(origin_id: impl Into<String>, controller: Arc<ProxyController>) -> Self {
        Self {
            origin_id: origin_id.into(),
            controller,
        }
    }

    /// Handle one signal. Origins are compared by exact string equality.
    pub async fn handle(&self, signal: &ProxySignal) -> SignalAction {
        if signal.origin == self.origin_id {
            tracing::debug!(origin = %signal.origin, "Ignoring self-originated signal");
            metrics::record_signal("ignored");
            return SignalAction::Ignored;
        }

        tracing::info!(origin = %signal.origin, payload = ?signal.payload, "Stop signal received");
        metrics::record_signal("stop_all");
        let outcome = self.controller.stop_all().await;
        if !outcome.is_complete() {
            tracing::warn!(failures = outcome.failures.len(), "Some streams failed to stop");
        }
        SignalAction::StoppedAll(outcome)
    }

    /// Handle signals until cancelled or every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<ProxySignal>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Signal bridge cancelled");
                    break;
                }
                signal = rx.recv() => match signal {
                    Some(signal) => {
                        self.handle(&signal).await;
                    }
                    None => break,
                },
            }
        }
    }
}
