//! Control Surface (Driver Adapter)
//!
//! Axum routes driving the proxy from outside: stream lifecycle, external
//! stop signals, output inspection and spot report submission.
//!
//! # Endpoints
//!
//! - `POST /control/configure` - rediscover and rebuild the sessions
//! - `GET  /control/streams` - controller state and sessions
//! - `POST /control/streams/start` / `stop` - batch start/stop
//! - `POST /control/streams/{name}/start` / `stop` - single stream
//! - `POST /control/proxy` - external stop signal `{origin, payload}`
//! - `GET  /outputs` - output statistics
//! - `GET  /outputs/{name}/latest` - latest record of an output
//! - `GET  /outputs/{name}/stream` - live records as server-sent events
//! - `POST /reports` - submit a spot report

pub mod response;

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use crate::application::services::{
    ProxyController, ProxyError, ProxySettings, ReportOutcome, ReportRequest,
};
use crate::domain::report::ReportSubmission;
use crate::infrastructure::broadcast::SharedOutputHub;
use crate::infrastructure::signal::ProxySignal;

pub use response::{
    BatchResponse, ConfigureResponse, ErrorResponse, StreamFailure, StreamResponse,
    StreamsResponse,
};

/// State shared across control handlers.
#[derive(Clone)]
pub struct ControlState {
    /// The stream controller.
    pub controller: Arc<ProxyController>,
    /// Settings used when the controller is reconfigured.
    pub settings: Arc<ProxySettings>,
    /// Output directory.
    pub outputs: SharedOutputHub,
    /// Queue of the external signal bridge.
    pub signals: mpsc::Sender<ProxySignal>,
    /// Queue of the report collector, if reporting is enabled.
    pub reports: Option<mpsc::Sender<ReportRequest>>,
}

/// Create the control router.
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/control/configure", post(configure))
        .route("/control/streams", get(list_streams))
        .route("/control/streams/start", post(start_all))
        .route("/control/streams/stop", post(stop_all))
        .route("/control/streams/{name}/start", post(start_one))
        .route("/control/streams/{name}/stop", post(stop_one))
        .route("/control/proxy", post(external_signal))
        .route("/outputs", get(list_outputs))
        .route("/outputs/{name}/latest", get(latest_record))
        .route("/outputs/{name}/stream", get(stream_records))
        .route("/reports", post(submit_report))
        .with_state(state)
}

// =============================================================================
// Streams
// =============================================================================

async fn configure(State(state): State<ControlState>) -> Response {
    match state.controller.configure(&state.settings).await {
        Ok(summary) => Json(ConfigureResponse::from(summary)).into_response(),
        Err(e) => {
            let status = match e {
                ProxyError::NoMatchingData { .. } => StatusCode::NOT_FOUND,
                ProxyError::Discovery(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(ConfigureResponse::failed(e.to_string()))).into_response()
        }
    }
}

async fn list_streams(State(state): State<ControlState>) -> impl IntoResponse {
    Json(StreamsResponse {
        state: state.controller.state(),
        sessions: state.controller.sessions().await,
    })
}

async fn start_all(State(state): State<ControlState>) -> impl IntoResponse {
    batch_response(state.controller.start_all().await.into())
}

async fn stop_all(State(state): State<ControlState>) -> impl IntoResponse {
    batch_response(state.controller.stop_all().await.into())
}

async fn start_one(State(state): State<ControlState>, Path(name): Path<String>) -> Response {
    stream_response(name.clone(), state.controller.start_one(&name).await)
}

async fn stop_one(State(state): State<ControlState>, Path(name): Path<String>) -> Response {
    stream_response(name.clone(), state.controller.stop_one(&name).await)
}

fn batch_response(body: BatchResponse) -> (StatusCode, Json<BatchResponse>) {
    let status = if body.ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(body))
}

fn stream_response(output: String, result: Result<(), ProxyError>) -> Response {
    let (status, error) = match result {
        Ok(()) => (StatusCode::OK, None),
        Err(e @ ProxyError::NotFound(_)) => (StatusCode::NOT_FOUND, Some(e.to_string())),
        Err(e @ ProxyError::Stream { .. }) => (StatusCode::BAD_GATEWAY, Some(e.to_string())),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string())),
    };
    let body = StreamResponse {
        output,
        ok: error.is_none(),
        error,
    };
    (status, Json(body)).into_response()
}

// =============================================================================
// External Signals
// =============================================================================

async fn external_signal(
    State(state): State<ControlState>,
    Json(signal): Json<ProxySignal>,
) -> Response {
    match state.signals.try_send(signal) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Signal queue unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("signal queue unavailable")),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Outputs
// =============================================================================

async fn list_outputs(State(state): State<ControlState>) -> impl IntoResponse {
    Json(state.outputs.stats())
}

async fn latest_record(State(state): State<ControlState>, Path(name): Path<String>) -> Response {
    let Some(output) = state.outputs.get(&name) else {
        return unknown_output(&name);
    };
    match output.latest() {
        Some(record) => Json(record.as_ref().clone()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn stream_records(
    State(state): State<ControlState>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let output = state.outputs.get(&name).ok_or_else(|| unknown_output(&name))?;

    let records = BroadcastStream::new(output.subscribe()).filter_map(move |item| match item {
        Ok(published) => match Event::default().event("record").json_data(published.as_ref()) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::debug!(output = %published.output, error = %e, "Skipping unserializable record");
                None
            }
        },
        Err(e) => {
            tracing::debug!(output = %name, error = %e, "Subscriber lagged");
            None
        }
    });

    Ok(Sse::new(records).keep_alive(KeepAlive::default()))
}

fn unknown_output(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(format!("unknown output '{name}'"))),
    )
        .into_response()
}

// =============================================================================
// Reports
// =============================================================================

async fn submit_report(
    State(state): State<ControlState>,
    Json(submission): Json<ReportSubmission>,
) -> Response {
    let Some(reports) = state.reports else {
        return reports_unavailable();
    };

    let (reply, outcome) = oneshot::channel();
    let request = ReportRequest {
        submission,
        reply: Some(reply),
    };
    if reports.send(request).await.is_err() {
        return reports_unavailable();
    }

    match outcome.await {
        Ok(outcome @ ReportOutcome::Accepted(_)) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Ok(outcome @ ReportOutcome::Rejected { .. }) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(outcome)).into_response()
        }
        Err(_) => reports_unavailable(),
    }
}

fn reports_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new("report collection is not running")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::StreamError;
    use crate::application::services::BatchOutcome;

    #[test]
    fn batch_response_flattens_failures() {
        let outcome = BatchOutcome {
            succeeded: vec!["output1".to_string()],
            failures: vec![(
                "output2".to_string(),
                StreamError::Rejected("bad offering".to_string()),
            )],
        };

        let body = BatchResponse::from(outcome);

        assert!(!body.ok);
        assert_eq!(body.succeeded, vec!["output1"]);
        assert_eq!(body.failures[0].output, "output2");
        assert!(body.failures[0].error.contains("bad offering"));
    }

    #[test]
    fn missing_stream_maps_to_not_found() {
        let response = stream_response(
            "output9".to_string(),
            Err(ProxyError::NotFound("output9".to_string())),
        );
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let ok = stream_response("output1".to_string(), Ok(()));
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
