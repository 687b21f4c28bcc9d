//! Control Surface Integration Tests
//!
//! Exercises the axum router in-process with `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use observation_proxy::infrastructure::config::LocationFixSetting;
use observation_proxy::{
    ControlState, ControllerOptions, ControllerState, HealthServer, HealthServerState,
    JpegImageLoader, OutputHub, ProxyController, ProxySignal, ReportCollector, SPOT_REPORT_OUTPUT,
    StaticLocationProvider, control_router,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::{
    UnreachableCapabilities, WeatherConnector, configured_controller, weather_controller,
    weather_settings,
};

struct Harness {
    app: Router,
    signals: mpsc::Receiver<ProxySignal>,
    outputs: observation_proxy::SharedOutputHub,
    _cancel: tokio_util::sync::DropGuard,
}

async fn harness(with_reports: bool) -> Harness {
    let (controller, outputs) = configured_controller().await;
    let (signal_tx, signal_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();

    let reports = if with_reports {
        let location = Arc::new(StaticLocationProvider::from_settings(&[LocationFixSetting {
            provider: "GPS".to_string(),
            latitude: 34.7,
            longitude: -86.6,
            altitude: 190.0,
        }]));
        let images = Arc::new(JpegImageLoader::new(Duration::from_secs(1)).unwrap());
        let collector = Arc::new(ReportCollector::new(&outputs, location, images).unwrap());
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(collector.run(rx, cancel.clone()));
        Some(tx)
    } else {
        None
    };

    let app = control_router(ControlState {
        controller,
        settings: Arc::new(weather_settings(&["temp", "humidity"])),
        outputs: Arc::clone(&outputs),
        signals: signal_tx,
        reports,
    });

    Harness {
        app,
        signals: signal_rx,
        outputs,
        _cancel: cancel.drop_guard(),
    }
}

/// Router over an unconfigured controller with the given request settings.
fn configure_router(controller: Arc<ProxyController>, properties: &[&str]) -> Router {
    let (signals, _) = mpsc::channel(1);
    control_router(ControlState {
        outputs: Arc::new(OutputHub::new(16)),
        controller,
        settings: Arc::new(weather_settings(properties)),
        signals,
        reports: None,
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn streams_listing_reports_state_and_sessions() {
    let h = harness(false).await;

    let (status, body) = send(&h.app, "GET", "/control/streams", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ready");
    assert_eq!(body["sessions"][0]["output"], "temperature");
    assert_eq!(body["sessions"][1]["output"], "output2");
    assert_eq!(body["sessions"][1]["phase"], "created");
}

#[tokio::test]
async fn batch_start_and_stop() {
    let h = harness(false).await;

    let (status, body) = send(&h.app, "POST", "/control/streams/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["succeeded"], json!(["temperature", "output2"]));

    let (status, body) = send(&h.app, "POST", "/control/streams/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["failures"], json!([]));
}

#[tokio::test]
async fn single_stream_routes_resolve_output_names() {
    let h = harness(false).await;

    let (status, body) = send(&h.app, "POST", "/control/streams/temperature/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "temperature");

    let (status, body) = send(&h.app, "POST", "/control/streams/output7/stop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn latest_record_follows_output_lifecycle() {
    let h = harness(false).await;

    let (status, _) = send(&h.app, "GET", "/outputs/temperature/latest", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    send(&h.app, "POST", "/control/streams/start", None).await;
    let (status, body) = send(&h.app, "GET", "/outputs/temperature/latest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "temperature");

    let (status, _) = send(&h.app, "GET", "/outputs/pressure/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn outputs_listing_includes_every_registered_output() {
    let h = harness(true).await;

    let (status, body) = send(&h.app, "GET", "/outputs", None).await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&"temperature".to_string()));
    assert!(names.contains(&SPOT_REPORT_OUTPUT.to_string()));
}

#[tokio::test]
async fn external_signal_is_queued_for_the_bridge() {
    let mut h = harness(false).await;

    let (status, _) = send(
        &h.app,
        "POST",
        "/control/proxy",
        Some(json!({ "origin": "org.example.console", "payload": { "reason": "exercise" } })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let signal = h.signals.recv().await.unwrap();
    assert_eq!(signal.origin, "org.example.console");
}

#[tokio::test]
async fn report_submission_publishes_spot_report() {
    let h = harness(true).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/reports",
        Some(json!({
            "category": "vehicle",
            "location_source": "gps",
            "name": "convoy",
            "description": "three trucks heading north"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["has_image"], false);
    let latest = h.outputs.get(SPOT_REPORT_OUTPUT).unwrap().latest().unwrap();
    assert_eq!(
        latest.record.get("report_id").cloned(),
        Some(observation_proxy::FieldValue::Text(
            body["report_id"].as_str().unwrap().to_string()
        ))
    );
}

#[tokio::test]
async fn report_with_unknown_location_source_is_rejected() {
    let h = harness(true).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/reports",
        Some(json!({
            "category": "vehicle",
            "location_source": "network",
            "name": "convoy",
            "description": "three trucks heading north"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "rejected");
    assert!(body["reason"].as_str().unwrap().contains("network"));
}

#[tokio::test]
async fn reports_are_unavailable_when_disabled() {
    let h = harness(false).await;

    let (status, _) = send(
        &h.app,
        "POST",
        "/reports",
        Some(json!({
            "category": "vehicle",
            "location_source": "gps",
            "name": "convoy",
            "description": "three trucks heading north"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn probes_follow_controller_state() {
    let (controller, outputs) = configured_controller().await;
    let state = Arc::new(HealthServerState::new(
        "test".to_string(),
        Arc::clone(&controller),
        outputs,
    ));
    let app = HealthServer::router(state);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["controller"], "ready");
    assert_eq!(body["streams"]["total"], 2);

    controller.start_all().await;
    let (_, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(body["status"], "healthy");

    let ready = app
        .clone()
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn configure_route_recovers_an_unconfigured_proxy() {
    let (controller, _outputs) = weather_controller(WeatherConnector::default());
    let app = configure_router(Arc::clone(&controller), &["temp", "humidity"]);
    assert_eq!(controller.state(), ControllerState::Unconfigured);

    let (status, body) = send(&app, "POST", "/control/configure", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["outputs"], json!(["temperature", "output2"]));
    assert_eq!(controller.state(), ControllerState::Ready);

    let (status, _) = send(&app, "POST", "/control/streams/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(controller.state(), ControllerState::Streaming);
}

#[tokio::test]
async fn configure_route_without_matches_is_not_found() {
    let (controller, _outputs) = weather_controller(WeatherConnector::default());
    let app = configure_router(Arc::clone(&controller), &["pressure"]);

    let (status, body) = send(&app, "POST", "/control/configure", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("pressure"));
    assert_eq!(controller.state(), ControllerState::Unconfigured);
}

#[tokio::test]
async fn configure_route_with_unreachable_service_is_bad_gateway() {
    let controller = Arc::new(ProxyController::new(
        Arc::new(UnreachableCapabilities),
        Arc::new(WeatherConnector::default()),
        Arc::new(OutputHub::new(16)),
        ControllerOptions::default(),
    ));
    let app = configure_router(Arc::clone(&controller), &["temp"]);

    let (status, body) = send(&app, "POST", "/control/configure", None).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["ok"], false);
    assert_eq!(controller.state(), ControllerState::Unconfigured);
}
