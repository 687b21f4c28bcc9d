//! In-memory observation service shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use observation_proxy::application::ports::{
    CapabilitiesPort, ConnectError, DiscoveryError, RecordSink, SessionRequest, StreamConnector,
    StreamError, StreamSession, StreamTransport,
};
use observation_proxy::{
    CapabilitiesDocument, ControllerOptions, FieldValue, Offering, OutputHub, ProxyController,
    ProxySettings, Record, RecordSchema, SensorDescription, SensorIdentity, SharedOutputHub,
};

pub const SENSOR: &str = "urn:sensor:weather-1";

/// Capabilities listing one weather offering and one unrelated offering.
pub struct StaticCapabilities;

#[async_trait]
impl CapabilitiesPort for StaticCapabilities {
    async fn fetch_capabilities(
        &self,
        _endpoint: &str,
        _version: &str,
    ) -> Result<CapabilitiesDocument, DiscoveryError> {
        Ok(CapabilitiesDocument::new(vec![
            Offering::new("weather", SensorIdentity::new(SENSOR), ["temp", "humidity"]),
            Offering::new("traffic", SensorIdentity::new("urn:sensor:cam-7"), ["temp"]),
        ]))
    }
}

/// Capabilities endpoint that cannot be reached.
pub struct UnreachableCapabilities;

#[async_trait]
impl CapabilitiesPort for UnreachableCapabilities {
    async fn fetch_capabilities(
        &self,
        endpoint: &str,
        _version: &str,
    ) -> Result<CapabilitiesDocument, DiscoveryError> {
        Err(DiscoveryError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

/// Session emitting one record per start.
struct EmittingSession {
    property: String,
    schema: RecordSchema,
    fail_start: bool,
}

#[async_trait]
impl StreamSession for EmittingSession {
    fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    async fn start(&self, sink: RecordSink) -> Result<(), StreamError> {
        if self.fail_start {
            return Err(StreamError::Rejected("offering withdrawn".to_string()));
        }
        sink.deliver(Record::new().with(self.property.clone(), FieldValue::Double(21.5)));
        Ok(())
    }

    async fn stop(&self) -> Result<(), StreamError> {
        Ok(())
    }

    async fn sensor_description(
        &self,
        sensor: &SensorIdentity,
    ) -> Result<SensorDescription, StreamError> {
        Ok(SensorDescription {
            sensor: sensor.clone(),
            document: serde_json::json!({ "model": "WX-200" }),
        })
    }
}

/// Connector naming `temp` streams "temperature" and leaving others unnamed.
#[derive(Default)]
pub struct WeatherConnector {
    pub fail_start: HashSet<String>,
    /// Schema names overriding the defaults, by property.
    pub schema_names: HashMap<String, String>,
}

#[async_trait]
impl StreamConnector for WeatherConnector {
    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn StreamSession>, ConnectError> {
        let property = request.matched.observed_property.clone();
        let name = self.schema_names.get(&property).cloned().or_else(|| {
            (property == "temp").then(|| "temperature".to_string())
        });
        let schema = RecordSchema::new(name, vec![]);
        Ok(Box::new(EmittingSession {
            fail_start: self.fail_start.contains(&property),
            property,
            schema,
        }))
    }
}

pub fn weather_settings(properties: &[&str]) -> ProxySettings {
    ProxySettings {
        endpoint: "http://sos.test/sos".to_string(),
        version: "2.0".to_string(),
        sensor: SensorIdentity::new(SENSOR),
        observed_properties: properties.iter().copied().collect(),
        transport: StreamTransport::Polling,
        sensor_description: None,
    }
}

pub fn weather_controller(connector: WeatherConnector) -> (Arc<ProxyController>, SharedOutputHub) {
    let outputs = Arc::new(OutputHub::new(16));
    let controller = ProxyController::new(
        Arc::new(StaticCapabilities),
        Arc::new(connector),
        Arc::clone(&outputs),
        ControllerOptions::default(),
    );
    (Arc::new(controller), outputs)
}

pub async fn configured_controller() -> (Arc<ProxyController>, SharedOutputHub) {
    let (controller, outputs) = weather_controller(WeatherConnector::default());
    controller
        .configure(&weather_settings(&["temp", "humidity"]))
        .await
        .unwrap();
    (controller, outputs)
}
