//! SOS HTTP Client
//!
//! Key-value-pair GET binding of the observation service, JSON encoded.
//!
//! | Request             | Extra parameters                              |
//! |---------------------|-----------------------------------------------|
//! | `GetCapabilities`   | none                                          |
//! | `GetResultTemplate` | `offering`, `observedProperty`                |
//! | `GetResult`         | `offering`, `observedProperty`, `temporalFilter` |
//! | `DescribeSensor`    | `procedure`                                   |
//!
//! Every request also carries `service=SOS`, `version` and `request`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::reconnect::BackoffConfig;
use super::session::SosStreamSession;
use crate::application::ports::{
    CapabilitiesPort, ConnectError, DiscoveryError, SessionRequest, StreamConnector, StreamError,
    StreamSession, TimeWindow,
};
use crate::domain::offering::{CapabilitiesDocument, Offering, SensorIdentity};
use crate::domain::record::{RecordSchema, SensorDescription};

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct CapabilitiesResponse {
    #[serde(default)]
    offerings: Vec<OfferingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferingEntry {
    identifier: String,
    procedure: String,
    #[serde(default)]
    observable_properties: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultTemplateResponse {
    result_structure: RecordSchema,
}

// =============================================================================
// HTTP Errors
// =============================================================================

/// Failure of a single service request.
#[derive(Debug, thiserror::Error)]
pub enum SosRequestError {
    /// Request could not be sent or the body not read.
    #[error("request failed: {0}")]
    Transport(String),

    /// Service answered with a non-success status.
    #[error("service returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Body was not the expected JSON.
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<SosRequestError> for StreamError {
    fn from(e: SosRequestError) -> Self {
        match e {
            SosRequestError::Status { .. } => Self::Rejected(e.to_string()),
            SosRequestError::Transport(_) | SosRequestError::Decode(_) => {
                Self::Transport(e.to_string())
            }
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the SOS client.
#[derive(Debug, Clone, Copy)]
pub struct SosClientConfig {
    /// Per-request timeout.
    pub http_timeout: Duration,
    /// Interval between polls on the polling transport.
    pub poll_interval: Duration,
    /// Retry backoff for dropped streams.
    pub backoff: BackoffConfig,
}

impl Default for SosClientConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1000),
            backoff: BackoffConfig::default(),
        }
    }
}

// =============================================================================
// Shared HTTP Binding
// =============================================================================

/// Low-level request helper shared by the client and its sessions.
#[derive(Debug, Clone)]
pub(crate) struct SosHttp {
    client: Client,
}

impl SosHttp {
    /// Build the full request URL.
    pub(crate) fn request_url(
        endpoint: &str,
        version: &str,
        request: &str,
        params: &[(&str, &str)],
    ) -> Result<Url, SosRequestError> {
        let mut url = Url::parse(endpoint)
            .map_err(|e| SosRequestError::Transport(format!("invalid endpoint '{endpoint}': {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("service", "SOS")
                .append_pair("version", version)
                .append_pair("request", request);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Issue a GET request and return the raw body.
    pub(crate) async fn get_text(&self, url: Url) -> Result<String, SosRequestError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SosRequestError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SosRequestError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(SosRequestError::Status {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }
        Ok(body)
    }

    /// Issue a GET request and decode the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SosRequestError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| SosRequestError::Decode(e.to_string()))
    }

    /// `GetResult` URL for one match and window.
    pub(crate) fn result_url(
        request: &SessionRequest,
        window: &TimeWindow,
    ) -> Result<Url, SosRequestError> {
        let filter = format!("phenomenonTime,{}", window.to_interval());
        Self::request_url(
            &request.endpoint,
            &request.version,
            "GetResult",
            &[
                ("offering", request.matched.offering_id.as_str()),
                ("observedProperty", request.matched.observed_property.as_str()),
                ("temporalFilter", filter.as_str()),
            ],
        )
    }

    /// Fetch a sensor description.
    pub(crate) async fn describe_sensor(
        &self,
        endpoint: &str,
        version: &str,
        sensor: &SensorIdentity,
    ) -> Result<SensorDescription, SosRequestError> {
        let url = Self::request_url(
            endpoint,
            version,
            "DescribeSensor",
            &[("procedure", sensor.as_str())],
        )?;
        let document: serde_json::Value = self.get_json(url).await?;
        Ok(SensorDescription {
            sensor: sensor.clone(),
            document,
        })
    }
}

// =============================================================================
// SOS Client
// =============================================================================

/// Observation service adapter implementing discovery and session opening.
#[derive(Debug, Clone)]
pub struct SosClient {
    http: SosHttp,
    config: SosClientConfig,
}

impl SosClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SosClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            http: SosHttp { client },
            config,
        })
    }

    /// Fetch the record schema of one match.
    async fn result_template(&self, request: &SessionRequest) -> Result<RecordSchema, SosRequestError> {
        let url = SosHttp::request_url(
            &request.endpoint,
            &request.version,
            "GetResultTemplate",
            &[
                ("offering", request.matched.offering_id.as_str()),
                ("observedProperty", request.matched.observed_property.as_str()),
            ],
        )?;
        let template: ResultTemplateResponse = self.http.get_json(url).await?;
        Ok(template.result_structure)
    }
}

#[async_trait]
impl CapabilitiesPort for SosClient {
    #[tracing::instrument(skip(self))]
    async fn fetch_capabilities(
        &self,
        endpoint: &str,
        version: &str,
    ) -> Result<CapabilitiesDocument, DiscoveryError> {
        let unreachable = |reason: String| DiscoveryError::Unreachable {
            endpoint: endpoint.to_string(),
            reason,
        };

        let url = SosHttp::request_url(endpoint, version, "GetCapabilities", &[])
            .map_err(|e| unreachable(e.to_string()))?;

        let response: CapabilitiesResponse =
            self.http.get_json(url).await.map_err(|e| match e {
                SosRequestError::Decode(reason) => DiscoveryError::Malformed {
                    endpoint: endpoint.to_string(),
                    reason,
                },
                other => unreachable(other.to_string()),
            })?;

        tracing::debug!(offerings = response.offerings.len(), "Capabilities received");
        Ok(CapabilitiesDocument::new(
            response
                .offerings
                .into_iter()
                .map(|o| {
                    Offering::new(
                        o.identifier,
                        SensorIdentity::new(o.procedure),
                        o.observable_properties,
                    )
                })
                .collect(),
        ))
    }
}

#[async_trait]
impl StreamConnector for SosClient {
    #[tracing::instrument(skip_all, fields(offering = %request.matched.offering_id, property = %request.matched.observed_property))]
    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn StreamSession>, ConnectError> {
        let schema = self
            .result_template(request)
            .await
            .map_err(|e| ConnectError::new(&request.matched, e.to_string()))?;

        tracing::debug!(
            schema = ?schema.declared_name(),
            fields = schema.fields.len(),
            "Result template received"
        );

        Ok(Box::new(SosStreamSession::new(
            Arc::new(self.http.clone()),
            request.clone(),
            schema,
            self.config,
        )))
    }
}
