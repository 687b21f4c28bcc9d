//! Proxy Configuration Settings
//!
//! Configuration types for the observation proxy, loaded from environment
//! variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::application::ports::StreamTransport;
use crate::application::services::{ControllerOptions, ProxySettings};
use crate::domain::offering::{ObservedPropertySet, SensorIdentity};
use crate::domain::record::SensorDescription;

/// Default observation service version.
pub const DEFAULT_SOS_VERSION: &str = "2.0";

/// Default local identity used to filter self-originated signals.
pub const DEFAULT_ORIGIN_ID: &str = "observation-proxy";

/// Remote observation service settings.
#[derive(Debug, Clone)]
pub struct SosSettings {
    /// Service endpoint URL.
    pub endpoint: Url,
    /// Service version.
    pub version: String,
    /// Unique identifier of the proxied sensor.
    pub sensor_uid: String,
    /// Requested observed properties, in configured order.
    pub observed_properties: Vec<String>,
    /// Stream over WebSocket instead of HTTP polling.
    pub use_websockets: bool,
    /// Optional local sensor description document.
    pub sensor_description_path: Option<PathBuf>,
}

/// Session timing settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bound on a single open/start/stop call (`None` = unbounded).
    pub operation_timeout: Option<Duration>,
    /// Timeout of individual HTTP requests.
    pub http_timeout: Duration,
    /// Interval between polls when streaming over HTTP.
    pub poll_interval: Duration,
    /// Start all streams right after configuration.
    pub autostart: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            operation_timeout: Some(Duration::from_secs(30)),
            http_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1000),
            autostart: true,
        }
    }
}

/// Control server and output settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Control / health HTTP port.
    pub control_port: u16,
    /// Broadcast capacity of each output.
    pub output_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            control_port: 8082,
            output_capacity: 1024,
        }
    }
}

/// A statically configured location fix.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFixSetting {
    /// Provider name.
    pub provider: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
}

/// Spot report collection settings.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Whether the report collector runs.
    pub enabled: bool,
    /// Known location providers.
    pub location_fixes: Vec<LocationFixSetting>,
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            location_fixes: Vec::new(),
            queue_capacity: 64,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Remote observation service.
    pub sos: SosSettings,
    /// Local identity for signal filtering.
    pub origin_id: String,
    /// Session timing.
    pub session: SessionSettings,
    /// Control server.
    pub server: ServerSettings,
    /// Spot reports.
    pub report: ReportSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = required(&lookup, "PROXY_SOS_ENDPOINT")?;
        let endpoint = parse_endpoint("PROXY_SOS_ENDPOINT", &endpoint)?;
        let sensor_uid = required(&lookup, "PROXY_SENSOR_UID")?;

        let observed_properties: Vec<String> = required(&lookup, "PROXY_OBSERVED_PROPERTIES")?
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if observed_properties.is_empty() {
            return Err(ConfigError::EmptyValue(
                "PROXY_OBSERVED_PROPERTIES".to_string(),
            ));
        }

        let sos = SosSettings {
            endpoint,
            version: lookup("PROXY_SOS_VERSION")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SOS_VERSION.to_string()),
            sensor_uid,
            observed_properties,
            use_websockets: parse_bool(&lookup, "PROXY_USE_WEBSOCKETS", false),
            sensor_description_path: lookup("PROXY_SENSOR_DESCRIPTION_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };

        let defaults = SessionSettings::default();
        let operation_timeout = match parse_or(&lookup, "PROXY_SESSION_TIMEOUT_SECS", 30_u64) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let session = SessionSettings {
            operation_timeout,
            http_timeout: parse_duration_secs(
                &lookup,
                "PROXY_HTTP_TIMEOUT_SECS",
                defaults.http_timeout,
            ),
            poll_interval: parse_duration_millis(
                &lookup,
                "PROXY_POLL_INTERVAL_MS",
                defaults.poll_interval,
            ),
            autostart: parse_bool(&lookup, "PROXY_AUTOSTART", defaults.autostart),
        };

        let server = ServerSettings {
            control_port: parse_or(
                &lookup,
                "PROXY_CONTROL_PORT",
                ServerSettings::default().control_port,
            ),
            output_capacity: parse_or(
                &lookup,
                "PROXY_OUTPUT_CAPACITY",
                ServerSettings::default().output_capacity,
            ),
        };

        let report = ReportSettings {
            enabled: parse_bool(&lookup, "REPORT_ENABLED", true),
            location_fixes: lookup("REPORT_LOCATION_FIXES")
                .map(|raw| parse_location_fixes(&raw))
                .transpose()?
                .unwrap_or_default(),
            queue_capacity: parse_or(
                &lookup,
                "REPORT_QUEUE_CAPACITY",
                ReportSettings::default().queue_capacity,
            ),
        };

        Ok(Self {
            sos,
            origin_id: lookup("PROXY_ORIGIN_ID")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ORIGIN_ID.to_string()),
            session,
            server,
            report,
        })
    }

    /// Stream transport selected by the configuration.
    #[must_use]
    pub const fn transport(&self) -> StreamTransport {
        if self.sos.use_websockets {
            StreamTransport::WebSocket
        } else {
            StreamTransport::Polling
        }
    }

    /// Controller tuning derived from the session settings.
    #[must_use]
    pub const fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            operation_timeout: self.session.operation_timeout,
        }
    }

    /// Build the settings handed to the controller, loading the local
    /// sensor description if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SensorDescription`] if the file cannot be read
    /// or is not JSON.
    pub fn proxy_settings(&self) -> Result<ProxySettings, ConfigError> {
        let sensor = SensorIdentity::new(self.sos.sensor_uid.clone());
        let sensor_description = self
            .sos
            .sensor_description_path
            .as_deref()
            .map(|path| load_sensor_description(path, &sensor))
            .transpose()?;

        Ok(ProxySettings {
            endpoint: self.sos.endpoint.to_string(),
            version: self.sos.version.clone(),
            sensor,
            observed_properties: self
                .sos
                .observed_properties
                .iter()
                .collect::<ObservedPropertySet>(),
            transport: self.transport(),
            sensor_description,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Value is not a usable URL.
    #[error("environment variable {key} is not a valid http(s) URL: {reason}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Value could not be parsed.
    #[error("environment variable {key} is invalid: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Local sensor description could not be loaded.
    #[error("cannot load sensor description from {path}: {reason}")]
    SensorDescription {
        /// File path.
        path: String,
        /// Failure details.
        reason: String,
    },
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value.trim().to_string())
}

fn parse_endpoint(key: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key).map_or(default, |v| {
        matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
    })
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

/// Parse `provider=lat,lon,alt;provider=lat,lon,alt`.
fn parse_location_fixes(raw: &str) -> Result<Vec<LocationFixSetting>, ConfigError> {
    const KEY: &str = "REPORT_LOCATION_FIXES";
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: KEY.to_string(),
        reason,
    };

    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (provider, coords) = entry
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected provider=lat,lon,alt in '{entry}'")))?;
            let values = coords
                .split(',')
                .map(|c| c.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| invalid(format!("bad coordinate in '{entry}': {e}")))?;
            let [latitude, longitude, altitude] = values[..] else {
                return Err(invalid(format!("expected three coordinates in '{entry}'")));
            };
            if provider.trim().is_empty() {
                return Err(invalid(format!("missing provider name in '{entry}'")));
            }
            Ok(LocationFixSetting {
                provider: provider.trim().to_string(),
                latitude,
                longitude,
                altitude,
            })
        })
        .collect()
}

fn load_sensor_description(
    path: &Path,
    sensor: &SensorIdentity,
) -> Result<SensorDescription, ConfigError> {
    let error = |reason: String| ConfigError::SensorDescription {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| error(e.to_string()))?;
    let document = serde_json::from_str(&raw).map_err(|e| error(e.to_string()))?;
    Ok(SensorDescription {
        sensor: sensor.clone(),
        document,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("PROXY_SOS_ENDPOINT", "http://sos.example.org/sos/service"),
            ("PROXY_SENSOR_UID", "urn:osh:sensor:weather:001"),
            ("PROXY_OBSERVED_PROPERTIES", "temp, humidity,,pressure"),
        ]
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ProxyConfig::from_lookup(env(&minimal())).unwrap();

        assert_eq!(config.sos.version, "2.0");
        assert_eq!(
            config.sos.observed_properties,
            vec!["temp", "humidity", "pressure"]
        );
        assert!(!config.sos.use_websockets);
        assert_eq!(config.origin_id, DEFAULT_ORIGIN_ID);
        assert_eq!(config.session.operation_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.server.control_port, 8082);
        assert!(config.report.enabled);
        assert_eq!(config.transport(), StreamTransport::Polling);
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let err = ProxyConfig::from_lookup(env(&[("PROXY_SENSOR_UID", "s")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "PROXY_SOS_ENDPOINT"));
    }

    #[test]
    fn empty_property_list_is_rejected() {
        let mut vars = minimal();
        vars[2] = ("PROXY_OBSERVED_PROPERTIES", " , ");

        let err = ProxyConfig::from_lookup(env(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn non_http_endpoint_is_rejected() {
        let mut vars = minimal();
        vars[0] = ("PROXY_SOS_ENDPOINT", "ftp://sos.example.org");

        let err = ProxyConfig::from_lookup(env(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn zero_timeout_disables_bound() {
        let mut vars = minimal();
        vars.push(("PROXY_SESSION_TIMEOUT_SECS", "0"));
        vars.push(("PROXY_USE_WEBSOCKETS", "TRUE"));

        let config = ProxyConfig::from_lookup(env(&vars)).unwrap();
        assert_eq!(config.session.operation_timeout, None);
        assert_eq!(config.transport(), StreamTransport::WebSocket);
    }

    #[test]
    fn location_fixes_are_parsed() {
        let fixes = parse_location_fixes("gps=34.7,-86.6,190; network = 1,2,3").unwrap();

        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].provider, "gps");
        assert!((fixes[0].longitude + 86.6).abs() < f64::EPSILON);
        assert_eq!(fixes[1].provider, "network");
    }

    #[test]
    fn malformed_location_fix_is_rejected() {
        assert!(parse_location_fixes("gps=1,2").is_err());
        assert!(parse_location_fixes("gps").is_err());
        assert!(parse_location_fixes("=1,2,3").is_err());
    }

    #[test]
    fn proxy_settings_load_local_description() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"label":"Weather Station"}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let mut vars: Vec<(&str, &str)> = minimal();
        vars.push(("PROXY_SENSOR_DESCRIPTION_PATH", path.as_str()));

        let settings = ProxyConfig::from_lookup(env(&vars))
            .unwrap()
            .proxy_settings()
            .unwrap();

        assert_eq!(settings.observed_properties.len(), 3);
        assert_eq!(
            settings.sensor_description.unwrap().document["label"],
            "Weather Station"
        );
    }
}
