//! Configuration Module
//!
//! Configuration loading for the proxy service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_ORIGIN_ID, DEFAULT_SOS_VERSION, LocationFixSetting, ProxyConfig,
    ReportSettings, ServerSettings, SessionSettings, SosSettings,
};
