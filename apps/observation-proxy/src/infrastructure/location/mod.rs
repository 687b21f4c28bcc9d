//! Location Providers
//!
//! In-process registry of named location providers. Provider names are
//! matched case-insensitively. A provider is either stationary (a fixed
//! position reported as current) or holds the last fix pushed into it.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::application::ports::{LocationError, LocationPort};
use crate::domain::report::GeoFix;
use crate::infrastructure::config::LocationFixSetting;

#[derive(Debug, Clone, Copy)]
enum ProviderState {
    Stationary {
        latitude: f64,
        longitude: f64,
        altitude: f64,
    },
    Fixed(GeoFix),
    Pending,
}

/// Location providers keyed by lowercase name.
#[derive(Debug, Default)]
pub struct StaticLocationProvider {
    providers: RwLock<HashMap<String, ProviderState>>,
}

impl StaticLocationProvider {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with one stationary provider per configured fix.
    #[must_use]
    pub fn from_settings(fixes: &[LocationFixSetting]) -> Self {
        let registry = Self::new();
        for fix in fixes {
            registry.providers.write().insert(
                fix.provider.to_lowercase(),
                ProviderState::Stationary {
                    latitude: fix.latitude,
                    longitude: fix.longitude,
                    altitude: fix.altitude,
                },
            );
        }
        registry
    }

    /// Register a provider that has no fix yet.
    pub fn register(&self, provider: &str) {
        self.providers
            .write()
            .entry(provider.to_lowercase())
            .or_insert(ProviderState::Pending);
    }

    /// Record the latest fix of a provider, registering it if needed.
    pub fn update(&self, provider: &str, fix: GeoFix) {
        self.providers
            .write()
            .insert(provider.to_lowercase(), ProviderState::Fixed(fix));
    }

    /// Registered provider names (lowercase, sorted).
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl LocationPort for StaticLocationProvider {
    fn last_known(&self, source: &str) -> Result<GeoFix, LocationError> {
        let state = self
            .providers
            .read()
            .get(&source.to_lowercase())
            .copied()
            .ok_or_else(|| LocationError::UnknownSource(source.to_string()))?;

        match state {
            ProviderState::Stationary {
                latitude,
                longitude,
                altitude,
            } => Ok(GeoFix {
                latitude,
                longitude,
                altitude,
                time: Utc::now(),
            }),
            ProviderState::Fixed(fix) => Ok(fix),
            ProviderState::Pending => Err(LocationError::NoFix(source.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Vec<LocationFixSetting> {
        vec![LocationFixSetting {
            provider: "GPS".to_string(),
            latitude: 34.7,
            longitude: -86.6,
            altitude: 190.0,
        }]
    }

    #[test]
    fn provider_names_are_case_insensitive() {
        let registry = StaticLocationProvider::from_settings(&settings());

        let fix = registry.last_known("gps").unwrap();
        assert!((fix.latitude - 34.7).abs() < f64::EPSILON);
        assert!(registry.last_known("Gps").is_ok());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let registry = StaticLocationProvider::from_settings(&settings());

        assert_eq!(
            registry.last_known("network").unwrap_err(),
            LocationError::UnknownSource("network".to_string())
        );
    }

    #[test]
    fn pending_provider_has_no_fix_until_updated() {
        let registry = StaticLocationProvider::new();
        registry.register("fused");
        assert!(matches!(
            registry.last_known("fused"),
            Err(LocationError::NoFix(_))
        ));

        let fix = GeoFix {
            latitude: 1.0,
            longitude: 2.0,
            altitude: 3.0,
            time: Utc::now(),
        };
        registry.update("FUSED", fix);

        assert_eq!(registry.last_known("fused").unwrap(), fix);
        assert_eq!(registry.providers(), vec!["fused"]);
    }
}
