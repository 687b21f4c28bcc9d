//! Offering Discovery Types
//!
//! Domain types describing what a remote observation service offers and
//! which (offering, observed property) pairs the proxy should stream.
//!
//! # Resolution
//!
//! The [`OfferingResolver`] walks offerings in document order. An offering
//! qualifies when its main sensor identity equals the requested one
//! (exact, case-sensitive). Each requested property is matched against the
//! first qualifying offering that declares it; later offerings declaring the
//! same property are ignored for that property.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Identity of the physical sensor being proxied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorIdentity(String);

impl SensorIdentity {
    /// Create a new sensor identity.
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Get the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of requested observed property identifiers.
///
/// Duplicates collapse on insertion. Insertion order is retained because
/// resolution iterates properties in the order the caller asked for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedPropertySet {
    ordered: Vec<String>,
    seen: HashSet<String>,
}

impl ObservedPropertySet {
    /// Create an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a property. Returns `false` if it was already present.
    pub fn insert(&mut self, property: impl Into<String>) -> bool {
        let property = property.into();
        if self.seen.contains(&property) {
            return false;
        }
        self.seen.insert(property.clone());
        self.ordered.push(property);
        true
    }

    /// Check whether the set contains a property.
    #[must_use]
    pub fn contains(&self, property: &str) -> bool {
        self.seen.contains(property)
    }

    /// Iterate properties in caller order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    /// Number of distinct properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ObservedPropertySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for property in iter {
            set.insert(property);
        }
        set
    }
}

impl fmt::Display for ObservedPropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.ordered.join(", "))
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// A discoverable grouping of observable data under one sensor identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    /// Offering identifier.
    pub identifier: String,
    /// Identity of the sensor this offering serves.
    pub sensor: SensorIdentity,
    /// Observed properties declared by the offering.
    pub observed_properties: HashSet<String>,
}

impl Offering {
    /// Create a new offering.
    #[must_use]
    pub fn new(
        identifier: impl Into<String>,
        sensor: SensorIdentity,
        observed_properties: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            sensor,
            observed_properties: observed_properties.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether the offering declares a property.
    #[must_use]
    pub fn declares(&self, property: &str) -> bool {
        self.observed_properties.contains(property)
    }
}

/// Discovery response enumerating available offerings, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitiesDocument {
    /// Offerings in the order they appear in the document.
    pub offerings: Vec<Offering>,
}

impl CapabilitiesDocument {
    /// Create a capabilities document.
    #[must_use]
    pub const fn new(offerings: Vec<Offering>) -> Self {
        Self { offerings }
    }
}

/// One (offering, observed property) pair to open a session for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Match {
    /// Identifier of the offering serving the property.
    pub offering_id: String,
    /// The observed property.
    pub observed_property: String,
}

impl Match {
    /// Create a new match.
    #[must_use]
    pub fn new(offering_id: impl Into<String>, observed_property: impl Into<String>) -> Self {
        Self {
            offering_id: offering_id.into(),
            observed_property: observed_property.into(),
        }
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves a (sensor, properties) request against a capabilities document.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfferingResolver;

impl OfferingResolver {
    /// Create a new resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Resolve the matches to open sessions for.
    ///
    /// Matches are ordered by offering (document order), then by property
    /// (caller order). An empty result is not an error here; the controller
    /// decides whether that is fatal.
    #[must_use]
    pub fn resolve(
        &self,
        capabilities: &CapabilitiesDocument,
        sensor: &SensorIdentity,
        properties: &ObservedPropertySet,
    ) -> Vec<Match> {
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut matches = Vec::new();

        for offering in capabilities.offerings.iter().filter(|o| &o.sensor == sensor) {
            for property in properties.iter() {
                if claimed.contains(property) || !offering.declares(property) {
                    continue;
                }
                claimed.insert(property);
                matches.push(Match::new(&offering.identifier, property));
            }
        }

        matches
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sensor(uid: &str) -> SensorIdentity {
        SensorIdentity::new(uid)
    }

    fn weather_caps() -> CapabilitiesDocument {
        CapabilitiesDocument::new(vec![Offering::new(
            "O1",
            sensor("S1"),
            ["temp", "humidity"],
        )])
    }

    #[test]
    fn property_set_collapses_duplicates_and_keeps_order() {
        let set: ObservedPropertySet = ["humidity", "temp", "humidity"].into_iter().collect();

        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["humidity", "temp"]);
    }

    #[test]
    fn resolve_skips_missing_properties() {
        let props: ObservedPropertySet = ["temp", "humidity", "pressure"].into_iter().collect();

        let matches = OfferingResolver::new().resolve(&weather_caps(), &sensor("S1"), &props);

        assert_eq!(
            matches,
            vec![Match::new("O1", "temp"), Match::new("O1", "humidity")]
        );
    }

    #[test]
    fn resolve_unknown_sensor_is_empty() {
        let props: ObservedPropertySet = ["temp", "humidity"].into_iter().collect();

        let matches = OfferingResolver::new().resolve(&weather_caps(), &sensor("S2"), &props);

        assert!(matches.is_empty());
    }

    #[test]
    fn resolve_sensor_identity_is_case_sensitive() {
        let props: ObservedPropertySet = ["temp"].into_iter().collect();

        let matches = OfferingResolver::new().resolve(&weather_caps(), &sensor("s1"), &props);

        assert!(matches.is_empty());
    }

    #[test]
    fn resolve_first_qualifying_offering_wins() {
        let caps = CapabilitiesDocument::new(vec![
            Offering::new("other", sensor("S9"), ["temp"]),
            Offering::new("first", sensor("S1"), ["temp"]),
            Offering::new("second", sensor("S1"), ["temp", "wind"]),
        ]);
        let props: ObservedPropertySet = ["wind", "temp"].into_iter().collect();

        let matches = OfferingResolver::new().resolve(&caps, &sensor("S1"), &props);

        assert_eq!(
            matches,
            vec![Match::new("first", "temp"), Match::new("second", "wind")]
        );
    }

    #[test]
    fn resolve_orders_by_offering_then_caller_order() {
        let caps = CapabilitiesDocument::new(vec![Offering::new(
            "O1",
            sensor("S1"),
            ["a", "b", "c"],
        )]);
        let props: ObservedPropertySet = ["c", "a", "b"].into_iter().collect();

        let matches = OfferingResolver::new().resolve(&caps, &sensor("S1"), &props);
        let order: Vec<_> = matches.iter().map(|m| m.observed_property.as_str()).collect();

        assert_eq!(order, vec!["c", "a", "b"]);
    }

    fn arb_caps() -> impl Strategy<Value = CapabilitiesDocument> {
        let offering = (
            "[a-z]{1,4}",
            prop::sample::select(vec!["S1", "S2", "S3"]),
            prop::collection::hash_set(prop::sample::select(vec!["p1", "p2", "p3", "p4"]), 0..4),
        )
            .prop_map(|(id, uid, props)| Offering::new(id, sensor(uid), props));
        prop::collection::vec(offering, 0..6).prop_map(CapabilitiesDocument::new)
    }

    proptest! {
        #[test]
        fn resolve_matches_exactly_the_served_properties(
            caps in arb_caps(),
            uid in prop::sample::select(vec!["S1", "S2", "S3"]),
            requested in prop::collection::vec(prop::sample::select(vec!["p1", "p2", "p3", "p4", "p5"]), 0..6),
        ) {
            let props: ObservedPropertySet = requested.iter().copied().collect();
            let target = sensor(uid);
            let matches = OfferingResolver::new().resolve(&caps, &target, &props);

            for property in props.iter() {
                let first = caps
                    .offerings
                    .iter()
                    .find(|o| o.sensor == target && o.declares(property));
                let found: Vec<_> = matches
                    .iter()
                    .filter(|m| m.observed_property == property)
                    .collect();

                match first {
                    Some(offering) => {
                        prop_assert_eq!(found.len(), 1);
                        prop_assert_eq!(&found[0].offering_id, &offering.identifier);
                    }
                    None => prop_assert!(found.is_empty()),
                }
            }
            prop_assert!(matches.iter().all(|m| props.contains(&m.observed_property)));
        }
    }
}
