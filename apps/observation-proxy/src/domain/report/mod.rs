//! Spot Report Types
//!
//! A spot report is a field observation submitted from outside the proxy:
//! a category, a location source, a name, a description and optionally an
//! image. Reports become records on the dedicated `spot_report_data` output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{FieldDef, FieldKind, FieldValue, Record, RecordSchema};

/// Name of the output spot reports are published on.
pub const SPOT_REPORT_OUTPUT: &str = "spot_report_data";

/// Schema name of spot report records.
pub const SPOT_REPORT_SCHEMA_NAME: &str = "Spot Report";

const SPOT_REPORT_DESCRIPTION: &str = "A report generated by visual observance and classification \
     which is accompanied by a location, description, and optionally an image";

/// A geographic fix resolved from a location source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
    /// Time the fix was taken.
    pub time: DateTime<Utc>,
}

/// An externally submitted report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSubmission {
    /// Category the report belongs to.
    pub category: String,
    /// Name of the location provider to take the fix from.
    pub location_source: String,
    /// Short report name.
    pub name: String,
    /// Verbose description of the observed event.
    pub description: String,
    /// Optional image reference (path or URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<String>,
}

/// Record layout of spot reports.
#[must_use]
pub fn spot_report_schema() -> RecordSchema {
    RecordSchema::new(
        Some(SPOT_REPORT_SCHEMA_NAME.to_string()),
        vec![
            FieldDef::new("report_id", FieldKind::Text),
            FieldDef::new("latitude", FieldKind::Double),
            FieldDef::new("longitude", FieldKind::Double),
            FieldDef::new("altitude", FieldKind::Double),
            FieldDef::new("name", FieldKind::Text),
            FieldDef::new("description", FieldKind::Text),
            FieldDef::new("category", FieldKind::Text),
            FieldDef::new("has_image", FieldKind::Boolean),
            FieldDef::new("sampling_time", FieldKind::Time),
            FieldDef::new("image", FieldKind::Binary),
        ],
    )
    .with_description(SPOT_REPORT_DESCRIPTION)
}

/// Build a spot report record from a submission, its fix and optional JPEG bytes.
#[must_use]
pub fn build_spot_report(
    report_id: &str,
    submission: &ReportSubmission,
    fix: &GeoFix,
    image: Option<Vec<u8>>,
) -> Record {
    let has_image = image.is_some();
    Record::new()
        .with("report_id", FieldValue::Text(report_id.to_string()))
        .with("latitude", FieldValue::Double(fix.latitude))
        .with("longitude", FieldValue::Double(fix.longitude))
        .with("altitude", FieldValue::Double(fix.altitude))
        .with("name", FieldValue::Text(submission.name.clone()))
        .with("description", FieldValue::Text(submission.description.clone()))
        .with("category", FieldValue::Text(submission.category.clone()))
        .with("has_image", FieldValue::Boolean(has_image))
        .with("sampling_time", FieldValue::Time(fix.time))
        .with("image", image.map_or(FieldValue::Null, FieldValue::Binary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> ReportSubmission {
        ReportSubmission {
            category: "vehicle".to_string(),
            location_source: "gps".to_string(),
            name: "convoy".to_string(),
            description: "three trucks heading north".to_string(),
            image_reference: None,
        }
    }

    fn fix() -> GeoFix {
        GeoFix {
            latitude: 34.7,
            longitude: -86.6,
            altitude: 190.0,
            time: Utc::now(),
        }
    }

    #[test]
    fn record_follows_schema_layout() {
        let record = build_spot_report("r-1", &submission(), &fix(), None);
        let schema = spot_report_schema();

        let names: Vec<_> = record.fields.iter().map(|f| f.name.as_str()).collect();
        let expected: Vec<_> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn record_without_image_clears_flag() {
        let record = build_spot_report("r-1", &submission(), &fix(), None);

        assert_eq!(record.get("has_image"), Some(&FieldValue::Boolean(false)));
        assert_eq!(record.get("image"), Some(&FieldValue::Null));
    }

    #[test]
    fn record_with_image_carries_bytes() {
        let record = build_spot_report("r-2", &submission(), &fix(), Some(vec![0xFF, 0xD8]));

        assert_eq!(record.get("has_image"), Some(&FieldValue::Boolean(true)));
        assert_eq!(record.get("image"), Some(&FieldValue::Binary(vec![0xFF, 0xD8])));
        assert_eq!(
            record.get("category"),
            Some(&FieldValue::Text("vehicle".to_string()))
        );
    }
}
