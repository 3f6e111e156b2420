use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to run the proximity pipeline
///
/// Every field is optional; omitted values fall back to the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RunProximityRequest {
    #[validate(range(min = 0.0))]
    #[serde(alias = "threshold_km", rename = "thresholdKm", default)]
    pub threshold_km: Option<f64>,
    #[validate(range(min = -90.0, max = 90.0))]
    #[serde(alias = "reference_latitude", rename = "referenceLatitude", default)]
    pub reference_latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    #[serde(alias = "reference_longitude", rename = "referenceLongitude", default)]
    pub reference_longitude: Option<f64>,
    #[serde(alias = "include_records", rename = "includeRecords", default = "default_include_records")]
    pub include_records: bool,
}

fn default_include_records() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_is_valid() {
        let req: RunProximityRequest = serde_json::from_str("{}").unwrap();
        assert!(req.validate().is_ok());
        assert!(req.include_records);
        assert!(req.threshold_km.is_none());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let req: RunProximityRequest =
            serde_json::from_str(r#"{"thresholdKm": -1.0, "referenceLatitude": 91.0}"#).unwrap();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("threshold_km"));
        assert!(fields.contains_key("reference_latitude"));
    }
}
