//! Bundle and decision-log status records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single descriptive error attached to a bundle status.
///
/// The original source's bundle errors carry an optional source location
/// (useful for Rego compile errors); we keep it even though the distilled
/// spec only mentions "an ordered sequence of descriptive error records".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<ErrorLocation>,
}

/// Source location for a bundle compile/parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub row: u32,
    pub col: u32,
}

/// The status of a single bundle (policy or discovery) as last observed.
///
/// Whether a bundle counts as "loaded" or "fail-load" is derived, not
/// stored directly:
///
/// ```
/// use agent_status_types::BundleStatus;
///
/// let mut b = BundleStatus::new("authz");
/// assert!(!b.is_loaded(), "no activation yet means fail-load");
///
/// b.last_successful_activation = Some(chrono::Utc::now());
/// assert!(b.is_loaded());
///
/// b.error_code = Some("bundle_error".into());
/// assert!(!b.is_loaded(), "a non-empty error code always means fail-load");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_revision: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub bundle_type: Option<String>,
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_activation: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_download: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_request: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_request: Option<DateTime<Utc>>,
    #[serde(rename = "code", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Stringly-typed HTTP status, per the wire contract (`"401"`, not `401`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BundleError>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, i64>,
}

impl BundleStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active_revision: None,
            bundle_type: None,
            size_bytes: 0,
            last_successful_activation: None,
            last_successful_download: None,
            last_successful_request: None,
            last_request: None,
            error_code: None,
            http_code: None,
            message: None,
            errors: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// A bundle is "loaded" when it has no error code and has activated at
    /// least once. Otherwise it counts as "fail-load".
    pub fn is_loaded(&self) -> bool {
        self.error_code.as_deref().unwrap_or_default().is_empty()
            && self.last_successful_activation.is_some()
    }
}

/// The status of the most recent decision-log upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionLogStatus {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bundle_is_not_loaded() {
        let b = BundleStatus::new("b1");
        assert!(!b.is_loaded());
    }

    #[test]
    fn activation_without_error_is_loaded() {
        let mut b = BundleStatus::new("b1");
        b.last_successful_activation = Some(Utc::now());
        assert!(b.is_loaded());
    }

    #[test]
    fn error_code_overrides_activation() {
        let mut b = BundleStatus::new("b1");
        b.last_successful_activation = Some(Utc::now());
        b.error_code = Some("bundle_error".to_string());
        assert!(!b.is_loaded());
    }

    #[test]
    fn empty_string_error_code_still_counts_as_loaded() {
        let mut b = BundleStatus::new("b1");
        b.last_successful_activation = Some(Utc::now());
        b.error_code = Some(String::new());
        assert!(b.is_loaded());
    }

    #[test]
    fn serializes_http_code_as_string() {
        let mut b = BundleStatus::new("b1");
        b.http_code = Some("401".to_string());
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["http_code"], serde_json::Value::String("401".into()));
    }

    #[test]
    fn omits_empty_optional_fields() {
        let b = BundleStatus::new("b1");
        let json = serde_json::to_value(&b).unwrap();
        assert!(json.get("active_revision").is_none());
        assert!(json.get("errors").is_none());
        assert!(json.get("metrics").is_none());
    }
}
