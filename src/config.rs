//! Telemetry pipeline configuration.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::Severity;

/// Sentinel written when a tracking dimension has no known value.
pub const NOT_AVAILABLE: &str = "N/A";

pub const DEFAULT_MAX_PROPERTY_SIZE: usize = 8192;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1000;
pub const DEFAULT_MAX_EXCEPTION_DEPTH: usize = 20;

const fn default_max_property_size() -> usize {
    DEFAULT_MAX_PROPERTY_SIZE
}

const fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

const fn default_max_exception_depth() -> usize {
    DEFAULT_MAX_EXCEPTION_DEPTH
}

/// Configuration of the telemetry pipeline.
///
/// Every field has a default, so an empty JSON object is a valid configuration.
///
/// ```
/// use telemetry_context::{Severity, TelemetryConfig};
///
/// let config = TelemetryConfig::from_json(
///     r#"{ "logLevel": "Warning", "propertySplittingEnabled": true, "maxPropertySize": 100 }"#,
/// )
/// .unwrap();
/// assert_eq!(config.log_level, Severity::Warning);
/// assert_eq!(config.max_property_size, 100);
/// assert_eq!(config.max_message_size, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryConfig {
    /// Contexts below this severity are dropped before any enrichment.
    pub log_level: Severity,
    #[serde(default = "default_max_property_size")]
    pub max_property_size: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_exception_depth")]
    pub max_exception_depth: usize,
    pub property_splitting_enabled: bool,
    pub exception_trimming_enabled: bool,
    pub tracking: TrackingKeys,
    /// Additional tracking dimensions: property key to request header name.
    pub custom_tracking_properties: BTreeMap<String, String>,
    /// Properties stamped on every item without overriding existing values.
    pub static_properties: BTreeMap<String, String>,
    /// Prefix applied to the `Source` property of every item.
    pub telemetry_source: Option<String>,
    /// Report 4xx request telemetry as successful.
    pub client_side_error_suppression_enabled: bool,
    /// Requests formatted as `"{METHOD} {path}"` that must not produce telemetry.
    pub excluded_request_urls: Vec<String>,
    /// Header name to value pairs that mark a request as excluded.
    pub excluded_request_headers: BTreeMap<String, String>,
    /// Adds a readable `Response Code Description` to request telemetry.
    pub response_code_translation_enabled: bool,
    /// Copies headers, request line and status code into request telemetry.
    pub request_telemetry_enhanced: bool,
    /// Attaches the request body; only honoured with `request_telemetry_enhanced`.
    pub request_body_tracking_enabled: bool,
    /// Attaches the response body; only honoured with `request_telemetry_enhanced`.
    pub response_body_tracking_enabled: bool,
    /// Request headers whose values are replaced with a redaction marker.
    pub redacted_headers: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Severity::Verbose,
            max_property_size: DEFAULT_MAX_PROPERTY_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_exception_depth: DEFAULT_MAX_EXCEPTION_DEPTH,
            property_splitting_enabled: false,
            exception_trimming_enabled: false,
            tracking: TrackingKeys::default(),
            custom_tracking_properties: BTreeMap::new(),
            static_properties: BTreeMap::new(),
            telemetry_source: None,
            client_side_error_suppression_enabled: false,
            excluded_request_urls: Vec::new(),
            excluded_request_headers: BTreeMap::new(),
            response_code_translation_enabled: false,
            request_telemetry_enhanced: false,
            request_body_tracking_enabled: false,
            response_body_tracking_enabled: false,
            redacted_headers: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    /// Parses a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or has mistyped fields.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub const fn trimming(&self) -> TrimmingConfig {
        TrimmingConfig {
            max_property_size: self.max_property_size,
            max_message_size: self.max_message_size,
            max_exception_depth: self.max_exception_depth,
            property_splitting_enabled: self.property_splitting_enabled,
            exception_trimming_enabled: self.exception_trimming_enabled,
        }
    }
}

/// Bounds applied by the trimming engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimmingConfig {
    pub max_property_size: usize,
    pub max_message_size: usize,
    pub max_exception_depth: usize,
    pub property_splitting_enabled: bool,
    pub exception_trimming_enabled: bool,
}

impl Default for TrimmingConfig {
    fn default() -> Self {
        TelemetryConfig::default().trimming()
    }
}

/// Property keys and request headers of the built-in tracking dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingKeys {
    pub correlation_id_property: String,
    pub correlation_id_header: String,
    pub sub_correlation_id_property: String,
    pub sub_correlation_id_header: String,
    pub transaction_id_property: String,
    pub transaction_id_header: String,
    pub end_to_end_id_property: String,
    pub end_to_end_id_header: String,
    pub tenant_id_property: String,
    pub tenant_id_header: String,
    pub business_process_property: String,
    pub business_process_header: String,
    pub user_property: String,
}

impl Default for TrackingKeys {
    fn default() -> Self {
        Self {
            correlation_id_property: "XCV".to_owned(),
            correlation_id_header: "x-correlationid".to_owned(),
            sub_correlation_id_property: "Sub-XCV".to_owned(),
            sub_correlation_id_header: "x-sub-correlationid".to_owned(),
            transaction_id_property: "MessageId".to_owned(),
            transaction_id_header: "x-messageid".to_owned(),
            end_to_end_id_property: "EndToEndTrackingId".to_owned(),
            end_to_end_id_header: "x-e2e-trackingid".to_owned(),
            tenant_id_property: "TenantId".to_owned(),
            tenant_id_header: "x-ms-tenant".to_owned(),
            business_process_property: "BusinessProcessName".to_owned(),
            business_process_header: "x-businessprocessname".to_owned(),
            user_property: "LoggedInUserId".to_owned(),
        }
    }
}
