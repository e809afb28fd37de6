//! Reconciliation of tracking identifiers from competing sources.
//!
//! A telemetry item may already carry tracking properties, the inbound request
//! may assert its own through headers, and detached background work recovers
//! the ids it inherited from the [`BackgroundRegistry`]. For each dimension the
//! request wins, then the background entry, then the pre-existing value. An
//! overridden value is never lost: it is kept under `{key}:Alternate`.

use std::sync::Arc;

use crate::{
    BackgroundRegistry, ContextDetails, EnrichmentStage, EnrichmentWarning, Properties,
    RequestSource, TelemetryConfig, TelemetryError,
    config::NOT_AVAILABLE,
    context::{SOURCE_KEY, new_id},
};

pub const ALTERNATE_SUFFIX: &str = ":Alternate";
pub const ORIGINAL_USER_KEY: &str = "OriginalUserId";
pub const APP_ID_CLAIM: &str = "appid";

/// Outcome of a resolution pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The caller identity resolved from the request principal.
    pub user_id: Option<String>,
    pub warnings: Vec<EnrichmentWarning>,
}

#[derive(Debug, Clone, Copy)]
enum BackgroundField {
    Transaction,
    EndToEnd,
    Tenant,
}

impl BackgroundField {
    fn read(self, details: &ContextDetails) -> &str {
        match self {
            Self::Transaction => &details.transaction_id,
            Self::EndToEnd => &details.end_to_end_tracking_id,
            Self::Tenant => &details.tenant_id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Dimension<'a> {
    property: &'a str,
    header: &'a str,
    background: Option<BackgroundField>,
}

impl Dimension<'_> {
    fn validate(&self) -> Result<(), TelemetryError> {
        if self.property.trim().is_empty() {
            return Err(TelemetryError::InvalidDimension {
                header: self.header.to_owned(),
            });
        }
        Ok(())
    }
}

fn non_blank(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

/// Resolves the tracking dimensions of telemetry property maps.
#[derive(Debug, Clone)]
pub struct TrackingResolver {
    config: Arc<TelemetryConfig>,
    registry: Arc<BackgroundRegistry>,
}

impl TrackingResolver {
    #[must_use]
    pub const fn new(config: Arc<TelemetryConfig>, registry: Arc<BackgroundRegistry>) -> Self {
        Self { config, registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<BackgroundRegistry> {
        &self.registry
    }

    /// Resolves every tracking dimension of `properties`.
    pub fn resolve(&self, properties: &mut Properties, request: Option<&dyn RequestSource>) -> Resolution {
        self.resolve_with_provisional(properties, request, &[])
    }

    /// Same as [`resolve`](Self::resolve), treating the `provisional` key/value
    /// pairs as defaults instead of pre-existing values.
    ///
    /// A provisional value is replaced by any value found in the request or the
    /// background registry without an `:Alternate` breadcrumb, and kept if
    /// nothing is found.
    pub fn resolve_with_provisional(
        &self,
        properties: &mut Properties,
        request: Option<&dyn RequestSource>,
        provisional: &[(String, String)],
    ) -> Resolution {
        let keys = &self.config.tracking;
        let mut resolution = Resolution::default();

        let correlation = Dimension {
            property: &keys.correlation_id_property,
            header: &keys.correlation_id_header,
            background: None,
        };
        let background = match resolve_correlation(properties, request, correlation, provisional) {
            Ok(correlation_id) => self.registry.find_by_correlation_id(&correlation_id),
            Err(err) => {
                record_failure(properties, &mut resolution, &err);
                None
            }
        };

        let dimensions = [
            Dimension {
                property: &keys.transaction_id_property,
                header: &keys.transaction_id_header,
                background: Some(BackgroundField::Transaction),
            },
            Dimension {
                property: &keys.sub_correlation_id_property,
                header: &keys.sub_correlation_id_header,
                background: None,
            },
            Dimension {
                property: &keys.end_to_end_id_property,
                header: &keys.end_to_end_id_header,
                background: Some(BackgroundField::EndToEnd),
            },
            Dimension {
                property: &keys.tenant_id_property,
                header: &keys.tenant_id_header,
                background: Some(BackgroundField::Tenant),
            },
            Dimension {
                property: &keys.business_process_property,
                header: &keys.business_process_header,
                background: None,
            },
        ];
        let custom = self
            .config
            .custom_tracking_properties
            .iter()
            .map(|(property, header)| Dimension {
                property,
                header,
                background: None,
            });

        for dimension in dimensions.into_iter().chain(custom) {
            let result = resolve_dimension(properties, request, background.as_ref(), dimension, provisional);
            if let Err(err) = result {
                record_failure(properties, &mut resolution, &err);
            }
        }

        for (key, value) in &self.config.static_properties {
            properties.add(key.as_str(), value.as_str(), false);
        }
        self.apply_source_prefix(properties);

        resolution.user_id = self.resolve_user(properties, request, background.as_ref());
        resolution
    }

    fn apply_source_prefix(&self, properties: &mut Properties) {
        let Some(prefix) = self
            .config
            .telemetry_source
            .as_deref()
            .filter(|prefix| !prefix.trim().is_empty())
        else {
            return;
        };

        let source = properties.get(SOURCE_KEY).unwrap_or_default();
        let source = if source.trim().is_empty() {
            prefix.to_owned()
        } else if source.starts_with(prefix) {
            return;
        } else {
            format!("{prefix}{source}")
        };
        properties.insert(SOURCE_KEY, source);
    }

    /// Prefers the principal display name, then the `appid` claim as `SPN:{id}`.
    fn resolve_user(
        &self,
        properties: &mut Properties,
        request: Option<&dyn RequestSource>,
        background: Option<&ContextDetails>,
    ) -> Option<String> {
        let user_id = request.and_then(|request| request.principal()).and_then(|principal| {
            principal
                .name
                .as_deref()
                .and_then(non_blank)
                .or_else(|| principal.find_claim(APP_ID_CLAIM).map(|app_id| format!("SPN:{app_id}")))
        });

        let user_key = self.config.tracking.user_property.as_str();
        if let Some(user_id) = &user_id {
            if !user_key.trim().is_empty() {
                properties.insert(user_key, user_id.as_str());
            }
        }

        let original = background.and_then(|details| non_blank(&details.user_id));
        if let Some(original) = original {
            if user_id.as_deref() != Some(original.as_str()) {
                properties.insert(ORIGINAL_USER_KEY, original);
            }
        }
        user_id
    }
}

fn record_failure(properties: &mut Properties, resolution: &mut Resolution, err: &TelemetryError) {
    log::debug!(target: "telemetry_context::tracking", "tracking resolution failed: {err}");
    let warning = EnrichmentWarning::new(EnrichmentStage::Tracking, err);
    properties.insert(EnrichmentStage::Tracking.marker_key(), warning.detail.as_str());
    resolution.warnings.push(warning);
}

fn resolve_correlation(
    properties: &mut Properties,
    request: Option<&dyn RequestSource>,
    dimension: Dimension<'_>,
    provisional: &[(String, String)],
) -> Result<String, TelemetryError> {
    dimension.validate()?;
    let (existing, default) = existing_value(properties, dimension.property, provisional);
    let candidate = request_value(request, dimension.header);
    Ok(reconcile(properties, dimension.property, existing, candidate, || {
        default.unwrap_or_else(new_id)
    }))
}

fn resolve_dimension(
    properties: &mut Properties,
    request: Option<&dyn RequestSource>,
    background: Option<&ContextDetails>,
    dimension: Dimension<'_>,
    provisional: &[(String, String)],
) -> Result<(), TelemetryError> {
    dimension.validate()?;
    let (existing, default) = existing_value(properties, dimension.property, provisional);
    let candidate = request_value(request, dimension.header).or_else(|| {
        dimension
            .background
            .zip(background)
            .and_then(|(field, details)| non_blank(field.read(details)))
    });
    reconcile(properties, dimension.property, existing, candidate, || {
        default.unwrap_or_else(|| NOT_AVAILABLE.to_owned())
    });
    Ok(())
}

/// The non-blank value under `key`, unless it is provisional, in which case it
/// is returned as the default instead.
fn existing_value(
    properties: &Properties,
    key: &str,
    provisional: &[(String, String)],
) -> (Option<String>, Option<String>) {
    let existing = properties.get_non_blank(key).map(str::to_owned);
    match existing {
        Some(value) if provisional.iter().any(|(k, v)| k == key && *v == value) => (None, Some(value)),
        existing => (existing, None),
    }
}

fn request_value(request: Option<&dyn RequestSource>, header: &str) -> Option<String> {
    if header.trim().is_empty() {
        return None;
    }
    request.and_then(|request| request.header(header))
}

fn reconcile(
    properties: &mut Properties,
    key: &str,
    existing: Option<String>,
    candidate: Option<String>,
    default: impl FnOnce() -> String,
) -> String {
    match (existing, candidate) {
        (Some(existing), Some(candidate)) if existing != candidate => {
            properties.insert(key, candidate.as_str());
            properties.insert(format!("{key}{ALTERNATE_SUFFIX}"), existing);
            candidate
        }
        (Some(existing), _) => existing,
        (None, Some(candidate)) => {
            properties.insert(key, candidate.as_str());
            candidate
        }
        (None, None) => {
            let value = default();
            properties.insert(key, value.as_str());
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        BackgroundDetails, ExecutionContextProvider, ExecutionId, Principal, RequestSnapshot,
    };

    struct Fixed(ExecutionId);

    impl ExecutionContextProvider for Fixed {
        fn current_execution_id(&self) -> Result<ExecutionId, TelemetryError> {
            Ok(self.0)
        }
    }

    fn resolver_with(config: TelemetryConfig) -> TrackingResolver {
        TrackingResolver::new(Arc::new(config), Arc::new(BackgroundRegistry::new()))
    }

    fn resolver() -> TrackingResolver {
        resolver_with(TelemetryConfig::default())
    }

    #[test]
    fn test_correlation_from_request() {
        let request = RequestSnapshot::new("GET", "/").with_header("x-correlationid", "abc");
        let mut properties = Properties::new();
        resolver().resolve(&mut properties, Some(&request));

        assert_eq!(properties.get("XCV"), Some("abc"));
        assert!(!properties.contains_key("XCV:Alternate"));
    }

    #[test]
    fn test_request_overrides_existing_with_alternate() {
        let request = RequestSnapshot::new("GET", "/").with_header("x-correlationid", "new");
        let mut properties: Properties = [("XCV", "old")].into_iter().collect();
        resolver().resolve(&mut properties, Some(&request));

        assert_eq!(properties.get("XCV"), Some("new"));
        assert_eq!(properties.get("XCV:Alternate"), Some("old"));
    }

    #[test]
    fn test_equal_values_leave_no_alternate() {
        let request = RequestSnapshot::new("GET", "/")
            .with_header("x-correlationid", "same")
            .with_header("x-ms-tenant", "contoso");
        let mut properties: Properties = [("XCV", "same"), ("TenantId", "contoso")].into_iter().collect();
        resolver().resolve(&mut properties, Some(&request));

        assert_eq!(properties.get("XCV"), Some("same"));
        assert!(!properties.contains_key("XCV:Alternate"));
        assert!(!properties.contains_key("TenantId:Alternate"));
    }

    #[test]
    fn test_existing_kept_without_other_source() {
        let mut properties: Properties = [("XCV", "kept"), ("MessageId", "txn")].into_iter().collect();
        resolver().resolve(&mut properties, None);
        assert_eq!(properties.get("XCV"), Some("kept"));
        assert_eq!(properties.get("MessageId"), Some("txn"));
    }

    #[test]
    fn test_defaults_without_any_source() {
        let mut properties = Properties::new();
        let resolution = resolver().resolve(&mut properties, None);

        let correlation_id = properties.get("XCV").unwrap();
        assert!(uuid::Uuid::parse_str(correlation_id).is_ok());
        for key in ["MessageId", "Sub-XCV", "EndToEndTrackingId", "TenantId", "BusinessProcessName"] {
            assert_eq!(properties.get(key), Some(NOT_AVAILABLE), "{key}");
        }
        assert_eq!(resolution, Resolution::default());
        assert!(!properties.contains_key("LoggedInUserId"));
    }

    #[test]
    fn test_fresh_correlation_ids_differ() {
        let mut first = Properties::new();
        let mut second = Properties::new();
        resolver().resolve(&mut first, None);
        resolver().resolve(&mut second, None);
        assert_ne!(first.get("XCV"), second.get("XCV"));
    }

    #[test]
    fn test_provisional_values_yield_without_alternate() {
        let request = RequestSnapshot::new("GET", "/").with_header("x-correlationid", "from-request");
        let mut properties: Properties = [("XCV", "generated"), ("MessageId", "generated-txn")]
            .into_iter()
            .collect();
        let provisional = vec![
            ("XCV".to_owned(), "generated".to_owned()),
            ("MessageId".to_owned(), "generated-txn".to_owned()),
        ];
        resolver().resolve_with_provisional(&mut properties, Some(&request), &provisional);

        assert_eq!(properties.get("XCV"), Some("from-request"));
        assert!(!properties.contains_key("XCV:Alternate"));
        // Nothing better was found for the transaction.
        assert_eq!(properties.get("MessageId"), Some("generated-txn"));
    }

    #[test]
    fn test_background_fills_missing_dimensions() {
        let resolver = resolver();
        let provider = Fixed(ExecutionId::new());
        let _guard = resolver
            .registry()
            .enter(
                &provider,
                BackgroundDetails::new("bg-corr")
                    .transaction_id("bg-txn")
                    .end_to_end_tracking_id("bg-e2e")
                    .tenant_id("bg-tenant")
                    .user_id("alice"),
            )
            .unwrap();

        let mut properties: Properties = [("XCV", "bg-corr"), ("TenantId", "stale")].into_iter().collect();
        let resolution = resolver.resolve(&mut properties, None);

        assert_eq!(properties.get("MessageId"), Some("bg-txn"));
        assert_eq!(properties.get("EndToEndTrackingId"), Some("bg-e2e"));
        assert_eq!(properties.get("TenantId"), Some("bg-tenant"));
        assert_eq!(properties.get("TenantId:Alternate"), Some("stale"));
        assert_eq!(properties.get("Sub-XCV"), Some(NOT_AVAILABLE));
        assert_eq!(properties.get(ORIGINAL_USER_KEY), Some("alice"));
        assert_eq!(resolution.user_id, None);
    }

    #[test]
    fn test_request_beats_background() {
        let resolver = resolver();
        let provider = Fixed(ExecutionId::new());
        let _guard = resolver
            .registry()
            .enter(&provider, BackgroundDetails::new("corr").transaction_id("bg-txn"))
            .unwrap();

        let request = RequestSnapshot::new("GET", "/")
            .with_header("x-correlationid", "corr")
            .with_header("x-messageid", "req-txn");
        let mut properties = Properties::new();
        resolver.resolve(&mut properties, Some(&request));
        assert_eq!(properties.get("MessageId"), Some("req-txn"));
    }

    #[test]
    fn test_user_resolution() {
        let request = RequestSnapshot::new("GET", "/").with_principal(Principal::named("alice"));
        let mut properties = Properties::new();
        let resolution = resolver().resolve(&mut properties, Some(&request));
        assert_eq!(resolution.user_id.as_deref(), Some("alice"));
        assert_eq!(properties.get("LoggedInUserId"), Some("alice"));

        let request = RequestSnapshot::new("GET", "/").with_principal(Principal::new().claim("appid", "svc-1"));
        let mut properties = Properties::new();
        let resolution = resolver().resolve(&mut properties, Some(&request));
        assert_eq!(resolution.user_id.as_deref(), Some("SPN:svc-1"));
        assert_eq!(properties.get("LoggedInUserId"), Some("SPN:svc-1"));
    }

    #[test]
    fn test_same_background_user_is_not_duplicated() {
        let resolver = resolver();
        let provider = Fixed(ExecutionId::new());
        let _guard = resolver
            .registry()
            .enter(&provider, BackgroundDetails::new("corr").user_id("alice"))
            .unwrap();

        let request = RequestSnapshot::new("GET", "/")
            .with_header("x-correlationid", "corr")
            .with_principal(Principal::named("alice"));
        let mut properties = Properties::new();
        resolver.resolve(&mut properties, Some(&request));
        assert!(!properties.contains_key(ORIGINAL_USER_KEY));
    }

    #[test]
    fn test_custom_dimensions_static_properties_and_source() {
        let mut config = TelemetryConfig::default();
        config.custom_tracking_properties =
            BTreeMap::from([("Region".to_owned(), "x-region".to_owned()), ("Slot".to_owned(), "x-slot".to_owned())]);
        config.static_properties = BTreeMap::from([
            ("Service".to_owned(), "Orders".to_owned()),
            ("Region".to_owned(), "ignored".to_owned()),
        ]);
        config.telemetry_source = Some("Contoso.".to_owned());

        let request = RequestSnapshot::new("GET", "/").with_header("x-region", "westeurope");
        let mut properties: Properties = [("Source", "Checkout")].into_iter().collect();
        resolver_with(config).resolve(&mut properties, Some(&request));

        assert_eq!(properties.get("Region"), Some("westeurope"));
        assert_eq!(properties.get("Slot"), Some(NOT_AVAILABLE));
        assert_eq!(properties.get("Service"), Some("Orders"));
        assert_eq!(properties.get("Source"), Some("Contoso.Checkout"));
    }

    #[test]
    fn test_source_prefix_is_not_repeated() {
        let mut config = TelemetryConfig::default();
        config.telemetry_source = Some("Contoso.".to_owned());
        let resolver = resolver_with(config);

        let mut properties: Properties = [("Source", "Contoso.Checkout")].into_iter().collect();
        resolver.resolve(&mut properties, None);
        assert_eq!(properties.get("Source"), Some("Contoso.Checkout"));

        let mut properties = Properties::new();
        resolver.resolve(&mut properties, None);
        assert_eq!(properties.get("Source"), Some("Contoso."));
    }

    #[test]
    fn test_invalid_dimension_is_recorded_and_resolution_continues() {
        let mut config = TelemetryConfig::default();
        config.custom_tracking_properties = BTreeMap::from([(String::new(), "x-broken".to_owned())]);
        let mut properties = Properties::new();
        let resolution = resolver_with(config).resolve(&mut properties, None);

        assert_eq!(resolution.warnings.len(), 1);
        assert_eq!(resolution.warnings[0].stage, EnrichmentStage::Tracking);
        assert!(properties.contains_key("TRACKING_INITIALIZER_EXCEPTION"));
        assert!(properties.contains_key("XCV"));
        assert_eq!(properties.get("TenantId"), Some(NOT_AVAILABLE));
    }
}
