//! Read-only view of the inbound request telemetry is emitted for.

use std::{collections::BTreeMap, sync::Arc};

use crate::{Properties, TelemetryConfig, TelemetryError, config::NOT_AVAILABLE};

/// The authenticated caller of a request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Display name of an interactive user.
    pub name: Option<String>,
    pub claims: Vec<(String, String)>,
}

impl Principal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            claims: Vec::new(),
        }
    }

    #[must_use]
    pub fn claim(mut self, kind: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push((kind.into(), value.into()));
        self
    }

    /// Value of the first claim of the given kind.
    #[must_use]
    pub fn find_claim(&self, kind: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(kind))
            .map(|(_, value)| value.as_str())
    }
}

fn joined(values: &[String]) -> Option<String> {
    let value = values.join(",");
    if value.trim().is_empty() { None } else { Some(value) }
}

/// Headers, query parameters and caller of an inbound request.
///
/// Header and query names are matched case-insensitively.
pub trait RequestSource: std::fmt::Debug + Send + Sync {
    fn header_values(&self, name: &str) -> Vec<String>;

    fn query_values(&self, name: &str) -> Vec<String>;

    fn principal(&self) -> Option<&Principal>;

    fn method(&self) -> &str;

    fn path(&self) -> &str;

    /// Distinct header names, in the order they were received.
    fn header_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn protocol(&self) -> &str {
        ""
    }

    fn scheme(&self) -> &str {
        ""
    }

    fn host(&self) -> &str {
        ""
    }

    /// Raw query string including the leading `?`, empty without parameters.
    fn query_string(&self) -> String {
        String::new()
    }

    /// All values of a header joined with `,`, `None` when absent or blank.
    fn header(&self, name: &str) -> Option<String> {
        joined(&self.header_values(name))
    }

    /// Value of `key` from the headers, then the query string, or `N/A`.
    fn property(&self, key: &str) -> String {
        self.header(key)
            .or_else(|| joined(&self.query_values(key)))
            .unwrap_or_else(|| NOT_AVAILABLE.to_owned())
    }
}

/// An owned request, built up field by field.
///
/// # Examples
///
/// ```
/// use telemetry_context::{Principal, RequestSnapshot, RequestSource};
///
/// let request = RequestSnapshot::new("GET", "/orders/7")
///     .with_header("X-CorrelationId", "abc")
///     .with_query("client", "web")
///     .with_principal(Principal::named("alice"));
///
/// assert_eq!(request.header("x-correlationid").as_deref(), Some("abc"));
/// assert_eq!(request.property("client"), "web");
/// assert_eq!(request.property("x-missing"), "N/A");
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestSnapshot {
    method: String,
    path: String,
    protocol: String,
    scheme: String,
    host: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    principal: Option<Principal>,
}

impl RequestSnapshot {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the protocol, scheme and host of the request line.
    #[must_use]
    pub fn with_origin(
        mut self,
        protocol: impl Into<String>,
        scheme: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        self.protocol = protocol.into();
        self.scheme = scheme.into();
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Shares the snapshot as a request source.
    #[must_use]
    pub fn into_source(self) -> Arc<dyn RequestSource> {
        Arc::new(self)
    }
}

fn values_of(pairs: &[(String, String)], name: &str) -> Vec<String> {
    pairs
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
        .collect()
}

impl RequestSource for RequestSnapshot {
    fn header_values(&self, name: &str) -> Vec<String> {
        values_of(&self.headers, name)
    }

    fn query_values(&self, name: &str) -> Vec<String> {
        values_of(&self.query, name)
    }

    fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn header_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (name, _) in &self.headers {
            if !names.iter().any(|known| known.eq_ignore_ascii_case(name)) {
                names.push(name.clone());
            }
        }
        names
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn query_string(&self) -> String {
        if self.query.is_empty() {
            return String::new();
        }
        let pairs: Vec<String> = self
            .query
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!("?{}", pairs.join("&"))
    }
}

/// Gives access to the request currently being served, if any.
pub trait RequestAccessor: Send + Sync {
    fn current_request(&self) -> Result<Option<Arc<dyn RequestSource>>, TelemetryError>;
}

/// Resolves contextual properties against the current request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextPropertyBuilder;

impl ContextPropertyBuilder {
    /// Maps every `name -> request key` pair to `name -> value`.
    ///
    /// Nothing is resolved without a request.
    #[must_use]
    pub fn build(contextual: &Properties, request: Option<&dyn RequestSource>) -> Properties {
        let Some(request) = request else {
            return Properties::new();
        };
        contextual
            .iter()
            .map(|(name, key)| (name.as_str(), request.property(key)))
            .collect()
    }
}

/// Recognizes requests whose telemetry is suppressed, such as health probes.
#[derive(Debug, Clone, Default)]
pub struct ExcludedRequestFilter {
    urls: Vec<String>,
    headers: BTreeMap<String, String>,
}

impl ExcludedRequestFilter {
    #[must_use]
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            urls: config
                .excluded_request_urls
                .iter()
                .map(|url| url.to_lowercase())
                .collect(),
            headers: config
                .excluded_request_headers
                .iter()
                .map(|(name, value)| (name.clone(), value.to_lowercase()))
                .collect(),
        }
    }

    /// Matches `"{METHOD} {path}"` against the excluded urls and the first value
    /// of each configured header against its excluded value, ignoring case.
    #[must_use]
    pub fn is_excluded(&self, request: &dyn RequestSource) -> bool {
        self.is_url_excluded(request) || self.is_header_excluded(request)
    }

    fn is_url_excluded(&self, request: &dyn RequestSource) -> bool {
        if self.urls.is_empty() {
            return false;
        }
        let request_line = format!("{} {}", request.method(), request.path()).to_lowercase();
        self.urls.iter().any(|url| *url == request_line)
    }

    fn is_header_excluded(&self, request: &dyn RequestSource) -> bool {
        self.headers.iter().any(|(name, excluded)| {
            request
                .header_values(name)
                .first()
                .is_some_and(|value| value.to_lowercase() == *excluded)
        })
    }
}
