//! Telemetry shapes handed to the backend client and the sinks accepting them.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    DependencyContext, ErrorRecord, EventContext, Properties, RequestSource, Severity,
    TelemetryContext, TelemetryError, context::Contextual, dependency::REDACTED,
};

pub const OVERRIDDEN_400S_KEY: &str = "Overridden400s";
pub const RESPONSE_CODE_DESCRIPTION_KEY: &str = "Response Code Description";
pub const REQUEST_BODY_KEY: &str = "Request:Body";
pub const RESPONSE_BODY_KEY: &str = "Response:Body";

/// Recorded in place of a body that serializes to `null`.
const EMPTY_BODY: &str = "__EMPTY__";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceTelemetry {
    pub message: String,
    pub severity: Severity,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionTelemetry {
    pub error: ErrorRecord,
    pub severity: Severity,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTelemetry {
    pub name: String,
    pub is_business_event: bool,
    pub metrics: Vec<(String, f64)>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricTelemetry {
    pub name: String,
    pub value: f64,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyTelemetry {
    pub name: String,
    pub target: String,
    pub dependency_type: String,
    /// Command or request line of the call.
    pub data: String,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub result_code: Option<String>,
    pub success: bool,
    pub properties: Properties,
}

/// An inbound request served by the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestTelemetry {
    pub name: String,
    pub url: String,
    pub response_code: String,
    pub success: bool,
    pub duration: Duration,
    pub properties: Properties,
    #[serde(skip)]
    response_headers: Vec<(String, String)>,
    #[serde(skip)]
    request_body: Option<String>,
    #[serde(skip)]
    response_body: Option<String>,
}

impl RequestTelemetry {
    /// A request is successful unless its response code is 400 or above.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        response_code: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let response_code = response_code.into();
        let success = response_code.trim().parse::<u16>().map_or(true, |code| code < 400);
        Self {
            name: name.into(),
            url: url.into(),
            response_code,
            success,
            duration,
            properties: Properties::new(),
            response_headers: Vec::new(),
            request_body: None,
            response_body: None,
        }
    }

    #[must_use]
    pub fn with_response_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers.push((name.into(), value.into()));
        self
    }

    /// Records the request body, attached only when body tracking is enabled.
    ///
    /// Strings are kept as they are, other values are written as JSON.
    pub fn record_request_body<T: Serialize + ?Sized>(&mut self, body: &T) {
        self.request_body = Some(serialize_body("Request", body));
    }

    /// Records the response body, attached only when body tracking is enabled.
    pub fn record_response_body<T: Serialize + ?Sized>(&mut self, body: &T) {
        self.response_body = Some(serialize_body("Response", body));
    }

    /// Name of the response code, `None` for codes that are not known HTTP statuses.
    #[must_use]
    pub fn response_code_description(&self) -> Option<&'static str> {
        self.response_code
            .trim()
            .parse::<u16>()
            .ok()
            .and_then(status_description)
    }

    pub(crate) fn add_response_code_description(&mut self) {
        if let Some(description) = self.response_code_description() {
            self.properties.insert(RESPONSE_CODE_DESCRIPTION_KEY, description);
        }
    }

    /// Copies the headers and request line of `request` into the properties.
    pub(crate) fn add_request_properties(&mut self, request: &dyn RequestSource, redacted_headers: &[String]) {
        for name in request.header_names() {
            let redacted = redacted_headers
                .iter()
                .any(|redacted| redacted.eq_ignore_ascii_case(&name));
            let value = if redacted {
                REDACTED.to_owned()
            } else {
                request.header_values(&name).join(",")
            };
            self.properties.insert(format!("Request:Header:{name}"), value);
        }
        self.properties.insert("Request:Method", request.method());
        self.properties.insert("Request:Protocol", request.protocol());
        self.properties.insert("Request:Scheme", request.scheme());
        self.properties.insert("Request:Host", request.host());
        self.properties.insert("Request:Path", request.path());
        self.properties.insert("Request:QueryString", request.query_string());
    }

    pub(crate) fn add_response_properties(&mut self) {
        for (name, value) in std::mem::take(&mut self.response_headers) {
            let key = format!("Response:Header:{name}");
            let value = match self.properties.get(&key) {
                Some(previous) => format!("{previous},{value}"),
                None => value,
            };
            self.properties.insert(key, value);
        }
        self.properties.insert("Response:StatusCode", self.response_code.clone());
    }

    /// Moves the recorded bodies into the properties, discarding disabled ones.
    pub(crate) fn attach_bodies(&mut self, request_body: bool, response_body: bool) {
        if let Some(body) = self.request_body.take().filter(|_| request_body) {
            self.properties.insert(REQUEST_BODY_KEY, body);
        }
        if let Some(body) = self.response_body.take().filter(|_| response_body) {
            self.properties.insert(RESPONSE_BODY_KEY, body);
        }
    }

    /// Reports a client error (4xx) as a success, flagging it as overridden.
    ///
    /// Returns `true` if the request was overridden.
    pub fn suppress_client_error(&mut self) -> bool {
        let Ok(code) = self.response_code.trim().parse::<u16>() else {
            return false;
        };
        if !(400..500).contains(&code) {
            return false;
        }
        self.success = true;
        self.properties.insert(OVERRIDDEN_400S_KEY, "true");
        true
    }
}

fn serialize_body<T: Serialize + ?Sized>(label: &str, body: &T) -> String {
    match serde_json::to_value(body) {
        Ok(serde_json::Value::Null) => EMPTY_BODY.to_owned(),
        Ok(serde_json::Value::String(body)) => body,
        Ok(body) => body.to_string(),
        Err(err) => format!("{label} Body cannot be serialized. Error - {err}"),
    }
}

/// Name of a known HTTP status code.
const fn status_description(code: u16) -> Option<&'static str> {
    let description = match code {
        100 => "Continue",
        101 => "SwitchingProtocols",
        102 => "Processing",
        103 => "EarlyHints",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "NonAuthoritativeInformation",
        204 => "NoContent",
        205 => "ResetContent",
        206 => "PartialContent",
        207 => "MultiStatus",
        208 => "AlreadyReported",
        226 => "IMUsed",
        300 => "MultipleChoices",
        301 => "MovedPermanently",
        302 => "Found",
        303 => "SeeOther",
        304 => "NotModified",
        305 => "UseProxy",
        306 => "Unused",
        307 => "TemporaryRedirect",
        308 => "PermanentRedirect",
        400 => "BadRequest",
        401 => "Unauthorized",
        402 => "PaymentRequired",
        403 => "Forbidden",
        404 => "NotFound",
        405 => "MethodNotAllowed",
        406 => "NotAcceptable",
        407 => "ProxyAuthenticationRequired",
        408 => "RequestTimeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "LengthRequired",
        412 => "PreconditionFailed",
        413 => "RequestEntityTooLarge",
        414 => "RequestUriTooLong",
        415 => "UnsupportedMediaType",
        416 => "RequestedRangeNotSatisfiable",
        417 => "ExpectationFailed",
        421 => "MisdirectedRequest",
        422 => "UnprocessableEntity",
        423 => "Locked",
        424 => "FailedDependency",
        426 => "UpgradeRequired",
        428 => "PreconditionRequired",
        429 => "TooManyRequests",
        431 => "RequestHeaderFieldsTooLarge",
        451 => "UnavailableForLegalReasons",
        500 => "InternalServerError",
        501 => "NotImplemented",
        502 => "BadGateway",
        503 => "ServiceUnavailable",
        504 => "GatewayTimeout",
        505 => "HttpVersionNotSupported",
        506 => "VariantAlsoNegotiates",
        507 => "InsufficientStorage",
        508 => "LoopDetected",
        510 => "NotExtended",
        511 => "NetworkAuthenticationRequired",
        _ => return None,
    };
    Some(description)
}

/// A mapped telemetry item, ready for the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Telemetry {
    Trace(TraceTelemetry),
    Exception(ExceptionTelemetry),
    Event(EventTelemetry),
    Metric(MetricTelemetry),
    Dependency(DependencyTelemetry),
    Request(RequestTelemetry),
}

impl Telemetry {
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        match self {
            Self::Trace(item) => &item.properties,
            Self::Exception(item) => &item.properties,
            Self::Event(item) => &item.properties,
            Self::Metric(item) => &item.properties,
            Self::Dependency(item) => &item.properties,
            Self::Request(item) => &item.properties,
        }
    }

    /// Severity used when the item is written as a log record.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Trace(item) => item.severity,
            Self::Exception(item) => item.severity,
            Self::Event(_) | Self::Metric(_) => Severity::Metric,
            Self::Dependency(item) if !item.success => Severity::Warning,
            Self::Request(item) if !item.success => Severity::Warning,
            Self::Dependency(_) | Self::Request(_) => Severity::Information,
        }
    }

    /// A one-line description of the item.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Trace(item) => item.message.clone(),
            Self::Exception(item) => format!("{}: {}", item.error.type_name, item.error.message),
            Self::Event(item) => format!("event {}", item.name),
            Self::Metric(item) => format!("metric {} = {}", item.name, item.value),
            Self::Dependency(item) => format!(
                "dependency {} -> {} ({}) in {:?}",
                item.name, item.target, item.dependency_type, item.duration
            ),
            Self::Request(item) => format!("request {} {} -> {}", item.name, item.url, item.response_code),
        }
    }
}

fn event_telemetry(event: EventContext, properties: Properties) -> EventTelemetry {
    let mut properties = properties;
    properties.extend(event.business_properties().iter().cloned(), true);
    let metrics = event.metrics().to_vec();
    EventTelemetry {
        name: event.event_name,
        is_business_event: event.is_business_event,
        metrics,
        properties,
    }
}

fn dependency_telemetry(dependency: DependencyContext, properties: Properties) -> DependencyTelemetry {
    DependencyTelemetry {
        success: dependency.is_successful(),
        dependency_type: dependency.dependency_type.to_string(),
        name: dependency.dependency_name,
        target: dependency.target_system_name,
        data: dependency.request_details,
        start_time: dependency.start_time,
        duration: dependency.time_taken,
        result_code: dependency.response_code,
        properties,
    }
}

impl From<TelemetryContext> for Telemetry {
    fn from(context: TelemetryContext) -> Self {
        let properties = context.base().properties().clone();
        match context {
            TelemetryContext::Message(message) => Self::Trace(TraceTelemetry {
                message: message.message,
                severity: message.base.severity,
                properties,
            }),
            TelemetryContext::Exception(exception) => Self::Exception(ExceptionTelemetry {
                error: exception.error,
                severity: exception.base.severity,
                properties,
            }),
            TelemetryContext::Event(event) => Self::Event(event_telemetry(event, properties)),
            TelemetryContext::Metric(metric) => Self::Metric(MetricTelemetry {
                name: metric.metric_name,
                value: metric.value,
                properties,
            }),
            TelemetryContext::Performance(performance) => Self::Metric(MetricTelemetry {
                name: performance.metric_name,
                value: performance.value,
                properties,
            }),
            TelemetryContext::Dependency(dependency) => {
                Self::Dependency(dependency_telemetry(dependency, properties))
            }
        }
    }
}

/// The backend client telemetry is forwarded to.
pub trait TelemetrySink: Send + Sync {
    fn track(&self, telemetry: Telemetry) -> Result<(), TelemetryError>;
}

/// Records every item in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    items: Mutex<Vec<Telemetry>>,
}

impl InMemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the items tracked so far.
    #[must_use]
    pub fn items(&self) -> Vec<Telemetry> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Removes and returns the items tracked so far.
    pub fn take(&self) -> Vec<Telemetry> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for InMemorySink {
    fn track(&self, telemetry: Telemetry) -> Result<(), TelemetryError> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(telemetry);
        Ok(())
    }
}

pub const LOG_SINK_TARGET: &str = "telemetry_context::sink";

/// Writes every item as a record of the installed [`log`] logger.
///
/// The item properties become the record key-values.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn track(&self, telemetry: Telemetry) -> Result<(), TelemetryError> {
        let level = telemetry.severity().to_log_level();
        if level > log::max_level() {
            return Ok(());
        }

        let summary = telemetry.summary();
        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{summary}"))
                .level(level)
                .target(LOG_SINK_TARGET)
                .key_values(telemetry.properties())
                .build(),
        );
        Ok(())
    }
}
