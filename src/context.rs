//! The telemetry context model.
//!
//! Every kind of telemetry shares a [`LogContext`] record carrying the severity, the
//! tracking identifiers and two property maps. The kinds themselves are plain
//! structs embedding that record, gathered into the [`TelemetryContext`] sum type
//! which the logger dispatches on.

use uuid::Uuid;

use crate::{
    DependencyContext, EventContext, ExceptionContext, MetricContext, PerformanceContext,
    Properties, PropertyValue, Severity,
};

pub const CORRELATION_KEY: &str = "XCV";
pub const TRANSACTION_KEY: &str = "MessageId";
pub const TRACKING_KEY: &str = "TrackingId";
pub const SOURCE_KEY: &str = "Source";
pub const USER_KEY: &str = "UserId";

pub const DEFAULT_SOURCE: &str = "System";

/// Optional identifiers used to construct a context.
///
/// Absent or blank correlation, transaction and tracking ids are generated.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackingIds {
    pub correlation_id: Option<String>,
    pub transaction_id: Option<String>,
    pub tracking_id: Option<String>,
    pub source: Option<String>,
    pub user_id: Option<String>,
}

impl TrackingIds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn tracking_id(mut self, id: impl Into<String>) -> Self {
        self.tracking_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn supplied(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// The record shared by every telemetry kind.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub severity: Severity,
    pub correlation_id: String,
    pub transaction_id: String,
    pub tracking_id: String,
    pub source: String,
    pub user_id: String,
    /// Splits oversized properties even when the configuration does not.
    pub property_splitting_enabled: bool,
    properties: Properties,
    contextual_properties: Properties,
    generated_correlation_id: bool,
    generated_transaction_id: bool,
    trimmed: bool,
}

impl LogContext {
    pub fn new(severity: Severity, ids: TrackingIds) -> Self {
        let correlation = non_blank(ids.correlation_id);
        let transaction = non_blank(ids.transaction_id);
        let generated_correlation_id = correlation.is_none();
        let generated_transaction_id = transaction.is_none();

        let correlation_id = correlation.unwrap_or_else(new_id);
        let transaction_id = transaction.unwrap_or_else(new_id);
        let tracking_id = non_blank(ids.tracking_id).unwrap_or_else(new_id);
        let source = non_blank(ids.source).unwrap_or_else(|| DEFAULT_SOURCE.to_owned());
        let user_id = ids.user_id.unwrap_or_default();

        let properties = [
            (CORRELATION_KEY, correlation_id.as_str()),
            (TRANSACTION_KEY, transaction_id.as_str()),
            (TRACKING_KEY, tracking_id.as_str()),
            (SOURCE_KEY, source.as_str()),
            (USER_KEY, user_id.as_str()),
        ]
        .into_iter()
        .collect();

        Self {
            severity,
            correlation_id,
            transaction_id,
            tracking_id,
            source,
            user_id,
            property_splitting_enabled: false,
            properties,
            contextual_properties: Properties::new(),
            generated_correlation_id,
            generated_transaction_id,
            trimmed: false,
        }
    }

    /// Overrides every non-blank id along with its property.
    pub fn add_tracking_ids(
        &mut self,
        correlation_id: Option<&str>,
        transaction_id: Option<&str>,
        tracking_id: Option<&str>,
    ) {
        if let Some(id) = supplied(correlation_id) {
            self.correlation_id = id.to_owned();
            self.generated_correlation_id = false;
            self.properties.insert(CORRELATION_KEY, id);
        }
        if let Some(id) = supplied(transaction_id) {
            self.transaction_id = id.to_owned();
            self.generated_transaction_id = false;
            self.properties.insert(TRANSACTION_KEY, id);
        }
        if let Some(id) = supplied(tracking_id) {
            self.tracking_id = id.to_owned();
            self.properties.insert(TRACKING_KEY, id);
        }
    }

    pub fn add_user_id(&mut self, user_id: impl Into<String>) {
        self.user_id = user_id.into();
        self.properties.insert(USER_KEY, self.user_id.as_str());
    }

    /// Adds or updates a property.
    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key, value);
    }

    /// Adds a property, keeping an existing value unless `override_previous` is set.
    pub fn add_property_with(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        override_previous: bool,
    ) -> bool {
        self.properties.add(key, value, override_previous)
    }

    /// Adds or updates a property from any renderable value.
    pub fn add_property_value(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key, value.into().render());
    }

    pub fn add_properties<I, K, V>(&mut self, properties: I, override_previous: bool)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties.extend(properties, override_previous);
    }

    /// Registers a property whose value is read from the inbound request at emission.
    pub fn add_contextual_property(&mut self, name: impl Into<String>, request_key: impl Into<String>) {
        self.contextual_properties.insert(name, request_key);
    }

    pub fn add_contextual_properties<I, K, V>(&mut self, properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.contextual_properties.extend(properties, true);
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub const fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub const fn contextual_properties(&self) -> &Properties {
        &self.contextual_properties
    }

    /// Ids that were generated at construction rather than supplied by the caller.
    ///
    /// Correlation resolution treats these as defaults instead of pre-existing values.
    pub(crate) fn provisional_ids(&self) -> Vec<(String, String)> {
        let mut ids = Vec::new();
        if self.generated_correlation_id {
            ids.push((CORRELATION_KEY.to_owned(), self.correlation_id.clone()));
        }
        if self.generated_transaction_id {
            ids.push((TRANSACTION_KEY.to_owned(), self.transaction_id.clone()));
        }
        ids
    }

    /// Takes over the typed ids of `other`, including whether they were generated.
    ///
    /// Properties are left alone.
    pub(crate) fn adopt_tracking_ids(&mut self, other: &Self) {
        self.correlation_id.clone_from(&other.correlation_id);
        self.transaction_id.clone_from(&other.transaction_id);
        self.tracking_id.clone_from(&other.tracking_id);
        self.source.clone_from(&other.source);
        self.user_id.clone_from(&other.user_id);
        self.generated_correlation_id = other.generated_correlation_id;
        self.generated_transaction_id = other.generated_transaction_id;
    }

    /// Copies resolved tracking values back into the typed fields.
    pub(crate) fn sync_tracking_ids(
        &mut self,
        correlation_key: &str,
        transaction_key: &str,
        user_key: &str,
    ) {
        if let Some(id) = self.properties.get_non_blank(correlation_key) {
            self.correlation_id = id.to_owned();
            self.generated_correlation_id = false;
        }
        if let Some(id) = self.properties.get_non_blank(transaction_key) {
            self.transaction_id = id.to_owned();
            self.generated_transaction_id = false;
        }
        if let Some(user) = self.properties.get_non_blank(user_key) {
            self.user_id = user.to_owned();
        }
    }

    pub(crate) const fn is_trimmed(&self) -> bool {
        self.trimmed
    }

    pub(crate) const fn mark_trimmed(&mut self) {
        self.trimmed = true;
    }
}

/// Access to the shared record of a telemetry kind.
pub trait Contextual {
    fn base(&self) -> &LogContext;

    fn base_mut(&mut self) -> &mut LogContext;
}

macro_rules! impl_contextual {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Contextual for $ty {
                fn base(&self) -> &LogContext {
                    &self.base
                }

                fn base_mut(&mut self) -> &mut LogContext {
                    &mut self.base
                }
            }
        )*
    };
}

impl_contextual!(
    MessageContext,
    ExceptionContext,
    EventContext,
    MetricContext,
    PerformanceContext,
    DependencyContext,
);

/// A trace message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub base: LogContext,
    pub message: String,
}

impl MessageContext {
    /// Creates a verbose message with generated tracking ids.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with(message, Severity::Verbose, TrackingIds::default())
    }

    pub fn with(message: impl Into<String>, severity: Severity, ids: TrackingIds) -> Self {
        Self {
            base: LogContext::new(severity, ids),
            message: message.into(),
        }
    }
}

/// Kind of a [`TelemetryContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Message,
    Exception,
    Event,
    Metric,
    Performance,
    Dependency,
}

/// Any telemetry context, dispatched by kind.
#[derive(Debug, Clone)]
pub enum TelemetryContext {
    Message(MessageContext),
    Exception(ExceptionContext),
    Event(EventContext),
    Metric(MetricContext),
    Performance(PerformanceContext),
    Dependency(DependencyContext),
}

impl TelemetryContext {
    #[must_use]
    pub const fn kind(&self) -> ContextKind {
        match self {
            Self::Message(_) => ContextKind::Message,
            Self::Exception(_) => ContextKind::Exception,
            Self::Event(_) => ContextKind::Event,
            Self::Metric(_) => ContextKind::Metric,
            Self::Performance(_) => ContextKind::Performance,
            Self::Dependency(_) => ContextKind::Dependency,
        }
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.base().severity
    }
}

impl Contextual for TelemetryContext {
    fn base(&self) -> &LogContext {
        match self {
            Self::Message(context) => context.base(),
            Self::Exception(context) => context.base(),
            Self::Event(context) => context.base(),
            Self::Metric(context) => context.base(),
            Self::Performance(context) => context.base(),
            Self::Dependency(context) => context.base(),
        }
    }

    fn base_mut(&mut self) -> &mut LogContext {
        match self {
            Self::Message(context) => context.base_mut(),
            Self::Exception(context) => context.base_mut(),
            Self::Event(context) => context.base_mut(),
            Self::Metric(context) => context.base_mut(),
            Self::Performance(context) => context.base_mut(),
            Self::Dependency(context) => context.base_mut(),
        }
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for TelemetryContext {
                fn from(context: $ty) -> Self {
                    Self::$variant(context)
                }
            }
        )*
    };
}

impl_from_variant!(
    Message => MessageContext,
    Exception => ExceptionContext,
    Event => EventContext,
    Metric => MetricContext,
    Performance => PerformanceContext,
    Dependency => DependencyContext,
);
