use std::collections::BTreeMap;

use crate::{LogContext, Properties, Severity, TrackingIds, config::NOT_AVAILABLE};

/// A custom event with optional numeric measurements.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub base: LogContext,
    pub event_name: String,
    metrics: Vec<(String, f64)>,
    pub is_business_event: bool,
    business_properties: Properties,
}

impl EventContext {
    pub fn new(event_name: impl Into<String>) -> Self {
        Self::with(
            event_name,
            TrackingIds::new().source("Default").tracking_id(NOT_AVAILABLE),
        )
    }

    pub fn with(event_name: impl Into<String>, ids: TrackingIds) -> Self {
        Self {
            base: LogContext::new(Severity::Metric, ids),
            event_name: event_name.into(),
            metrics: Vec::new(),
            is_business_event: false,
            business_properties: Properties::new(),
        }
    }

    /// Builds an event named `{object}.{action}[.{context}]`.
    pub fn from_metadata(metadata: EventMetadata) -> Self {
        let mut event_name = format!("{}.{}", metadata.object, metadata.action);
        if let Some(context) = metadata.context.filter(|c| !c.trim().is_empty()) {
            event_name.push('.');
            event_name.push_str(&context);
        }

        let mut event = Self::with(event_name, TrackingIds::default());
        if let Some(subject) = metadata.subject.filter(|s| !s.trim().is_empty()) {
            event.base.add_property("Subject", subject);
        }
        if let Some(description) = metadata.description.filter(|d| !d.trim().is_empty()) {
            event.base.add_property("Description", description);
        }
        event.base.add_properties(metadata.static_properties, true);
        event.base.add_contextual_properties(metadata.contextual_properties);
        event
    }

    /// Adds a metric, keeping an existing value with the same name.
    pub fn add_metric(&mut self, name: impl Into<String>, value: f64) -> bool {
        self.add_metric_with(name, value, false)
    }

    pub fn add_metric_with(&mut self, name: impl Into<String>, value: f64, override_previous: bool) -> bool {
        let name = name.into();
        match self.metrics.iter_mut().find(|(existing, _)| *existing == name) {
            Some(metric) if override_previous => {
                metric.1 = value;
                true
            }
            Some(_) => false,
            None => {
                self.metrics.push((name, value));
                true
            }
        }
    }

    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| *value)
    }

    #[must_use]
    pub fn metrics(&self) -> &[(String, f64)] {
        &self.metrics
    }

    /// Flags the event as a business event and merges its business properties.
    pub fn mark_business_event<I, K, V>(&mut self, properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.is_business_event = true;
        self.business_properties.extend(properties, true);
    }

    #[must_use]
    pub const fn business_properties(&self) -> &Properties {
        &self.business_properties
    }
}

/// Structured description of an event, see [`EventContext::from_metadata`].
#[derive(Debug, Default, Clone)]
pub struct EventMetadata {
    pub object: String,
    pub action: String,
    pub context: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub static_properties: BTreeMap<String, String>,
    /// Property name to request key, resolved at emission.
    pub contextual_properties: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_metric_override_flag() {
        let mut event = EventContext::new("Cart.Checkout");
        assert!(event.add_metric("Items", 3.0));
        assert!(!event.add_metric("Items", 5.0));
        assert_eq!(event.metric("Items"), Some(3.0));

        assert!(event.add_metric_with("Items", 5.0, true));
        assert_eq!(event.metric("Items"), Some(5.0));
        assert_eq!(event.metrics().len(), 1);
    }

    #[test]
    fn test_event_defaults() {
        let event = EventContext::new("Cart.Checkout");
        assert_eq!(event.base.severity, Severity::Metric);
        assert_eq!(event.base.source, "Default");
        assert_eq!(event.base.tracking_id, NOT_AVAILABLE);
    }

    #[test]
    fn test_from_metadata() {
        let event = EventContext::from_metadata(EventMetadata {
            object: "Order".to_owned(),
            action: "Created".to_owned(),
            context: Some("Web".to_owned()),
            subject: Some("order-7".to_owned()),
            description: None,
            static_properties: BTreeMap::from([("Channel".to_owned(), "Online".to_owned())]),
            contextual_properties: BTreeMap::from([("Client".to_owned(), "x-client".to_owned())]),
        });

        assert_eq!(event.event_name, "Order.Created.Web");
        assert_eq!(event.base.properties().get("Subject"), Some("order-7"));
        assert!(!event.base.properties().contains_key("Description"));
        assert_eq!(event.base.properties().get("Channel"), Some("Online"));
        assert_eq!(event.base.contextual_properties().get("Client"), Some("x-client"));
    }

    #[test]
    fn test_business_event() {
        let mut event = EventContext::new("Invoice.Paid");
        event.mark_business_event([("Amount", "12.50")]);
        assert!(event.is_business_event);
        assert_eq!(event.business_properties().get("Amount"), Some("12.50"));
    }
}
