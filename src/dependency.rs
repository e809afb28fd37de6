//! Outbound dependency calls and their lifecycle.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{
    ErrorRecord, ExceptionContext, LogContext, PerformanceContext, PropertyValue, Severity,
    TrackingIds, context::Contextual,
};

pub const REDACTED: &str = "**REDACTED**";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyType {
    Http,
    Cache,
    Database,
    Rpc,
    Other(String),
}

impl DependencyType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http => "HTTP",
            Self::Cache => "Cache",
            Self::Database => "Database",
            Self::Rpc => "RPC",
            Self::Other(kind) => kind,
        }
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request or response parameter of a dependency call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyParameter {
    pub name: String,
    pub kind: String,
    pub value: String,
    pub is_sensitive: bool,
}

impl DependencyParameter {
    /// The `{kind}:{name}` property, redacted when sensitive.
    #[must_use]
    pub fn to_property(&self) -> (String, String) {
        let value = if self.is_sensitive {
            REDACTED.to_owned()
        } else {
            self.value.clone()
        };
        (format!("{}:{}", self.kind, self.name), value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    InProgress,
    Completed,
    Failed,
}

/// Structured description of a dependency, see [`DependencyContext::from_metadata`].
#[derive(Debug, Clone)]
pub struct DependencyMetadata {
    pub dependency_name: String,
    pub target_system_name: String,
    pub dependency_type: DependencyType,
    pub request_details: String,
    pub should_log_performance: bool,
}

/// A call to an external system, tracked from start to completion or failure.
///
/// The context starts in progress with its timers running. The first call to
/// [`complete`](Self::complete) or one of the `fail` methods settles it; later
/// calls leave the timing untouched.
#[derive(Debug, Clone)]
pub struct DependencyContext {
    pub base: LogContext,
    pub dependency_name: String,
    pub target_system_name: String,
    pub dependency_type: DependencyType,
    pub request_details: String,
    request_parameters: Vec<DependencyParameter>,
    response_parameters: Vec<DependencyParameter>,
    pub response_code: Option<String>,
    pub response_message: Option<String>,
    pub response_error: Option<ErrorRecord>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub time_taken: Duration,
    state: DependencyState,
    should_log_performance: bool,
    performance: PerformanceContext,
}

impl DependencyContext {
    pub fn new(
        dependency_name: impl Into<String>,
        target_system_name: impl Into<String>,
        dependency_type: DependencyType,
        request_details: impl Into<String>,
    ) -> Self {
        Self::with(
            dependency_name,
            target_system_name,
            dependency_type,
            request_details,
            true,
            TrackingIds::default(),
        )
    }

    pub fn with(
        dependency_name: impl Into<String>,
        target_system_name: impl Into<String>,
        dependency_type: DependencyType,
        request_details: impl Into<String>,
        should_log_performance: bool,
        ids: TrackingIds,
    ) -> Self {
        let target_system_name = target_system_name.into();
        let base = LogContext::new(Severity::Information, ids);
        let mut performance = PerformanceContext::new(target_system_name.clone());
        performance.base.adopt_tracking_ids(&base);
        performance.base.add_properties(base.properties().iter().cloned(), true);
        Self {
            start_time: performance.start_time,
            base,
            dependency_name: dependency_name.into(),
            target_system_name,
            dependency_type,
            request_details: request_details.into(),
            request_parameters: Vec::new(),
            response_parameters: Vec::new(),
            response_code: None,
            response_message: None,
            response_error: None,
            end_time: None,
            time_taken: Duration::ZERO,
            state: DependencyState::InProgress,
            should_log_performance,
            performance,
        }
    }

    pub fn from_metadata(metadata: DependencyMetadata) -> Self {
        Self::with(
            metadata.dependency_name,
            metadata.target_system_name,
            metadata.dependency_type,
            metadata.request_details,
            metadata.should_log_performance,
            TrackingIds::default(),
        )
    }

    #[must_use]
    pub const fn state(&self) -> DependencyState {
        self.state
    }

    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self.state, DependencyState::InProgress)
    }

    #[must_use]
    pub const fn is_successful(&self) -> bool {
        matches!(self.state, DependencyState::Completed)
    }

    pub fn add_request_parameter(
        &mut self,
        name: impl Into<String>,
        kind: impl Into<String>,
        value: impl Into<PropertyValue>,
        is_sensitive: bool,
    ) {
        self.request_parameters.push(DependencyParameter {
            name: name.into(),
            kind: kind.into(),
            value: value.into().render(),
            is_sensitive,
        });
    }

    pub fn add_response_parameter(
        &mut self,
        name: impl Into<String>,
        kind: impl Into<String>,
        value: impl Into<PropertyValue>,
        is_sensitive: bool,
    ) {
        self.response_parameters.push(DependencyParameter {
            name: name.into(),
            kind: kind.into(),
            value: value.into().render(),
            is_sensitive,
        });
    }

    #[must_use]
    pub fn request_parameters(&self) -> &[DependencyParameter] {
        &self.request_parameters
    }

    #[must_use]
    pub fn response_parameters(&self) -> &[DependencyParameter] {
        &self.response_parameters
    }

    /// Moves an in-progress call to `state`, stamping its timing. Returns `false`
    /// if the call was already settled.
    fn settle(&mut self, state: DependencyState) -> bool {
        if !self.is_in_progress() {
            return false;
        }
        self.performance.stop();
        let end_time = self.performance.end_time;
        self.end_time = Some(end_time);
        self.time_taken = (end_time - self.start_time).to_std().unwrap_or(Duration::ZERO);
        self.state = state;
        true
    }

    /// Marks the call as successful.
    pub fn complete(&mut self) {
        if self.settle(DependencyState::Completed) {
            log::trace!(
                target: "telemetry_context::dependency",
                "dependency {} completed in {:?}",
                self.dependency_name,
                self.time_taken
            );
        }
    }

    /// Marks the call as successful and records the response.
    ///
    /// The response fields are written even if the call was already settled.
    pub fn complete_with(&mut self, response_code: impl Into<String>, response_message: impl Into<String>) {
        self.complete();
        self.response_code = Some(response_code.into());
        self.response_message = Some(response_message.into());
    }

    /// Marks the call as failed with the error it returned.
    pub fn fail(&mut self, error: ErrorRecord, response_code: impl Into<String>) {
        if self.settle(DependencyState::Failed) {
            self.response_message = Some(error.to_string());
            self.response_error = Some(error);
            self.response_code = Some(response_code.into());
        }
    }

    /// Marks the call as failed, synthesizing the error from the response message.
    pub fn fail_with(&mut self, response_code: impl Into<String>, response_message: impl Into<String>) {
        let response_message = response_message.into();
        self.fail(ErrorRecord::new(response_message.clone()), response_code);
    }

    /// Writes the call details into the property map right before emission.
    pub fn create_additional_properties(&mut self) {
        let is_successful = self.is_successful();
        let properties = self.base.properties_mut();
        properties.insert("Custom", "True");
        properties.extend(self.request_parameters.iter().map(DependencyParameter::to_property), true);
        properties.insert(
            "StartedOn",
            self.start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        if let Some(end_time) = self.end_time {
            properties.insert("CompletedOn", end_time.to_rfc3339_opts(SecondsFormat::Millis, true));
            properties.insert("TimeTaken", (self.time_taken.as_secs_f64() * 1000.0).to_string());
        }
        properties.insert("IsSuccessful", if is_successful { "True" } else { "False" });
        properties.insert("ResponseCode", self.response_code.clone().unwrap_or_default());
        properties.extend(self.response_parameters.iter().map(DependencyParameter::to_property), true);
        properties.insert("ResponseMessage", self.response_message.clone().unwrap_or_default());
    }

    /// The exception to report alongside a failed call.
    #[must_use]
    pub fn exception_context(&self) -> Option<ExceptionContext> {
        if self.state != DependencyState::Failed {
            return None;
        }
        let error = self
            .response_error
            .clone()
            .unwrap_or_else(|| ErrorRecord::new(self.response_message.clone().unwrap_or_default()));
        let mut exception = ExceptionContext::with(error, Severity::Error, self.tracking_ids());
        self.copy_details_into(exception.base_mut());
        Some(exception)
    }

    /// The timing metric of the call, when performance logging was requested.
    #[must_use]
    pub fn performance_context(&self) -> Option<PerformanceContext> {
        if !self.should_log_performance {
            return None;
        }
        let mut performance = self.performance.clone();
        if performance.metric_name.trim().is_empty() {
            performance.metric_name.clone_from(&self.target_system_name);
        }
        self.copy_details_into(performance.base_mut());
        Some(performance)
    }

    fn tracking_ids(&self) -> TrackingIds {
        TrackingIds {
            correlation_id: Some(self.base.correlation_id.clone()),
            transaction_id: Some(self.base.transaction_id.clone()),
            tracking_id: Some(self.base.tracking_id.clone()),
            source: Some(self.base.source.clone()),
            user_id: Some(self.base.user_id.clone()),
        }
    }

    fn copy_details_into(&self, target: &mut LogContext) {
        target.adopt_tracking_ids(&self.base);
        target.add_properties(self.base.properties().iter().cloned(), true);
        target.add_contextual_properties(self.base.contextual_properties().iter().cloned());
        target.add_property("DependencyName", self.dependency_name.as_str());
        target.add_property("TargetSystemName", self.target_system_name.as_str());
    }
}
