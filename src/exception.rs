//! Exception contexts and the owned error record they carry.

use serde::Serialize;

use crate::{LogContext, Severity, TrackingIds};

pub const DEFAULT_DEBUG_HINT: &str = "No debug hints are available";

/// An owned, serializable error with an optional chain of causes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub type_name: String,
    pub message: String,
    /// Component the error originated from.
    pub source: Option<String>,
    pub stack_trace: Option<String>,
    pub help_link: Option<String>,
    pub cause: Option<Box<ErrorRecord>>,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            type_name: "Error".to_owned(),
            message: message.into(),
            source: None,
            stack_trace: None,
            help_link: None,
            cause: None,
        }
    }

    /// Captures an error and its whole `source()` chain.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut messages = Vec::new();
        let mut current = Some(error);
        while let Some(error) = current {
            messages.push(error.to_string());
            current = error.source();
        }
        // Fold from the innermost cause outwards.
        messages
            .into_iter()
            .rev()
            .fold(None, |cause, message| {
                let mut record = Self::new(message);
                record.cause = cause.map(Box::new);
                Some(record)
            })
            .unwrap_or_else(|| Self::new(String::new()))
    }

    /// Same as [`ErrorRecord::from_error`], naming the outermost record after `E`.
    pub fn from_typed<E>(error: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut record = Self::from_error(error);
        record.type_name = std::any::type_name::<E>().to_owned();
        record
    }

    #[must_use]
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    #[must_use]
    pub fn with_help_link(mut self, help_link: impl Into<String>) -> Self {
        self.help_link = Some(help_link.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Self) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Iterates over this record and its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |record| record.cause.as_deref())
    }

    /// Number of records in the chain, including this one.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.chain().count()
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ErrorRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// An error to be reported as exception telemetry.
#[derive(Debug, Clone)]
pub struct ExceptionContext {
    pub base: LogContext,
    pub error: ErrorRecord,
    /// Trims the error chain even when the configuration does not.
    pub exception_trimming_enabled: bool,
}

impl ExceptionContext {
    /// Creates an error-level context with generated tracking ids.
    pub fn new(error: ErrorRecord) -> Self {
        Self::with(error, Severity::Error, TrackingIds::default())
    }

    pub fn with(error: ErrorRecord, severity: Severity, ids: TrackingIds) -> Self {
        Self {
            base: LogContext::new(severity, ids),
            error,
            exception_trimming_enabled: false,
        }
    }

    pub fn from_error(error: &(dyn std::error::Error + 'static), ids: TrackingIds) -> Self {
        Self::with(ErrorRecord::from_error(error), Severity::Error, ids)
    }
}

/// An application error carrying its own tracking metadata.
///
/// Implementors only need [`name`](AppError::name) and [`kind`](AppError::kind);
/// every other method has a default.
pub trait AppError: std::error::Error {
    fn name(&self) -> &str;

    /// Broad category such as `General`, `Domain` or `Infrastructure`.
    fn kind(&self) -> &str;

    fn correlation_id(&self) -> Option<&str> {
        None
    }

    fn transaction_id(&self) -> Option<&str> {
        None
    }

    fn code(&self) -> &str {
        ""
    }

    fn origin(&self) -> &str {
        ""
    }

    fn debug_hint(&self) -> &str {
        DEFAULT_DEBUG_HINT
    }

    /// Whether a count metric named after the error is emitted alongside it.
    fn log_exception_metric(&self) -> bool {
        false
    }

    fn create_log_context(&self) -> ExceptionContext {
        let mut error = ErrorRecord::new(self.to_string())
            .with_type_name(self.name())
            .with_source(self.origin());
        error.cause = self.source().map(|cause| Box::new(ErrorRecord::from_error(cause)));

        let ids = TrackingIds {
            correlation_id: self.correlation_id().map(str::to_owned),
            transaction_id: self.transaction_id().map(str::to_owned),
            source: Some(self.origin().to_owned()),
            ..TrackingIds::default()
        };
        let mut context = ExceptionContext::with(error, Severity::Error, ids);
        context.base.add_property("Exception Type", self.name());
        context.base.add_property("Exception Code", self.code());
        context.base.add_property("Exception Source", self.origin());
        context.base.add_property("Debug Hint", self.debug_hint());
        context
    }
}
