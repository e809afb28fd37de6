//! # Overview
//!
#![doc = include_utils::include_md!("README.md:description")]
//!
//! Every telemetry item passes through the same enrichment pipeline before it
//! reaches a sink:
//!
//! - Correlation, transaction and business tracking ids are resolved from the
//!   item itself, the inbound request and the background registry.
//! - Oversized properties are split into numbered chunks and deep exception
//!   chains are cut down to a configured depth.
//! - Contextual properties are read from the inbound request.
//!
//! The current execution and the inbound request are carried by a
//! [`TelemetryScope`], which follows async tasks across executor threads via
//! [`FutureExt::in_telemetry_scope`]. Records of the standard [`log`] facade can
//! be routed into the same pipeline with [`TelemetryLog`].
//!
//! ## Basic example
//!
#![doc = include_utils::include_md!("README.md:basic_example")]
//!
//! ## Background work
//!
#![doc = include_utils::include_md!("README.md:background_example")]

pub use self::{
    background::{
        BackgroundDetails, BackgroundGuard, BackgroundRegistry, ContextDetails,
        ExecutionContextProvider, ExecutionId,
    },
    config::{NOT_AVAILABLE, TelemetryConfig, TrackingKeys, TrimmingConfig},
    context::{
        ContextKind, Contextual, LogContext, MessageContext, TelemetryContext, TrackingIds,
    },
    dependency::{
        DependencyContext, DependencyMetadata, DependencyParameter, DependencyState,
        DependencyType,
    },
    error::{EnrichmentStage, EnrichmentWarning, Result, TelemetryError},
    event::{EventContext, EventMetadata},
    exception::{AppError, ErrorRecord, ExceptionContext},
    future::FutureExt,
    logger::{TelemetryLogger, TelemetryLoggerBuilder},
    metric::{MetricContext, PerformanceContext},
    properties::Properties,
    request::{
        ContextPropertyBuilder, ExcludedRequestFilter, Principal, RequestAccessor,
        RequestSnapshot, RequestSource,
    },
    scope::{AmbientScope, TelemetryScope},
    severity::Severity,
    sink::{InMemorySink, LogSink, RequestTelemetry, Telemetry, TelemetrySink},
    tracking::{Resolution, TrackingResolver},
    value::PropertyValue,
};

mod background;
mod config;
pub mod context;
mod dependency;
mod error;
mod event;
mod exception;
pub mod future;
pub mod guard;
mod logger;
mod metric;
mod properties;
mod request;
mod scope;
mod severity;
pub mod sink;
mod stack;
pub mod tracking;
pub mod trim;
mod value;

/// Target prefix of the records this crate emits about itself.
const INTERNAL_TARGET: &str = "telemetry_context";

/// A [`log::Log`] implementation that routes log records into a [`TelemetryLogger`].
///
/// Each record becomes a [`MessageContext`]: the formatted arguments are the
/// message, the record target is the source and the structured key-values are
/// added as properties. The record then goes through the same enrichment
/// pipeline as any other context.
///
/// Records emitted by this crate itself are never forwarded.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use log::{LevelFilter, info};
/// use telemetry_context::{InMemorySink, TelemetryConfig, TelemetryLog, TelemetryLogger};
///
/// let sink = Arc::new(InMemorySink::new());
/// let logger = TelemetryLogger::builder(TelemetryConfig::default(), sink.clone()).build();
/// TelemetryLog::new(logger).init(LevelFilter::Info);
///
/// info!(order_id = 42; "Order accepted");
///
/// let items = sink.items();
/// assert_eq!(items.len(), 1);
/// assert_eq!(items[0].properties().get("order_id"), Some("42"));
/// ```
#[derive(Debug)]
pub struct TelemetryLog {
    logger: TelemetryLogger,
}

impl TelemetryLog {
    #[must_use]
    pub const fn new(logger: TelemetryLogger) -> Self {
        Self { logger }
    }

    /// Initializes the global logger with this bridge.
    ///
    /// This should be called early in the execution of a Rust program. Any log
    /// events that occur before initialization will be ignored.
    ///
    /// # Panics
    ///
    /// Panics if a logger has already been set.
    pub fn init(self, max_level: log::LevelFilter) {
        self.try_init(max_level)
            .expect("TelemetryLog::init should not be called after logger initialization");
    }

    /// Initializes the global logger with this bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if a logger has already been set.
    pub fn try_init(self, max_level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_max_level(max_level);
        log::set_boxed_logger(Box::new(self))
    }

    fn to_context(record: &log::Record<'_>) -> MessageContext {
        let mut context = MessageContext::with(
            record.args().to_string(),
            Severity::from_log_level(record.level()),
            TrackingIds::new().source(record.target()),
        );

        let mut visitor = RecordProperties(&mut context.base);
        if let Err(err) = record.key_values().visit(&mut visitor) {
            // Logging through `log` here would recurse into this bridge.
            eprintln!("Error reading log record key-values: {err}");
        }
        context
    }
}

impl log::Log for TelemetryLog {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        !metadata.target().starts_with(INTERNAL_TARGET)
            && Severity::from_log_level(metadata.level()) >= self.logger.config().log_level
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.logger.log(Self::to_context(record));
    }

    fn flush(&self) {}
}

struct RecordProperties<'a>(&'a mut LogContext);

impl<'kvs> log::kv::VisitSource<'kvs> for RecordProperties<'_> {
    fn visit_pair(
        &mut self,
        key: log::kv::Key<'kvs>,
        value: log::kv::Value<'kvs>,
    ) -> Result<(), log::kv::Error> {
        self.0.add_property(key.as_str(), value.to_string());
        Ok(())
    }
}
