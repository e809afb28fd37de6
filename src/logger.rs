//! The logger façade running every context through the enrichment pipeline.

use std::sync::Arc;

use crate::{
    AmbientScope, AppError, BackgroundRegistry, ContextPropertyBuilder, EnrichmentStage,
    EnrichmentWarning, ErrorRecord, EventContext, ExceptionContext, ExcludedRequestFilter,
    MessageContext, MetricContext, Properties, RequestAccessor, RequestSource, RequestTelemetry,
    Severity, Telemetry, TelemetryConfig, TelemetryContext, TelemetryError, TelemetrySink,
    TrackingIds, TrackingResolver,
    context::Contextual,
    sink::ExceptionTelemetry,
    trim::trim,
};

const LOGGER_TARGET: &str = "telemetry_context::logger";

type CurrentRequest = Result<Option<Arc<dyn RequestSource>>, TelemetryError>;

/// Enriches telemetry contexts and forwards them to a [`TelemetrySink`].
///
/// Every context goes through the same pipeline:
///
/// 1. contexts emitted while an excluded request is served are dropped;
/// 2. contexts below the configured `log_level` are dropped;
/// 3. dependency calls materialize their details as properties;
/// 4. tracking ids are resolved from the context, the current request and the
///    background registry;
/// 5. oversized properties and exception chains are trimmed;
/// 6. contextual properties are read from the current request;
/// 7. the context is mapped to a [`Telemetry`] item and tracked.
///
/// Nothing here fails the caller. Enrichment failures are recorded as marker
/// properties on the emitted item. A failing sink receives a fallback exception
/// report instead, and if that fails too the error is written to stderr.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use telemetry_context::{InMemorySink, Severity, TelemetryConfig, TelemetryLogger};
///
/// let sink = Arc::new(InMemorySink::new());
/// let logger = TelemetryLogger::builder(TelemetryConfig::default(), sink.clone()).build();
///
/// logger.log_message("Order accepted", Severity::Information);
///
/// let items = sink.items();
/// assert_eq!(items.len(), 1);
/// assert!(items[0].properties().get("XCV").is_some());
/// ```
pub struct TelemetryLogger {
    config: Arc<TelemetryConfig>,
    sink: Arc<dyn TelemetrySink>,
    resolver: TrackingResolver,
    request_accessor: Arc<dyn RequestAccessor>,
    excluded_requests: ExcludedRequestFilter,
}

/// Builder of a [`TelemetryLogger`], see [`TelemetryLogger::builder`].
pub struct TelemetryLoggerBuilder {
    config: TelemetryConfig,
    sink: Arc<dyn TelemetrySink>,
    registry: Option<Arc<BackgroundRegistry>>,
    request_accessor: Option<Arc<dyn RequestAccessor>>,
}

impl TelemetryLoggerBuilder {
    /// Shares a background registry with the rest of the application.
    ///
    /// A private, empty registry is used otherwise.
    #[must_use]
    pub fn registry(mut self, registry: Arc<BackgroundRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the [`AmbientScope`] as the source of the current request.
    #[must_use]
    pub fn request_accessor(mut self, accessor: Arc<dyn RequestAccessor>) -> Self {
        self.request_accessor = Some(accessor);
        self
    }

    #[must_use]
    pub fn build(self) -> TelemetryLogger {
        let config = Arc::new(self.config);
        let registry = self.registry.unwrap_or_default();
        TelemetryLogger {
            resolver: TrackingResolver::new(Arc::clone(&config), registry),
            excluded_requests: ExcludedRequestFilter::new(&config),
            request_accessor: self.request_accessor.unwrap_or_else(|| Arc::new(AmbientScope)),
            sink: self.sink,
            config,
        }
    }
}

impl std::fmt::Debug for TelemetryLoggerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryLoggerBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TelemetryLogger {
    pub fn builder(config: TelemetryConfig, sink: Arc<dyn TelemetrySink>) -> TelemetryLoggerBuilder {
        TelemetryLoggerBuilder {
            config,
            sink,
            registry: None,
            request_accessor: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// The registry consulted for background tracking ids.
    #[must_use]
    pub fn registry(&self) -> &Arc<BackgroundRegistry> {
        self.resolver.registry()
    }

    /// Emits a context of any kind.
    pub fn log(&self, context: impl Into<TelemetryContext>) {
        let request = self.current_request();
        if self.is_excluded(&request) {
            return;
        }
        self.dispatch(context.into(), &request);
    }

    /// Emits a trace message with generated tracking ids.
    pub fn log_message(&self, message: impl Into<String>, severity: Severity) {
        self.log(MessageContext::with(message, severity, TrackingIds::default()));
    }

    /// Emits an error and its source chain as exception telemetry.
    pub fn log_error(&self, error: &(dyn std::error::Error + 'static), ids: TrackingIds) {
        self.log(ExceptionContext::from_error(error, ids));
    }

    /// Emits an application error with the tracking metadata it carries.
    ///
    /// When the error asks for it, a count metric named after the error is
    /// emitted as well.
    pub fn log_app_error(&self, error: &dyn AppError, user_id: Option<&str>, end_to_end_id: Option<&str>) {
        let mut context = error.create_log_context();
        context.base.add_tracking_ids(None, None, end_to_end_id);
        if let Some(user_id) = user_id.filter(|user_id| !user_id.trim().is_empty()) {
            context.base.add_user_id(user_id);
        }
        self.log(context);

        if error.log_exception_metric() {
            let ids = TrackingIds {
                correlation_id: error.correlation_id().map(str::to_owned),
                transaction_id: error.transaction_id().map(str::to_owned),
                tracking_id: end_to_end_id.map(str::to_owned),
                source: Some(error.origin().to_owned()),
                user_id: user_id.map(str::to_owned),
            };
            self.log(MetricContext::with(error.name(), 1.0, ids));
        }
    }

    /// Emits an event with extra properties, overriding existing ones.
    pub fn log_event_with<I, K, V>(&self, mut event: EventContext, additional_properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        event.base.add_properties(additional_properties, true);
        self.log(event);
    }

    /// Emits request telemetry with resolved tracking ids.
    ///
    /// Client errors are reported as successful when
    /// `client_side_error_suppression_enabled` is set. With
    /// `request_telemetry_enhanced` the request headers, request line, response
    /// headers and recorded bodies are copied into the properties as well.
    pub fn track_request(&self, mut telemetry: RequestTelemetry) {
        let request = self.current_request();
        if self.is_excluded(&request) {
            return;
        }
        if self.config.client_side_error_suppression_enabled {
            telemetry.suppress_client_error();
        }

        let source = request_source(&request, &mut telemetry.properties);
        if self.config.response_code_translation_enabled {
            telemetry.add_response_code_description();
        }
        let enhanced = self.config.request_telemetry_enhanced;
        if enhanced {
            if let Some(source) = source {
                telemetry.add_request_properties(source, &self.config.redacted_headers);
            }
            telemetry.add_response_properties();
        }
        telemetry.attach_bodies(
            enhanced && self.config.request_body_tracking_enabled,
            enhanced && self.config.response_body_tracking_enabled,
        );

        let resolution = self.resolver.resolve(&mut telemetry.properties, source);
        report_warnings(&resolution.warnings);
        self.track(Telemetry::Request(telemetry));
    }

    /// Runs the enrichment steps on `context` without emitting it.
    ///
    /// The warnings are also recorded as marker properties on the context.
    pub fn enrich(&self, context: TelemetryContext) -> (TelemetryContext, Vec<EnrichmentWarning>) {
        self.enrich_with(context, &self.current_request())
    }

    fn current_request(&self) -> CurrentRequest {
        self.request_accessor.current_request()
    }

    fn is_excluded(&self, request: &CurrentRequest) -> bool {
        let excluded = matches!(request, Ok(Some(request)) if self.excluded_requests.is_excluded(&**request));
        if excluded {
            log::trace!(target: LOGGER_TARGET, "dropping telemetry of an excluded request");
        }
        excluded
    }

    fn dispatch(&self, context: TelemetryContext, request: &CurrentRequest) {
        if context.severity() < self.config.log_level {
            log::trace!(
                target: LOGGER_TARGET,
                "dropping {:?} below {}",
                context.kind(),
                self.config.log_level
            );
            return;
        }

        let (context, warnings) = self.enrich_with(context, request);
        report_warnings(&warnings);

        let side_products = match &context {
            TelemetryContext::Dependency(dependency) => [
                dependency.exception_context().map(TelemetryContext::from),
                dependency.performance_context().map(TelemetryContext::from),
            ],
            _ => [None, None],
        };
        self.track(Telemetry::from(context));
        for side_product in side_products.into_iter().flatten() {
            self.dispatch(side_product, request);
        }
    }

    fn enrich_with(
        &self,
        mut context: TelemetryContext,
        request: &CurrentRequest,
    ) -> (TelemetryContext, Vec<EnrichmentWarning>) {
        let mut warnings = Vec::new();
        if let TelemetryContext::Dependency(dependency) = &mut context {
            dependency.create_additional_properties();
        }

        let base = context.base_mut();
        let source = match request {
            Ok(request) => request.as_deref(),
            Err(err) => {
                let warning = EnrichmentWarning::new(EnrichmentStage::Tracking, err);
                base.add_property(EnrichmentStage::Tracking.marker_key(), warning.detail.as_str());
                warnings.push(warning);
                None
            }
        };

        let provisional = base.provisional_ids();
        let resolution = self
            .resolver
            .resolve_with_provisional(base.properties_mut(), source, &provisional);
        let keys = &self.config.tracking;
        base.sync_tracking_ids(
            &keys.correlation_id_property,
            &keys.transaction_id_property,
            &keys.user_property,
        );
        warnings.extend(resolution.warnings);

        warnings.extend(trim(&mut context, &self.config.trimming()));

        let base = context.base_mut();
        if !base.contextual_properties().is_empty() {
            if let Err(err) = request {
                let warning = EnrichmentWarning::new(EnrichmentStage::ContextualProperties, err);
                base.add_property(
                    EnrichmentStage::ContextualProperties.marker_key(),
                    warning.detail.as_str(),
                );
                warnings.push(warning);
            }
            let resolved = ContextPropertyBuilder::build(base.contextual_properties(), source);
            base.add_properties(resolved, true);
        }

        (context, warnings)
    }

    fn track(&self, telemetry: Telemetry) {
        let Err(err) = self.sink.track(telemetry) else {
            return;
        };
        log::warn!(target: LOGGER_TARGET, "telemetry sink failed, sending fallback report: {err}");

        let fallback = Telemetry::Exception(ExceptionTelemetry {
            error: ErrorRecord::new(err.to_string()).with_type_name("TelemetryError"),
            severity: Severity::Error,
            properties: Properties::new(),
        });
        if self.sink.track(fallback).is_err() {
            // The bridge may be the installed logger, so `log` is not used here.
            eprintln!("UNHANDLED EXCEPTION IN TELEMETRY: {err}");
        }
    }
}

/// The current request, recording a failed lookup on `properties`.
fn request_source<'a>(request: &'a CurrentRequest, properties: &mut Properties) -> Option<&'a dyn RequestSource> {
    match request {
        Ok(request) => request.as_deref(),
        Err(err) => {
            properties.insert(EnrichmentStage::Tracking.marker_key(), err.to_string());
            None
        }
    }
}

fn report_warnings(warnings: &[EnrichmentWarning]) {
    for warning in warnings {
        log::debug!(target: LOGGER_TARGET, "telemetry enrichment degraded: {warning}");
    }
}

impl std::fmt::Debug for TelemetryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryLogger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
