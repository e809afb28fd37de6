use std::sync::Arc;

use pretty_assertions::assert_eq;
use telemetry_context::{
    AmbientScope, AppError, BackgroundDetails, BackgroundRegistry, ErrorRecord, ExceptionContext,
    ExecutionContextProvider as _, FutureExt as _, MessageContext, Principal, RequestSnapshot, Severity, Telemetry,
    TelemetryConfig, TelemetryLogger, TelemetryScope, TrackingIds,
};

use crate::common::{FlakySink, config_from, recording_logger};

pub mod common;

#[test]
fn test_request_correlation_overrides_explicit_id() {
    let (logger, sink) = recording_logger(TelemetryConfig::default());
    let request = RequestSnapshot::new("GET", "/orders/17")
        .with_header("x-correlationid", "from-header")
        .with_principal(Principal::named("alice"))
        .into_source();

    let _guard = TelemetryScope::new().with_request(request).enter();
    logger.log(MessageContext::with(
        "loading",
        Severity::Information,
        TrackingIds::new().correlation_id("from-caller"),
    ));

    let items = sink.items();
    let properties = items[0].properties();
    assert_eq!(properties.get("XCV"), Some("from-header"));
    assert_eq!(properties.get("XCV:Alternate"), Some("from-caller"));
    assert_eq!(properties.get("LoggedInUserId"), Some("alice"));
    assert_eq!(properties.get("TenantId"), Some("N/A"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_work_recovers_inherited_ids() {
    let registry = Arc::new(BackgroundRegistry::new());
    let sink = Arc::new(telemetry_context::InMemorySink::new());
    let logger = Arc::new(
        TelemetryLogger::builder(TelemetryConfig::default(), sink.clone())
            .registry(Arc::clone(&registry))
            .build(),
    );

    let job = {
        let registry = Arc::clone(&registry);
        let logger = Arc::clone(&logger);
        async move {
            let guard = registry
                .enter(
                    &AmbientScope,
                    BackgroundDetails::new("job-42")
                        .transaction_id("tx-7")
                        .tenant_id("contoso")
                        .user_id("alice"),
                )
                .unwrap();
            tokio::task::yield_now().await;

            logger.log(MessageContext::with(
                "job resumed",
                Severity::Information,
                TrackingIds::new().correlation_id("job-42"),
            ));
            guard.details().executing_id
        }
        .in_telemetry_scope(TelemetryScope::new())
    };
    let executing_id = tokio::spawn(job).await.unwrap();

    assert!(registry.is_empty());
    assert_ne!(executing_id, AmbientScope.current_execution_id().unwrap());

    let items = sink.items();
    let properties = items[0].properties();
    assert_eq!(properties.get("MessageId"), Some("tx-7"));
    assert_eq!(properties.get("TenantId"), Some("contoso"));
    assert_eq!(properties.get("OriginalUserId"), Some("alice"));
    assert!(!properties.contains_key("MessageId:Alternate"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_keep_their_correlation() {
    let (logger, sink) = recording_logger(TelemetryConfig::default());
    let logger = Arc::new(logger);

    let tasks = (0..16)
        .map(|index| {
            let logger = Arc::clone(&logger);
            let request = RequestSnapshot::new("GET", format!("/items/{index}"))
                .with_header("x-correlationid", format!("req-{index}"))
                .into_source();
            tokio::spawn(
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(16 - index)).await;
                    logger.log_message(format!("req-{index}"), Severity::Information);
                }
                .in_telemetry_scope(TelemetryScope::new().with_request(request)),
            )
        })
        .collect::<Vec<_>>();
    for task in tasks {
        task.await.unwrap();
    }

    let items = sink.items();
    assert_eq!(items.len(), 16);
    for item in &items {
        let Telemetry::Trace(trace) = item else {
            panic!("expected a trace, got {item:?}");
        };
        assert_eq!(trace.properties.get("XCV"), Some(trace.message.as_str()));
    }
}

#[test]
fn test_exception_chain_is_trimmed() {
    let (logger, sink) = recording_logger(config_from(
        r#"{ "exceptionTrimmingEnabled": true, "maxExceptionDepth": 2 }"#,
    ));
    let error = ErrorRecord::new("checkout failed").with_cause(
        ErrorRecord::new("payment failed")
            .with_cause(ErrorRecord::new("gateway timeout").with_cause(ErrorRecord::new("socket closed"))),
    );
    logger.log(ExceptionContext::with(error, Severity::Error, TrackingIds::new()));

    let items = sink.items();
    let Telemetry::Exception(exception) = &items[0] else {
        panic!("expected an exception, got {:?}", items[0]);
    };
    assert_eq!(exception.error.depth(), 2);
    assert_eq!(exception.properties.get("Trimming"), Some("Enabled"));
    assert!(exception.properties.contains_key("ExceptionSource_2"));
    assert!(!exception.properties.contains_key("ExceptionSource_1"));
}

#[test]
fn test_oversized_property_is_split() {
    let (logger, sink) = recording_logger(config_from(
        r#"{ "propertySplittingEnabled": true, "maxMessageSize": 40, "maxPropertySize": 20 }"#,
    ));
    let mut message = MessageContext::new("payload");
    message.base.add_property("Body", "0123456789".repeat(5));
    logger.log(message);

    let items = sink.items();
    let properties = items[0].properties();
    assert_eq!(properties.get("Body"), None);
    assert_eq!(properties.get("Body_1"), Some("01234567890123456789"));
    assert_eq!(properties.get("Body_2"), Some("01234567890123456789"));
    assert_eq!(properties.get("Body_3"), Some("0123456789"));
    assert!(properties.contains_key("XCV"));
}

#[derive(Debug)]
struct PaymentDeclined;

impl std::fmt::Display for PaymentDeclined {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("the card was declined")
    }
}

impl std::error::Error for PaymentDeclined {}

impl AppError for PaymentDeclined {
    fn name(&self) -> &str {
        "PaymentDeclined"
    }

    fn kind(&self) -> &str {
        "Domain"
    }

    fn correlation_id(&self) -> Option<&str> {
        Some("pay-1")
    }

    fn code(&self) -> &str {
        "PAY-402"
    }

    fn log_exception_metric(&self) -> bool {
        true
    }
}

#[test]
fn test_app_error_emits_count_metric() {
    let (logger, sink) = recording_logger(TelemetryConfig::default());
    logger.log_app_error(&PaymentDeclined, Some("alice"), Some("e2e-9"));

    let items = sink.items();
    assert_eq!(items.len(), 2);
    let Telemetry::Exception(exception) = &items[0] else {
        panic!("expected an exception, got {:?}", items[0]);
    };
    assert_eq!(exception.error.message, "the card was declined");
    assert_eq!(exception.properties.get("Exception Code"), Some("PAY-402"));
    assert_eq!(exception.properties.get("XCV"), Some("pay-1"));

    let Telemetry::Metric(metric) = &items[1] else {
        panic!("expected a metric, got {:?}", items[1]);
    };
    assert_eq!(metric.name, "PaymentDeclined");
    assert!((metric.value - 1.0).abs() < f64::EPSILON);
    assert_eq!(metric.properties.get("XCV"), Some("pay-1"));
}

#[test]
fn test_sink_failure_sends_fallback_report() {
    let sink = Arc::new(FlakySink::failing(1));
    let logger = TelemetryLogger::builder(TelemetryConfig::default(), sink.clone()).build();
    logger.log_message("lost", Severity::Warning);

    let items = sink.recorded.items();
    assert_eq!(items.len(), 1);
    let Telemetry::Exception(report) = &items[0] else {
        panic!("expected the fallback report, got {:?}", items[0]);
    };
    assert_eq!(report.error.type_name, "TelemetryError");
    assert_eq!(
        report.error.message,
        "telemetry sink rejected the item: backend unavailable"
    );
}

#[test]
fn test_failing_fallback_does_not_panic() {
    let sink = Arc::new(FlakySink::failing(2));
    let logger = TelemetryLogger::builder(TelemetryConfig::default(), sink.clone()).build();
    logger.log_message("lost", Severity::Warning);
    logger.log_message("kept", Severity::Warning);

    let items = sink.recorded.items();
    assert_eq!(items.len(), 1);
    assert!(matches!(&items[0], Telemetry::Trace(trace) if trace.message == "kept"));
}
