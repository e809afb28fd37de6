#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use log::{LevelFilter, Record, kv::Key};
use telemetry_context::{
    InMemorySink, Telemetry, TelemetryConfig, TelemetryError, TelemetryLogger, TelemetrySink,
};

pub trait RecordExt {
    fn get_record(&self, key: &str) -> Option<serde_json::Value>;
}

impl RecordExt for Record<'_> {
    fn get_record(&self, key: &str) -> Option<serde_json::Value> {
        let key = Key::from_str(key);
        let val = self.key_values().get(key)?;
        serde_json::to_value(val).ok()
    }
}

/// Installs an `env_logger` whose format hook runs `check` on every record.
pub fn check_logger_once<F>(check: F)
where
    F: Fn(&Record) -> std::io::Result<()> + Send + Sync + 'static,
{
    let level_filter = LevelFilter::Trace;
    let logger = env_logger::Builder::new()
        .filter_level(level_filter)
        .format(move |_fmt, record| check(record))
        .build();
    log::set_max_level(level_filter);
    log::set_boxed_logger(Box::new(logger)).unwrap();
}

pub fn config_from(json: &str) -> TelemetryConfig {
    TelemetryConfig::from_json(json).unwrap()
}

pub fn recording_logger(config: TelemetryConfig) -> (TelemetryLogger, Arc<InMemorySink>) {
    let sink = Arc::new(InMemorySink::new());
    let logger = TelemetryLogger::builder(config, sink.clone()).build();
    (logger, sink)
}

/// Rejects the first `failures` items, then records the rest.
#[derive(Debug, Default)]
pub struct FlakySink {
    failures: AtomicUsize,
    pub recorded: InMemorySink,
}

impl FlakySink {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            recorded: InMemorySink::new(),
        }
    }
}

impl TelemetrySink for FlakySink {
    fn track(&self, telemetry: Telemetry) -> Result<(), TelemetryError> {
        let remaining = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if remaining.is_ok() {
            return Err(TelemetryError::Sink("backend unavailable".to_owned()));
        }
        self.recorded.track(telemetry)
    }
}
