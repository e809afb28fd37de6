use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{LogContext, Severity, TrackingIds};

/// A named numeric measurement.
#[derive(Debug, Clone)]
pub struct MetricContext {
    pub base: LogContext,
    pub metric_name: String,
    pub value: f64,
}

impl MetricContext {
    pub fn new(metric_name: impl Into<String>, value: f64) -> Self {
        Self::with(metric_name, value, TrackingIds::default())
    }

    pub fn with(metric_name: impl Into<String>, value: f64, ids: TrackingIds) -> Self {
        Self {
            base: LogContext::new(Severity::Metric, ids),
            metric_name: metric_name.into(),
            value,
        }
    }
}

/// A timing metric whose value is the elapsed milliseconds once stopped.
///
/// Wall-clock timestamps are recorded for reporting while the elapsed time is
/// measured with a monotonic clock.
#[derive(Debug, Clone)]
pub struct PerformanceContext {
    pub base: LogContext,
    pub metric_name: String,
    pub value: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    started: Instant,
    stopped: bool,
}

impl PerformanceContext {
    /// Creates a context and starts its timer.
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self::with(metric_name, TrackingIds::default())
    }

    pub fn with(metric_name: impl Into<String>, ids: TrackingIds) -> Self {
        let now = Utc::now();
        Self {
            base: LogContext::new(Severity::Metric, ids),
            metric_name: metric_name.into(),
            value: 0.0,
            start_time: now,
            end_time: now,
            started: Instant::now(),
            stopped: false,
        }
    }

    /// Restarts the timer.
    pub fn start(&mut self) {
        self.start_time = Utc::now();
        self.started = Instant::now();
        self.stopped = false;
    }

    pub fn stop(&mut self) {
        let elapsed = self.started.elapsed();
        self.end_time = Utc::now();
        self.value = elapsed.as_secs_f64() * 1000.0;
        self.stopped = true;
        self.base.add_property("MetricType", "Performance");
        self.base.add_property(
            "StartTime",
            self.start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        self.base.add_property(
            "EndTime",
            self.end_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Recorded milliseconds once stopped, the running time before that.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        if self.stopped {
            self.value
        } else {
            self.started.elapsed().as_secs_f64() * 1000.0
        }
    }
}
