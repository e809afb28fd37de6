use serde::{Deserialize, Serialize};

/// Severity of a telemetry item.
///
/// The ordering is significant: the logger drops every context whose severity
/// is below the configured floor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Verbose,
    Information,
    /// Used by metric, event and performance contexts.
    Metric,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Maps the severity onto the closest [`log::Level`].
    #[must_use]
    pub const fn to_log_level(self) -> log::Level {
        match self {
            Self::Verbose => log::Level::Debug,
            Self::Information | Self::Metric => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error | Self::Critical => log::Level::Error,
        }
    }

    #[must_use]
    pub const fn from_log_level(level: log::Level) -> Self {
        match level {
            log::Level::Trace | log::Level::Debug => Self::Verbose,
            log::Level::Info => Self::Information,
            log::Level::Warn => Self::Warning,
            log::Level::Error => Self::Error,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verbose => "Verbose",
            Self::Information => "Information",
            Self::Metric => "Metric",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
