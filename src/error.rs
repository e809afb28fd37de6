//! Errors and enrichment warnings.

use thiserror::Error;

/// Errors produced by the telemetry pipeline and its collaborators.
///
/// None of these ever escape [`TelemetryLogger`](crate::TelemetryLogger): enrichment
/// errors are downgraded to [`EnrichmentWarning`]s and sink errors are redirected
/// to the fallback report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("telemetry sink rejected the item: {0}")]
    Sink(String),

    #[error("property splitting requires a non-zero chunk size")]
    InvalidChunkSize,

    #[error("ambient telemetry scope is unavailable: {0}")]
    ScopeUnavailable(#[from] std::thread::AccessError),

    #[error("tracking dimension mapped to header `{header}` has an empty property key")]
    InvalidDimension { header: String },

    #[error("property serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Enrichment step that produced a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentStage {
    Tracking,
    Trimming,
    ContextualProperties,
}

impl EnrichmentStage {
    /// Property key under which a failure of this stage is recorded on the context.
    #[must_use]
    pub const fn marker_key(self) -> &'static str {
        match self {
            Self::Tracking => "TRACKING_INITIALIZER_EXCEPTION",
            Self::Trimming => "TrimFailure",
            Self::ContextualProperties => "CONTEXTUAL_PROPERTY_EXCEPTION",
        }
    }
}

/// A non-fatal enrichment failure. The context is still emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentWarning {
    pub stage: EnrichmentStage,
    pub detail: String,
}

impl EnrichmentWarning {
    pub fn new(stage: EnrichmentStage, error: &TelemetryError) -> Self {
        Self {
            stage,
            detail: error.to_string(),
        }
    }
}

impl std::fmt::Display for EnrichmentWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.stage, self.detail)
    }
}
