//! Size and depth bounds applied to a context before it reaches the sink.

use std::collections::HashSet;

use crate::{
    EnrichmentStage, EnrichmentWarning, ErrorRecord, ExceptionContext, Properties, TelemetryContext,
    TelemetryError, TrimmingConfig, context::Contextual,
};

pub const TRIMMING_KEY: &str = "Trimming";
pub const TRIMMING_ENABLED: &str = "Enabled";

/// Bounds the properties and, for exceptions, the error chain of `context`.
///
/// Properties longer than `max_message_size` characters are split into
/// `{key}_1..{key}_n` chunks of `max_property_size` characters. Exception chains
/// are cut at `max_exception_depth` levels with every message truncated to
/// `max_message_size`. A context is trimmed at most once.
///
/// Failures never abort the emission: they are recorded under `TrimFailure` and
/// returned as warnings, leaving the affected properties untouched.
pub fn trim(context: &mut TelemetryContext, config: &TrimmingConfig) -> Vec<EnrichmentWarning> {
    let mut warnings = Vec::new();
    if context.base().is_trimmed() {
        return warnings;
    }

    let exception_trimmed = match context {
        TelemetryContext::Exception(exception)
            if config.exception_trimming_enabled || exception.exception_trimming_enabled =>
        {
            trim_exception(exception, config);
            true
        }
        _ => false,
    };

    let base = context.base_mut();
    if config.property_splitting_enabled || base.property_splitting_enabled {
        if let Err(err) = split_properties(base.properties_mut(), config) {
            log::debug!(target: "telemetry_context::trim", "property splitting failed: {err}");
            let warning = EnrichmentWarning::new(EnrichmentStage::Trimming, &err);
            base.add_property(EnrichmentStage::Trimming.marker_key(), warning.detail.as_str());
            warnings.push(warning);
        }
    }
    if exception_trimmed {
        base.add_property(TRIMMING_KEY, TRIMMING_ENABLED);
    }
    base.mark_trimmed();
    warnings
}

/// Splits every property whose value exceeds `max_message_size` characters.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidChunkSize`] if a property must be split and
/// `max_property_size` is zero. Nothing is split in that case.
pub fn split_properties(properties: &mut Properties, config: &TrimmingConfig) -> Result<(), TelemetryError> {
    let oversized = properties
        .iter()
        .filter(|(_, value)| value.chars().count() > config.max_message_size)
        .map(|(key, _)| key.clone())
        .collect::<Vec<_>>();
    if oversized.is_empty() {
        return Ok(());
    }
    if config.max_property_size == 0 {
        return Err(TelemetryError::InvalidChunkSize);
    }

    let mut pending = oversized;
    let mut chunk_keys = HashSet::new();
    let mut next = 0;
    while let Some(key) = pending.get(next).cloned() {
        next += 1;
        if chunk_keys.contains(&key) {
            continue;
        }
        let Some(value) = properties.get(&key) else {
            continue;
        };
        let chars = value.chars().collect::<Vec<_>>();
        let chunks = chars
            .chunks(config.max_property_size)
            .enumerate()
            .map(|(index, chunk)| (format!("{key}_{}", index + 1), chunk.iter().collect::<String>()))
            .collect::<Vec<_>>();
        chunk_keys.extend(chunks.iter().map(|(chunk_key, _)| chunk_key.clone()));

        // Properties moved aside by a chunk still need their own split.
        let displaced = properties.splice(&key, chunks);
        pending.extend(displaced.into_iter().filter(|displaced| {
            properties
                .get(displaced)
                .is_some_and(|value| value.chars().count() > config.max_message_size)
        }));
    }
    Ok(())
}

/// Rebuilds the error chain with at most `max_exception_depth` levels.
///
/// Levels that lose information (a truncated message, or dropped causes at the
/// last level) leave their stack trace and full description behind as
/// `StackTrace_{depth}` and `ExceptionSource_{depth}` properties.
fn trim_exception(exception: &mut ExceptionContext, config: &TrimmingConfig) {
    let max_depth = config.max_exception_depth.max(1);
    let limit = config.max_message_size;

    let mut levels = Vec::new();
    let mut breadcrumbs = Vec::new();
    for (index, record) in exception.error.chain().take(max_depth).enumerate() {
        let depth = index + 1;
        let truncated = record.message.chars().count() > limit;
        let dropping_causes = depth == max_depth && record.cause.is_some();
        if truncated || dropping_causes {
            if let Some(stack_trace) = &record.stack_trace {
                breadcrumbs.push((format!("StackTrace_{depth}"), stack_trace.clone()));
            }
            breadcrumbs.push((format!("ExceptionSource_{depth}"), describe(record)));
        }

        levels.push(ErrorRecord {
            type_name: record.type_name.clone(),
            message: record.message.chars().take(limit).collect(),
            source: record.source.clone(),
            stack_trace: record.stack_trace.clone(),
            help_link: record.help_link.clone(),
            cause: None,
        });
    }

    let rebuilt = levels.into_iter().rev().fold(None, |cause, mut level: ErrorRecord| {
        level.cause = cause.map(Box::new);
        Some(level)
    });
    if let Some(rebuilt) = rebuilt {
        exception.error = rebuilt;
    }
    exception.base.add_properties(breadcrumbs, true);
}

fn describe(record: &ErrorRecord) -> String {
    match &record.source {
        Some(source) if !source.is_empty() => {
            format!("{} ({source}): {}", record.type_name, record.message)
        }
        _ => format!("{}: {}", record.type_name, record.message),
    }
}
