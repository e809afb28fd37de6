//! Tracking identity of background work that outlives its originating request.
//!
//! Work detached from a request registers the tracking ids it inherited under
//! the identity of its current execution. Telemetry emitted later, with no
//! request around, recovers those ids by looking the registry up with its
//! correlation id.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::TelemetryError;

/// Opaque identity of one logical unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    /// Creates a fresh, unique identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Supplies the identity of the currently executing unit of work.
///
/// The identity must stay the same for the lifetime of the unit of work, even
/// if it migrates between threads.
pub trait ExecutionContextProvider {
    fn current_execution_id(&self) -> Result<ExecutionId, TelemetryError>;
}

/// Tracking ids inherited by a unit of background work.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackgroundDetails {
    pub correlation_id: String,
    pub transaction_id: String,
    pub end_to_end_tracking_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub operation_name: String,
}

impl BackgroundDetails {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = id.into();
        self
    }

    #[must_use]
    pub fn end_to_end_tracking_id(mut self, id: impl Into<String>) -> Self {
        self.end_to_end_tracking_id = id.into();
        self
    }

    #[must_use]
    pub fn tenant_id(mut self, id: impl Into<String>) -> Self {
        self.tenant_id = id.into();
        self
    }

    #[must_use]
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = id.into();
        self
    }

    #[must_use]
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = name.into();
        self
    }
}

/// A registry entry: background details bound to the execution that added them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDetails {
    pub executing_id: ExecutionId,
    pub correlation_id: String,
    pub transaction_id: String,
    pub end_to_end_tracking_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub operation_name: String,
}

#[derive(Debug)]
struct Registered {
    sequence: u64,
    details: ContextDetails,
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Concurrent table of background execution contexts.
///
/// Entries are never evicted: whoever adds an entry removes it, either with
/// [`remove_current_context`](Self::remove_current_context) or by dropping the
/// guard returned from [`enter`](Self::enter).
#[derive(Debug, Default)]
pub struct BackgroundRegistry {
    contexts: DashMap<ExecutionId, Vec<Registered>>,
}

impl BackgroundRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `details` under the current execution of `provider`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current execution id cannot be read.
    pub fn add_current_context(
        &self,
        provider: &dyn ExecutionContextProvider,
        details: BackgroundDetails,
    ) -> Result<ContextDetails, TelemetryError> {
        self.register(provider, details).map(|(_, details)| details)
    }

    fn register(
        &self,
        provider: &dyn ExecutionContextProvider,
        details: BackgroundDetails,
    ) -> Result<(u64, ContextDetails), TelemetryError> {
        let executing_id = provider.current_execution_id()?;
        let details = ContextDetails {
            executing_id,
            correlation_id: details.correlation_id,
            transaction_id: details.transaction_id,
            end_to_end_tracking_id: details.end_to_end_tracking_id,
            tenant_id: details.tenant_id,
            user_id: details.user_id,
            operation_name: details.operation_name,
        };

        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.contexts.entry(executing_id).or_default().push(Registered {
            sequence,
            details: details.clone(),
        });
        log::debug!(
            target: "telemetry_context::background",
            "added background context {} for correlation {}",
            executing_id,
            details.correlation_id
        );
        Ok((sequence, details))
    }

    /// Removes every entry registered by the current execution of `provider`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current execution id cannot be read.
    pub fn remove_current_context(&self, provider: &dyn ExecutionContextProvider) -> Result<usize, TelemetryError> {
        let executing_id = provider.current_execution_id()?;
        Ok(self.remove_execution(executing_id))
    }

    fn remove_execution(&self, executing_id: ExecutionId) -> usize {
        let removed = self
            .contexts
            .remove(&executing_id)
            .map_or(0, |(_, entries)| entries.len());
        if removed > 0 {
            log::debug!(
                target: "telemetry_context::background",
                "removed {removed} background context(s) for {executing_id}"
            );
        }
        removed
    }

    /// Removes the single entry registered with `sequence`.
    fn remove_entry(&self, executing_id: ExecutionId, sequence: u64) {
        if let Some(mut entries) = self.contexts.get_mut(&executing_id) {
            entries.retain(|registered| registered.sequence != sequence);
        }
        // `entries` must be dropped before the shard is locked again.
        self.contexts
            .remove_if(&executing_id, |_, entries| entries.is_empty());
        log::debug!(
            target: "telemetry_context::background",
            "removed background context {executing_id} entry {sequence}"
        );
    }

    /// Finds the earliest registered entry carrying `correlation_id`.
    #[must_use]
    pub fn find_by_correlation_id(&self, correlation_id: &str) -> Option<ContextDetails> {
        self.contexts
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|registered| registered.details.correlation_id == correlation_id)
                    .map(|registered| (registered.sequence, registered.details.clone()))
                    .collect::<Vec<_>>()
            })
            .min_by_key(|(sequence, _)| *sequence)
            .map(|(_, details)| details)
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.iter().map(|entry| entry.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `details` and returns a guard removing them when dropped.
    ///
    /// # Errors
    ///
    /// See [`add_current_context`](Self::add_current_context).
    pub fn enter(
        &self,
        provider: &dyn ExecutionContextProvider,
        details: BackgroundDetails,
    ) -> Result<BackgroundGuard<'_>, TelemetryError> {
        let (sequence, details) = self.register(provider, details)?;
        Ok(BackgroundGuard {
            registry: self,
            sequence,
            details,
        })
    }
}

/// Keeps a background entry registered for as long as it is alive.
///
/// Dropping the guard removes its own entry only. Other entries of the same
/// execution, including those held by enclosing guards, stay registered.
#[derive(Debug)]
#[must_use = "the background context is removed as soon as the guard is dropped"]
pub struct BackgroundGuard<'a> {
    registry: &'a BackgroundRegistry,
    sequence: u64,
    details: ContextDetails,
}

impl BackgroundGuard<'_> {
    #[must_use]
    pub const fn details(&self) -> &ContextDetails {
        &self.details
    }
}

impl Drop for BackgroundGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .remove_entry(self.details.executing_id, self.sequence);
    }
}
