//! The ambient execution identity and request of the running code.

use std::sync::Arc;

use crate::{
    ExecutionContextProvider, ExecutionId, RequestAccessor, RequestSource, TelemetryError,
    guard::TelemetryScopeGuard,
    stack::{SCOPE_STACK, THREAD_EXECUTION_ID},
};

/// A unit of work: an execution identity and, when serving one, the inbound request.
///
/// Scopes nest. The innermost entered scope is the current one, see [`AmbientScope`].
///
/// # Examples
///
/// ```
/// use telemetry_context::{AmbientScope, ExecutionContextProvider, TelemetryScope};
///
/// let scope = TelemetryScope::new();
/// let execution_id = scope.execution_id();
///
/// let _guard = scope.enter();
/// assert_eq!(AmbientScope.current_execution_id().unwrap(), execution_id);
/// ```
#[derive(Debug, Clone)]
pub struct TelemetryScope {
    execution_id: ExecutionId,
    request: Option<Arc<dyn RequestSource>>,
}

impl TelemetryScope {
    /// Creates a scope with a fresh execution identity and no request.
    #[must_use]
    pub fn new() -> Self {
        Self::with_execution_id(ExecutionId::new())
    }

    #[must_use]
    pub const fn with_execution_id(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            request: None,
        }
    }

    #[must_use]
    pub fn with_request(mut self, request: Arc<dyn RequestSource>) -> Self {
        self.request = Some(request);
        self
    }

    #[must_use]
    pub const fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    #[must_use]
    pub fn request(&self) -> Option<&Arc<dyn RequestSource>> {
        self.request.as_ref()
    }

    /// Makes this scope the current one until the returned guard is dropped.
    pub fn enter<'a>(self) -> TelemetryScopeGuard<'a> {
        TelemetryScopeGuard::enter(self)
    }
}

impl Default for TelemetryScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the current [`TelemetryScope`] of the calling thread.
///
/// Outside of any scope the execution identity is a stable per-thread id and
/// there is no request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientScope;

impl ExecutionContextProvider for AmbientScope {
    fn current_execution_id(&self) -> Result<ExecutionId, TelemetryError> {
        let scoped = SCOPE_STACK.try_with(|stack| stack.top().map(|scope| scope.execution_id))?;
        match scoped {
            Some(execution_id) => Ok(execution_id),
            None => Ok(THREAD_EXECUTION_ID.try_with(|id| *id)?),
        }
    }
}

impl RequestAccessor for AmbientScope {
    fn current_request(&self) -> Result<Option<Arc<dyn RequestSource>>, TelemetryError> {
        let request = SCOPE_STACK.try_with(|stack| stack.top().and_then(|scope| scope.request.clone()))?;
        Ok(request)
    }
}
