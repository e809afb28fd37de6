//! A current telemetry scope guard.

use std::marker::PhantomData;

use crate::{
    TelemetryScope,
    stack::{SCOPE_STACK, ScopeStack},
};

/// A guard representing the current telemetry scope in the scope stack.
///
/// When the guard is dropped, the scope is automatically removed from the stack.
/// This is returned by the [`TelemetryScope::enter`] method.
///
/// # Examples
///
/// ```
/// use telemetry_context::{RequestSnapshot, TelemetryScope};
///
/// let request = RequestSnapshot::new("GET", "/orders").with_header("x-correlationid", "abc");
///
/// // Enter the scope (pushes to stack)
/// let guard = TelemetryScope::new().with_request(request.into_source()).enter();
///
/// // Telemetry logged here resolves its tracking ids from the request
/// // ...
///
/// // When `guard` goes out of scope, the scope is automatically removed
/// drop(guard);
/// ```
#[non_exhaustive]
#[derive(Debug)]
#[must_use = "the scope is exited as soon as the guard is dropped"]
pub struct TelemetryScopeGuard<'a> {
    // Make this guard unsendable.
    _marker: PhantomData<&'a *mut ()>,
}

impl TelemetryScopeGuard<'_> {
    pub(crate) fn enter(scope: TelemetryScope) -> Self {
        SCOPE_STACK.with(|stack| stack.push(scope));
        Self {
            _marker: PhantomData,
        }
    }
}

impl Drop for TelemetryScopeGuard<'_> {
    fn drop(&mut self) {
        // The stack may already be gone during thread teardown.
        let _ = SCOPE_STACK.try_with(ScopeStack::pop);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{ExecutionId, RequestSnapshot, RequestSource as _};

    fn top_execution_id() -> Option<ExecutionId> {
        SCOPE_STACK.with(|stack| stack.top().map(|scope| scope.execution_id()))
    }

    fn top_path() -> Option<String> {
        SCOPE_STACK.with(|stack| {
            stack
                .top()
                .and_then(|scope| scope.request().map(|request| request.path().to_owned()))
        })
    }

    #[test]
    fn test_scope_guard_enter() {
        let scope = TelemetryScope::new();
        let execution_id = scope.execution_id();
        // Make sure the scope stack is empty before entering the scope.
        assert!(SCOPE_STACK.with(ScopeStack::is_empty));

        let guard = scope.enter();
        assert_eq!(top_execution_id(), Some(execution_id));

        // Check that the scope stack is empty after dropping the guard.
        drop(guard);
        assert_eq!(SCOPE_STACK.with(ScopeStack::len), 0);
    }

    #[test]
    fn test_scope_nested_guards() {
        let outer = TelemetryScope::new().with_request(RequestSnapshot::new("GET", "/outer").into_source());
        assert_eq!(SCOPE_STACK.with(ScopeStack::len), 0);

        let outer_guard = outer.enter();
        assert_eq!(top_path().as_deref(), Some("/outer"));

        let inner = TelemetryScope::new().with_request(RequestSnapshot::new("GET", "/inner").into_source());
        {
            let inner_guard = inner.enter();
            // Test the stack after the inner guard is entered.
            assert_eq!(SCOPE_STACK.with(ScopeStack::len), 2);
            assert_eq!(top_path().as_deref(), Some("/inner"));

            drop(inner_guard);
        }
        // Test the stack after the inner guard is dropped.
        assert_eq!(SCOPE_STACK.with(ScopeStack::len), 1);
        assert_eq!(top_path().as_deref(), Some("/outer"));

        drop(outer_guard);
        assert!(SCOPE_STACK.with(ScopeStack::is_empty));
    }

    #[test]
    fn test_scope_multithread() {
        let local_guard = TelemetryScope::new()
            .with_request(RequestSnapshot::new("GET", "/main").into_source())
            .enter();

        let handles = ["/first_thread", "/second_thread"].map(|path| {
            std::thread::spawn(move || {
                let inner_guard = TelemetryScope::new()
                    .with_request(RequestSnapshot::new("GET", path).into_source())
                    .enter();

                // Each thread only sees its own scope.
                assert_eq!(SCOPE_STACK.with(ScopeStack::len), 1);
                assert_eq!(top_path().as_deref(), Some(path));

                drop(inner_guard);
            })
        });
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(top_path().as_deref(), Some("/main"));
        drop(local_guard);
    }
}
