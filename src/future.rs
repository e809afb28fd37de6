use std::task::Poll;

use pin_project::pin_project;

use crate::{TelemetryScope, stack::SCOPE_STACK};

/// Runs futures inside a [`TelemetryScope`].
pub trait FutureExt: Future + Sized {
    /// Enters `scope` around every poll of this future, so the scope follows the
    /// future across executor threads.
    fn in_telemetry_scope(self, scope: TelemetryScope) -> TelemetryScopeFuture<Self>;
}

impl<F> FutureExt for F
where
    F: Future,
{
    fn in_telemetry_scope(self, scope: TelemetryScope) -> TelemetryScopeFuture<Self> {
        TelemetryScopeFuture {
            inner: self,
            scope: Some(scope),
        }
    }
}

#[pin_project]
#[derive(Debug)]
pub struct TelemetryScopeFuture<F> {
    #[pin]
    inner: F,
    scope: Option<TelemetryScope>,
}

impl<F> Future for TelemetryScopeFuture<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let Some(scope) = this.scope.take() else {
            return this.inner.poll(cx);
        };
        SCOPE_STACK.with(|stack| stack.push(scope));
        let result = this.inner.poll(cx);
        *this.scope = SCOPE_STACK.with(|stack| stack.pop());

        result
    }
}
