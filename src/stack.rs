use std::cell::{Ref, RefCell};

use crate::{ExecutionId, TelemetryScope};

thread_local! {
    pub static SCOPE_STACK: ScopeStack = const { ScopeStack::new() };
    /// Execution identity of code running outside of any scope on this thread.
    pub static THREAD_EXECUTION_ID: ExecutionId = ExecutionId::new();
}

#[derive(Debug)]
pub struct ScopeStack {
    inner: RefCell<Vec<TelemetryScope>>,
}

impl ScopeStack {
    pub const fn new() -> Self {
        ScopeStack {
            inner: RefCell::new(Vec::new()),
        }
    }

    pub fn push(&self, scope: TelemetryScope) {
        self.inner.borrow_mut().push(scope);
    }

    pub fn pop(&self) -> Option<TelemetryScope> {
        self.inner.borrow_mut().pop()
    }

    pub fn top(&self) -> Option<Ref<'_, TelemetryScope>> {
        Ref::filter_map(self.inner.borrow(), |inner| inner.last()).ok()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl ScopeStack {
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}
