//! Scoped tenant-context stack.
//!
//! The stack is only changed through [`TenantScope::with_context`], which
//! pushes on entry and restores the previous depth on every exit path,
//! including early returns and panics. `TenantScope` is `!Sync`, so one
//! stack cannot be shared between concurrently executing requests.

use crate::error::{StorageError, StorageResult};
use phivault_types::TenantContext;
use std::cell::RefCell;

#[derive(Debug, Default)]
pub struct TenantScope {
    stack: RefCell<Vec<TenantContext>>,
}

impl TenantScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// The innermost active context.
    pub fn current(&self) -> StorageResult<TenantContext> {
        self.stack
            .borrow()
            .last()
            .cloned()
            .ok_or(StorageError::NoTenantContext)
    }

    /// Number of nested scopes currently active.
    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Runs `body` with `ctx` active.
    pub fn with_context<R>(&self, ctx: TenantContext, body: impl FnOnce() -> R) -> R {
        let restore_to = {
            let mut stack = self.stack.borrow_mut();
            let depth = stack.len();
            stack.push(ctx);
            depth
        };
        let _guard = RestoreGuard {
            stack: &self.stack,
            restore_to,
        };
        body()
    }
}

struct RestoreGuard<'a> {
    stack: &'a RefCell<Vec<TenantContext>>,
    restore_to: usize,
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().truncate(self.restore_to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phivault_types::TenantId;

    fn tenant(id: &str) -> TenantContext {
        TenantContext::tenant(TenantId::parse(id).unwrap())
    }

    #[test]
    fn empty_scope_has_no_context() {
        let scope = TenantScope::new();
        assert!(matches!(scope.current(), Err(StorageError::NoTenantContext)));
    }

    #[test]
    fn nesting_restores_each_layer() {
        let scope = TenantScope::new();
        scope.with_context(tenant("a"), || {
            scope.with_context(TenantContext::Central, || {
                scope.with_context(tenant("b"), || {
                    assert_eq!(scope.current().unwrap(), tenant("b"));
                    assert_eq!(scope.depth(), 3);
                });
                assert_eq!(scope.current().unwrap(), TenantContext::Central);
            });
            assert_eq!(scope.current().unwrap(), tenant("a"));
        });
        assert_eq!(scope.depth(), 0);
    }

    #[test]
    fn error_return_restores_context() {
        let scope = TenantScope::new();
        scope.with_context(tenant("a"), || {
            let result: Result<(), &str> =
                scope.with_context(tenant("b"), || Err("boom"));
            assert!(result.is_err());
            assert_eq!(scope.current().unwrap(), tenant("a"));
        });
    }

    #[test]
    fn panic_restores_context() {
        let scope = TenantScope::new();
        scope.with_context(tenant("a"), || {
            let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                scope.with_context(tenant("b"), || panic!("inside b"));
            }));
            assert!(caught.is_err());
            assert_eq!(scope.current().unwrap(), tenant("a"));
        });
        assert!(scope.current().is_err());
    }
}
