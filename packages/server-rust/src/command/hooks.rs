//! Process-wide observers around command execution.
//!
//! [`CommandInvocationHooks`] sees every invocation on the standard dispatch
//! path: "before" right after parse, "after" on every exit path. Pairing is
//! enforced by [`HookScope`], which fires the "after" call from `Drop`.

use std::sync::Arc;

use parking_lot::RwLock;

use super::context::{OperationContext, RequestExecutionContext};
use super::invocation::Invocation;
use super::reply::ReplyBuilder;

/// Observer notified before and after each invocation runs.
///
/// The async variants default to the sync ones, so an implementer only needs
/// the sync pair unless it cares which path ran.
pub trait CommandInvocationHooks: Send + Sync {
    fn on_before_run(&self, op_ctx: &OperationContext, invocation: &dyn Invocation);

    fn on_before_async_run(&self, rec: &RequestExecutionContext, invocation: &dyn Invocation) {
        self.on_before_run(rec.op_ctx(), invocation);
    }

    /// `reply` holds whatever was built before the run finished or failed.
    fn on_after_run(
        &self,
        op_ctx: &OperationContext,
        invocation: &dyn Invocation,
        reply: &ReplyBuilder,
    );

    fn on_after_async_run(
        &self,
        rec: &RequestExecutionContext,
        invocation: &dyn Invocation,
        reply: &ReplyBuilder,
    ) {
        self.on_after_run(rec.op_ctx(), invocation, reply);
    }
}

/// The single hooks slot owned by the service context. Last set wins.
#[derive(Default)]
pub struct InvocationHooks {
    slot: RwLock<Option<Arc<dyn CommandInvocationHooks>>>,
}

impl InvocationHooks {
    pub fn set(&self, hooks: Arc<dyn CommandInvocationHooks>) {
        *self.slot.write() = Some(hooks);
    }

    #[must_use]
    pub fn get(&self) -> Option<Arc<dyn CommandInvocationHooks>> {
        self.slot.read().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    Sync,
    Async,
}

/// Owns an invocation between its "before" and "after" hook calls.
///
/// Entering fires "before"; dropping fires "after", so early returns and
/// failures still pair up. The reply lock must not be held when the scope
/// drops.
pub(crate) struct HookScope {
    hooks: Option<Arc<dyn CommandInvocationHooks>>,
    rec: Arc<RequestExecutionContext>,
    invocation: Box<dyn Invocation>,
    mode: RunMode,
}

impl HookScope {
    pub(crate) fn enter(
        hooks: Option<Arc<dyn CommandInvocationHooks>>,
        rec: Arc<RequestExecutionContext>,
        invocation: Box<dyn Invocation>,
        mode: RunMode,
    ) -> Self {
        if let Some(h) = &hooks {
            match mode {
                RunMode::Sync => h.on_before_run(rec.op_ctx(), invocation.as_ref()),
                RunMode::Async => h.on_before_async_run(&rec, invocation.as_ref()),
            }
        }
        Self {
            hooks,
            rec,
            invocation,
            mode,
        }
    }

    pub(crate) fn invocation(&self) -> &dyn Invocation {
        self.invocation.as_ref()
    }

    pub(crate) fn invocation_mut(&mut self) -> &mut Box<dyn Invocation> {
        &mut self.invocation
    }
}

impl Drop for HookScope {
    fn drop(&mut self) {
        let Some(h) = &self.hooks else {
            return;
        };
        let reply = self.rec.reply();
        match self.mode {
            RunMode::Sync => h.on_after_run(self.rec.op_ctx(), self.invocation.as_ref(), &reply),
            RunMode::Async => h.on_after_async_run(&self.rec, self.invocation.as_ref(), &reply),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
