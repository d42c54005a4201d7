//! Contexts threaded through command execution.
//!
//! - [`ServiceContext`]: process-wide state owned by the top-level server
//!   object (config, registry, hooks, fail points, collaborators).
//! - [`OperationContext`]: one per request; carries client identity,
//!   authorization, cancellation, deadline, and negotiated concerns.
//! - [`RequestExecutionContext`]: what an asynchronous run receives; bundles
//!   the operation context, the request, its descriptor, and the reply.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docket_core::{OpMsgRequest, ReadConcernArgs, RequestContext, WriteConcernOptions};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::auth::{AuthorizationDisabled, AuthorizationSession};
use super::config::ServerConfig;
use super::definition::CommandDefinition;
use super::error::{CommandError, CommandResult, ErrorCode};
use super::fail_point::FailPointRegistry;
use super::hooks::{CommandInvocationHooks, InvocationHooks};
use super::registry::CommandRegistry;
use super::reply::ReplyBuilder;
use crate::traits::{ReplicationStateView, RequestMirror, StandaloneNode};

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Process-wide state shared by every request. Built once at startup.
pub struct ServiceContext {
    config: Arc<ServerConfig>,
    registry: Arc<CommandRegistry>,
    hooks: InvocationHooks,
    fail_points: FailPointRegistry,
    replication: Arc<dyn ReplicationStateView>,
    mirror: Option<Arc<dyn RequestMirror>>,
    next_op_id: AtomicU64,
}

impl ServiceContext {
    /// Creates a context for a standalone node with the default fail points.
    #[must_use]
    pub fn new(config: ServerConfig, registry: CommandRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            hooks: InvocationHooks::default(),
            fail_points: FailPointRegistry::new(),
            replication: Arc::new(StandaloneNode),
            mirror: None,
            next_op_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_replication(mut self, replication: Arc<dyn ReplicationStateView>) -> Self {
        self.replication = replication;
        self
    }

    #[must_use]
    pub fn with_mirror(mut self, mirror: Arc<dyn RequestMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    #[must_use]
    pub fn with_fail_points(mut self, fail_points: FailPointRegistry) -> Self {
        self.fail_points = fail_points;
        self
    }

    /// Installs the process-wide invocation hooks. Last set wins.
    pub fn set_invocation_hooks(&self, hooks: Arc<dyn CommandInvocationHooks>) {
        self.hooks.set(hooks);
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    #[must_use]
    pub fn hooks(&self) -> &InvocationHooks {
        &self.hooks
    }

    #[must_use]
    pub fn fail_points(&self) -> &FailPointRegistry {
        &self.fail_points
    }

    #[must_use]
    pub fn replication(&self) -> &dyn ReplicationStateView {
        self.replication.as_ref()
    }

    #[must_use]
    pub fn mirror(&self) -> Option<&dyn RequestMirror> {
        self.mirror.as_deref()
    }

    fn next_op_id(&self) -> u64 {
        self.next_op_id.fetch_add(1, Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// OperationContext
// ---------------------------------------------------------------------------

/// Concerns settled for the current request before it runs.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedConcerns {
    pub read: Option<ReadConcernArgs>,
    /// The read concern was applied from server defaults, not the request.
    pub read_is_implicit_default: bool,
    pub write: Option<WriteConcernOptions>,
}

/// Per-request state. Cancellation is cooperative: commands poll
/// [`OperationContext::check_for_interrupt`] between expensive steps.
pub struct OperationContext {
    op_id: u64,
    service: Arc<ServiceContext>,
    client: RequestContext,
    auth: Arc<dyn AuthorizationSession>,
    cancel: CancellationToken,
    deadline: Mutex<Option<Instant>>,
    concerns: RwLock<NegotiatedConcerns>,
    session_ended: AtomicBool,
}

impl OperationContext {
    /// Creates a context for `client` with access control disabled.
    #[must_use]
    pub fn new(service: Arc<ServiceContext>, client: RequestContext) -> Self {
        Self {
            op_id: service.next_op_id(),
            service,
            client,
            auth: Arc::new(AuthorizationDisabled),
            cancel: CancellationToken::new(),
            deadline: Mutex::new(None),
            concerns: RwLock::new(NegotiatedConcerns::default()),
            session_ended: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: Arc<dyn AuthorizationSession>) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub fn op_id(&self) -> u64 {
        self.op_id
    }

    #[must_use]
    pub fn service(&self) -> &ServiceContext {
        &self.service
    }

    #[must_use]
    pub fn client(&self) -> &RequestContext {
        &self.client
    }

    #[must_use]
    pub fn auth(&self) -> &dyn AuthorizationSession {
        self.auth.as_ref()
    }

    /// Token that kills the operation when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Marks the operation killed; it stops at its next interrupt check.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    pub fn set_deadline_after(&self, timeout: Duration) {
        *self.deadline.lock() = Some(Instant::now() + timeout);
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    /// Fails with `Interrupted` once killed, or `MaxTimeMSExpired` once past
    /// the deadline.
    ///
    /// # Errors
    ///
    /// Returns the interruption reason.
    pub fn check_for_interrupt(&self) -> CommandResult<()> {
        if self.cancel.is_cancelled() || self.session_ended() {
            return Err(CommandError::new(
                ErrorCode::Interrupted,
                "operation was interrupted",
            ));
        }
        if self.deadline().is_some_and(|d| Instant::now() >= d) {
            return Err(CommandError::new(
                ErrorCode::MaxTimeMSExpired,
                "operation exceeded time limit",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn concerns(&self) -> NegotiatedConcerns {
        self.concerns.read().clone()
    }

    pub fn set_read_concern(&self, read: ReadConcernArgs, implicit_default: bool) {
        let mut concerns = self.concerns.write();
        concerns.read = Some(read);
        concerns.read_is_implicit_default = implicit_default;
    }

    pub fn set_write_concern(&self, write: WriteConcernOptions) {
        self.concerns.write().write = Some(write);
    }

    /// Ends the client session; the transport drops the connection.
    pub fn end_session(&self) {
        self.session_ended.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    #[must_use]
    pub fn session_ended(&self) -> bool {
        self.session_ended.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// RequestExecutionContext
// ---------------------------------------------------------------------------

/// Everything an invocation needs to run, shareable across await points.
pub struct RequestExecutionContext {
    op_ctx: Arc<OperationContext>,
    request: OpMsgRequest,
    definition: Arc<CommandDefinition>,
    reply: Mutex<ReplyBuilder>,
}

impl RequestExecutionContext {
    #[must_use]
    pub fn new(
        op_ctx: Arc<OperationContext>,
        request: OpMsgRequest,
        definition: Arc<CommandDefinition>,
    ) -> Self {
        Self {
            op_ctx,
            request,
            definition,
            reply: Mutex::new(ReplyBuilder::new()),
        }
    }

    #[must_use]
    pub fn op_ctx(&self) -> &Arc<OperationContext> {
        &self.op_ctx
    }

    #[must_use]
    pub fn request(&self) -> &OpMsgRequest {
        &self.request
    }

    #[must_use]
    pub fn definition(&self) -> &Arc<CommandDefinition> {
        &self.definition
    }

    /// Locks the reply. Never hold the guard across an `.await`.
    pub fn reply(&self) -> MutexGuard<'_, ReplyBuilder> {
        self.reply.lock()
    }

    /// Takes the built reply, leaving an empty builder behind.
    #[must_use]
    pub fn take_reply(&self) -> ReplyBuilder {
        std::mem::take(&mut *self.reply.lock())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
