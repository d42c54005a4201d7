//! The per-request execution contract.
//!
//! An [`Invocation`] is created by [`CommandDefinition::parse`] for exactly
//! one request and is dropped once a reply is produced or an error propagates.
//! The dispatcher drives it through a fixed sequence: authorization, concern
//! negotiation, then exactly one of [`Invocation::run`] or
//! [`Invocation::run_async`].

use std::sync::Arc;

use async_trait::async_trait;
use docket_core::namespace::is_valid_db_name;
use docket_core::{Document, NamespaceString, OpMsgRequest, ReadConcernLevel};
use tracing::{debug, info};

use super::context::{OperationContext, RequestExecutionContext};
use super::definition::CommandDefinition;
use super::error::{CommandError, CommandResult, ErrorCode};
use super::reply::ReplyBuilder;

/// Detail level for `explain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainVerbosity {
    QueryPlanner,
    ExecutionStats,
    AllPlansExecution,
}

impl ExplainVerbosity {
    /// Parses the `verbosity` field of an explain request.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queryPlanner" => Some(Self::QueryPlanner),
            "executionStats" => Some(Self::ExecutionStats),
            "allPlansExecution" => Some(Self::AllPlansExecution),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueryPlanner => "queryPlanner",
            Self::ExecutionStats => "executionStats",
            Self::AllPlansExecution => "allPlansExecution",
        }
    }
}

/// Answer to "may this invocation run at read concern level X?".
#[derive(Debug, Clone, PartialEq)]
pub struct ReadConcernSupport {
    /// `Err` carries the reason the level is not supported.
    pub read_concern: CommandResult<()>,
    /// `Err` carries the reason the server default may not be applied.
    pub default_permit: CommandResult<()>,
}

impl ReadConcernSupport {
    /// Every level supported and defaults permitted.
    #[must_use]
    pub fn all_supported() -> Self {
        Self {
            read_concern: Ok(()),
            default_permit: Ok(()),
        }
    }

    /// Only `local` is supported and the server default is never applied.
    #[must_use]
    pub fn local_only(level: ReadConcernLevel) -> Self {
        Self {
            read_concern: if level == ReadConcernLevel::Local {
                Ok(())
            } else {
                Err(CommandError::invalid_options("read concern not supported"))
            },
            default_permit: Err(CommandError::invalid_options(
                "default read concern not permitted",
            )),
        }
    }
}

/// One in-flight execution of a command.
#[async_trait]
pub trait Invocation: Send + Sync {
    /// The descriptor this invocation was parsed by.
    fn definition(&self) -> &Arc<CommandDefinition>;

    /// Runs to completion, populating `reply`.
    ///
    /// Returning `Ok` without writing `ok` into the reply is success.
    ///
    /// # Errors
    ///
    /// Any classified failure; the dispatcher turns it into a failure reply.
    fn run(&mut self, op_ctx: &OperationContext, reply: &mut ReplyBuilder) -> CommandResult<()>;

    /// Asynchronous run. The default performs [`Invocation::run`] inline; only
    /// an override that awaits something actually suspends.
    ///
    /// # Errors
    ///
    /// Same as [`Invocation::run`].
    async fn run_async(&mut self, rec: Arc<RequestExecutionContext>) -> CommandResult<()> {
        let mut reply = rec.reply();
        self.run(rec.op_ctx(), &mut reply)
    }

    /// # Errors
    ///
    /// `IllegalOperation` unless the command supports explain.
    fn explain(
        &self,
        _op_ctx: &OperationContext,
        _verbosity: ExplainVerbosity,
        _reply: &mut ReplyBuilder,
    ) -> CommandResult<()> {
        Err(CommandError::illegal_operation(format!(
            "Cannot explain cmd: {}",
            self.definition().name()
        )))
    }

    /// Primary namespace the command targets.
    fn ns(&self) -> NamespaceString;

    fn supports_write_concern(&self) -> bool;

    fn supports_read_concern(
        &self,
        level: ReadConcernLevel,
        _is_implicit_default: bool,
    ) -> ReadConcernSupport {
        ReadConcernSupport::local_only(level)
    }

    fn supports_read_mirroring(&self) -> bool {
        false
    }

    /// Writes the subset of the request to mirror. Only called when
    /// [`Invocation::supports_read_mirroring`] is true.
    fn append_mirrorable_request(&self, _body: &mut Document) {
        unreachable!(
            "{} supports read mirroring but does not append a mirrorable request",
            self.definition().name()
        )
    }

    fn allows_after_cluster_time(&self) -> bool {
        true
    }

    fn can_ignore_prepare_conflicts(&self) -> bool {
        false
    }

    fn allows_speculative_majority_reads(&self) -> bool {
        false
    }

    /// True for wrappers whose authorization is that of a nested command.
    /// Their `do_check_authorization` runs whether or not auth is enabled,
    /// so the nested command's database checks always apply.
    fn delegates_authorization(&self) -> bool {
        false
    }

    /// Command-specific authorization. Called only through
    /// [`check_authorization`](trait.Invocation.html#method.check_authorization).
    ///
    /// # Errors
    ///
    /// `Unauthorized` if the client lacks a required privilege.
    fn do_check_authorization(&self, op_ctx: &OperationContext) -> CommandResult<()>;
}

impl dyn Invocation + '_ {
    /// Authorization entry point. Validates the target database, enforces
    /// `admin_only` and `local_host_only_if_no_auth`, then defers to
    /// [`Invocation::do_check_authorization`] when auth applies. The outcome
    /// is audited.
    ///
    /// # Errors
    ///
    /// `InvalidNamespace` or `Unauthorized`.
    pub fn check_authorization(
        &self,
        op_ctx: &OperationContext,
        request: &OpMsgRequest,
    ) -> CommandResult<()> {
        let definition = self.definition();
        let result = self.authorize(op_ctx, request);
        match &result {
            Ok(()) => debug!(
                target: "docket::audit",
                command = definition.name(),
                db = %request.db,
                ns = %self.ns(),
                "authorization granted"
            ),
            Err(e) if definition.audit_authorization_failure() => info!(
                target: "docket::audit",
                command = definition.name(),
                db = %request.db,
                ns = %self.ns(),
                principal = op_ctx.client().principal.as_ref().map(|p| p.id.as_str()),
                code = e.code.code(),
                "authorization failed"
            ),
            Err(_) => {}
        }
        result
    }

    fn authorize(&self, op_ctx: &OperationContext, request: &OpMsgRequest) -> CommandResult<()> {
        let definition = self.definition();
        if !is_valid_db_name(&request.db) {
            return Err(CommandError::new(
                ErrorCode::InvalidNamespace,
                format!("Invalid database name: '{}'", request.db),
            ));
        }
        if definition.admin_only() && request.db != docket_core::namespace::ADMIN_DB {
            return Err(CommandError::unauthorized(format!(
                "{} may only be run against the admin database.",
                definition.name()
            )));
        }
        let auth = op_ctx.auth();
        if definition.local_host_only_if_no_auth()
            && !auth.is_auth_enabled()
            && !op_ctx.client().is_local_host()
        {
            return Err(CommandError::unauthorized(format!(
                "{} may only be run from localhost when access control is disabled",
                definition.name()
            )));
        }
        if self.delegates_authorization() || (definition.requires_auth() && auth.is_auth_enabled()) {
            self.do_check_authorization(op_ctx)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
