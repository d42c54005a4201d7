//! Body-only commands.
//!
//! A [`BasicCommand`] works on the raw request body and reports success as a
//! `bool`. An [`ErrmsgCommand`] additionally fills an error message string
//! that becomes the reply's `errmsg` when it fails. Neither accepts document
//! sequences.

use std::sync::Arc;

use async_trait::async_trait;
use docket_core::{Document, NamespaceString, OpMsgRequest, ReadConcernLevel};

use super::auth::Privilege;
use super::context::{OperationContext, RequestExecutionContext};
use super::definition::{Command, CommandAttributes, CommandDefinition};
use super::error::{CommandError, CommandResult, ErrorCode};
use super::helpers::{append_simple_command_status, parse_ns_from_command, uassert_no_document_sequences};
use super::invocation::{ExplainVerbosity, Invocation, ReadConcernSupport};
use super::reply::ReplyBuilder;

// ---------------------------------------------------------------------------
// BasicCommand
// ---------------------------------------------------------------------------

/// A command that reads its request body directly.
///
/// Implementors override either [`BasicCommand::run`] or
/// [`BasicCommand::run_with_reply_builder`], and either
/// [`BasicCommand::check_auth_for_operation`] or
/// [`BasicCommand::required_privileges`].
pub trait BasicCommand: Send + Sync + 'static {
    const NAME: &'static str;

    fn attributes(&self) -> CommandAttributes;

    fn parse_ns(&self, db: &str, body: &Document) -> NamespaceString {
        parse_ns_from_command(db, body)
    }

    /// Writes into `result`. `Ok(false)` is a failure reported in the reply.
    ///
    /// # Errors
    ///
    /// Any classified failure.
    fn run(
        &self,
        _op_ctx: &OperationContext,
        _db: &str,
        _body: &Document,
        _result: &mut Document,
    ) -> CommandResult<bool> {
        unreachable!("{} overrides neither run nor run_with_reply_builder", Self::NAME)
    }

    /// # Errors
    ///
    /// Any classified failure.
    fn run_with_reply_builder(
        &self,
        op_ctx: &OperationContext,
        db: &str,
        body: &Document,
        reply: &mut ReplyBuilder,
    ) -> CommandResult<bool> {
        self.run(op_ctx, db, body, reply.body_mut())
    }

    /// # Errors
    ///
    /// `IllegalOperation` unless overridden.
    fn explain(
        &self,
        _op_ctx: &OperationContext,
        _db: &str,
        _body: &Document,
        _verbosity: ExplainVerbosity,
        _reply: &mut ReplyBuilder,
    ) -> CommandResult<()> {
        Err(CommandError::illegal_operation(format!(
            "Cannot explain cmd: {}",
            Self::NAME
        )))
    }

    /// # Errors
    ///
    /// `Unauthorized` unless the session holds every
    /// [`BasicCommand::required_privileges`] entry.
    fn check_auth_for_operation(
        &self,
        op_ctx: &OperationContext,
        db: &str,
        body: &Document,
    ) -> CommandResult<()> {
        let privileges = self.required_privileges(db, body);
        if op_ctx.auth().is_authorized_for_privileges(&privileges) {
            Ok(())
        } else {
            Err(CommandError::unauthorized("unauthorized"))
        }
    }

    fn required_privileges(&self, _db: &str, _body: &Document) -> Vec<Privilege> {
        unreachable!(
            "{} overrides neither check_auth_for_operation nor required_privileges",
            Self::NAME
        )
    }

    fn supports_write_concern(&self, body: &Document) -> bool;

    fn supports_read_concern(
        &self,
        _db: &str,
        _body: &Document,
        level: ReadConcernLevel,
        _is_implicit_default: bool,
    ) -> ReadConcernSupport {
        ReadConcernSupport::local_only(level)
    }

    fn supports_read_mirroring(&self, _body: &Document) -> bool {
        false
    }

    fn append_mirrorable_request(&self, _body: &Document, _out: &mut Document) {
        unreachable!(
            "{} supports read mirroring but does not append a mirrorable request",
            Self::NAME
        )
    }

    fn allows_after_cluster_time(&self, _body: &Document) -> bool {
        true
    }

    fn can_ignore_prepare_conflicts(&self) -> bool {
        false
    }
}

/// Adapts a [`BasicCommand`] to [`Command`].
pub struct BasicAdapter<C> {
    inner: Arc<C>,
}

impl<C: BasicCommand> BasicAdapter<C> {
    #[must_use]
    pub fn new(command: C) -> Self {
        Self {
            inner: Arc::new(command),
        }
    }
}

impl<C: BasicCommand> Command for BasicAdapter<C> {
    fn attributes(&self) -> CommandAttributes {
        self.inner.attributes()
    }

    fn parse(
        &self,
        definition: &Arc<CommandDefinition>,
        _op_ctx: &OperationContext,
        request: &OpMsgRequest,
    ) -> CommandResult<Box<dyn Invocation>> {
        uassert_no_document_sequences(definition.name(), request)?;
        Ok(Box::new(BasicInvocation {
            definition: definition.clone(),
            command: self.inner.clone(),
            ns: self.inner.parse_ns(&request.db, &request.body),
            db: request.db.clone(),
            body: request.body.clone(),
        }))
    }
}

/// Invocation of a body-only command.
pub struct BasicInvocation<C> {
    definition: Arc<CommandDefinition>,
    command: Arc<C>,
    ns: NamespaceString,
    db: String,
    body: Document,
}

#[async_trait]
impl<C: BasicCommand> Invocation for BasicInvocation<C> {
    fn definition(&self) -> &Arc<CommandDefinition> {
        &self.definition
    }

    fn run(&mut self, op_ctx: &OperationContext, reply: &mut ReplyBuilder) -> CommandResult<()> {
        let ok = self
            .command
            .run_with_reply_builder(op_ctx, &self.db, &self.body, reply)?;
        if !ok {
            append_simple_command_status(reply.body_mut(), false, None);
        }
        Ok(())
    }

    async fn run_async(&mut self, rec: Arc<RequestExecutionContext>) -> CommandResult<()> {
        let ok = {
            let mut reply = rec.reply();
            self.command
                .run_with_reply_builder(rec.op_ctx(), &self.db, &self.body, &mut reply)?
        };
        if ok {
            Ok(())
        } else {
            Err(CommandError::new(
                ErrorCode::FailedToRunWithReplyBuilder,
                format!("Failed to run command: {}", self.definition.name()),
            ))
        }
    }

    fn explain(
        &self,
        op_ctx: &OperationContext,
        verbosity: ExplainVerbosity,
        reply: &mut ReplyBuilder,
    ) -> CommandResult<()> {
        self.command
            .explain(op_ctx, &self.db, &self.body, verbosity, reply)
    }

    fn ns(&self) -> NamespaceString {
        self.ns.clone()
    }

    fn supports_write_concern(&self) -> bool {
        self.command.supports_write_concern(&self.body)
    }

    fn supports_read_concern(
        &self,
        level: ReadConcernLevel,
        is_implicit_default: bool,
    ) -> ReadConcernSupport {
        self.command
            .supports_read_concern(&self.db, &self.body, level, is_implicit_default)
    }

    fn supports_read_mirroring(&self) -> bool {
        self.command.supports_read_mirroring(&self.body)
    }

    fn append_mirrorable_request(&self, body: &mut Document) {
        self.command.append_mirrorable_request(&self.body, body);
    }

    fn allows_after_cluster_time(&self) -> bool {
        self.command.allows_after_cluster_time(&self.body)
    }

    fn can_ignore_prepare_conflicts(&self) -> bool {
        self.command.can_ignore_prepare_conflicts()
    }

    fn do_check_authorization(&self, op_ctx: &OperationContext) -> CommandResult<()> {
        self.command
            .check_auth_for_operation(op_ctx, &self.db, &self.body)
    }
}

// ---------------------------------------------------------------------------
// ErrmsgCommand
// ---------------------------------------------------------------------------

/// A body-only command that reports failure through an error message.
pub trait ErrmsgCommand: Send + Sync + 'static {
    const NAME: &'static str;

    fn attributes(&self) -> CommandAttributes;

    fn parse_ns(&self, db: &str, body: &Document) -> NamespaceString {
        parse_ns_from_command(db, body)
    }

    fn supports_write_concern(&self, body: &Document) -> bool;

    /// # Errors
    ///
    /// `Unauthorized` if the client may not run the command.
    fn check_auth_for_operation(
        &self,
        op_ctx: &OperationContext,
        db: &str,
        body: &Document,
    ) -> CommandResult<()>;

    /// On `Ok(false)` a non-empty `errmsg` becomes the reply's `errmsg`.
    ///
    /// # Errors
    ///
    /// Any classified failure.
    fn errmsg_run(
        &self,
        op_ctx: &OperationContext,
        db: &str,
        body: &Document,
        errmsg: &mut String,
        result: &mut Document,
    ) -> CommandResult<bool>;
}

/// Presents an [`ErrmsgCommand`] as a [`BasicCommand`].
pub struct Errmsg<C>(pub C);

impl<C: ErrmsgCommand> BasicCommand for Errmsg<C> {
    const NAME: &'static str = C::NAME;

    fn attributes(&self) -> CommandAttributes {
        self.0.attributes()
    }

    fn parse_ns(&self, db: &str, body: &Document) -> NamespaceString {
        self.0.parse_ns(db, body)
    }

    fn run(
        &self,
        op_ctx: &OperationContext,
        db: &str,
        body: &Document,
        result: &mut Document,
    ) -> CommandResult<bool> {
        let mut errmsg = String::new();
        let ok = self.0.errmsg_run(op_ctx, db, body, &mut errmsg, result)?;
        if !ok {
            append_simple_command_status(result, false, Some(&errmsg));
        }
        Ok(ok)
    }

    fn check_auth_for_operation(
        &self,
        op_ctx: &OperationContext,
        db: &str,
        body: &Document,
    ) -> CommandResult<()> {
        self.0.check_auth_for_operation(op_ctx, db, body)
    }

    fn supports_write_concern(&self, body: &Document) -> bool {
        self.0.supports_write_concern(body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
