//! Strongly typed commands.
//!
//! A [`TypedCommand`] declares a serde request type and a reply shape. The
//! shape is fixed per command at compile time: [`PassFail`] commands signal
//! success by returning normally, [`Typed<T>`] commands return a value that
//! is serialized into the reply. [`TypedAdapter`] turns any typed command
//! into a registry-ready [`Command`] with no per-command boilerplate.

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use docket_core::request::is_generic_argument;
use docket_core::{from_document, Document, NamespaceString, OpMsgRequest, ReadConcernLevel, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::context::OperationContext;
use super::definition::{Command, CommandAttributes, CommandDefinition};
use super::error::{CommandError, CommandResult};
use super::invocation::{ExplainVerbosity, Invocation, ReadConcernSupport};
use super::reply::ReplyBuilder;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A request body with a fixed command name.
///
/// Generic arguments (`$db`, `readConcern`, ...) are stripped before
/// deserialization, so request types may use `deny_unknown_fields`.
pub trait TypedRequest: DeserializeOwned + Send + Sync + 'static {
    const COMMAND_NAME: &'static str;

    /// Parses the body, merging attached document sequences in as arrays.
    /// The first field is renamed to [`Self::COMMAND_NAME`], so a request
    /// sent under an alias parses like one sent under the primary name.
    ///
    /// # Errors
    ///
    /// `FailedToParse` if a sequence duplicates a body field or the body does
    /// not match the request type.
    fn parse(request: &OpMsgRequest) -> CommandResult<ParsedRequest<Self>> {
        let mut body: Document = request
            .body
            .iter()
            .enumerate()
            .filter(|(i, (k, _))| *i == 0 || !is_generic_argument(k))
            .map(|(i, (k, v))| {
                let key = if i == 0 { Self::COMMAND_NAME } else { k };
                (key.to_string(), v.clone())
            })
            .collect();
        for seq in &request.sequences {
            if body.contains_key(&seq.identifier) {
                return Err(CommandError::failed_to_parse(format!(
                    "duplicate field '{}' in body and document sequence",
                    seq.identifier
                )));
            }
            body.append(
                seq.identifier.clone(),
                Value::Array(seq.documents.iter().cloned().map(Value::Map).collect()),
            );
        }
        let parsed = from_document(&body).map_err(|e| {
            CommandError::failed_to_parse(format!("{}: {e}", Self::COMMAND_NAME))
        })?;
        Ok(ParsedRequest {
            db: request.db.clone(),
            body: parsed,
        })
    }
}

/// A typed request plus the database it targets.
#[derive(Debug, Clone)]
pub struct ParsedRequest<R> {
    pub db: String,
    pub body: R,
}

impl<R> Deref for ParsedRequest<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.body
    }
}

// ---------------------------------------------------------------------------
// Reply shapes
// ---------------------------------------------------------------------------

/// How a typed command's result reaches the reply.
pub trait ReplyShape: Send + Sync + 'static {
    type Output: Send;

    /// # Errors
    ///
    /// `InternalError` if the output cannot be serialized.
    fn fill(output: Self::Output, reply: &mut ReplyBuilder) -> CommandResult<()>;
}

/// No value: normal return is success.
pub struct PassFail;

impl ReplyShape for PassFail {
    type Output = ();

    fn fill((): (), _reply: &mut ReplyBuilder) -> CommandResult<()> {
        Ok(())
    }
}

/// A value serialized field by field into the reply body.
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T: Serialize + Send + 'static> ReplyShape for Typed<T> {
    type Output = T;

    fn fill(output: T, reply: &mut ReplyBuilder) -> CommandResult<()> {
        reply.fill_from(&output)
    }
}

type Output<C> = <<C as TypedCommand>::Reply as ReplyShape>::Output;

// ---------------------------------------------------------------------------
// TypedCommand
// ---------------------------------------------------------------------------

/// A command defined by a request type and a reply shape.
pub trait TypedCommand: Send + Sync + 'static {
    type Request: TypedRequest;
    type Reply: ReplyShape;

    fn attributes(&self) -> CommandAttributes;

    fn ns(&self, request: &ParsedRequest<Self::Request>) -> NamespaceString {
        NamespaceString::db_only(request.db.as_str())
    }

    fn supports_write_concern(&self, request: &ParsedRequest<Self::Request>) -> bool;

    fn supports_read_concern(
        &self,
        _request: &ParsedRequest<Self::Request>,
        level: ReadConcernLevel,
        _is_implicit_default: bool,
    ) -> ReadConcernSupport {
        ReadConcernSupport::local_only(level)
    }

    /// # Errors
    ///
    /// `Unauthorized` if the client lacks a required privilege.
    fn do_check_authorization(
        &self,
        op_ctx: &OperationContext,
        request: &ParsedRequest<Self::Request>,
    ) -> CommandResult<()>;

    /// # Errors
    ///
    /// Any classified failure.
    fn typed_run(
        &self,
        op_ctx: &OperationContext,
        request: &ParsedRequest<Self::Request>,
    ) -> CommandResult<Output<Self>>;

    /// Runs and fills the reply. Override to write the reply directly.
    ///
    /// # Errors
    ///
    /// Any classified failure.
    fn run(
        &self,
        op_ctx: &OperationContext,
        request: &ParsedRequest<Self::Request>,
        reply: &mut ReplyBuilder,
    ) -> CommandResult<()> {
        let output = self.typed_run(op_ctx, request)?;
        <Self::Reply as ReplyShape>::fill(output, reply)
    }

    /// # Errors
    ///
    /// `IllegalOperation` unless overridden.
    fn explain(
        &self,
        _op_ctx: &OperationContext,
        _request: &ParsedRequest<Self::Request>,
        _verbosity: ExplainVerbosity,
        _reply: &mut ReplyBuilder,
    ) -> CommandResult<()> {
        Err(CommandError::illegal_operation(format!(
            "Cannot explain cmd: {}",
            <Self::Request as TypedRequest>::COMMAND_NAME
        )))
    }

    fn supports_read_mirroring(&self, _request: &ParsedRequest<Self::Request>) -> bool {
        false
    }

    fn append_mirrorable_request(&self, _request: &ParsedRequest<Self::Request>, _body: &mut Document) {
        unreachable!(
            "{} supports read mirroring but does not append a mirrorable request",
            <Self::Request as TypedRequest>::COMMAND_NAME
        )
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Adapts a [`TypedCommand`] to [`Command`].
pub struct TypedAdapter<C> {
    inner: Arc<C>,
}

impl<C: TypedCommand> TypedAdapter<C> {
    #[must_use]
    pub fn new(command: C) -> Self {
        Self {
            inner: Arc::new(command),
        }
    }
}

impl<C: TypedCommand> Command for TypedAdapter<C> {
    fn attributes(&self) -> CommandAttributes {
        self.inner.attributes()
    }

    fn parse(
        &self,
        definition: &Arc<CommandDefinition>,
        _op_ctx: &OperationContext,
        request: &OpMsgRequest,
    ) -> CommandResult<Box<dyn Invocation>> {
        let request = <C::Request as TypedRequest>::parse(request)?;
        Ok(Box::new(TypedInvocation {
            definition: definition.clone(),
            command: self.inner.clone(),
            request,
        }))
    }
}

/// Invocation of a typed command.
pub struct TypedInvocation<C: TypedCommand> {
    definition: Arc<CommandDefinition>,
    command: Arc<C>,
    request: ParsedRequest<C::Request>,
}

impl<C: TypedCommand> TypedInvocation<C> {
    #[must_use]
    pub fn request(&self) -> &ParsedRequest<C::Request> {
        &self.request
    }
}

#[async_trait]
impl<C: TypedCommand> Invocation for TypedInvocation<C> {
    fn definition(&self) -> &Arc<CommandDefinition> {
        &self.definition
    }

    fn run(&mut self, op_ctx: &OperationContext, reply: &mut ReplyBuilder) -> CommandResult<()> {
        self.command.run(op_ctx, &self.request, reply)
    }

    fn explain(
        &self,
        op_ctx: &OperationContext,
        verbosity: ExplainVerbosity,
        reply: &mut ReplyBuilder,
    ) -> CommandResult<()> {
        self.command.explain(op_ctx, &self.request, verbosity, reply)
    }

    fn ns(&self) -> NamespaceString {
        self.command.ns(&self.request)
    }

    fn supports_write_concern(&self) -> bool {
        self.command.supports_write_concern(&self.request)
    }

    fn supports_read_concern(
        &self,
        level: ReadConcernLevel,
        is_implicit_default: bool,
    ) -> ReadConcernSupport {
        self.command
            .supports_read_concern(&self.request, level, is_implicit_default)
    }

    fn supports_read_mirroring(&self) -> bool {
        self.command.supports_read_mirroring(&self.request)
    }

    fn append_mirrorable_request(&self, body: &mut Document) {
        self.command.append_mirrorable_request(&self.request, body);
    }

    fn do_check_authorization(&self, op_ctx: &OperationContext) -> CommandResult<()> {
        self.command.do_check_authorization(op_ctx, &self.request)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
