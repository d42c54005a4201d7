//! Command descriptors.
//!
//! A [`CommandDefinition`] is the immutable, process-lifetime metadata for one
//! command: name, aliases, capability attributes, and execution counters. It
//! owns the [`Command`] implementation that parses requests into
//! [`Invocation`]s. Definitions live in the registry behind an `Arc` and are
//! never removed, so an invocation's reference stays valid for its lifetime.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use docket_core::{doc, Document, OpMsgRequest};

use super::context::OperationContext;
use super::error::CommandResult;
use super::invocation::{ExplainVerbosity, Invocation};

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Whether a command may run on a node that is not primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedOnSecondary {
    Always,
    Never,
    /// Only when the client's read preference permits secondaries.
    OptIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadWriteType {
    Command,
    Read,
    Write,
    Transaction,
}

/// Operation category used for per-op counters and profiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    Command,
    Query,
    GetMore,
    Insert,
    Update,
    Delete,
    KillCursors,
}

/// Capabilities captured once at registration.
///
/// Only `secondary_allowed` has no default; everything else starts from
/// [`CommandAttributes::new`] and is overridden with struct update syntax.
#[derive(Debug, Clone)]
pub struct CommandAttributes {
    pub secondary_allowed: AllowedOnSecondary,
    /// Must be run against the `admin` database.
    pub admin_only: bool,
    pub requires_auth: bool,
    pub read_write_type: ReadWriteType,
    pub logical_op: LogicalOp,
    /// API versions the command belongs to.
    pub api_versions: Vec<&'static str>,
    pub deprecated_api_versions: Vec<&'static str>,
    /// Skips API version checks entirely (e.g. handshake commands).
    pub accepts_any_api_version_parameters: bool,
    /// When auth is disabled, only local clients may run the command.
    /// Requires `admin_only`.
    pub local_host_only_if_no_auth: bool,
    /// Running the command puts the node into maintenance mode. Read by the
    /// replication collaborator, not by dispatch.
    pub maintenance_mode: bool,
    /// May run while the node is in maintenance/recovery.
    pub maintenance_ok: bool,
    pub help: &'static str,
    /// Body field removed before the request is logged.
    pub sensitive_field_name: Option<&'static str>,
    /// Counted in `docket_commands_total`.
    pub should_affect_command_counter: bool,
    /// Negotiated read concerns are counted in `docket_read_concern_total`.
    pub should_affect_read_concern_counter: bool,
    /// Metadata for resource accounting outside the dispatcher.
    pub collects_resource_consumption_metrics: bool,
    /// Metadata for session handling outside the dispatcher.
    pub attach_logical_sessions_to_op_ctx: bool,
    pub audit_authorization_failure: bool,
    /// Bytes to hold back from the reply size limit for trailing metadata.
    /// Applied by the transport when it sizes replies.
    pub reserve_bytes_for_reply: usize,
}

impl CommandAttributes {
    #[must_use]
    pub fn new(secondary_allowed: AllowedOnSecondary) -> Self {
        Self {
            secondary_allowed,
            admin_only: false,
            requires_auth: true,
            read_write_type: ReadWriteType::Command,
            logical_op: LogicalOp::Command,
            api_versions: Vec::new(),
            deprecated_api_versions: Vec::new(),
            accepts_any_api_version_parameters: false,
            local_host_only_if_no_auth: false,
            maintenance_mode: false,
            maintenance_ok: true,
            help: "no help defined",
            sensitive_field_name: None,
            should_affect_command_counter: true,
            should_affect_read_concern_counter: false,
            collects_resource_consumption_metrics: false,
            attach_logical_sessions_to_op_ctx: true,
            audit_authorization_failure: true,
            reserve_bytes_for_reply: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Command trait
// ---------------------------------------------------------------------------

/// Parses requests for one command into invocations.
///
/// Most commands implement one of the adapter shapes instead
/// ([`TypedCommand`](super::typed::TypedCommand),
/// [`BasicCommand`](super::basic::BasicCommand),
/// [`ErrmsgCommand`](super::basic::ErrmsgCommand)) and register through the
/// matching registry helper.
pub trait Command: Send + Sync + 'static {
    fn attributes(&self) -> CommandAttributes;

    /// Builds an invocation for `request`.
    ///
    /// # Errors
    ///
    /// `FailedToParse` or `InvalidOptions` on malformed input.
    fn parse(
        &self,
        definition: &Arc<CommandDefinition>,
        op_ctx: &OperationContext,
        request: &OpMsgRequest,
    ) -> CommandResult<Box<dyn Invocation>>;

    /// Builds an invocation that will be explained rather than run.
    ///
    /// # Errors
    ///
    /// Same as [`Command::parse`].
    fn parse_for_explain(
        &self,
        definition: &Arc<CommandDefinition>,
        op_ctx: &OperationContext,
        request: &OpMsgRequest,
        _verbosity: ExplainVerbosity,
    ) -> CommandResult<Box<dyn Invocation>> {
        self.parse(definition, op_ctx, request)
    }
}

// ---------------------------------------------------------------------------
// CommandDefinition
// ---------------------------------------------------------------------------

/// Registered metadata for one command.
pub struct CommandDefinition {
    name: String,
    aliases: Vec<String>,
    attributes: CommandAttributes,
    command: Box<dyn Command>,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl CommandDefinition {
    /// # Panics
    ///
    /// Panics if the command sets `local_host_only_if_no_auth` without
    /// `admin_only`.
    #[must_use]
    pub fn new(name: impl Into<String>, aliases: &[&str], command: Box<dyn Command>) -> Self {
        let name = name.into();
        let attributes = command.attributes();
        assert!(
            !attributes.local_host_only_if_no_auth || attributes.admin_only,
            "command '{name}' sets local_host_only_if_no_auth but is not admin_only"
        );
        Self {
            name,
            aliases: aliases.iter().map(ToString::to_string).collect(),
            attributes,
            command,
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    #[must_use]
    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a == alias)
    }

    #[must_use]
    pub fn attributes(&self) -> &CommandAttributes {
        &self.attributes
    }

    #[must_use]
    pub fn admin_only(&self) -> bool {
        self.attributes.admin_only
    }

    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.attributes.requires_auth
    }

    #[must_use]
    pub fn secondary_allowed(&self) -> AllowedOnSecondary {
        self.attributes.secondary_allowed
    }

    /// Resolves [`AllowedOnSecondary::OptIn`] against the client's preference.
    #[must_use]
    pub fn allowed_on_secondary(&self, secondary_ok: bool) -> bool {
        match self.attributes.secondary_allowed {
            AllowedOnSecondary::Always => true,
            AllowedOnSecondary::Never => false,
            AllowedOnSecondary::OptIn => secondary_ok,
        }
    }

    #[must_use]
    pub fn read_write_type(&self) -> ReadWriteType {
        self.attributes.read_write_type
    }

    #[must_use]
    pub fn logical_op(&self) -> LogicalOp {
        self.attributes.logical_op
    }

    #[must_use]
    pub fn api_versions(&self) -> &[&'static str] {
        &self.attributes.api_versions
    }

    #[must_use]
    pub fn deprecated_api_versions(&self) -> &[&'static str] {
        &self.attributes.deprecated_api_versions
    }

    #[must_use]
    pub fn accepts_any_api_version_parameters(&self) -> bool {
        self.attributes.accepts_any_api_version_parameters
    }

    #[must_use]
    pub fn local_host_only_if_no_auth(&self) -> bool {
        self.attributes.local_host_only_if_no_auth
    }

    #[must_use]
    pub fn maintenance_mode(&self) -> bool {
        self.attributes.maintenance_mode
    }

    #[must_use]
    pub fn maintenance_ok(&self) -> bool {
        self.attributes.maintenance_ok
    }

    #[must_use]
    pub fn help(&self) -> &'static str {
        self.attributes.help
    }

    #[must_use]
    pub fn should_affect_command_counter(&self) -> bool {
        self.attributes.should_affect_command_counter
    }

    #[must_use]
    pub fn should_affect_read_concern_counter(&self) -> bool {
        self.attributes.should_affect_read_concern_counter
    }

    #[must_use]
    pub fn audit_authorization_failure(&self) -> bool {
        self.attributes.audit_authorization_failure
    }

    /// Strips the sensitive field, if any, from a body about to be logged.
    pub fn snip_for_logging(&self, body: &mut Document) {
        if let Some(field) = self.attributes.sensitive_field_name {
            body.remove(field);
        }
    }

    /// Reply to `{<name>: 1, help: true}`.
    #[must_use]
    pub fn generate_help_response(&self) -> Document {
        doc! {
            "help" => format!("help for: {} {}", self.name, self.attributes.help),
            "lockType" => 0,
            "ok" => 1.0,
        }
    }

    /// Parses `request` into an invocation bound to this definition.
    ///
    /// # Errors
    ///
    /// Propagates the command's parse failure.
    pub fn parse(
        self: &Arc<Self>,
        op_ctx: &OperationContext,
        request: &OpMsgRequest,
    ) -> CommandResult<Box<dyn Invocation>> {
        self.command.parse(self, op_ctx, request)
    }

    /// Parses `request` for explain.
    ///
    /// # Errors
    ///
    /// Propagates the command's parse failure.
    pub fn parse_for_explain(
        self: &Arc<Self>,
        op_ctx: &OperationContext,
        request: &OpMsgRequest,
        verbosity: ExplainVerbosity,
    ) -> CommandResult<Box<dyn Invocation>> {
        self.command
            .parse_for_explain(self, op_ctx, request, verbosity)
    }

    pub fn increment_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("attributes", &self.attributes)
            .field("executed", &self.executed())
            .field("failed", &self.failed())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
