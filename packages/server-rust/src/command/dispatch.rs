//! The standard per-request path.
//!
//! For one request the dispatcher resolves the descriptor, then runs these
//! stages strictly in order: help short-circuit, API version checks, parse,
//! "before" hook, authorization, replication gating, concern negotiation,
//! deadline setup, run, read mirroring, "after" hook. Every failure after
//! resolution becomes a structured failure reply and bumps the descriptor's
//! `failed` counter exactly once. `failCommand` is checked at four of those
//! stages.

use std::sync::Arc;
use std::time::Duration;

use docket_core::{
    Document, OpMsgRequest, ReadConcernArgs, ReadConcernLevel, Value, WriteConcernOptions,
};
use tracing::{debug, warn};

use super::context::{OperationContext, RequestExecutionContext, ServiceContext};
use super::definition::{AllowedOnSecondary, CommandDefinition};
use super::error::{CommandError, CommandResult, DispatchError, ErrorCode};
use super::fail_point::{check_fail_command, FailCheckpoint};
use super::helpers::{append_error_reply, extract_or_append_ok, is_help_request, parse_ns_from_command};
use super::hooks::{HookScope, RunMode};
use super::invocation::Invocation;
use super::reply::{Reply, ReplyBuilder};

const API_VERSION_1: &str = "1";

/// Drives requests through the command framework.
#[derive(Clone)]
pub struct CommandDispatcher {
    service: Arc<ServiceContext>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(service: Arc<ServiceContext>) -> Self {
        Self { service }
    }

    #[must_use]
    pub fn service(&self) -> &Arc<ServiceContext> {
        &self.service
    }

    /// Runs `request` on the calling thread using [`Invocation::run`].
    ///
    /// # Errors
    ///
    /// [`DispatchError::ConnectionClosed`] if the client session ended while
    /// the request ran. Command failures are replies, not errors.
    pub fn dispatch(
        &self,
        op_ctx: Arc<OperationContext>,
        request: OpMsgRequest,
    ) -> Result<Reply, DispatchError> {
        let definition = match self.resolve(&request) {
            Ok(definition) => definition,
            Err(reply) => return Ok(reply),
        };
        let result = self.execute(&op_ctx, &definition, request);
        self.finish(&op_ctx, &definition, result)
    }

    /// Runs `request` using [`Invocation::run_async`].
    ///
    /// # Errors
    ///
    /// Same as [`CommandDispatcher::dispatch`].
    pub async fn dispatch_async(
        &self,
        op_ctx: Arc<OperationContext>,
        request: OpMsgRequest,
    ) -> Result<Reply, DispatchError> {
        let definition = match self.resolve(&request) {
            Ok(definition) => definition,
            Err(reply) => return Ok(reply),
        };
        let result = self.execute_async(&op_ctx, &definition, request).await;
        self.finish(&op_ctx, &definition, result)
    }

    /// Parses and runs a registered command with no hooks, authorization,
    /// concern negotiation, fail points, or counters. For internal callers.
    #[must_use]
    pub fn run_command_directly(&self, op_ctx: &Arc<OperationContext>, request: &OpMsgRequest) -> Reply {
        let result = self
            .service
            .registry()
            .find_command(request.command_name())
            .ok_or_else(|| command_not_found(request.command_name()))
            .and_then(|definition| {
                let mut invocation = definition.parse(op_ctx, request)?;
                let mut reply = ReplyBuilder::new();
                invocation.run(op_ctx, &mut reply)?;
                Ok(reply)
            });
        let mut reply = match result {
            Ok(reply) => reply,
            Err(e) => error_reply(&e),
        };
        extract_or_append_ok(reply.body_mut());
        reply.into_reply()
    }

    // -- stages ---------------------------------------------------------------

    /// Finds the descriptor and counts the execution, or builds the failure
    /// reply for an unknown command.
    fn resolve(&self, request: &OpMsgRequest) -> Result<Arc<CommandDefinition>, Reply> {
        let name = request.command_name();
        if name.is_empty() {
            return Err(error_reply(&CommandError::failed_to_parse("empty command body")).into_reply());
        }
        let registry = self.service.registry();
        let Some(definition) = registry.find_command(name) else {
            registry.increment_unknown_commands();
            metrics::counter!("docket_unknown_commands_total").increment(1);
            debug!(command = name, db = %request.db, "unknown command");
            return Err(error_reply(&command_not_found(name)).into_reply());
        };
        definition.increment_executed();
        Ok(definition)
    }

    fn execute(
        &self,
        op_ctx: &Arc<OperationContext>,
        definition: &Arc<CommandDefinition>,
        request: OpMsgRequest,
    ) -> CommandResult<ReplyBuilder> {
        if is_help_request(request.body.get("help")) {
            return Ok(help_reply(definition));
        }
        let invocation = self.parse(op_ctx, definition, &request)?;
        let rec = Arc::new(RequestExecutionContext::new(
            op_ctx.clone(),
            request,
            definition.clone(),
        ));
        let mut scope = HookScope::enter(self.service.hooks().get(), rec.clone(), invocation, RunMode::Sync);
        self.prepare_run(&rec, scope.invocation())?;
        {
            let mut reply = rec.reply();
            scope.invocation_mut().run(op_ctx, &mut reply)?;
        }
        self.mirror_read(&rec, scope.invocation());
        let ns = scope.invocation().ns();
        drop(scope);
        check_fail_command(op_ctx, definition.name(), &ns, FailCheckpoint::PreReply)?;
        Ok(rec.take_reply())
    }

    async fn execute_async(
        &self,
        op_ctx: &Arc<OperationContext>,
        definition: &Arc<CommandDefinition>,
        request: OpMsgRequest,
    ) -> CommandResult<ReplyBuilder> {
        if is_help_request(request.body.get("help")) {
            return Ok(help_reply(definition));
        }
        let invocation = self.parse(op_ctx, definition, &request)?;
        let rec = Arc::new(RequestExecutionContext::new(
            op_ctx.clone(),
            request,
            definition.clone(),
        ));
        let mut scope = HookScope::enter(self.service.hooks().get(), rec.clone(), invocation, RunMode::Async);
        self.prepare_run(&rec, scope.invocation())?;
        scope.invocation_mut().run_async(rec.clone()).await?;
        self.mirror_read(&rec, scope.invocation());
        let ns = scope.invocation().ns();
        drop(scope);
        check_fail_command(op_ctx, definition.name(), &ns, FailCheckpoint::PreReply)?;
        Ok(rec.take_reply())
    }

    /// Everything up to and including [`CommandDefinition::parse`].
    fn parse(
        &self,
        op_ctx: &OperationContext,
        definition: &Arc<CommandDefinition>,
        request: &OpMsgRequest,
    ) -> CommandResult<Box<dyn Invocation>> {
        let name = definition.name();
        if tracing::enabled!(tracing::Level::DEBUG) {
            let mut logged = request.body.clone();
            definition.snip_for_logging(&mut logged);
            debug!(command = name, op_id = op_ctx.op_id(), body = %logged, "dispatching command");
        }

        check_api_version(definition, &request.body)?;
        let ns = parse_ns_from_command(&request.db, &request.body);
        check_fail_command(op_ctx, name, &ns, FailCheckpoint::PreParse)?;

        let auth = op_ctx.auth();
        if definition.requires_auth() && auth.is_auth_enabled() && !auth.is_authenticated() {
            return Err(CommandError::unauthorized(format!(
                "Command {name} requires authentication"
            )));
        }
        definition.parse(op_ctx, request)
    }

    /// Stages between parse and run. A failure here means `run` is never
    /// reached.
    fn prepare_run(&self, rec: &RequestExecutionContext, invocation: &dyn Invocation) -> CommandResult<()> {
        let op_ctx = rec.op_ctx();
        let definition = rec.definition();
        let request = rec.request();
        let ns = invocation.ns();

        check_fail_command(op_ctx, definition.name(), &ns, FailCheckpoint::PreAuthorization)?;
        invocation.check_authorization(op_ctx, request)?;
        self.check_replication_state(definition, request)?;
        self.negotiate_concerns(op_ctx, invocation, &request.body)?;
        self.apply_max_time(op_ctx, &request.body)?;
        check_fail_command(op_ctx, definition.name(), &ns, FailCheckpoint::PreRun)?;
        op_ctx.check_for_interrupt()?;
        debug!(command = definition.name(), op_id = op_ctx.op_id(), %ns, "running command");
        Ok(())
    }

    fn check_replication_state(
        &self,
        definition: &CommandDefinition,
        request: &OpMsgRequest,
    ) -> CommandResult<()> {
        let replication = self.service.replication();
        if replication.is_recovering() && !definition.maintenance_ok() {
            return Err(CommandError::new(
                ErrorCode::NotPrimaryOrSecondary,
                "node is recovering",
            ));
        }
        if replication.can_accept_writes() {
            return Ok(());
        }
        match definition.secondary_allowed() {
            AllowedOnSecondary::Always => Ok(()),
            AllowedOnSecondary::OptIn if request.secondary_ok() => Ok(()),
            AllowedOnSecondary::OptIn => Err(CommandError::new(
                ErrorCode::NotPrimaryNoSecondaryOk,
                "not primary and secondaryOk=false",
            )),
            AllowedOnSecondary::Never => {
                Err(CommandError::new(ErrorCode::NotWritablePrimary, "not primary"))
            }
        }
    }

    fn negotiate_concerns(
        &self,
        op_ctx: &OperationContext,
        invocation: &dyn Invocation,
        body: &Document,
    ) -> CommandResult<()> {
        if let Some(write) = WriteConcernOptions::from_body(body)? {
            if !invocation.supports_write_concern() {
                return Err(CommandError::invalid_options(
                    "Command does not support writeConcern",
                ));
            }
            op_ctx.set_write_concern(write);
        }

        match ReadConcernArgs::from_body(body)? {
            Some(read) if !read.is_empty() => {
                let support = invocation.supports_read_concern(read.effective_level(), false);
                support.read_concern?;
                if read.after_cluster_time.is_some() && !invocation.allows_after_cluster_time() {
                    return Err(CommandError::invalid_options(
                        "afterClusterTime is not allowed for this command",
                    ));
                }
                count_read_concern(invocation, read.effective_level(), false);
                op_ctx.set_read_concern(read, false);
            }
            _ => {
                if let Some(level) = self.service.config().default_read_concern {
                    let support = invocation.supports_read_concern(level, true);
                    if support.read_concern.is_ok() && support.default_permit.is_ok() {
                        count_read_concern(invocation, level, true);
                        op_ctx.set_read_concern(ReadConcernArgs::with_level(level), true);
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_max_time(&self, op_ctx: &OperationContext, body: &Document) -> CommandResult<()> {
        let max_time_ms = match body.get("maxTimeMS") {
            Some(value) => Some(parse_max_time_ms(value)?),
            None => self.service.config().default_max_time_ms,
        };
        if let Some(ms) = max_time_ms.filter(|ms| *ms > 0) {
            op_ctx.set_deadline_after(Duration::from_millis(ms));
        }
        Ok(())
    }

    /// Hands a mirrorable copy of a successful read to the mirror sink.
    fn mirror_read(&self, rec: &RequestExecutionContext, invocation: &dyn Invocation) {
        let Some(mirror) = self.service.mirror() else {
            return;
        };
        if !invocation.supports_read_mirroring() || !rec.reply().body().get("ok").map_or(true, Value::is_truthy) {
            return;
        }
        let rate = self.service.config().mirror_sampling_rate;
        let sampled = rate >= 1.0 || (rate > 0.0 && rand::random::<f64>() < rate);
        if !sampled {
            return;
        }
        let mut body = Document::new();
        invocation.append_mirrorable_request(&mut body);
        debug!(command = rec.definition().name(), "mirroring read");
        mirror.mirror(&rec.request().db, body);
    }

    /// Normalizes the reply, settles counters, and surfaces a closed session.
    fn finish(
        &self,
        op_ctx: &OperationContext,
        definition: &CommandDefinition,
        result: CommandResult<ReplyBuilder>,
    ) -> Result<Reply, DispatchError> {
        let name = definition.name();
        let (reply, ok) = match result {
            Ok(mut reply) => {
                let ok = extract_or_append_ok(reply.body_mut());
                if !ok {
                    warn!(command = name, op_id = op_ctx.op_id(), reply = %reply.body(), "command returned ok: 0");
                }
                (reply, ok)
            }
            Err(e) => {
                warn!(command = name, op_id = op_ctx.op_id(), code = %e.code, error = %e.message, "command failed");
                (error_reply(&e), false)
            }
        };
        if !ok {
            definition.increment_failed();
        }
        if let Some(outcome) = command_counter_outcome(definition, ok) {
            metrics::counter!("docket_commands_total", "command" => name.to_string(), "outcome" => outcome)
                .increment(1);
        }

        if op_ctx.session_ended() {
            return Err(DispatchError::ConnectionClosed {
                reason: format!("client session ended during {name}"),
            });
        }
        Ok(reply.into_reply())
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

fn command_not_found(name: &str) -> CommandError {
    CommandError::new(ErrorCode::CommandNotFound, format!("no such command: '{name}'"))
}

/// Outcome label for `docket_commands_total`, or `None` for commands that
/// opt out of the command counter.
fn command_counter_outcome(definition: &CommandDefinition, ok: bool) -> Option<&'static str> {
    definition
        .should_affect_command_counter()
        .then_some(if ok { "ok" } else { "error" })
}

fn count_read_concern(invocation: &dyn Invocation, level: ReadConcernLevel, implicit_default: bool) {
    if invocation.definition().should_affect_read_concern_counter() {
        metrics::counter!(
            "docket_read_concern_total",
            "level" => level.as_str(),
            "implicit" => if implicit_default { "true" } else { "false" }
        )
        .increment(1);
    }
}

fn error_reply(error: &CommandError) -> ReplyBuilder {
    let mut reply = ReplyBuilder::new();
    append_error_reply(reply.body_mut(), error);
    reply
}

fn help_reply(definition: &CommandDefinition) -> ReplyBuilder {
    let mut reply = ReplyBuilder::new();
    *reply.body_mut() = definition.generate_help_response();
    reply
}

fn parse_max_time_ms(value: &Value) -> CommandResult<u64> {
    let ms = match value {
        Value::Int(n) => Some(*n),
        #[allow(clippy::cast_possible_truncation)]
        Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    };
    ms.and_then(|n| u64::try_from(n).ok()).ok_or_else(|| {
        CommandError::new(
            ErrorCode::BadValue,
            "maxTimeMS must be a non-negative integer",
        )
    })
}

/// Validates `apiVersion`, `apiStrict`, and `apiDeprecationErrors`.
fn check_api_version(definition: &CommandDefinition, body: &Document) -> CommandResult<()> {
    if definition.accepts_any_api_version_parameters() {
        return Ok(());
    }
    let strict = body.get("apiStrict").is_some_and(Value::is_truthy);
    let deprecation_errors = body.get("apiDeprecationErrors").is_some_and(Value::is_truthy);
    match body.get("apiVersion") {
        None if body.contains_key("apiStrict") || body.contains_key("apiDeprecationErrors") => {
            return Err(CommandError::invalid_options(
                "Provided apiStrict and/or apiDeprecationErrors without passing apiVersion",
            ));
        }
        None => return Ok(()),
        Some(v) if v.as_str() == Some(API_VERSION_1) => {}
        Some(_) => {
            return Err(CommandError::new(
                ErrorCode::APIVersionError,
                "API version must be \"1\"",
            ));
        }
    }
    let name = definition.name();
    if strict && !definition.api_versions().contains(&API_VERSION_1) {
        return Err(CommandError::new(
            ErrorCode::APIStrictError,
            format!("Provided apiStrict:true, but the command {name} is not in API Version 1"),
        ));
    }
    if deprecation_errors && definition.deprecated_api_versions().contains(&API_VERSION_1) {
        return Err(CommandError::new(
            ErrorCode::APIDeprecationError,
            format!(
                "Provided apiDeprecationErrors:true, but the command {name} is deprecated in API Version 1"
            ),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use docket_core::{doc, NamespaceString, Principal, ReadConcernLevel, RequestContext};
    use parking_lot::Mutex;

    use super::*;
    use crate::command::auth::PrincipalAuthorization;
    use crate::command::config::ServerConfig;
    use crate::command::definition::{Command, CommandAttributes};
    use crate::command::fail_point::{FailCommandData, FailPointMode, FAIL_COMMAND};
    use crate::command::hooks::tests::RecordingHooks;
    use crate::command::invocation::ReadConcernSupport;
    use crate::command::registry::CommandRegistry;
    use crate::commands::ping::PingCommand;
    use crate::traits::{ReplicationStateView, RequestMirror};

    /// Configurable command recording which stages reached it.
    #[derive(Clone, Default)]
    struct Stub {
        log: Arc<Mutex<Vec<&'static str>>>,
        fail_run: bool,
        reply_ok_zero: bool,
        write_concern: bool,
        any_read_concern: bool,
        mirror: bool,
        suspend: bool,
        attributes: Option<CommandAttributes>,
    }

    impl Command for Stub {
        fn attributes(&self) -> CommandAttributes {
            self.attributes
                .clone()
                .unwrap_or_else(|| CommandAttributes::new(AllowedOnSecondary::Always))
        }

        fn parse(
            &self,
            definition: &Arc<CommandDefinition>,
            _op_ctx: &OperationContext,
            request: &OpMsgRequest,
        ) -> CommandResult<Box<dyn Invocation>> {
            Ok(Box::new(StubInvocation {
                definition: definition.clone(),
                stub: self.clone(),
                db: request.db.clone(),
            }))
        }
    }

    struct StubInvocation {
        definition: Arc<CommandDefinition>,
        stub: Stub,
        db: String,
    }

    impl StubInvocation {
        fn body(&self, reply: &mut ReplyBuilder) -> CommandResult<()> {
            self.stub.log.lock().push("run");
            if self.stub.fail_run {
                return Err(CommandError::new(ErrorCode::BadValue, "boom"));
            }
            reply.body_mut().append("n", 1);
            if self.stub.reply_ok_zero {
                reply.body_mut().append("ok", 0.0);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Invocation for StubInvocation {
        fn definition(&self) -> &Arc<CommandDefinition> {
            &self.definition
        }

        fn run(&mut self, _op_ctx: &OperationContext, reply: &mut ReplyBuilder) -> CommandResult<()> {
            self.body(reply)
        }

        async fn run_async(&mut self, rec: Arc<RequestExecutionContext>) -> CommandResult<()> {
            if self.stub.suspend {
                self.stub.log.lock().push("suspend");
                tokio::task::yield_now().await;
            }
            let mut reply = rec.reply();
            self.body(&mut reply)
        }

        fn ns(&self) -> NamespaceString {
            NamespaceString::new(self.db.as_str(), "items")
        }

        fn supports_write_concern(&self) -> bool {
            self.stub.write_concern
        }

        fn supports_read_concern(
            &self,
            level: ReadConcernLevel,
            _is_implicit_default: bool,
        ) -> ReadConcernSupport {
            if self.stub.any_read_concern {
                ReadConcernSupport::all_supported()
            } else {
                ReadConcernSupport::local_only(level)
            }
        }

        fn supports_read_mirroring(&self) -> bool {
            self.stub.mirror
        }

        fn append_mirrorable_request(&self, body: &mut Document) {
            body.append(self.definition.name(), "items");
        }

        fn do_check_authorization(&self, _op_ctx: &OperationContext) -> CommandResult<()> {
            self.stub.log.lock().push("auth");
            Ok(())
        }
    }

    struct Secondary;

    impl ReplicationStateView for Secondary {
        fn can_accept_writes(&self) -> bool {
            false
        }

        fn is_recovering(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingMirror {
        sent: Mutex<Vec<(String, Document)>>,
    }

    impl RequestMirror for RecordingMirror {
        fn mirror(&self, db: &str, request: Document) {
            self.sent.lock().push((db.to_string(), request));
        }
    }

    fn service_with(config: ServerConfig, stubs: Vec<(&str, Stub)>) -> ServiceContext {
        let mut registry = CommandRegistry::new();
        registry.register_typed(PingCommand, &[]);
        for (name, stub) in stubs {
            registry.register(name, &[], stub);
        }
        ServiceContext::new(config, registry)
    }

    fn dispatcher(service: ServiceContext) -> CommandDispatcher {
        CommandDispatcher::new(Arc::new(service))
    }

    fn op_ctx(d: &CommandDispatcher) -> Arc<OperationContext> {
        Arc::new(OperationContext::new(d.service().clone(), RequestContext::default()))
    }

    fn run(d: &CommandDispatcher, db: &str, body: Document) -> Reply {
        d.dispatch(op_ctx(d), OpMsgRequest::new(db, body)).unwrap()
    }

    fn counters(d: &CommandDispatcher, name: &str) -> (u64, u64) {
        let def = d.service().registry().find_command(name).unwrap();
        (def.executed(), def.failed())
    }

    // -- resolution -------------------------------------------------------------

    #[test]
    fn ping_succeeds_and_counts() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![]));
        assert_eq!(counters(&d, "ping"), (0, 0));
        let reply = run(&d, "admin", doc! { "ping" => 1 });
        assert!(reply.ok());
        assert_eq!(reply.body.get("ok"), Some(&Value::Float(1.0)));
        assert_eq!(counters(&d, "ping"), (1, 0));
    }

    #[test]
    fn typed_command_runs_under_its_alias() {
        let mut registry = CommandRegistry::new();
        registry.register_typed(PingCommand, &["pingAlias"]);
        let d = dispatcher(ServiceContext::new(ServerConfig::default(), registry));

        let reply = run(&d, "admin", doc! { "pingAlias" => 1 });
        assert!(reply.ok(), "{:?}", reply.body);
        let reply = run(&d, "admin", doc! { "ping" => 1, "comment" => "hi" });
        assert!(reply.ok(), "{:?}", reply.body);
        assert_eq!(counters(&d, "pingAlias"), (2, 0));
    }

    #[test]
    fn command_counter_respects_opt_out() {
        let counted = service_with(ServerConfig::default(), vec![]);
        let ping = counted.registry().find_command("ping").unwrap();
        assert_eq!(command_counter_outcome(&ping, true), Some("ok"));
        assert_eq!(command_counter_outcome(&ping, false), Some("error"));

        let quiet = Stub {
            attributes: Some(CommandAttributes {
                should_affect_command_counter: false,
                ..CommandAttributes::new(AllowedOnSecondary::Always)
            }),
            ..Stub::default()
        };
        let d = dispatcher(service_with(ServerConfig::default(), vec![("quiet", quiet)]));
        let def = d.service().registry().find_command("quiet").unwrap();
        assert_eq!(command_counter_outcome(&def, true), None);
        assert!(run(&d, "test", doc! { "quiet" => 1 }).ok());
        assert_eq!(counters(&d, "quiet"), (1, 0));
    }

    #[test]
    fn lookup_is_case_sensitive_and_counts_unknown() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![]));
        let reply = run(&d, "admin", doc! { "Ping" => 1 });
        assert!(!reply.ok());
        assert_eq!(reply.code(), Some(59));
        assert_eq!(reply.errmsg(), Some("no such command: 'Ping'"));
        assert_eq!(d.service().registry().unknown_commands(), 1);
        assert_eq!(counters(&d, "ping"), (0, 0));
    }

    #[test]
    fn empty_body_is_a_parse_failure() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![]));
        let request = OpMsgRequest {
            db: "admin".into(),
            body: Document::new(),
            sequences: Vec::new(),
        };
        let reply = d.dispatch(op_ctx(&d), request).unwrap();
        assert_eq!(reply.code(), Some(9));
    }

    #[test]
    fn help_skips_parse_and_run() {
        let stub = Stub::default();
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub.clone())]));
        let reply = run(&d, "test", doc! { "stub" => 1, "help" => true });
        assert_eq!(reply.body.get_str("help"), Some("help for: stub no help defined"));
        assert!(stub.log.lock().is_empty());
    }

    // -- counters and hooks -----------------------------------------------------

    #[test]
    fn failing_run_counts_once_and_pairs_hooks() {
        let stub = Stub {
            fail_run: true,
            ..Stub::default()
        };
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub)]));
        let hooks = Arc::new(RecordingHooks::default());
        d.service().set_invocation_hooks(hooks.clone());

        let reply = run(&d, "test", doc! { "stub" => 1 });
        assert!(!reply.ok());
        assert_eq!(reply.code(), Some(2));
        assert_eq!(reply.body.get_str("codeName"), Some("BadValue"));
        assert_eq!(reply.body.get("n"), None);
        assert_eq!(counters(&d, "stub"), (1, 1));
        assert_eq!(*hooks.log.lock(), vec!["before:stub", "after:stub"]);
    }

    #[test]
    fn ok_zero_reply_counts_as_failure() {
        let stub = Stub {
            reply_ok_zero: true,
            ..Stub::default()
        };
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub)]));
        let reply = run(&d, "test", doc! { "stub" => 1 });
        assert!(!reply.ok());
        assert_eq!(reply.body.get("n"), Some(&Value::Int(1)));
        assert_eq!(counters(&d, "stub"), (1, 1));
    }

    #[test]
    fn parse_failure_counts_executed_and_failed() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![]));
        let reply = run(&d, "admin", doc! { "ping" => 1, "bogus" => true });
        assert_eq!(reply.code(), Some(9));
        assert_eq!(counters(&d, "ping"), (1, 1));
    }

    // -- authorization ------------------------------------------------------------

    #[test]
    fn authorization_runs_once_before_run() {
        let stub = Stub::default();
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub.clone())]));
        let session = PrincipalAuthorization::new(Some(Principal::new("ann", &["root"])));
        let op_ctx = Arc::new(
            OperationContext::new(d.service().clone(), RequestContext::default()).with_auth(Arc::new(session)),
        );
        let reply = d
            .dispatch(op_ctx, OpMsgRequest::new("test", doc! { "stub" => 1 }))
            .unwrap();
        assert!(reply.ok());
        assert_eq!(*stub.log.lock(), vec!["auth", "run"]);
    }

    #[test]
    fn unauthenticated_client_is_rejected_before_parse() {
        let stub = Stub::default();
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub.clone())]));
        let op_ctx = Arc::new(
            OperationContext::new(d.service().clone(), RequestContext::default())
                .with_auth(Arc::new(PrincipalAuthorization::new(None))),
        );
        let reply = d
            .dispatch(op_ctx, OpMsgRequest::new("test", doc! { "stub" => 1 }))
            .unwrap();
        assert_eq!(reply.code(), Some(13));
        assert_eq!(reply.errmsg(), Some("Command stub requires authentication"));
        assert!(stub.log.lock().is_empty());
    }

    // -- concerns -------------------------------------------------------------------

    #[test]
    fn unsupported_write_concern_never_runs() {
        let stub = Stub::default();
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub.clone())]));
        let hooks = Arc::new(RecordingHooks::default());
        d.service().set_invocation_hooks(hooks.clone());

        let reply = run(&d, "test", doc! { "stub" => 1, "writeConcern" => doc! { "w" => 1 } });
        assert_eq!(reply.code(), Some(72));
        assert_eq!(reply.errmsg(), Some("Command does not support writeConcern"));
        assert!(!stub.log.lock().contains(&"run"));
        assert_eq!(*hooks.log.lock(), vec!["before:stub", "after:stub"]);
        assert_eq!(counters(&d, "stub"), (1, 1));
    }

    #[test]
    fn supported_write_concern_is_recorded() {
        let stub = Stub {
            write_concern: true,
            ..Stub::default()
        };
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub)]));
        let op_ctx = op_ctx(&d);
        let body = doc! { "stub" => 1, "writeConcern" => doc! { "w" => "majority" } };
        let reply = d.dispatch(op_ctx.clone(), OpMsgRequest::new("test", body)).unwrap();
        assert!(reply.ok());
        assert!(op_ctx.concerns().write.unwrap().is_majority());
    }

    #[test]
    fn unsupported_read_concern_never_runs() {
        let stub = Stub::default();
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub.clone())]));
        let reply = run(
            &d,
            "test",
            doc! { "stub" => 1, "readConcern" => doc! { "level" => "majority" } },
        );
        assert_eq!(reply.code(), Some(72));
        assert!(!stub.log.lock().contains(&"run"));
    }

    #[test]
    fn default_read_concern_applies_only_when_permitted() {
        let config = ServerConfig {
            default_read_concern: Some(ReadConcernLevel::Majority),
            ..ServerConfig::default()
        };
        let permissive = Stub {
            any_read_concern: true,
            ..Stub::default()
        };
        let d = dispatcher(service_with(
            config,
            vec![("strict", Stub::default()), ("permissive", permissive)],
        ));

        let op_ctx_strict = op_ctx(&d);
        let reply = d
            .dispatch(op_ctx_strict.clone(), OpMsgRequest::new("test", doc! { "strict" => 1 }))
            .unwrap();
        assert!(reply.ok());
        assert!(op_ctx_strict.concerns().read.is_none());

        let op_ctx_permissive = op_ctx(&d);
        d.dispatch(op_ctx_permissive.clone(), OpMsgRequest::new("test", doc! { "permissive" => 1 }))
            .unwrap();
        let concerns = op_ctx_permissive.concerns();
        assert_eq!(concerns.read.unwrap().level, Some(ReadConcernLevel::Majority));
        assert!(concerns.read_is_implicit_default);
    }

    // -- deadlines and gating ------------------------------------------------------

    #[test]
    fn negative_max_time_is_rejected() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![]));
        let reply = run(&d, "admin", doc! { "ping" => 1, "maxTimeMS" => -5 });
        assert_eq!(reply.code(), Some(2));
    }

    #[test]
    fn max_time_sets_deadline() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![]));
        let op_ctx = op_ctx(&d);
        d.dispatch(op_ctx.clone(), OpMsgRequest::new("admin", doc! { "ping" => 1, "maxTimeMS" => 60_000 }))
            .unwrap();
        assert!(op_ctx.deadline().is_some());
    }

    #[test]
    fn secondary_gating_follows_attributes() {
        let never = Stub {
            attributes: Some(CommandAttributes::new(AllowedOnSecondary::Never)),
            ..Stub::default()
        };
        let opt_in = Stub {
            attributes: Some(CommandAttributes::new(AllowedOnSecondary::OptIn)),
            ..Stub::default()
        };
        let service = service_with(ServerConfig::default(), vec![("never", never), ("optIn", opt_in)])
            .with_replication(Arc::new(Secondary));
        let d = dispatcher(service);

        assert_eq!(run(&d, "test", doc! { "never" => 1 }).code(), Some(10107));
        assert_eq!(run(&d, "test", doc! { "optIn" => 1 }).code(), Some(13435));
        let reply = run(
            &d,
            "test",
            doc! { "optIn" => 1, "$readPreference" => doc! { "mode" => "secondaryPreferred" } },
        );
        assert!(reply.ok());
        assert!(run(&d, "admin", doc! { "ping" => 1 }).ok());
    }

    #[test]
    fn retryable_failures_are_labelled() {
        let never = Stub {
            attributes: Some(CommandAttributes::new(AllowedOnSecondary::Never)),
            ..Stub::default()
        };
        let service = service_with(ServerConfig::default(), vec![("never", never)])
            .with_replication(Arc::new(Secondary));
        let reply = run(&dispatcher(service), "test", doc! { "never" => 1 });
        assert_eq!(
            reply.body.get("errorLabels"),
            Some(&Value::Array(vec!["RetryableError".into()]))
        );
    }

    // -- API versioning -------------------------------------------------------------

    #[test]
    fn api_parameters_are_validated() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![]));
        let reply = run(&d, "admin", doc! { "ping" => 1, "apiVersion" => "2" });
        assert_eq!(reply.code(), Some(322));
        let reply = run(&d, "admin", doc! { "ping" => 1, "apiStrict" => true });
        assert_eq!(reply.code(), Some(72));
        assert!(run(&d, "admin", doc! { "ping" => 1, "apiVersion" => "1", "apiStrict" => true }).ok());
    }

    #[test]
    fn api_strict_rejects_commands_outside_version() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", Stub::default())]));
        let reply = run(&d, "test", doc! { "stub" => 1, "apiVersion" => "1", "apiStrict" => true });
        assert_eq!(reply.code(), Some(323));
    }

    // -- fault injection ---------------------------------------------------------------

    fn arm_fail_command(d: &CommandDispatcher, data: &FailCommandData) {
        d.service()
            .fail_points()
            .find(FAIL_COMMAND)
            .unwrap()
            .set_mode(FailPointMode::AlwaysOn, docket_core::to_document(data).unwrap());
    }

    #[test]
    fn fail_command_hits_insert_but_not_find() {
        let insert = Stub::default();
        let find = Stub::default();
        let d = dispatcher(service_with(
            ServerConfig::default(),
            vec![("insert", insert.clone()), ("find", find.clone())],
        ));
        arm_fail_command(
            &d,
            &FailCommandData {
                fail_commands: vec!["insert".into()],
                error_code: Some(11600),
                ..FailCommandData::default()
            },
        );

        let reply = run(&d, "test", doc! { "insert" => "items" });
        assert_eq!(reply.code(), Some(11600));
        assert_eq!(reply.errmsg(), Some("Failing command due to 'failCommand' failpoint"));
        assert!(!insert.log.lock().contains(&"run"));
        assert_eq!(counters(&d, "insert"), (1, 1));

        assert!(run(&d, "test", doc! { "find" => "items" }).ok());
        assert!(find.log.lock().contains(&"run"));
    }

    #[test]
    fn fail_command_respects_checkpoint() {
        let stub = Stub::default();
        let d = dispatcher(service_with(ServerConfig::default(), vec![("insert", stub.clone())]));
        arm_fail_command(
            &d,
            &FailCommandData {
                fail_commands: vec!["insert".into()],
                error_code: Some(2),
                fail_at: FailCheckpoint::PreReply,
                ..FailCommandData::default()
            },
        );
        let reply = run(&d, "test", doc! { "insert" => "items" });
        assert_eq!(reply.code(), Some(2));
        assert!(stub.log.lock().contains(&"run"));
    }

    #[test]
    fn close_connection_surfaces_as_dispatch_error() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![("find", Stub::default())]));
        arm_fail_command(
            &d,
            &FailCommandData {
                fail_commands: vec!["find".into()],
                close_connection: true,
                ..FailCommandData::default()
            },
        );
        let err = d
            .dispatch(op_ctx(&d), OpMsgRequest::new("test", doc! { "find" => "items" }))
            .unwrap_err();
        assert!(matches!(err, DispatchError::ConnectionClosed { .. }));
        assert_eq!(counters(&d, "find"), (1, 1));
    }

    // -- async path ----------------------------------------------------------------------

    #[tokio::test]
    async fn async_path_uses_async_hooks_and_override() {
        let stub = Stub {
            suspend: true,
            ..Stub::default()
        };
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub.clone())]));
        let hooks = Arc::new(RecordingHooks::default());
        d.service().set_invocation_hooks(hooks.clone());

        let reply = d
            .dispatch_async(op_ctx(&d), OpMsgRequest::new("test", doc! { "stub" => 1 }))
            .await
            .unwrap();
        assert!(reply.ok());
        assert_eq!(*stub.log.lock(), vec!["suspend", "run"]);
        assert_eq!(*hooks.log.lock(), vec!["before_async:stub", "after_async:stub"]);
    }

    #[tokio::test]
    async fn async_default_runs_inline() {
        let d = dispatcher(service_with(ServerConfig::default(), vec![]));
        let reply = d
            .dispatch_async(op_ctx(&d), OpMsgRequest::new("admin", doc! { "ping" => 1 }))
            .await
            .unwrap();
        assert!(reply.ok());
        assert_eq!(counters(&d, "ping"), (1, 0));
    }

    // -- mirroring and direct runs -------------------------------------------------------

    #[test]
    fn mirror_capable_reads_are_mirrored() {
        let config = ServerConfig {
            mirror_sampling_rate: 1.0,
            ..ServerConfig::default()
        };
        let stub = Stub {
            mirror: true,
            ..Stub::default()
        };
        let mirror = Arc::new(RecordingMirror::default());
        let service = service_with(config, vec![("find", stub)]).with_mirror(mirror.clone());
        let d = dispatcher(service);
        assert!(run(&d, "shop", doc! { "find" => "items" }).ok());
        assert!(run(&d, "admin", doc! { "ping" => 1 }).ok());
        assert_eq!(
            *mirror.sent.lock(),
            vec![("shop".to_string(), doc! { "find" => "items" })]
        );
    }

    #[test]
    fn zero_sampling_rate_mirrors_nothing() {
        let stub = Stub {
            mirror: true,
            ..Stub::default()
        };
        let mirror = Arc::new(RecordingMirror::default());
        let service = service_with(ServerConfig::default(), vec![("find", stub)]).with_mirror(mirror.clone());
        assert!(run(&dispatcher(service), "shop", doc! { "find" => "items" }).ok());
        assert!(mirror.sent.lock().is_empty());
    }

    #[test]
    fn direct_run_skips_hooks_auth_and_counters() {
        let stub = Stub::default();
        let d = dispatcher(service_with(ServerConfig::default(), vec![("stub", stub.clone())]));
        let hooks = Arc::new(RecordingHooks::default());
        d.service().set_invocation_hooks(hooks.clone());

        let reply = d.run_command_directly(&op_ctx(&d), &OpMsgRequest::new("test", doc! { "stub" => 1 }));
        assert!(reply.ok());
        assert_eq!(*stub.log.lock(), vec!["run"]);
        assert!(hooks.log.lock().is_empty());
        assert_eq!(counters(&d, "stub"), (0, 0));

        let reply = d.run_command_directly(&op_ctx(&d), &OpMsgRequest::new("test", doc! { "nope" => 1 }));
        assert_eq!(reply.code(), Some(59));
    }
}
