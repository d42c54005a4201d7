//! `explain`: wraps another command and reports how it would execute.
//!
//! The nested command is resolved and parsed through its own definition's
//! [`parse_for_explain`](crate::command::definition::CommandDefinition::parse_for_explain),
//! so authorization, namespace, and read concern support all come from the
//! inner invocation.

use std::sync::Arc;

use async_trait::async_trait;
use docket_core::request::DB_FIELD;
use docket_core::{NamespaceString, OpMsgRequest, ReadConcernLevel, Value};

use crate::command::context::OperationContext;
use crate::command::definition::{AllowedOnSecondary, Command, CommandAttributes, CommandDefinition};
use crate::command::error::{CommandError, CommandResult, ErrorCode};
use crate::command::helpers::uassert_no_document_sequences;
use crate::command::invocation::{ExplainVerbosity, Invocation, ReadConcernSupport};
use crate::command::reply::ReplyBuilder;

pub const EXPLAIN: &str = "explain";

pub struct ExplainCommand;

impl Command for ExplainCommand {
    fn attributes(&self) -> CommandAttributes {
        CommandAttributes {
            help: "explain database reads and writes",
            ..CommandAttributes::new(AllowedOnSecondary::OptIn)
        }
    }

    fn parse(
        &self,
        definition: &Arc<CommandDefinition>,
        op_ctx: &OperationContext,
        request: &OpMsgRequest,
    ) -> CommandResult<Box<dyn Invocation>> {
        uassert_no_document_sequences(EXPLAIN, request)?;

        let Some(Value::Map(inner_body)) = request.first_value() else {
            return Err(CommandError::failed_to_parse(
                "explain command requires a nested object",
            ));
        };
        let verbosity = parse_verbosity(request.body.get("verbosity"))?;

        if let Some(inner_db) = inner_body.get(DB_FIELD) {
            if inner_db.as_str() != Some(request.db.as_str()) {
                return Err(CommandError::new(
                    ErrorCode::InvalidNamespace,
                    format!(
                        "Mismatched $db in explain command. Expected {} but got {inner_db:?}",
                        request.db
                    ),
                ));
            }
        }
        let inner_request = OpMsgRequest::new(request.db.as_str(), inner_body.clone());

        let name = inner_request.command_name();
        let inner_def = op_ctx
            .service()
            .registry()
            .find_command(name)
            .ok_or_else(|| {
                CommandError::new(
                    ErrorCode::CommandNotFound,
                    format!("Explain failed due to unknown command: {name}"),
                )
            })?;
        let inner = inner_def.parse_for_explain(op_ctx, &inner_request, verbosity)?;

        Ok(Box::new(ExplainInvocation {
            definition: definition.clone(),
            inner,
            inner_request,
            verbosity,
        }))
    }
}

/// Missing verbosity means the most detailed level.
fn parse_verbosity(value: Option<&Value>) -> CommandResult<ExplainVerbosity> {
    match value {
        None => Ok(ExplainVerbosity::AllPlansExecution),
        Some(Value::String(s)) => ExplainVerbosity::parse(s).ok_or_else(|| {
            CommandError::failed_to_parse(
                "verbosity string must be one of {'queryPlanner', 'executionStats', 'allPlansExecution'}",
            )
        }),
        Some(other) => Err(CommandError::failed_to_parse(format!(
            "explain verbosity must be a string, not {}",
            other.type_name()
        ))),
    }
}

struct ExplainInvocation {
    definition: Arc<CommandDefinition>,
    inner: Box<dyn Invocation>,
    inner_request: OpMsgRequest,
    verbosity: ExplainVerbosity,
}

#[async_trait]
impl Invocation for ExplainInvocation {
    fn definition(&self) -> &Arc<CommandDefinition> {
        &self.definition
    }

    fn run(&mut self, op_ctx: &OperationContext, reply: &mut ReplyBuilder) -> CommandResult<()> {
        self.inner.explain(op_ctx, self.verbosity, reply)
    }

    fn ns(&self) -> NamespaceString {
        self.inner.ns()
    }

    fn supports_write_concern(&self) -> bool {
        false
    }

    fn supports_read_concern(
        &self,
        level: ReadConcernLevel,
        is_implicit_default: bool,
    ) -> ReadConcernSupport {
        self.inner.supports_read_concern(level, is_implicit_default)
    }

    fn allows_after_cluster_time(&self) -> bool {
        self.inner.allows_after_cluster_time()
    }

    fn delegates_authorization(&self) -> bool {
        true
    }

    fn do_check_authorization(&self, op_ctx: &OperationContext) -> CommandResult<()> {
        self.inner.check_authorization(op_ctx, &self.inner_request)
    }
}

#[cfg(test)]
mod tests {
    use docket_core::{doc, Document, RequestContext};

    use super::*;
    use crate::command::basic::BasicCommand;
    use crate::command::config::ServerConfig;
    use crate::command::context::ServiceContext;
    use crate::command::registry::CommandRegistry;
    use crate::commands::ping::PingCommand;

    /// A read command whose explain output names its namespace.
    struct ScanCommand;

    impl BasicCommand for ScanCommand {
        const NAME: &'static str = "scan";

        fn attributes(&self) -> CommandAttributes {
            CommandAttributes::new(AllowedOnSecondary::OptIn)
        }

        fn run(
            &self,
            _op_ctx: &OperationContext,
            _db: &str,
            _body: &Document,
            _result: &mut Document,
        ) -> CommandResult<bool> {
            Ok(true)
        }

        fn explain(
            &self,
            _op_ctx: &OperationContext,
            db: &str,
            body: &Document,
            verbosity: ExplainVerbosity,
            reply: &mut ReplyBuilder,
        ) -> CommandResult<()> {
            let ns = self.parse_ns(db, body).to_string();
            reply.body_mut().append("queryPlanner", doc! { "namespace" => ns });
            reply.body_mut().append("verbosity", verbosity.as_str());
            Ok(())
        }

        fn required_privileges(&self, _db: &str, _body: &Document) -> Vec<crate::command::auth::Privilege> {
            Vec::new()
        }

        fn supports_write_concern(&self, _body: &Document) -> bool {
            false
        }
    }

    /// Admin-only command with an explain implementation.
    struct CompactCommand;

    impl BasicCommand for CompactCommand {
        const NAME: &'static str = "compactAll";

        fn attributes(&self) -> CommandAttributes {
            CommandAttributes {
                admin_only: true,
                ..CommandAttributes::new(AllowedOnSecondary::Never)
            }
        }

        fn run(
            &self,
            _op_ctx: &OperationContext,
            _db: &str,
            _body: &Document,
            _result: &mut Document,
        ) -> CommandResult<bool> {
            Ok(true)
        }

        fn explain(
            &self,
            _op_ctx: &OperationContext,
            _db: &str,
            _body: &Document,
            _verbosity: ExplainVerbosity,
            _reply: &mut ReplyBuilder,
        ) -> CommandResult<()> {
            Ok(())
        }

        fn required_privileges(&self, _db: &str, _body: &Document) -> Vec<crate::command::auth::Privilege> {
            Vec::new()
        }

        fn supports_write_concern(&self, _body: &Document) -> bool {
            false
        }
    }

    fn setup() -> (Arc<CommandDefinition>, OperationContext) {
        let mut registry = CommandRegistry::new();
        registry.register_typed(PingCommand, &[]);
        registry.register_basic(ScanCommand, &[]);
        registry.register_basic(CompactCommand, &[]);
        let def = registry.register(EXPLAIN, &[], ExplainCommand);
        let service = Arc::new(ServiceContext::new(ServerConfig::default(), registry));
        (def, OperationContext::new(service, RequestContext::default()))
    }

    fn explain(body: Document) -> CommandResult<Document> {
        let (def, op_ctx) = setup();
        let mut invocation = def.parse(&op_ctx, &OpMsgRequest::new("shop", body))?;
        let mut reply = ReplyBuilder::new();
        invocation.run(&op_ctx, &mut reply)?;
        Ok(reply.body().clone())
    }

    #[test]
    fn delegates_to_inner_explain() {
        let body = explain(doc! {
            "explain" => doc! { "scan" => "orders" },
            "verbosity" => "queryPlanner",
        })
        .unwrap();
        assert_eq!(
            body.get_document("queryPlanner").and_then(|d| d.get_str("namespace")),
            Some("shop.orders")
        );
        assert_eq!(body.get_str("verbosity"), Some("queryPlanner"));
    }

    #[test]
    fn verbosity_defaults_to_all_plans_execution() {
        let body = explain(doc! { "explain" => doc! { "scan" => "orders" } }).unwrap();
        assert_eq!(body.get_str("verbosity"), Some("allPlansExecution"));
    }

    #[test]
    fn invocation_reports_inner_namespace() {
        let (def, op_ctx) = setup();
        let request = OpMsgRequest::new("shop", doc! { "explain" => doc! { "scan" => "orders" } });
        let invocation = def.parse(&op_ctx, &request).unwrap();
        assert_eq!(invocation.ns().to_string(), "shop.orders");
        assert!(!invocation.supports_write_concern());
    }

    #[test]
    fn command_without_explain_is_illegal() {
        let err = explain(doc! { "explain" => doc! { "ping" => 1 } }).unwrap_err();
        assert_eq!(err.code, ErrorCode::IllegalOperation);
        assert_eq!(err.message, "Cannot explain cmd: ping");
    }

    #[test]
    fn unknown_inner_command_is_not_found() {
        let err = explain(doc! { "explain" => doc! { "frobnicate" => 1 } }).unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandNotFound);
        assert!(err.message.contains("frobnicate"));
    }

    #[test]
    fn malformed_requests_fail_to_parse() {
        let err = explain(doc! { "explain" => 1 }).unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedToParse);

        let err = explain(doc! {
            "explain" => doc! { "scan" => "orders" },
            "verbosity" => "everything",
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedToParse);
    }

    #[test]
    fn mismatched_inner_db_is_rejected() {
        let err = explain(doc! {
            "explain" => doc! { "scan" => "orders", "$db" => "billing" },
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNamespace);
    }

    #[test]
    fn inner_admin_only_applies_without_access_control() {
        let (def, op_ctx) = setup();
        assert!(!op_ctx.auth().is_auth_enabled());

        let request = OpMsgRequest::new("shop", doc! { "explain" => doc! { "compactAll" => 1 } });
        let invocation = def.parse(&op_ctx, &request).unwrap();
        let err = invocation.check_authorization(&op_ctx, &request).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert!(err.message.contains("compactAll"));

        let request = OpMsgRequest::new("admin", doc! { "explain" => doc! { "compactAll" => 1 } });
        let invocation = def.parse(&op_ctx, &request).unwrap();
        assert!(invocation.check_authorization(&op_ctx, &request).is_ok());
    }
}
