//! `serverStatus`: node identity and per-command execution counters.

use docket_core::{doc, Document};

use crate::command::auth::{ActionType, Privilege, ResourcePattern};
use crate::command::basic::BasicCommand;
use crate::command::context::OperationContext;
use crate::command::definition::{AllowedOnSecondary, CommandAttributes};
use crate::command::error::CommandResult;
use crate::command::registry::CommandRegistry;

/// Key under `metrics.commands` holding the unknown-command count.
pub const UNKNOWN_COMMANDS_KEY: &str = "<UNKNOWN>";

pub struct ServerStatusCommand;

impl BasicCommand for ServerStatusCommand {
    const NAME: &'static str = "serverStatus";

    fn attributes(&self) -> CommandAttributes {
        CommandAttributes {
            help: "returns lots of administrative server information",
            ..CommandAttributes::new(AllowedOnSecondary::Always)
        }
    }

    fn run(
        &self,
        op_ctx: &OperationContext,
        _db: &str,
        _body: &Document,
        result: &mut Document,
    ) -> CommandResult<bool> {
        let service = op_ctx.service();
        result.append("host", service.config().node_id.as_str());
        result.append("version", env!("CARGO_PKG_VERSION"));
        result.append(
            "metrics",
            doc! { "commands" => command_metrics(service.registry()) },
        );
        Ok(true)
    }

    fn required_privileges(&self, _db: &str, _body: &Document) -> Vec<Privilege> {
        vec![Privilege::new(ResourcePattern::Cluster, &[ActionType::ServerStatus])]
    }

    fn supports_write_concern(&self, _body: &Document) -> bool {
        false
    }
}

/// `{<name>: {total, failed}, ..., "<UNKNOWN>": n}` over every registered command.
#[must_use]
pub fn command_metrics(registry: &CommandRegistry) -> Document {
    let mut out: Document = registry
        .commands()
        .map(|def| {
            (
                def.name().to_string(),
                doc! { "total" => saturating_i64(def.executed()), "failed" => saturating_i64(def.failed()) }
                    .into(),
            )
        })
        .collect();
    out.append(UNKNOWN_COMMANDS_KEY, saturating_i64(registry.unknown_commands()));
    out
}

fn saturating_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use docket_core::{OpMsgRequest, Principal, RequestContext, Value};

    use super::*;
    use crate::command::auth::PrincipalAuthorization;
    use crate::command::config::ServerConfig;
    use crate::command::context::ServiceContext;
    use crate::command::error::ErrorCode;
    use crate::command::reply::ReplyBuilder;
    use crate::commands::ping::PingCommand;

    fn service() -> Arc<ServiceContext> {
        let mut registry = CommandRegistry::new();
        registry.register_typed(PingCommand, &[]);
        registry.register_basic(ServerStatusCommand, &[]);
        let config = ServerConfig {
            node_id: "node-a".into(),
            ..ServerConfig::default()
        };
        Arc::new(ServiceContext::new(config, registry))
    }

    fn count(metrics: &Document, name: &str, field: &str) -> Option<i64> {
        metrics.get_document(name).and_then(|d| d.get(field)).and_then(Value::as_i64)
    }

    #[test]
    fn reports_counters_per_command() {
        let service = service();
        let ping = service.registry().find_command("ping").unwrap();
        ping.increment_executed();
        ping.increment_executed();
        ping.increment_failed();
        service.registry().increment_unknown_commands();

        let op_ctx = OperationContext::new(service.clone(), RequestContext::default());
        let def = service.registry().find_command("serverStatus").unwrap();
        let mut invocation = def
            .parse(&op_ctx, &OpMsgRequest::new("admin", doc! { "serverStatus" => 1 }))
            .unwrap();
        let mut reply = ReplyBuilder::new();
        invocation.run(&op_ctx, &mut reply).unwrap();

        let body = reply.body();
        assert_eq!(body.get_str("host"), Some("node-a"));
        let commands = body
            .get_document("metrics")
            .and_then(|m| m.get_document("commands"))
            .unwrap();
        assert_eq!(count(commands, "ping", "total"), Some(2));
        assert_eq!(count(commands, "ping", "failed"), Some(1));
        assert_eq!(count(commands, "serverStatus", "total"), Some(0));
        assert_eq!(commands.get(UNKNOWN_COMMANDS_KEY).and_then(Value::as_i64), Some(1));
    }

    #[test]
    fn requires_cluster_server_status_privilege() {
        let service = service();
        let def = service.registry().find_command("serverStatus").unwrap();
        let request = OpMsgRequest::new("admin", doc! { "serverStatus" => 1 });

        let reader = OperationContext::new(service.clone(), RequestContext::default())
            .with_auth(Arc::new(PrincipalAuthorization::new(Some(Principal::new("r", &["readAnyDatabase"])))));
        let invocation = def.parse(&reader, &request).unwrap();
        let err = invocation.check_authorization(&reader, &request).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);

        let monitor = OperationContext::new(service, RequestContext::default())
            .with_auth(Arc::new(PrincipalAuthorization::new(Some(Principal::new("m", &["clusterMonitor"])))));
        let invocation = def.parse(&monitor, &request).unwrap();
        assert!(invocation.check_authorization(&monitor, &request).is_ok());
    }
}
