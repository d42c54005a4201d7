//! `configureFailPoint`: switches fail points at runtime. Test-only.

use docket_core::{from_document, Document};
use tracing::info;

use crate::command::auth::{ActionType, ResourcePattern};
use crate::command::basic::ErrmsgCommand;
use crate::command::context::OperationContext;
use crate::command::definition::{AllowedOnSecondary, CommandAttributes};
use crate::command::error::{CommandError, CommandResult, ErrorCode};
use crate::command::fail_point::{FailCommandData, FailPointMode, FAIL_COMMAND};

pub struct ConfigureFailPointCommand;

impl ErrmsgCommand for ConfigureFailPointCommand {
    const NAME: &'static str = "configureFailPoint";

    fn attributes(&self) -> CommandAttributes {
        CommandAttributes {
            admin_only: true,
            help: "modifies the settings of a fail point",
            ..CommandAttributes::new(AllowedOnSecondary::Always)
        }
    }

    fn supports_write_concern(&self, _body: &Document) -> bool {
        false
    }

    fn check_auth_for_operation(
        &self,
        op_ctx: &OperationContext,
        _db: &str,
        _body: &Document,
    ) -> CommandResult<()> {
        if op_ctx
            .auth()
            .is_authorized_for_actions_on_resource(&ResourcePattern::Cluster, &[ActionType::ConfigureFailPoint])
        {
            Ok(())
        } else {
            Err(CommandError::unauthorized("unauthorized"))
        }
    }

    fn errmsg_run(
        &self,
        op_ctx: &OperationContext,
        _db: &str,
        body: &Document,
        errmsg: &mut String,
        result: &mut Document,
    ) -> CommandResult<bool> {
        let Some(name) = body.get_str(Self::NAME) else {
            return Err(CommandError::new(
                ErrorCode::BadValue,
                "fail point name must be a string",
            ));
        };
        let point = op_ctx.service().fail_points().find(name).ok_or_else(|| {
            CommandError::new(ErrorCode::BadValue, format!("No fail point named '{name}'"))
        })?;
        let mode = body
            .get("mode")
            .ok_or_else(|| CommandError::new(ErrorCode::BadValue, "missing mode"))
            .and_then(FailPointMode::from_value)?;
        let data = body.get_document("data").cloned().unwrap_or_default();

        if name == FAIL_COMMAND {
            if let Err(e) = from_document::<FailCommandData>(&data) {
                *errmsg = format!("invalid failCommand data: {e}");
                return Ok(false);
            }
        }

        let count = point.set_mode(mode, data);
        info!(fail_point = name, ?mode, "fail point configured");
        result.append("count", i64::try_from(count).unwrap_or(i64::MAX));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use docket_core::{doc, OpMsgRequest, RequestContext, Value};

    use super::*;
    use crate::command::config::ServerConfig;
    use crate::command::context::ServiceContext;
    use crate::command::registry::CommandRegistry;
    use crate::command::reply::ReplyBuilder;

    fn setup() -> (Arc<ServiceContext>, OperationContext) {
        let mut registry = CommandRegistry::new();
        registry.register_errmsg(ConfigureFailPointCommand, &[]);
        let service = Arc::new(ServiceContext::new(ServerConfig::default(), registry));
        let op_ctx = OperationContext::new(service.clone(), RequestContext::default());
        (service, op_ctx)
    }

    fn run(op_ctx: &OperationContext, db: &str, body: Document) -> CommandResult<Document> {
        let request = OpMsgRequest::new(db, body);
        let def = op_ctx.service().registry().find_command("configureFailPoint").unwrap();
        let mut invocation = def.parse(op_ctx, &request)?;
        invocation.check_authorization(op_ctx, &request)?;
        let mut reply = ReplyBuilder::new();
        invocation.run(op_ctx, &mut reply)?;
        Ok(reply.body().clone())
    }

    #[test]
    fn enables_and_disables_fail_command() {
        let (service, op_ctx) = setup();
        let body = run(
            &op_ctx,
            "admin",
            doc! {
                "configureFailPoint" => "failCommand",
                "mode" => doc! { "times" => 2 },
                "data" => doc! { "failCommands" => vec![Value::from("ping")], "errorCode" => 2 },
            },
        )
        .unwrap();
        assert_eq!(body.get("count").and_then(Value::as_i64), Some(0));

        let point = service.fail_points().find(FAIL_COMMAND).unwrap();
        assert_eq!(point.mode(), FailPointMode::Times(2));

        run(
            &op_ctx,
            "admin",
            doc! { "configureFailPoint" => "failCommand", "mode" => "off" },
        )
        .unwrap();
        assert_eq!(point.mode(), FailPointMode::Off);
    }

    #[test]
    fn admin_database_only() {
        let (_, op_ctx) = setup();
        let err = run(
            &op_ctx,
            "shop",
            doc! { "configureFailPoint" => "failCommand", "mode" => "off" },
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }

    #[test]
    fn unknown_fail_point_and_bad_mode_are_bad_values() {
        let (_, op_ctx) = setup();
        let err = run(&op_ctx, "admin", doc! { "configureFailPoint" => "nope", "mode" => "off" })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadValue);

        let err = run(
            &op_ctx,
            "admin",
            doc! { "configureFailPoint" => "failCommand", "mode" => "sometimes" },
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadValue);
    }

    #[test]
    fn malformed_fail_command_data_reports_errmsg() {
        let (service, op_ctx) = setup();
        let body = run(
            &op_ctx,
            "admin",
            doc! {
                "configureFailPoint" => "failCommand",
                "mode" => "alwaysOn",
                "data" => doc! { "failCommands" => "ping" },
            },
        )
        .unwrap();
        assert_eq!(body.get("ok").and_then(Value::as_f64), Some(0.0));
        assert!(body.get_str("errmsg").unwrap().starts_with("invalid failCommand data"));
        assert_eq!(
            service.fail_points().find(FAIL_COMMAND).unwrap().mode(),
            FailPointMode::Off
        );
    }
}
