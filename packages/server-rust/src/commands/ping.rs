//! `ping`: liveness check.

use docket_core::Value;
use serde::Deserialize;

use crate::command::context::OperationContext;
use crate::command::definition::{AllowedOnSecondary, CommandAttributes};
use crate::command::error::CommandResult;
use crate::command::typed::{ParsedRequest, PassFail, TypedCommand, TypedRequest};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PingRequest {
    #[allow(dead_code)]
    ping: Value,
}

impl TypedRequest for PingRequest {
    const COMMAND_NAME: &'static str = "ping";
}

pub struct PingCommand;

impl TypedCommand for PingCommand {
    type Request = PingRequest;
    type Reply = PassFail;

    fn attributes(&self) -> CommandAttributes {
        CommandAttributes {
            requires_auth: false,
            api_versions: vec!["1"],
            help: "a way to check that the server is alive. responds immediately even if server is in a db lock.",
            ..CommandAttributes::new(AllowedOnSecondary::Always)
        }
    }

    fn supports_write_concern(&self, _request: &ParsedRequest<PingRequest>) -> bool {
        false
    }

    fn do_check_authorization(
        &self,
        _op_ctx: &OperationContext,
        _request: &ParsedRequest<PingRequest>,
    ) -> CommandResult<()> {
        Ok(())
    }

    fn typed_run(&self, _op_ctx: &OperationContext, _request: &ParsedRequest<PingRequest>) -> CommandResult<()> {
        Ok(())
    }
}
