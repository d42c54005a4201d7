//! `listCommands`: describes every registered command.

use std::collections::BTreeMap;

use docket_core::Value;
use serde::{Deserialize, Serialize};

use crate::command::context::OperationContext;
use crate::command::definition::{AllowedOnSecondary, CommandAttributes, CommandDefinition};
use crate::command::error::CommandResult;
use crate::command::typed::{ParsedRequest, Typed, TypedCommand, TypedRequest};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListCommandsRequest {
    #[serde(rename = "listCommands")]
    _list_commands: Value,
}

impl TypedRequest for ListCommandsRequest {
    const COMMAND_NAME: &'static str = "listCommands";
}

/// One entry of the `commands` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandInfo {
    pub help: String,
    pub requires_auth: bool,
    pub secondary_ok: bool,
    pub secondary_override_ok: bool,
    pub admin_only: bool,
    pub api_versions: Vec<String>,
    pub deprecated_api_versions: Vec<String>,
}

impl From<&CommandDefinition> for CommandInfo {
    fn from(def: &CommandDefinition) -> Self {
        let to_strings = |versions: &[&'static str]| versions.iter().map(ToString::to_string).collect();
        Self {
            help: def.help().to_string(),
            requires_auth: def.requires_auth(),
            secondary_ok: def.secondary_allowed() == AllowedOnSecondary::Always,
            secondary_override_ok: def.secondary_allowed() == AllowedOnSecondary::OptIn,
            admin_only: def.admin_only(),
            api_versions: to_strings(def.api_versions()),
            deprecated_api_versions: to_strings(def.deprecated_api_versions()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListCommandsReply {
    pub commands: BTreeMap<String, CommandInfo>,
}

pub struct ListCommandsCommand;

impl TypedCommand for ListCommandsCommand {
    type Request = ListCommandsRequest;
    type Reply = Typed<ListCommandsReply>;

    fn attributes(&self) -> CommandAttributes {
        CommandAttributes {
            requires_auth: false,
            api_versions: vec!["1"],
            help: "get a list of all db commands",
            ..CommandAttributes::new(AllowedOnSecondary::Always)
        }
    }

    fn supports_write_concern(&self, _request: &ParsedRequest<ListCommandsRequest>) -> bool {
        false
    }

    fn do_check_authorization(
        &self,
        _op_ctx: &OperationContext,
        _request: &ParsedRequest<ListCommandsRequest>,
    ) -> CommandResult<()> {
        Ok(())
    }

    fn typed_run(
        &self,
        op_ctx: &OperationContext,
        _request: &ParsedRequest<ListCommandsRequest>,
    ) -> CommandResult<ListCommandsReply> {
        let commands = op_ctx
            .service()
            .registry()
            .commands()
            .map(|def| (def.name().to_string(), CommandInfo::from(def.as_ref())))
            .collect();
        Ok(ListCommandsReply { commands })
    }
}
