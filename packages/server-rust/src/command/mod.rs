//! Per-request command execution and dispatch.
//!
//! 1. **Descriptors** (`definition`, `registry`): immutable metadata per
//!    command, looked up by name or alias
//! 2. **Invocations** (`invocation`, `typed`, `basic`): one in-flight
//!    execution each, with adapters for typed and body-only commands
//! 3. **Dispatch** (`dispatch`, `hooks`, `fail_point`): the fixed stage
//!    sequence around a run, observer hooks, and fault injection
//! 4. **Pipeline** (`service`, `middleware`): the dispatcher as a tower
//!    service behind load shedding and metrics

pub mod auth;
pub mod basic;
pub mod config;
pub mod context;
pub mod definition;
pub mod dispatch;
pub mod error;
pub mod fail_point;
pub mod helpers;
pub mod hooks;
pub mod invocation;
pub mod middleware;
pub mod registry;
pub mod reply;
pub mod service;
pub mod typed;

pub use auth::{ActionType, AuthorizationSession, Privilege, ResourcePattern};
pub use basic::{BasicCommand, ErrmsgCommand};
pub use config::ServerConfig;
pub use context::{OperationContext, RequestExecutionContext, ServiceContext};
pub use definition::{
    AllowedOnSecondary, Command, CommandAttributes, CommandDefinition, LogicalOp, ReadWriteType,
};
pub use dispatch::CommandDispatcher;
pub use error::{CommandError, CommandResult, DispatchError, ErrorCode};
pub use fail_point::{FailPoint, FailPointMode, FailPointRegistry};
pub use hooks::CommandInvocationHooks;
pub use invocation::{ExplainVerbosity, Invocation, ReadConcernSupport};
pub use middleware::build_command_pipeline;
pub use registry::CommandRegistry;
pub use reply::{Reply, ReplyBuilder};
pub use service::{CommandRequest, CommandService};
pub use typed::{ParsedRequest, PassFail, Typed, TypedCommand, TypedRequest};
