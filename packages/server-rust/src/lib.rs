//! Docket Server: command registry, per-request invocations, and the
//! dispatch pipeline that runs them.

pub mod command;
pub mod commands;
pub mod traits;

pub use command::{
    build_command_pipeline, Command, CommandDispatcher, CommandError, CommandRegistry, CommandRequest,
    CommandResult, DispatchError, Invocation, OperationContext, Reply, ServerConfig, ServiceContext,
};
pub use commands::register_builtin_commands;
pub use traits::{ReplicationStateView, RequestMirror, StandaloneNode};
