//! Built-in commands.

pub mod configure_fail_point;
pub mod explain;
pub mod list_commands;
pub mod ping;
pub mod server_status;

use tracing::debug;

use crate::command::config::ServerConfig;
use crate::command::registry::CommandRegistry;

pub use configure_fail_point::ConfigureFailPointCommand;
pub use explain::ExplainCommand;
pub use list_commands::ListCommandsCommand;
pub use ping::PingCommand;
pub use server_status::ServerStatusCommand;

/// Registers every built-in command. Test-only commands are added only when
/// `enable_test_commands` is set.
///
/// # Panics
///
/// Panics if `registry` already holds one of the built-in names.
pub fn register_builtin_commands(registry: &mut CommandRegistry, config: &ServerConfig) {
    registry.register_typed(PingCommand, &[]);
    registry.register_typed(ListCommandsCommand, &[]);
    registry.register(explain::EXPLAIN, &[], ExplainCommand);
    registry.register_basic(ServerStatusCommand, &[]);
    if config.enable_test_commands {
        registry.register_errmsg(ConfigureFailPointCommand, &[]);
    }
    debug!(
        commands = registry.commands().count(),
        test_commands = config.enable_test_commands,
        "registered built-in commands"
    );
}
