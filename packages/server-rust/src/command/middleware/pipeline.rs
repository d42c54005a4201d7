//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use crate::command::config::ServerConfig;
use crate::command::dispatch::CommandDispatcher;
use crate::command::error::DispatchError;
use crate::command::reply::Reply;
use crate::command::service::{CommandRequest, CommandService};

/// Wraps the dispatcher with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- refuse non-exempt commands once every permit is held
/// 2. `MetricsLayer` -- span, duration histogram, slow command log
///
/// Per-command deadlines come from `maxTimeMS` and are cooperative, so there
/// is no timeout layer.
#[must_use]
pub fn build_command_pipeline(
    dispatcher: CommandDispatcher,
    config: &ServerConfig,
) -> impl tower::Service<CommandRequest, Response = Reply, Error = DispatchError> {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_commands))
        .layer(MetricsLayer::new(config.slow_command_threshold_ms))
        .service(CommandService::new(dispatcher))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
