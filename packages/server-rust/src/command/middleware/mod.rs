//! Layers stacked in front of [`CommandService`](super::service::CommandService).
//!
//! [`load_shed`] refuses work once every admission permit is held,
//! [`metrics`] opens the per-command span and records durations, and
//! [`pipeline`] assembles both around the dispatcher.

pub mod load_shed;
pub mod metrics;
pub mod pipeline;

pub use load_shed::{LoadShedLayer, DEFAULT_EXEMPT_COMMANDS};
pub use metrics::MetricsLayer;
pub use pipeline::build_command_pipeline;
