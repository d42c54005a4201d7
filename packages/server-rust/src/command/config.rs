use docket_core::ReadConcernLevel;

/// Server-level configuration for the command dispatch framework.
///
/// Controls load shedding, test-only commands, and request defaults applied
/// when a command body does not specify its own.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unique identifier for this server node.
    pub node_id: String,
    /// Maximum number of concurrent commands before load shedding.
    pub max_concurrent_commands: u32,
    /// Registers test-only commands such as `configureFailPoint`.
    pub enable_test_commands: bool,
    /// Implicit read concern applied when a command permits a default.
    pub default_read_concern: Option<ReadConcernLevel>,
    /// Deadline applied when a request carries no `maxTimeMS`.
    pub default_max_time_ms: Option<u64>,
    /// Commands at or above this duration are logged as slow.
    pub slow_command_threshold_ms: u64,
    /// Fraction of mirror-capable reads forwarded to the mirror sink (0.0 to 1.0).
    pub mirror_sampling_rate: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            max_concurrent_commands: 1000,
            enable_test_commands: false,
            default_read_concern: None,
            default_max_time_ms: None,
            slow_command_threshold_ms: 100,
            mirror_sampling_rate: 0.0,
        }
    }
}
