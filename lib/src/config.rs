//! Engine configuration.

use std::time::Duration;

/// Tunables for an [`Engine`][engine].
///
/// The engine is embedded in a larger host application, so configuration is
/// programmatic; there is no config-file layer. All fields have defaults
/// suitable for interactive script hosts.
///
/// [engine]: crate::Engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Value for the `User-Agent` header on outgoing requests, unless the
    /// caller supplies one of their own.
    pub user_agent: String,
    /// How often the completion pump checks an asynchronous session.
    ///
    /// This bounds delivery latency, not throughput; ticks that find nothing
    /// ready are no-ops on the host loop.
    pub pump_interval: Duration,
    /// Maximum number of response-body bytes requested per transport read.
    pub read_chunk_size: usize,
    /// Worker threads for the engine's runtime, which stands in for the OS
    /// thread pool that delivers completion notifications.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("hostbridge/", env!("CARGO_PKG_VERSION")).to_owned(),
            pump_interval: Duration::from_millis(10),
            read_chunk_size: 4096,
            worker_threads: 2,
        }
    }
}
