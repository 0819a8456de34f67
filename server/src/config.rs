//! Server tuning knobs
//!
//! Filled from command-line flags in `main.rs`; tests start from
//! `ServerConfig::default()` and shorten whatever timing they exercise.

use shared::{DEFAULT_PORT, DEFAULT_TIME_LIMIT_SECS};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: String,
    /// Per-side budget when a create request does not name one
    pub default_time_limit: Duration,
    /// Granularity of the turn clock loop
    pub tick_interval: Duration,
    /// Cadence of TimeUpdate broadcasts
    pub time_update_interval: Duration,
    /// Upper bound on a single socket write before the peer is dropped
    pub send_timeout: Duration,
    /// A connection silent for this long is treated as gone
    pub idle_timeout: Duration,
    /// How long a finished session stays visible before removal
    pub finished_retention: Duration,
    pub max_connections: usize,
    /// Messages buffered per connection before it counts as unresponsive
    pub outbound_queue: usize,
    /// Optional best-effort JSON mirror of live sessions
    pub state_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            default_time_limit: Duration::from_secs(DEFAULT_TIME_LIMIT_SECS),
            tick_interval: Duration::from_millis(100),
            time_update_interval: Duration::from_secs(1),
            send_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(3600),
            finished_retention: Duration::from_secs(60),
            max_connections: 256,
            outbound_queue: 64,
            state_file: None,
        }
    }
}
