use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use shared::{DEFAULT_PORT, DEFAULT_TIME_LIMIT_SECS};
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Per-side time budget in seconds when a client does not pick one
    #[clap(short, long, default_value_t = DEFAULT_TIME_LIMIT_SECS)]
    time_limit: u64,
    /// Turn clock granularity in milliseconds
    #[clap(long, default_value = "100")]
    tick_ms: u64,
    /// Interval between clock broadcasts in milliseconds
    #[clap(long, default_value = "1000")]
    time_update_ms: u64,
    /// Longest a single write to a client may take, in milliseconds
    #[clap(long, default_value = "2000")]
    send_timeout_ms: u64,
    /// Seconds of silence before a connection is dropped
    #[clap(long, default_value = "3600")]
    idle_timeout_secs: u64,
    /// Seconds a finished game stays visible before removal
    #[clap(long, default_value = "60")]
    retention_secs: u64,
    /// Maximum number of simultaneous connections
    #[clap(short, long, default_value = "256")]
    max_connections: usize,
    /// Messages buffered per connection before it is considered stuck
    #[clap(long, default_value = "64")]
    outbound_queue: usize,
    /// Optional JSON file mirroring live sessions
    #[clap(long)]
    state_file: Option<PathBuf>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: format!("{}:{}", args.host, args.port),
            default_time_limit: Duration::from_secs(args.time_limit.max(1)),
            tick_interval: Duration::from_millis(args.tick_ms.max(1)),
            time_update_interval: Duration::from_millis(args.time_update_ms),
            send_timeout: Duration::from_millis(args.send_timeout_ms.max(1)),
            idle_timeout: Duration::from_secs(args.idle_timeout_secs.max(1)),
            finished_retention: Duration::from_secs(args.retention_secs),
            max_connections: args.max_connections,
            outbound_queue: args.outbound_queue.max(1),
            state_file: args.state_file,
        }
    }
}

/// Parses command-line arguments, binds the listener and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from(Args::parse());
    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
