use clap::Parser;
use log::{error, info};
use server::config::{ConnectionTimeouts, ServerConfig};
use server::connection_manager::ConnectionManager;
use server::network::Server;
use server::player_registry::PlayerRegistry;
use shared::OUTBOUND_QUEUE_CAPACITY;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Seconds between pings to each connection
    #[arg(long, default_value = "30")]
    ping_interval: u64,

    /// Seconds of read silence before a connection is dropped
    #[arg(long, default_value = "60")]
    idle_timeout: u64,

    /// Seconds allowed for a single frame write
    #[arg(long, default_value = "10")]
    write_timeout: u64,

    /// Messages buffered per connection before it is dropped as too slow
    #[arg(short = 'c', long, default_value_t = OUTBOUND_QUEUE_CAPACITY)]
    capacity: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            outbound_capacity: self.capacity,
            timeouts: ConnectionTimeouts {
                idle_timeout: Duration::from_secs(self.idle_timeout),
                ping_interval: Duration::from_secs(self.ping_interval),
                write_timeout: Duration::from_secs(self.write_timeout),
            },
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();

    let manager = ConnectionManager::spawn(Arc::new(PlayerRegistry::new()));
    let server = Server::bind(config, manager.clone()).await?;
    info!("Live game at ws://{}/liveGame/player/{{name}}", server.local_addr()?);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    manager.shutdown();
    Ok(())
}
