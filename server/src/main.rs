use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "90")]
    tick_rate: u32,

    /// Maximum number of concurrent peers
    #[arg(short, long, default_value = "16")]
    max_peers: usize,

    /// Snapshot file to warm-start from and save to on exit
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Seconds of silence before a peer's controllers are ignored
    #[arg(long, default_value = "2")]
    stale_after: u64,

    /// Seconds of silence before a peer is evicted
    #[arg(long, default_value = "30")]
    evict_after: u64,

    /// Milliseconds of simulation time between rule replays
    #[arg(long, default_value = "1000")]
    rule_step_ms: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind: format!("{}:{}", args.host, args.port),
            tick_rate: args.tick_rate,
            max_peers: args.max_peers,
            stale_after: Duration::from_secs(args.stale_after),
            evict_after: Duration::from_secs(args.evict_after),
            snapshot: args.snapshot,
            rule_step: Duration::from_millis(args.rule_step_ms),
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

    let config = ServerConfig::from(Args::parse());
    info!("Starting server on {}", config.bind);
    if let Some(path) = &config.snapshot {
        info!("Snapshot file: {}", path.display());
    }

    let mut server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
