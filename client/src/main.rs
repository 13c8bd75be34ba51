use clap::Parser;
use client::input::{InputScript, Script};
use client::network::Client;
use log::info;
use shared::TICK_RATE;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Avatar samples sent per second
    #[arg(short = 'r', long, default_value_t = TICK_RATE)]
    rate: u32,

    /// Input script: idle or reach
    #[arg(long, default_value = "reach")]
    script: Script,

    /// Seed for pose jitter
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Script: {} (seed {})", args.script, args.seed);

    let script = InputScript::new(args.script, args.seed);
    let mut client = Client::new(&args.server, args.rate, script).await?;

    client.run().await?;

    Ok(())
}
