use clap::Parser;
use log::info;
use server::{ServerConfig, SyncServer};
use shared::DEFAULT_PORT;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Milliseconds between ticks while clients are connected
    #[arg(short, long, default_value = "1")]
    tick_ms: u64,

    /// Milliseconds between ticks while no client is connected
    #[arg(long, default_value = "100")]
    idle_ms: u64,

    /// Milliseconds a tick waits for one client's transform
    #[arg(long, default_value = "100")]
    ingest_timeout_ms: u64,

    /// Seconds of silence before a client is evicted
    #[arg(long, default_value = "5")]
    peer_timeout_secs: u64,

    /// Maximum number of registered clients (capped at 1024, the frame limit)
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Seconds between status lines
    #[arg(long, default_value = "10")]
    status_secs: u64,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            tick_interval: Duration::from_millis(self.tick_ms),
            idle_interval: Duration::from_millis(self.idle_ms),
            ingest_timeout: Duration::from_millis(self.ingest_timeout_ms),
            peer_timeout: Duration::from_secs(self.peer_timeout_secs),
            max_clients: self.max_clients,
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

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let mut server = SyncServer::listen(address.as_str(), args.config()).await?;
    server.deploy();

    let mut status = interval(Duration::from_secs(args.status_secs.max(1)));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = status.tick() => {
                info!("{} clients connected", server.clients());
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    server.close().await;
    Ok(())
}
