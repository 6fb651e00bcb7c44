mod pilot;

use clap::Parser;
use client::{ClientConfig, SyncClient};
use log::{info, warn};
use pilot::Pilot;
use rand::Rng;
use shared::DEFAULT_PORT;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Display name; a random one is picked when omitted
    #[arg(short, long)]
    name: Option<String>,

    /// Radius of the circle the pilot flies
    #[arg(short, long, default_value = "5.0")]
    radius: f32,

    /// Angular speed in degrees per second
    #[arg(short, long, default_value = "45.0")]
    speed: f32,

    /// Give up after this many connection attempts (0 retries forever)
    #[arg(long, default_value = "0")]
    attempts: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut rng = rand::thread_rng();
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| format!("Pilot-{:04}", rng.gen_range(0..10_000)));
    let center = (rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0));

    let pilot = Pilot::new(name, center, args.radius);
    let mut client = SyncClient::new(ClientConfig::default());

    info!("Connecting to {}:{} as {}", args.host, args.port, pilot.name());
    let mut backoff = Duration::from_millis(100);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match client.connect_as(&args.host, args.port, &pilot).await {
            Ok(id) => {
                info!("Connected with id {}", id);
                break;
            }
            Err(e) if args.attempts == 0 || attempt < args.attempts => {
                warn!("Connection attempt {} failed: {}", attempt, e);
                sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(2));
            }
            Err(e) => return Err(e.into()),
        }
    }

    client.start_sync(pilot.clone());

    let started = Instant::now();
    let mut frame = interval(Duration::from_millis(16));
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = frame.tick() => {
                pilot.fly(started.elapsed().as_secs_f32() * args.speed);
            }
            _ = status.tick() => {
                if !client.is_connected() {
                    warn!("Lost connection to server");
                    break;
                }
                info!("{} peers in view", pilot.peer_count());
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    client.stop_sync().await;
    client.close();
    Ok(())
}
