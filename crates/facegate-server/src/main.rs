//! Facegate server binary.
//!
//! Terminates push-protocol connections from biometric access-control
//! terminals, persists attendance and device state to SQLite, and keeps a
//! live session registry for server-initiated commands.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use facegate_gateway::{Gateway, GatewayConfig};
use facegate_storage::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "facegate")]
#[command(version, about = "Access-control terminal gateway")]
struct Args {
    /// Address for the legacy TCP transport.
    #[arg(long, default_value = "0.0.0.0:7788")]
    addr: SocketAddr,

    /// Address for the WebSocket transport. Disabled when omitted.
    #[arg(long)]
    ws_addr: Option<SocketAddr>,

    /// Path to the SQLite database file.
    #[arg(long, default_value = "facegate.db")]
    db_path: PathBuf,

    /// Directory event photos are written under. Photos are dropped when
    /// omitted.
    #[arg(long)]
    images_dir: Option<PathBuf>,

    /// Shared token devices must present on their first request.
    #[arg(long, env = "FACEGATE_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Live connection ceiling per source address.
    #[arg(long, default_value_t = 8)]
    max_conns_per_addr: usize,

    /// Request ceiling per source address within one rate window.
    #[arg(long, default_value_t = 100)]
    rate_limit: u32,

    /// Idle seconds before a silent connection is closed.
    #[arg(long, default_value_t = 300)]
    idle_timeout: u64,

    /// Seconds without contact before a device is projected offline.
    #[arg(long, default_value_t = 90)]
    offline_threshold: u64,

    /// Withhold the door-open hint in attendance acknowledgments.
    #[arg(long)]
    deny_access: bool,

    /// Output logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "facegate=info,facegate_gateway=info".into()),
    );
    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "starting facegate"
    );

    info!(path = %args.db_path.display(), "opening database");
    let mut store = SqliteStore::connect(&args.db_path).await?;
    if let Some(dir) = &args.images_dir {
        info!(dir = %dir.display(), "event photos enabled");
        store = store.with_images_dir(dir);
    }

    let config = GatewayConfig {
        bind_addr: args.addr,
        ws_bind_addr: args.ws_addr,
        auth_token: args.auth_token,
        max_conns_per_addr: args.max_conns_per_addr,
        rate_limit: args.rate_limit,
        idle_timeout: Duration::from_secs(args.idle_timeout),
        offline_threshold: Duration::from_secs(args.offline_threshold),
        grant_access: !args.deny_access,
        ..GatewayConfig::default()
    };

    let mut gateway = Gateway::start(config, Arc::new(store)).await?;
    info!(addr = %gateway.local_addr(), "gateway running");

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    gateway.shutdown();

    info!("facegate stopped");
    Ok(())
}
