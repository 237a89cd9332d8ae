//! billsync terminal
//!
//! Runs one point-of-sale terminal headless. Logging in as an admin makes
//! this terminal the hub; any other user runs a device that dials the hub.
//!
//! ## Features
//!
//! - **Hub**: Answers sync requests with the full catalog, settings and invoices
//! - **Device**: Connects to a hub by id and reconnects to it on the next start
//! - **Status log**: Prints connected peers periodically until ctrl-c

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use billsync::{Config, Network, Terminal};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// billsync terminal - hub or device
#[derive(Parser, Debug)]
#[command(name = "billsync-terminal")]
#[command(version, about, long_about = None)]
struct Args {
    /// Username to log in with
    #[arg(long, env = "BILLSYNC_USERNAME")]
    username: String,

    /// Password to log in with
    #[arg(long, env = "BILLSYNC_PASSWORD")]
    password: String,

    /// Data directory for the local store
    #[arg(long, env = "BILLSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Hub id to connect to (devices only), e.g. bb-hub-MMC
    #[arg(long, env = "BILLSYNC_HUB")]
    hub: Option<String>,

    /// Same-device broadcast channel name
    #[arg(long, env = "BILLSYNC_CHANNEL")]
    channel: Option<String>,

    /// Disable relay servers; peers must be on the local network
    #[arg(long, env = "BILLSYNC_LOCAL_ONLY")]
    local_only: bool,

    /// Seconds between heartbeats, 0 to disable
    #[arg(long, default_value = "15", env = "BILLSYNC_HEARTBEAT_SECS")]
    heartbeat_secs: u64,

    /// Seconds between status lines
    #[arg(long, default_value = "30", env = "BILLSYNC_STATUS_SECS")]
    status_secs: u64,

    /// Log level
    #[arg(long, default_value = "info", env = "BILLSYNC_LOG_LEVEL")]
    log_level: Level,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = match &self.data_dir {
            Some(dir) => Config::new(dir),
            None => Config::default(),
        };
        if let Some(channel) = &self.channel {
            config = config.with_channel_name(channel);
        }
        let heartbeat = (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs));
        config
            .with_heartbeat_interval(heartbeat)
            .with_local_only(self.local_only)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = args.config();
    info!(data_dir = %config.storage_path.display(), "Starting billsync terminal");

    let terminal = Terminal::boot(config, Network::iroh())
        .await
        .context("Failed to boot terminal")?;

    // A restored session may already be running as another user
    if let Some(current) = terminal.current_user() {
        if current.username != args.username {
            info!(user = %current.username, "Logging out restored session");
            terminal.logout().await.context("Failed to log out")?;
        }
    }
    if terminal.current_user().is_none() {
        terminal
            .login(&args.username, &args.password)
            .await
            .context("Login failed")?;
    }

    let identity = terminal
        .identity()
        .context("Terminal has no network identity")?;
    info!(id = %identity.id, role = ?identity.role, "Terminal online");

    if let Some(hub) = &args.hub {
        if identity.is_hub() {
            warn!(hub = %hub, "Ignoring --hub on the hub terminal");
        } else {
            terminal.connect_hub(hub).context("Failed to connect to hub")?;
        }
    }

    let mut status_tick = tokio::time::interval(Duration::from_secs(args.status_secs.max(1)));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                info!("Received ctrl-c, initiating graceful shutdown");
                break;
            }
            _ = status_tick.tick() => {
                let status = terminal.status();
                let products = terminal.products().map(|p| p.len()).unwrap_or_default();
                let invoices = terminal.invoices().map(|i| i.len()).unwrap_or_default();
                info!(
                    peers = ?status.connected_peers,
                    syncing = status.is_syncing,
                    products,
                    invoices,
                    "Status"
                );
            }
        }
    }

    // Keep the login so the next start resumes the same role
    terminal.shutdown().await.context("Failed to shut down")?;
    info!("billsync terminal stopped");
    Ok(())
}
