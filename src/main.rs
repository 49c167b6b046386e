//! PetLink — teleop console for the UnoQ animatronic pet controller
//!
//! Opens a device link to the controller and drives it from an
//! interactive console.

use anyhow::Result;
use clap::Parser;
use colored::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use petlink::{AppConfig, DeviceLinkClient, EventKind, LinkEvent};

/// PetLink - Teleoperate the UnoQ animatronic pet over its device link
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Controller address, overriding the config file
    #[arg(short, long)]
    address: Option<String>,

    /// Connect at startup instead of waiting for the `connect` command
    #[arg(long)]
    connect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting PetLink...");

    // Load configuration; a missing file falls back to defaults
    let mut config = match AppConfig::load(&args.config).await {
        Ok(config) => {
            info!("Configuration loaded from {}", args.config);
            config
        }
        Err(e) => {
            info!("No usable config at {} ({e:#}), using defaults", args.config);
            AppConfig::default()
        }
    };
    if let Some(address) = &args.address {
        config.link.address = Some(address.clone());
    }

    let client = DeviceLinkClient::new(config.link_config());
    register_event_printers(&client);

    let default_address = config.link.address.clone();
    if args.connect {
        match default_address.as_deref() {
            Some(address) => {
                if let Err(e) = client.connect(Some(address)).await {
                    warn!("Initial connection failed: {e}");
                }
            }
            None => warn!("--connect given but no address is configured"),
        }
    }

    cli::run_repl(&client, default_address).await?;

    // Cleanup
    info!("Shutting down...");
    client.disconnect().await.ok();
    info!("PetLink shutdown complete");
    Ok(())
}

/// Print inbound link activity so the console doubles as a session monitor
fn register_event_printers(client: &DeviceLinkClient) {
    client.on(EventKind::ConnectionStatus, |event| {
        if let LinkEvent::ConnectionStatus(status) = event {
            println!("{} link {}", stamp(), status.to_string().cyan());
        }
    });
    client.on(EventKind::Broadcast, |event| {
        if let LinkEvent::Broadcast(payload) = event {
            println!("{} broadcast {}", stamp(), payload);
        }
    });
    client.on(EventKind::ClientJoin, |event| {
        if let LinkEvent::ClientJoin(id) = event {
            println!("{} {} {}", stamp(), "join".green(), id);
        }
    });
    client.on(EventKind::ClientExit, |event| {
        if let LinkEvent::ClientExit(id) = event {
            println!("{} {} {}", stamp(), "exit".yellow(), id);
        }
    });
    client.on(EventKind::ClientState, |event| {
        if let LinkEvent::ClientState { client, state } = event {
            println!("{} {} {} {}", stamp(), "peer".blue(), client, state);
        }
    });
}

fn stamp() -> ColoredString {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string().dimmed()
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
