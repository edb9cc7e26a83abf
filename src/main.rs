use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};

use rbtctl::config::{DEFAULT_CHANNEL, load_config};
use rbtctl::device::Device;
use rbtctl::logging::init_logging;
use rbtctl::session::{AttemptOutcome, BluetoothManager};

/// CLI tool for managing Bluetooth devices.
#[derive(Parser, Debug)]
#[command(name = "rbtctl", version, about)]
struct Cli {
    /// Manage connections automatically.
    #[arg(long)]
    manage: bool,

    /// Scan for available Bluetooth devices.
    #[arg(long)]
    scan: bool,

    /// Connect to a specific Bluetooth device by MAC address.
    #[arg(long, value_name = "MAC")]
    connect: Option<String>,

    /// Disconnect all devices.
    #[arg(long)]
    disconnect: bool,

    /// List all connected devices.
    #[arg(long)]
    list: bool,

    /// Configuration channel to merge over the default profile.
    #[arg(long, default_value = DEFAULT_CHANNEL)]
    channel: String,

    /// Configuration file to load.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print scan and list results as JSON.
    #[arg(long)]
    json: bool,

    /// Enable verbose output.
    #[arg(long)]
    verbose: bool,
}

fn print_devices(devices: &[Device], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(devices)?);
    } else {
        for device in devices {
            println!("{}  {}", device.address, device.name);
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_config(cli.config.as_deref(), &cli.channel)
        .context("failed to load configuration")?;
    init_logging(&settings.logging, cli.verbose)?;
    let manager = BluetoothManager::new(settings)?;

    if cli.manage {
        let report = manager.manage_connections().await?;
        for attempt in &report.attempts {
            match &attempt.outcome {
                AttemptOutcome::Connected => println!("{}  connected", attempt.address),
                AttemptOutcome::Rejected { .. } => println!("{}  rejected", attempt.address),
                AttemptOutcome::Errored(e) => println!("{}  error: {}", attempt.address, e),
            }
        }
        info!("Bluetooth device management round finished.");
    }

    if cli.scan {
        info!("Scanning for available bluetooth devices...");
        let devices = manager.discover_devices().await?;
        info!("{} bluetooth device(s) found", devices.len());
        print_devices(&devices, cli.json)?;
    }

    if let Some(address) = &cli.connect {
        if !Device::is_valid_address(address) {
            warn!("'{}' does not look like a device address", address);
        }
        info!("Attempting to connect to {}...", address);
        if manager.connect_device(address).await? {
            info!("Connected to device {}.", address);
        }
    }

    if cli.disconnect {
        info!("Disconnecting from all devices...");
        manager.disconnect_all().await?;
    }

    if cli.list {
        info!("Listing connected devices...");
        let devices = manager.list_connected_devices().await?;
        info!("{} connected bluetooth device(s) found", devices.len());
        print_devices(&devices, cli.json)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if log::log_enabled!(log::Level::Error) {
                error!("Bluetooth manager error: {e:#}");
            } else {
                eprintln!("Bluetooth manager error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
