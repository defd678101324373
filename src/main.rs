// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Duration;
use tracing::{info, warn};

use insynctive_bridge::{BridgeConfig, BridgeEvent, DeviceState, Insynctive};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "insynctive")]
#[command(about = "Talk to a Pella Insynctive bridge")]
struct Cli {
    /// Path to an optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bridge IPv4 address (overrides the config file)
    #[arg(long, env = "INSYNCTIVE_BRIDGE_IP")]
    host: Option<String>,

    /// Bridge telnet port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. "debug" or "insynctive_bridge=trace" (default: RUST_LOG, then info)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print bridge version, MAC and host
    Info,
    /// Print a snapshot of every device
    Devices,
    /// Print a snapshot of one device
    Device {
        /// Device ordinal (1-based)
        id: u32,
    },
    /// Print device status changes until interrupted
    Watch,
    /// Set the bridge's static IP address
    SetIp {
        ip: String,
    },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Config {
    #[serde(default)]
    bridge: BridgeToml,
}

#[derive(Debug, Default, Deserialize)]
struct BridgeToml {
    host: Option<String>,
    port: Option<u16>,
    connect_timeout_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&text).context("Failed to parse config file")
}

fn build_bridge_config(cli: &Cli, toml: &BridgeToml) -> Result<BridgeConfig> {
    let host = cli
        .host
        .clone()
        .or_else(|| toml.host.clone())
        .context("No bridge host: pass --host, set INSYNCTIVE_BRIDGE_IP or add [bridge] host")?;

    let mut builder = BridgeConfig::builder().host(host);
    if let Some(port) = cli.port.or(toml.port) {
        builder = builder.port(port);
    }
    if let Some(ms) = toml.connect_timeout_ms {
        builder = builder.connect_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = toml.command_timeout_ms {
        builder = builder.command_timeout(Duration::from_millis(ms));
    }
    if let Some(attempts) = toml.reconnect_attempts {
        builder = builder.reconnect_attempts(attempts);
    }
    if let Some(ms) = toml.reconnect_delay_ms {
        builder = builder.reconnect_delay(Duration::from_millis(ms));
    }
    Ok(builder.build())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One line of `watch` output: `{now, op, ...}`.
#[derive(Serialize)]
struct WatchLine<'a> {
    now: u64,
    op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    old_status_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a DeviceState>,
}

impl<'a> WatchLine<'a> {
    fn new(op: &'static str) -> Self {
        Self {
            now: now_epoch_ms(),
            op,
            attempt: None,
            max: None,
            old_status_code: None,
            device: None,
        }
    }

    fn from_event(event: &'a BridgeEvent) -> Self {
        match event {
            BridgeEvent::Connected => Self::new("connected"),
            BridgeEvent::Disconnected => Self::new("disconnected"),
            BridgeEvent::Reconnecting { attempt, max } => Self {
                attempt: Some(*attempt),
                max: Some(*max),
                ..Self::new("reconnecting")
            },
            BridgeEvent::Unreachable => Self::new("unreachable"),
            BridgeEvent::DeviceStatusChanged {
                old_status_code,
                device,
                ..
            } => Self {
                old_status_code: old_status_code.as_deref(),
                device: Some(device),
                ..Self::new("status")
            },
        }
    }
}

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run_command(bridge: &Insynctive, command: &Cmd) -> Result<()> {
    match command {
        Cmd::Info => print_json(&bridge.get_info().await?),
        Cmd::Devices => {
            let mut snapshots = Vec::new();
            for device in bridge.get_devices(false).await? {
                snapshots.push(device.snapshot().await?);
            }
            print_json(&snapshots)
        }
        Cmd::Device { id } => {
            let device = bridge
                .get_device_by_id(*id)
                .await
                .with_context(|| format!("Device with id {} not found", id))?;
            print_json(&device.snapshot().await?)
        }
        Cmd::SetIp { ip } => {
            let response = bridge.set_static_ip(ip).await?;
            println!("{}", response);
            Ok(())
        }
        Cmd::Watch => watch(bridge).await,
    }
}

async fn watch(bridge: &Insynctive) -> Result<()> {
    let mut events = bridge.subscribe();
    let mut sigterm = signal(SignalKind::terminate())?;

    info!("Watching {} for status changes. Send SIGINT/SIGTERM to stop.", bridge.host());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&WatchLine::from_event(&event))?);
                    if matches!(event, BridgeEvent::Unreachable) {
                        anyhow::bail!("Bridge at {} is unreachable", bridge.host());
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} event(s)", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --log-level wins over RUST_LOG. Default: info. Logs go to stderr so
    // stdout stays machine-readable.
    let env_filter = match &cli.log_level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {level}"))?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_ref())?;
    let bridge_config = build_bridge_config(&cli, &config.bridge)?;

    info!("Connecting to bridge at {}", bridge_config.address());
    let bridge = Insynctive::with_config(bridge_config)?;
    bridge
        .connect()
        .await
        .with_context(|| format!("Failed to connect to bridge at {}", bridge.host()))?;

    let result = run_command(&bridge, &cli.command).await;

    if let Err(e) = bridge.disconnect().await {
        warn!("Error during disconnect: {e}");
    }
    result
}
