// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client
//
//! # insynctive-bridge
//!
//! Client for the Pella Insynctive bridge line protocol.
//!
//! The bridge answers text commands over a telnet-style stream and pushes
//! `POINTSTATUS-<id>,$<code>` lines whenever a door, window, garage door or
//! lock changes state. This crate correlates commands with their responses,
//! keeps a cached typed view of every device, and turns pushed status lines
//! into [`BridgeEvent`]s.
//!
//! ## Quick Start
//!
//! ```no_run
//! use insynctive_bridge::{BridgeEvent, Insynctive};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bridge = Insynctive::new("192.168.1.20")?;
//!     let mut events = bridge.subscribe();
//!     bridge.connect().await?;
//!
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let BridgeEvent::DeviceStatusChanged { device, .. } = event {
//!                 println!("{} is now {}", device.device_id, device.status);
//!             }
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod constants;
pub mod devices;
pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use bridge::{BridgeInfo, Insynctive};
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use devices::{Device, DeviceSnapshot, DeviceState, DeviceStatus, DeviceType};
pub use error::{InsynctiveError, Result};
pub use event::{BridgeEvent, EventReceiver, NotificationEvent, TransportEvent};
pub use protocol::{Command, LinePatterns};
pub use transport::telnet::TelnetTransport;
pub use transport::{ConnectionState, Transport};
