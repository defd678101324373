//! Example: Subscribe to device status events and print changes.

use insynctive_bridge::{BridgeConfig, BridgeEvent, Insynctive};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::builder()
        .host("192.168.1.20")
        .reconnect_attempts(5)
        .build();

    let bridge = Insynctive::with_config(config)?;
    let mut events = bridge.subscribe();
    bridge.connect().await?;

    let devices = bridge.get_devices(false).await?;
    println!("--- Devices ({}) ---", devices.len());
    for device in &devices {
        let snapshot = device.snapshot().await?;
        println!(
            "  Device {}: {:20} status={} battery={:?} temper={}",
            device.device_id, snapshot.device_type, snapshot.status, snapshot.battery, snapshot.temper,
        );
    }

    println!("\nListening for device events (Ctrl+C to stop)...\n");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(BridgeEvent::DeviceStatusChanged { device_id, old_status_code, device }) => {
                        println!(
                            "Device {} changed: {:?} -> {:?} ({}{})",
                            device_id,
                            old_status_code,
                            device.status_code,
                            device.status,
                            if device.temper { ", tamper" } else { "" },
                        );
                    }
                    Ok(BridgeEvent::Unreachable) => {
                        println!("Bridge unreachable!");
                        break;
                    }
                    Ok(event) => {
                        println!("Event: {:?}", event);
                    }
                    Err(e) => {
                        println!("Event channel error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    bridge.disconnect().await?;
    Ok(())
}
