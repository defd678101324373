// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{is_valid_ipv4, BridgeConfig, DEFAULT_EVENT_CAPACITY};
use crate::devices::Device;
use crate::error::{InsynctiveError, Result};
use crate::event::{
    event_channel, BridgeEvent, EventReceiver, EventSender, NotificationEvent, TransportEvent,
    TransportEventReceiver,
};
use crate::protocol::{parse_bridge_info, parse_first_decimal, Command};
use crate::transport::telnet::TelnetTransport;
use crate::transport::{ConnectionState, Transport};

type DeviceMap<T> = Arc<RwLock<BTreeMap<u32, Arc<Device<T>>>>>;

/// Identity reported by `?BRIDGEINFO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeInfo {
    pub version: Option<String>,
    pub mac: Option<String>,
    pub host: String,
}

/// Client for one Insynctive bridge.
///
/// Owns the transport and the device collection, routes pushed status
/// notifications to devices and re-emits them as [`BridgeEvent`]s.
///
/// # Example
///
/// ```no_run
/// use insynctive_bridge::Insynctive;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let bridge = Insynctive::new("192.168.1.20")?;
///     let mut events = bridge.subscribe();
///     bridge.connect().await?;
///
///     for device in bridge.get_devices(false).await? {
///         println!("{}: {}", device.id, device.get_status().await?);
///     }
///
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     tokio::signal::ctrl_c().await?;
///     bridge.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct Insynctive<T: Transport = TelnetTransport> {
    host: String,
    transport: Arc<T>,
    devices: DeviceMap<T>,
    event_tx: EventSender,
    router_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Insynctive<TelnetTransport> {
    /// Client for the bridge at `host` with default settings.
    ///
    /// Fails with `InvalidHost` if `host` is not an IPv4 literal. No
    /// connection is attempted.
    pub fn new(host: impl Into<String>) -> Result<Self> {
        Self::with_config(BridgeConfig::for_host(host))
    }

    pub fn with_config(config: BridgeConfig) -> Result<Self> {
        let capacity = config.event_capacity;
        let host = config.host.clone();
        let transport = TelnetTransport::new(config)?;
        Ok(Self::build(host, Arc::new(transport), capacity))
    }
}

impl<T: Transport> Insynctive<T> {
    /// Client over an existing transport.
    pub fn with_transport(host: impl Into<String>, transport: Arc<T>) -> Result<Self> {
        let host = host.into();
        if !is_valid_ipv4(&host) {
            return Err(InsynctiveError::InvalidHost { host });
        }
        Ok(Self::build(host, transport, DEFAULT_EVENT_CAPACITY))
    }

    fn build(host: String, transport: Arc<T>, capacity: usize) -> Self {
        let (event_tx, _) = event_channel(capacity);
        Self {
            host,
            transport,
            devices: Arc::new(RwLock::new(BTreeMap::new())),
            event_tx,
            router_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Subscribe to bridge events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Connect, enumerate devices and start routing notifications.
    pub async fn connect(&self) -> Result<()> {
        // Subscribe first so nothing pushed during enumeration is lost
        let transport_rx = self.transport.subscribe();
        self.transport.connect().await?;
        self.get_devices(true).await?;

        let handle = spawn_router(transport_rx, self.devices.clone(), self.event_tx.clone());
        if let Ok(mut slot) = self.router_handle.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    /// Disconnect and forget every device.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.router_handle.lock().ok().and_then(|mut slot| slot.take()) {
            handle.abort();
        }
        let was_active = self.transport.state() != ConnectionState::Disconnected;

        self.transport.disconnect().await?;
        self.devices.write().await.clear();

        if was_active {
            let _ = self.event_tx.send(BridgeEvent::Disconnected);
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn send(&self, command: Command) -> Result<String> {
        self.transport.send_command(&command.to_wire_string()).await
    }

    pub async fn get_info(&self) -> Result<BridgeInfo> {
        let response = self.send(Command::BridgeInfo).await?;
        let (version, mac) = match parse_bridge_info(&response) {
            Some((version, mac)) => (Some(version), Some(mac)),
            None => {
                debug!("Unparsable bridge info: {:?}", response);
                (None, None)
            }
        };
        Ok(BridgeInfo {
            version,
            mac,
            host: self.host.clone(),
        })
    }

    /// Number of devices the bridge reports, 0 if the answer has no number.
    pub async fn get_device_count(&self) -> Result<u32> {
        let response = self.send(Command::DeviceCount).await?;
        Ok(parse_first_decimal(&response).unwrap_or(0))
    }

    /// Devices in id order.
    ///
    /// The collection is rebuilt from a fresh count when it is empty or
    /// `force_refresh` is set. Rebuilding discards all cached device state.
    pub async fn get_devices(&self, force_refresh: bool) -> Result<Vec<Arc<Device<T>>>> {
        if !force_refresh {
            let devices = self.devices.read().await;
            if !devices.is_empty() {
                return Ok(devices.values().cloned().collect());
            }
        }

        let count = self.get_device_count().await?;
        let fresh: BTreeMap<u32, Arc<Device<T>>> = (1..=count)
            .map(|id| (id, Arc::new(Device::new(id, self.transport.clone()))))
            .collect();
        let list = fresh.values().cloned().collect();
        *self.devices.write().await = fresh;
        info!("Found {} device(s)", count);
        Ok(list)
    }

    /// Current devices without any I/O.
    pub async fn devices(&self) -> Vec<Arc<Device<T>>> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn get_device_by_id(&self, id: u32) -> Option<Arc<Device<T>>> {
        self.devices.read().await.get(&id).cloned()
    }

    /// Set the bridge's static IP and return the raw response.
    ///
    /// An invalid address is rejected locally; nothing is sent.
    pub async fn set_static_ip(&self, ip: &str) -> Result<String> {
        if !is_valid_ipv4(ip) {
            error!("Invalid IP address specified: {}", ip);
            return Err(InsynctiveError::InvalidIp { ip: ip.to_string() });
        }
        self.send(Command::SetStaticIp { ip: ip.to_string() }).await
    }

    /// Apply a status notification. Returns true if a device changed.
    pub async fn handle_notification(&self, event: NotificationEvent) -> bool {
        route_notification(&self.devices, &self.event_tx, event).await
    }
}

impl<T: Transport> Drop for Insynctive<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.router_handle.lock().ok().and_then(|mut slot| slot.take()) {
            handle.abort();
        }
    }
}

fn spawn_router<T: Transport>(
    mut transport_rx: TransportEventReceiver,
    devices: DeviceMap<T>,
    event_tx: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transport_rx.recv().await {
                Ok(TransportEvent::Notification(notification)) => {
                    route_notification(&devices, &event_tx, notification).await;
                }
                Ok(event) => {
                    if let Some(event) = BridgeEvent::from_transport(event) {
                        let _ = event_tx.send(event);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("Event router lagged, {} event(s) dropped", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn route_notification<T: Transport>(
    devices: &DeviceMap<T>,
    event_tx: &EventSender,
    notification: NotificationEvent,
) -> bool {
    let Some(device) = devices.read().await.get(&notification.device_id).cloned() else {
        debug!("Notification for unknown device {}", notification.device_id);
        return false;
    };

    if device.status_code().await.as_deref() == Some(notification.status_code.as_str()) {
        return false;
    }

    let old_status_code = device.apply_status_code(&notification.status_code).await;
    let state = device.state().await;
    info!(
        "Status change event: {{id: {}, status: {}}}",
        state.device_id, state.status
    );
    let _ = event_tx.send(BridgeEvent::DeviceStatusChanged {
        device_id: notification.device_id,
        old_status_code,
        device: state,
    });
    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::devices::DeviceStatus;
    use crate::transport::testing::FakeTransport;

    fn bridge() -> (Insynctive<FakeTransport>, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new());
        let bridge = Insynctive::with_transport("192.168.1.20", transport.clone()).unwrap();
        (bridge, transport)
    }

    async fn next_event(events: &mut EventReceiver) -> BridgeEvent {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event within a second")
            .expect("open channel")
    }

    fn notification(device_id: u32, status_code: &str) -> NotificationEvent {
        NotificationEvent {
            device_id,
            status_code: status_code.to_string(),
        }
    }

    #[test]
    fn test_invalid_host_rejected() {
        let err = Insynctive::new("999.1.1.1").err();
        assert!(matches!(err, Some(InsynctiveError::InvalidHost { ref host }) if host == "999.1.1.1"));

        let transport = Arc::new(FakeTransport::new());
        assert!(Insynctive::with_transport("bridge.local", transport.clone()).is_err());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_device_count() {
        let (bridge, transport) = bridge();
        transport
            .respond("?POINTCOUNT", "Count: 4")
            .respond("?POINTCOUNT", "none");
        assert_eq!(bridge.get_device_count().await.unwrap(), 4);
        assert_eq!(bridge.get_device_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_info() {
        let (bridge, transport) = bridge();
        transport
            .respond("?BRIDGEINFO", "Version: A1B2, MAC: aa:bb:cc:dd:ee:ff")
            .respond("?BRIDGEINFO", "garbage");

        let info = bridge.get_info().await.unwrap();
        assert_eq!(info.version.as_deref(), Some("A1B2"));
        assert_eq!(info.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(info.host, "192.168.1.20");

        let info = bridge.get_info().await.unwrap();
        assert_eq!(info.version, None);
        assert_eq!(info.mac, None);
    }

    #[tokio::test]
    async fn test_get_devices_rebuild() {
        let (bridge, transport) = bridge();
        transport
            .respond("?POINTCOUNT", "Count: 3")
            .respond("?POINTCOUNT", "Count: 2");

        let devices = bridge.get_devices(false).await.unwrap();
        let ids: Vec<u32> = devices.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        devices[0].apply_status_code("01").await;

        // Served from the collection
        assert_eq!(bridge.get_devices(false).await.unwrap().len(), 3);
        assert_eq!(transport.sent_count("?POINTCOUNT"), 1);

        let devices = bridge.get_devices(true).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].status_code().await, None);
        assert!(bridge.get_device_by_id(3).await.is_none());
        assert_eq!(bridge.get_device_by_id(2).await.unwrap().device_id, "002");
    }

    #[tokio::test]
    async fn test_set_static_ip() {
        let (bridge, transport) = bridge();
        transport.respond("!BRIDGESETIP,$192.168.1.50", "OK");

        let err = bridge.set_static_ip("192.168.1.500").await.unwrap_err();
        assert!(matches!(err, InsynctiveError::InvalidIp { .. }));
        assert!(transport.sent().is_empty());

        assert_eq!(bridge.set_static_ip("192.168.1.50").await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_notification_dedup() {
        let (bridge, transport) = bridge();
        transport.respond("?POINTCOUNT", "Count: 2");
        bridge.get_devices(true).await.unwrap();
        let mut events = bridge.subscribe();

        let device = bridge.get_device_by_id(2).await.unwrap();
        device.apply_status_code("00").await;

        assert!(!bridge.handle_notification(notification(2, "00")).await);
        assert!(events.try_recv().is_err());

        assert!(bridge.handle_notification(notification(2, "05")).await);
        match events.try_recv().unwrap() {
            BridgeEvent::DeviceStatusChanged {
                device_id,
                old_status_code,
                device,
            } => {
                assert_eq!(device_id, 2);
                assert_eq!(old_status_code.as_deref(), Some("00"));
                assert_eq!(device.status, DeviceStatus::Open);
                assert!(device.temper);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(!bridge.handle_notification(notification(9, "01")).await);
    }

    #[tokio::test]
    async fn test_connect_routes_notifications() {
        let (bridge, transport) = bridge();
        transport
            .respond("?POINTCOUNT", "Count: 2")
            .respond("?POINTDEVICE-002", "$01");
        let mut events = bridge.subscribe();

        bridge.connect().await.unwrap();
        bridge
            .get_device_by_id(2)
            .await
            .unwrap()
            .get_type_code()
            .await
            .unwrap();

        transport.push(TransportEvent::Notification(notification(2, "05")));
        transport.push(TransportEvent::Notification(notification(2, "05")));
        transport.push(TransportEvent::Notification(notification(1, "00")));

        assert!(matches!(next_event(&mut events).await, BridgeEvent::Connected));
        match next_event(&mut events).await {
            BridgeEvent::DeviceStatusChanged { device_id, device, .. } => {
                assert_eq!(device_id, 2);
                assert_eq!(device.status, DeviceStatus::Open);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match next_event(&mut events).await {
            BridgeEvent::DeviceStatusChanged { device_id, .. } => assert_eq!(device_id, 1),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_clears_devices() {
        let (bridge, transport) = bridge();
        transport.respond("?POINTCOUNT", "Count: 2");
        bridge.connect().await.unwrap();
        assert_eq!(bridge.devices().await.len(), 2);

        bridge.disconnect().await.unwrap();
        assert!(bridge.devices().await.is_empty());
        assert!(!bridge.is_connected());
        assert!(bridge.get_device_by_id(1).await.is_none());
    }
}
