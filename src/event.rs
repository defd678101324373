// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

use crate::devices::device::DeviceState;

/// Unsolicited status change parsed from a `POINTSTATUS-<id>,$<code>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// 1-based device ordinal
    pub device_id: u32,
    /// Raw hex status code
    pub status_code: String,
}

/// Events emitted by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Stream connection established (initially or after a reconnect)
    Connected,
    /// Stream connection closed
    Disconnected,
    /// Connection lost unexpectedly; reconnect attempt `attempt` of `max` is scheduled
    Reconnecting { attempt: u32, max: u32 },
    /// Reconnect budget exhausted; no further automatic attempts
    Unreachable,
    /// Device status pushed by the bridge
    Notification(NotificationEvent),
}

/// Events emitted by [`Insynctive`](crate::Insynctive).
///
/// Users subscribe via `bridge.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<BridgeEvent>`.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Connection to the bridge established
    Connected,
    /// Connection to the bridge lost or closed
    Disconnected,
    /// Automatic reconnect in progress
    Reconnecting { attempt: u32, max: u32 },
    /// Bridge could not be reached within the reconnect budget
    Unreachable,
    /// A pushed notification changed a device's status
    DeviceStatusChanged {
        device_id: u32,
        old_status_code: Option<String>,
        device: DeviceState,
    },
}

impl BridgeEvent {
    /// Lifecycle counterpart of a transport event. Notifications have none:
    /// they are routed to devices instead.
    pub fn from_transport(event: TransportEvent) -> Option<Self> {
        match event {
            TransportEvent::Connected => Some(BridgeEvent::Connected),
            TransportEvent::Disconnected => Some(BridgeEvent::Disconnected),
            TransportEvent::Reconnecting { attempt, max } => {
                Some(BridgeEvent::Reconnecting { attempt, max })
            }
            TransportEvent::Unreachable => Some(BridgeEvent::Unreachable),
            TransportEvent::Notification(_) => None,
        }
    }
}

/// Type alias for the transport broadcast sender.
pub type TransportEventSender = tokio::sync::broadcast::Sender<TransportEvent>;

/// Type alias for the transport broadcast receiver.
pub type TransportEventReceiver = tokio::sync::broadcast::Receiver<TransportEvent>;

/// Type alias for the bridge broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<BridgeEvent>;

/// Type alias for the bridge broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<BridgeEvent>;

/// Create a new bridge event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}

/// Create a new transport event channel with the given capacity.
pub fn transport_channel(capacity: usize) -> (TransportEventSender, TransportEventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
