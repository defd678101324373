// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

pub mod command;
pub mod telnet;

use std::future::Future;

use crate::error::Result;
use crate::event::TransportEventReceiver;

/// Lifecycle of the stream connection to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Command/response transport to a bridge.
///
/// Devices and the registry only talk to the bridge through this trait, so
/// tests can substitute an in-memory implementation.
pub trait Transport: Send + Sync + 'static {
    /// Open the stream connection. Failures are returned, never retried.
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Close the stream connection. No-op when not connected.
    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Send a command and wait for the response line correlated to it.
    fn send_command(&self, command: &str) -> impl Future<Output = Result<String>> + Send;

    /// Subscribe to notifications and lifecycle events.
    fn subscribe(&self) -> TransportEventReceiver;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Whether commands can currently be sent.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}
